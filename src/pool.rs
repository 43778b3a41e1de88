//! Bounded-concurrency chunk dispatch.
//!
//! [`WorkerPool`] owns a [`rayon`] thread pool of `W` threads. Each call to
//! [`WorkerPool::start`] spawns a dispatcher thread that hands ranges to the
//! pool strictly in index order, never keeping more than `W` extractions in
//! flight. Completed [`ChunkResult`]s arrive on a bounded channel in
//! completion order, which need not match index order.
//!
//! Dispatch stops as soon as the run is cancelled (caller token, dropped
//! consumer, or a failure under fail-fast). Chunks already running finish;
//! dropping the [`PoolRun`] waits for them and deletes their output.

use std::collections::BTreeSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{Receiver, Sender, bounded};
use rayon::{ThreadPool, ThreadPoolBuilder};
use tempfile::TempDir;

use crate::chunk::{ChunkExtractor, ChunkResult, ChunkStatus, FailureReason};
use crate::configuration::ExtractOptions;
use crate::error::FrameChunkError;
use crate::planner::TimeRange;
use crate::progress::{CancellationToken, ProgressTracker};

/// Lifecycle of a whole extraction job.
///
/// `Dispatching` and `Merging` overlap in time: early chunks are merged while
/// later ones are still being extracted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    /// Ranges are known, nothing has been dispatched.
    Planned,
    /// Chunks are being handed to workers.
    Dispatching,
    /// The merge cursor has emitted at least one chunk.
    Merging,
    /// Every chunk succeeded and the full sequence was emitted.
    Completed,
    /// The job stopped on an unrecoverable gap or a fail-fast abort.
    Failed,
    /// Failed chunks were skipped; see the reported missing ranges.
    PartiallyCompleted,
    /// The caller cancelled the job.
    Cancelled,
}

impl JobState {
    /// Returns `true` for the four terminal states.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::PartiallyCompleted | JobState::Cancelled
        )
    }
}

/// A point-in-time view of a job's bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionJob {
    /// Number of chunks in the plan.
    pub total_chunks: usize,
    /// Chunks whose extraction has started so far.
    pub dispatched_count: usize,
    /// Chunks that reached a terminal status.
    pub completed_count: usize,
    /// Indices of chunks that failed.
    pub failed_chunks: BTreeSet<usize>,
    /// Status of every chunk, by index.
    pub statuses: Vec<ChunkStatus>,
    /// Current job state.
    pub state: JobState,
}

struct TrackerState {
    statuses: Vec<ChunkStatus>,
    dispatched: usize,
    failed: BTreeSet<usize>,
    state: JobState,
    progress: ProgressTracker,
}

/// Shared per-job status table. Written by the dispatcher and the workers,
/// read by anyone holding the run.
pub(crate) struct JobTracker {
    inner: Mutex<TrackerState>,
}

impl JobTracker {
    fn new(total: usize, options: &ExtractOptions) -> Self {
        Self {
            inner: Mutex::new(TrackerState {
                statuses: vec![ChunkStatus::Pending; total],
                dispatched: 0,
                failed: BTreeSet::new(),
                state: JobState::Planned,
                progress: ProgressTracker::new(options.progress.clone(), total),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mark_running(&self, index: usize) {
        let mut state = self.lock();
        state.statuses[index] = ChunkStatus::Running;
        state.dispatched += 1;
    }

    fn mark_finished(&self, index: usize, status: ChunkStatus) {
        let mut state = self.lock();
        state.statuses[index] = status;
        if status == ChunkStatus::Failed {
            state.failed.insert(index);
        }
        // Reported under the lock so completion counts arrive in order.
        state.progress.advance(index, status == ChunkStatus::Succeeded);
    }

    /// Move the job to `next`. Terminal states are final.
    pub(crate) fn set_state(&self, next: JobState) {
        let mut state = self.lock();
        if !state.state.is_terminal() {
            state.state = next;
        }
    }

    pub(crate) fn state(&self) -> JobState {
        self.lock().state
    }

    pub(crate) fn snapshot(&self) -> ExtractionJob {
        let state = self.lock();
        ExtractionJob {
            total_chunks: state.statuses.len(),
            dispatched_count: state.dispatched,
            completed_count: state.progress.current(),
            failed_chunks: state.failed.clone(),
            statuses: state.statuses.clone(),
            state: state.state,
        }
    }

    /// Wait until every queued progress report has been delivered.
    pub(crate) fn finish_progress(&self) {
        self.lock().progress.finish();
    }
}

/// A fixed-size pool of extraction workers.
pub struct WorkerPool {
    workers: usize,
    threads: Arc<ThreadPool>,
}

impl WorkerPool {
    /// Create a pool running at most `workers` extractions at a time.
    ///
    /// # Errors
    ///
    /// - [`FrameChunkError::InvalidConfiguration`] if `workers` is zero.
    /// - [`FrameChunkError::WorkerPool`] if the threads cannot be spawned.
    pub fn new(workers: usize) -> Result<Self, FrameChunkError> {
        if workers == 0 {
            return Err(FrameChunkError::InvalidConfiguration(
                "max workers must be at least 1".to_string(),
            ));
        }

        let threads = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|index| format!("framechunk-worker-{index}"))
            .build()
            .map_err(|error| FrameChunkError::WorkerPool(error.to_string()))?;

        Ok(Self {
            workers,
            threads: Arc::new(threads),
        })
    }

    /// Maximum number of concurrent extractions.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Start extracting `ranges` in the background.
    ///
    /// `options` supplies fail-fast, the buffered-chunk bound, the
    /// cancellation token and the progress callback.
    pub fn start(
        &self,
        ranges: Vec<TimeRange>,
        extractor: Arc<ChunkExtractor>,
        options: &ExtractOptions,
    ) -> Result<PoolRun, FrameChunkError> {
        let tracker = Arc::new(JobTracker::new(ranges.len(), options));
        let stop = CancellationToken::new();

        let (results_sender, results) = bounded::<ChunkResult>(self.workers);
        let (buffer_sender, buffer_slots) = match options.max_buffered_chunks {
            Some(limit) => {
                let (sender, receiver) = bounded::<()>(limit);
                (Some(sender), Some(receiver))
            }
            None => (None, None),
        };

        let dispatch = Dispatch {
            threads: self.threads.clone(),
            extractor,
            tracker: tracker.clone(),
            results: results_sender,
            worker_slots: bounded::<()>(self.workers),
            buffer_slots: buffer_sender,
            stop: stop.clone(),
            cancellation: options.cancellation.clone(),
            fail_fast: options.fail_fast,
        };

        tracker.set_state(JobState::Dispatching);
        let dispatcher = thread::Builder::new()
            .name("framechunk-dispatch".to_string())
            .spawn(move || dispatch.run(ranges))
            .map_err(|error| FrameChunkError::WorkerPool(error.to_string()))?;

        Ok(PoolRun {
            results,
            buffer_slots,
            tracker,
            stop,
            dispatcher: Some(dispatcher),
            workspace: None,
        })
    }
}

struct Dispatch {
    threads: Arc<ThreadPool>,
    extractor: Arc<ChunkExtractor>,
    tracker: Arc<JobTracker>,
    results: Sender<ChunkResult>,
    /// One message per running extraction; capacity is the worker count.
    worker_slots: (Sender<()>, Receiver<()>),
    /// One message per dispatched chunk not yet consumed by the merger.
    buffer_slots: Option<Sender<()>>,
    stop: CancellationToken,
    cancellation: Option<CancellationToken>,
    fail_fast: bool,
}

impl Dispatch {
    fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
            || self
                .cancellation
                .as_ref()
                .is_some_and(CancellationToken::is_cancelled)
    }

    fn run(self, ranges: Vec<TimeRange>) {
        let total = ranges.len();
        let mut dispatched = 0;

        for range in ranges {
            if self.is_stopped() {
                break;
            }
            if let Some(buffer) = &self.buffer_slots {
                if buffer.send(()).is_err() {
                    break;
                }
            }
            if self.worker_slots.0.send(()).is_err() {
                break;
            }
            // Waiting for a slot can take a while; re-check before starting.
            if self.is_stopped() {
                break;
            }

            dispatched += 1;

            let extractor = self.extractor.clone();
            let tracker = self.tracker.clone();
            let results = self.results.clone();
            let release = self.worker_slots.1.clone();
            let stop = self.stop.clone();
            let cancellation = self.cancellation.clone();
            let fail_fast = self.fail_fast;

            self.threads.spawn_fifo(move || {
                // A queued task can start long after it was spawned.
                if stop.is_cancelled()
                    || cancellation
                        .as_ref()
                        .is_some_and(CancellationToken::is_cancelled)
                {
                    log::debug!("Chunk {range}: skipped, job stopped before it started");
                    let _ = release.recv();
                    return;
                }
                tracker.mark_running(range.index);

                let result = catch_unwind(AssertUnwindSafe(|| {
                    extractor.extract(ChunkResult::new(range))
                }))
                .unwrap_or_else(|_| {
                    log::warn!("Chunk {range}: decoder panicked");
                    ChunkResult::failed(range, FailureReason::Panic("decoder panicked".to_string()))
                });
                drop(extractor);

                let status = result.status();
                if fail_fast && status == ChunkStatus::Failed {
                    stop.cancel();
                }
                tracker.mark_finished(range.index, status);
                let _ = release.recv();
                // The receiver is gone when the run was dropped; the result
                // (and its directory) is discarded here.
                let _ = results.send(result);
            });
        }

        if dispatched < total {
            log::debug!("Dispatch stopped after queueing {dispatched} of {total} chunk(s)");
        } else {
            log::debug!("Dispatched all {total} chunk(s)");
        }
    }
}

/// A running job: the receiving end of the pool.
///
/// Dropping the run stops dispatch, waits for in-flight extractions, deletes
/// every unconsumed chunk directory and the job workspace.
pub struct PoolRun {
    results: Receiver<ChunkResult>,
    buffer_slots: Option<Receiver<()>>,
    tracker: Arc<JobTracker>,
    stop: CancellationToken,
    dispatcher: Option<JoinHandle<()>>,
    workspace: Option<TempDir>,
}

impl PoolRun {
    /// Wait for the next completed chunk, in completion order.
    ///
    /// Returns `None` once every dispatched chunk has been received and no
    /// more will be dispatched.
    pub fn recv(&self) -> Option<ChunkResult> {
        self.results.recv().ok()
    }

    /// Tell the dispatcher that one buffered chunk has been consumed.
    ///
    /// Only meaningful when a buffered-chunk bound is configured.
    pub fn release_slot(&self) {
        if let Some(slots) = &self.buffer_slots {
            let _ = slots.try_recv();
        }
    }

    /// Stop dispatching further chunks.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Returns `true` once dispatch was stopped internally (fail-fast or
    /// [`stop`](PoolRun::stop)).
    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Snapshot of the job's status table.
    pub fn job(&self) -> ExtractionJob {
        self.tracker.snapshot()
    }

    pub(crate) fn tracker(&self) -> Arc<JobTracker> {
        self.tracker.clone()
    }

    /// Keep `workspace` alive for as long as the run, deleting it last.
    pub(crate) fn attach_workspace(&mut self, workspace: TempDir) {
        self.workspace = Some(workspace);
    }
}

impl Drop for PoolRun {
    fn drop(&mut self) {
        self.stop.cancel();
        self.buffer_slots.take();
        // Drain until every sender (dispatcher and workers) is gone.
        while self.results.recv().is_ok() {}
        if let Some(dispatcher) = self.dispatcher.take() {
            let _ = dispatcher.join();
        }
        self.tracker.finish_progress();
        if let Some(workspace) = self.workspace.take() {
            if let Err(error) = workspace.close() {
                log::warn!("Failed to remove job workspace: {error}");
            }
        }
    }
}
