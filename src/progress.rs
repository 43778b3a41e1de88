//! Progress reporting and cancellation support.
//!
//! This module provides [`ProgressCallback`] for monitoring chunk completion,
//! [`CancellationToken`] for cooperative cancellation, and [`ProgressInfo`]
//! for detailed progress snapshots.
//!
//! Callbacks run on a dedicated reporter thread fed through an unbounded
//! channel, so a slow callback never holds up a worker. A callback that
//! panics is logged and ignored.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use framechunk::{ExtractOptions, ProgressCallback, ProgressInfo};
//!
//! struct PrintProgress;
//!
//! impl ProgressCallback for PrintProgress {
//!     fn on_progress(&self, info: &ProgressInfo) {
//!         println!("{}/{} chunks", info.completed_chunks, info.total_chunks);
//!     }
//! }
//!
//! let options = ExtractOptions::new().with_progress(Arc::new(PrintProgress));
//!
//! // Closures taking `(completed, total)` work too.
//! let options = ExtractOptions::new()
//!     .with_progress(Arc::new(|completed: usize, total: usize| {
//!         eprintln!("{completed}/{total}");
//!     }));
//! ```

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{Sender, unbounded};

/// A snapshot of job progress, taken when a chunk completes.
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    /// Chunks that reached a terminal state so far. Never decreases.
    pub completed_chunks: usize,
    /// Chunks in the job.
    pub total_chunks: usize,
    /// Index of the chunk whose completion triggered this report.
    pub chunk_index: usize,
    /// Whether that chunk succeeded.
    pub succeeded: bool,
    /// Completion percentage (0.0 – 100.0).
    pub percentage: f32,
    /// Wall-clock time elapsed since the job started.
    pub elapsed: Duration,
    /// Estimated time remaining, based on current throughput.
    pub estimated_remaining: Option<Duration>,
}

/// Trait for receiving progress updates.
///
/// Implementations must be [`Send`] and [`Sync`]; they are invoked from the
/// reporter thread.
///
/// Progress callbacks are **infallible**; they observe but cannot halt
/// the job. Use [`CancellationToken`] for cooperative cancellation.
pub trait ProgressCallback: Send + Sync {
    /// Called once per completed chunk.
    fn on_progress(&self, info: &ProgressInfo);
}

impl<F> ProgressCallback for F
where
    F: Fn(usize, usize) + Send + Sync,
{
    fn on_progress(&self, info: &ProgressInfo) {
        self(info.completed_chunks, info.total_chunks);
    }
}

/// A no-op implementation that discards all progress notifications.
///
/// This is the default when no callback is configured.
pub(crate) struct NoOpProgress;

impl ProgressCallback for NoOpProgress {
    fn on_progress(&self, _info: &ProgressInfo) {}
}

/// Cooperative cancellation token backed by an [`AtomicBool`].
///
/// Clone this token and share it between threads; call
/// [`cancel`](CancellationToken::cancel) from any thread to stop further
/// chunk dispatch. Chunks already running finish, but their output is
/// discarded and the job ends with
/// [`FrameChunkError::Cancelled`](crate::FrameChunkError::Cancelled).
///
/// # Example
///
/// ```
/// use framechunk::CancellationToken;
///
/// let token = CancellationToken::new();
/// assert!(!token.is_cancelled());
///
/// // From another thread (or a signal handler, etc.):
/// token.cancel();
/// assert!(token.is_cancelled());
/// ```
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new, non-cancelled token.
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request cancellation.
    ///
    /// All clones of this token will observe the cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Check whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Internal helper that counts completions, computes timing and hands
/// snapshots to the reporter thread.
///
/// Callers serialise [`advance`](ProgressTracker::advance) (the job tracker
/// holds it behind its lock), which keeps `completed_chunks` monotonic.
pub(crate) struct ProgressTracker {
    total: usize,
    current: usize,
    start_time: Instant,
    sender: Option<Sender<ProgressInfo>>,
    reporter: Option<JoinHandle<()>>,
}

impl ProgressTracker {
    /// Create a tracker and start its reporter thread.
    pub(crate) fn new(callback: Arc<dyn ProgressCallback>, total: usize) -> Self {
        let (sender, receiver) = unbounded::<ProgressInfo>();
        let reporter = thread::Builder::new()
            .name("framechunk-progress".to_string())
            .spawn(move || {
                for info in receiver {
                    let outcome = catch_unwind(AssertUnwindSafe(|| callback.on_progress(&info)));
                    if outcome.is_err() {
                        log::warn!(
                            "Progress callback panicked at {}/{}; ignoring",
                            info.completed_chunks,
                            info.total_chunks,
                        );
                    }
                }
            });

        let reporter = match reporter {
            Ok(handle) => Some(handle),
            Err(error) => {
                log::warn!("Progress reporting disabled: {error}");
                None
            }
        };
        let sender = reporter.as_ref().map(|_| sender);

        Self {
            total,
            current: 0,
            start_time: Instant::now(),
            sender,
            reporter,
        }
    }

    /// Record one completed chunk and queue a report.
    pub(crate) fn advance(&mut self, chunk_index: usize, succeeded: bool) -> usize {
        self.current += 1;

        let elapsed = self.start_time.elapsed();
        let percentage = if self.total > 0 {
            (self.current as f32 / self.total as f32) * 100.0
        } else {
            100.0
        };
        let remaining = self.total.saturating_sub(self.current) as u32;
        let estimated_remaining = (elapsed / self.current as u32).checked_mul(remaining);

        let info = ProgressInfo {
            completed_chunks: self.current,
            total_chunks: self.total,
            chunk_index,
            succeeded,
            percentage,
            elapsed,
            estimated_remaining,
        };

        if let Some(sender) = &self.sender {
            let _ = sender.send(info);
        }
        self.current
    }

    /// Number of completions recorded so far.
    pub(crate) fn current(&self) -> usize {
        self.current
    }

    /// Close the channel and wait for every queued report to be delivered.
    pub(crate) fn finish(&mut self) {
        self.sender.take();
        if let Some(reporter) = self.reporter.take() {
            let _ = reporter.join();
        }
    }
}

impl Drop for ProgressTracker {
    fn drop(&mut self) {
        self.finish();
    }
}
