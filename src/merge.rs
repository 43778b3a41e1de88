//! Ordered reassembly of out-of-order chunk results.
//!
//! [`ResultMerger`] is a reorder buffer: completed chunks are parked by index
//! until the cursor reaches them, so emission order is always timeline order
//! whatever order the workers finish in. [`DirectoryWriter`] turns emitted
//! chunks into one contiguously numbered directory.
//!
//! # Example
//!
//! ```
//! use framechunk::{ChunkPlanner, ChunkResult, GapPolicy, MergeStep, ResultMerger};
//!
//! let ranges = ChunkPlanner::new(10.0, 1.0)?.plan(25.0)?;
//! let mut merger = ResultMerger::new(ranges.len(), GapPolicy::Strict);
//!
//! // Chunk 1 finishes first and is held back.
//! merger.accept(ChunkResult::succeeded(ranges[1], vec!["b.jpg".into()]));
//! assert!(merger.next_step().is_none());
//!
//! merger.accept(ChunkResult::succeeded(ranges[0], vec!["a.jpg".into()]));
//! match merger.next_step() {
//!     Some(Ok(MergeStep::Emit { chunk, first_global_index })) => {
//!         assert_eq!(chunk.index(), 0);
//!         assert_eq!(first_global_index, 0);
//!     }
//!     _ => unreachable!(),
//! }
//! # Ok::<(), framechunk::FrameChunkError>(())
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::chunk::{ChunkFailure, ChunkResult, ChunkStatus, FailureReason, GlobalFrame};
use crate::configuration::{ExtractOptions, GapPolicy};
use crate::error::FrameChunkError;
use crate::planner::TimeRange;
use crate::pool::{ExtractionJob, JobState, JobTracker, PoolRun};
use crate::progress::CancellationToken;

/// One unit of progress of the merge cursor.
#[derive(Debug)]
pub enum MergeStep {
    /// The chunk at the cursor succeeded. Its frames take the global indices
    /// `first_global_index..first_global_index + chunk.frame_count()`.
    Emit {
        /// The emitted chunk. Its directory is removed when it is dropped.
        chunk: ChunkResult,
        /// Global index of the chunk's first frame.
        first_global_index: u64,
    },
    /// The chunk at the cursor failed and was skipped.
    Gap(ChunkFailure),
}

/// Reorder buffer and merge cursor.
#[derive(Debug)]
pub struct ResultMerger {
    total_chunks: usize,
    policy: GapPolicy,
    buffered: BTreeMap<usize, ChunkResult>,
    cursor: usize,
    emitted_frames: u64,
    gaps: Vec<ChunkFailure>,
    aborted: bool,
}

impl ResultMerger {
    /// Create a merger expecting chunks `0..total_chunks`.
    pub fn new(total_chunks: usize, policy: GapPolicy) -> Self {
        Self {
            total_chunks,
            policy,
            buffered: BTreeMap::new(),
            cursor: 0,
            emitted_frames: 0,
            gaps: Vec::new(),
            aborted: false,
        }
    }

    /// Park a completed chunk until the cursor reaches it.
    ///
    /// Results that are not terminal, out of range, already passed by the
    /// cursor or already buffered are dropped with a warning.
    pub fn accept(&mut self, result: ChunkResult) {
        let index = result.index();
        if !result.status().is_terminal() {
            log::warn!("Ignoring chunk {index} in state {:?}", result.status());
        } else if index >= self.total_chunks || index < self.cursor {
            log::warn!("Ignoring unexpected result for chunk {index}");
        } else if self.buffered.contains_key(&index) {
            log::warn!("Ignoring duplicate result for chunk {index}");
        } else {
            self.buffered.insert(index, result);
        }
    }

    /// Advance the cursor by one chunk if the chunk it waits on is present.
    ///
    /// Returns `None` when the cursor chunk has not arrived yet, when every
    /// chunk has been merged, or after a strict abort. A failed chunk under
    /// [`GapPolicy::Strict`] yields [`FrameChunkError::MergeGap`] once and
    /// stops the merger.
    pub fn next_step(&mut self) -> Option<Result<MergeStep, FrameChunkError>> {
        if self.aborted || self.cursor >= self.total_chunks {
            return None;
        }
        let chunk = self.buffered.remove(&self.cursor)?;
        let index = self.cursor;

        if chunk.status() == ChunkStatus::Succeeded {
            let first_global_index = self.emitted_frames;
            self.emitted_frames += chunk.frame_count() as u64;
            self.cursor += 1;
            return Some(Ok(MergeStep::Emit {
                chunk,
                first_global_index,
            }));
        }

        let failure = failure_of(&chunk);
        match self.policy {
            GapPolicy::SkipFailed => {
                log::warn!("Skipping {failure}");
                self.gaps.push(failure.clone());
                self.cursor += 1;
                Some(Ok(MergeStep::Gap(failure)))
            }
            GapPolicy::Strict => {
                self.aborted = true;
                let mut failures = vec![failure];
                failures.extend(
                    self.buffered
                        .values()
                        .filter(|later| later.status() == ChunkStatus::Failed)
                        .map(failure_of),
                );
                Some(Err(FrameChunkError::MergeGap {
                    index,
                    merged_frames: self.emitted_frames,
                    failures,
                }))
            }
        }
    }

    /// Returns `true` once every chunk has been emitted or skipped.
    pub fn is_complete(&self) -> bool {
        !self.aborted && self.cursor >= self.total_chunks
    }

    /// Index of the chunk the cursor is waiting on.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Number of frames emitted so far. Also the next global index.
    pub fn emitted_frames(&self) -> u64 {
        self.emitted_frames
    }

    /// Number of completed chunks held back behind the cursor.
    pub fn buffered_chunks(&self) -> usize {
        self.buffered.len()
    }

    /// Failures skipped under [`GapPolicy::SkipFailed`], in index order.
    pub fn gaps(&self) -> &[ChunkFailure] {
        &self.gaps
    }

    /// Ranges skipped under [`GapPolicy::SkipFailed`], in index order.
    pub fn missing_ranges(&self) -> Vec<TimeRange> {
        self.gaps.iter().map(|failure| failure.range).collect()
    }

    /// Drop every buffered chunk, deleting its frames.
    pub fn discard_buffered(&mut self) {
        self.buffered.clear();
    }
}

fn failure_of(chunk: &ChunkResult) -> ChunkFailure {
    chunk.failure().unwrap_or(ChunkFailure {
        range: *chunk.range(),
        reason: FailureReason::MissingOutput,
    })
}

/// Moves emitted frames into a single output directory.
///
/// File names are `{number:0pad$}.{extension}` with
/// `number = global_index + first_number`.
#[derive(Debug)]
pub struct DirectoryWriter {
    output_dir: PathBuf,
    extension: String,
    pad_width: usize,
    first_number: u64,
    written: Vec<PathBuf>,
}

impl DirectoryWriter {
    /// Create the output directory (and its parents) if needed.
    pub fn create<P: AsRef<Path>>(
        output_dir: P,
        extension: &str,
        pad_width: usize,
        first_number: u64,
    ) -> io::Result<Self> {
        let output_dir = output_dir.as_ref().to_path_buf();
        fs::create_dir_all(&output_dir)?;
        Ok(Self {
            output_dir,
            extension: extension.to_ascii_lowercase(),
            pad_width,
            first_number,
            written: Vec::new(),
        })
    }

    /// The directory frames are written to.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Destination path of the frame with `global_index`.
    pub fn frame_path(&self, global_index: u64) -> PathBuf {
        let number = global_index + self.first_number;
        self.output_dir.join(format!(
            "{number:0width$}.{extension}",
            width = self.pad_width,
            extension = self.extension,
        ))
    }

    /// Move every frame of `chunk` into the output directory.
    pub fn write_chunk(
        &mut self,
        chunk: &ChunkResult,
        first_global_index: u64,
    ) -> io::Result<Vec<GlobalFrame>> {
        let mut placed = Vec::with_capacity(chunk.frame_count());
        for mut frame in chunk.global_frames(first_global_index) {
            let destination = self.frame_path(frame.global_index);
            move_file(&frame.path, &destination)?;
            self.written.push(destination.clone());
            frame.path = destination;
            placed.push(frame);
        }
        log::debug!(
            "Merged chunk {} as frames {}..{}",
            chunk.index(),
            first_global_index,
            first_global_index + chunk.frame_count() as u64,
        );
        Ok(placed)
    }

    /// Files written so far.
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }

    /// Remove every file this writer produced.
    pub fn discard(self) {
        for path in &self.written {
            if let Err(error) = fs::remove_file(path) {
                log::warn!("Failed to remove {}: {error}", path.display());
            }
        }
    }
}

fn move_file(source: &Path, destination: &Path) -> io::Result<()> {
    if fs::rename(source, destination).is_ok() {
        return Ok(());
    }
    // Across filesystems rename fails.
    fs::copy(source, destination)?;
    fs::remove_file(source)
}

/// Couples a running pool with a merger and turns the combination into a
/// sequence of [`MergeStep`]s, applying fail-fast and cancellation.
pub(crate) struct MergeDriver {
    merger: ResultMerger,
    run: Option<PoolRun>,
    tracker: Arc<JobTracker>,
    fail_fast: bool,
    cancellation: Option<CancellationToken>,
    failures: Vec<ChunkFailure>,
}

impl MergeDriver {
    pub(crate) fn new(run: PoolRun, total_chunks: usize, options: &ExtractOptions) -> Self {
        Self {
            merger: ResultMerger::new(total_chunks, options.gap_policy),
            tracker: run.tracker(),
            run: Some(run),
            fail_fast: options.fail_fast,
            cancellation: options.cancellation.clone(),
            failures: Vec::new(),
        }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    /// Block until the cursor can move, then return what it produced.
    ///
    /// `None` means the job completed. Any error is terminal.
    pub(crate) fn next_step(&mut self) -> Option<Result<MergeStep, FrameChunkError>> {
        loop {
            let run = self.run.as_ref()?;

            if self.is_cancelled() {
                log::info!("Extraction cancelled at chunk {}", self.merger.cursor());
                self.finish(JobState::Cancelled);
                return Some(Err(FrameChunkError::Cancelled));
            }

            match self.merger.next_step() {
                Some(Ok(step)) => {
                    run.release_slot();
                    if matches!(step, MergeStep::Emit { .. }) {
                        self.tracker.set_state(JobState::Merging);
                    }
                    return Some(Ok(step));
                }
                Some(Err(error)) => {
                    log::warn!("{error}");
                    self.finish(JobState::Failed);
                    return Some(Err(error));
                }
                None if self.merger.is_complete() => {
                    let state = if self.merger.gaps().is_empty() {
                        JobState::Completed
                    } else {
                        JobState::PartiallyCompleted
                    };
                    log::info!(
                        "Extraction finished: {} frame(s), {} missing chunk(s)",
                        self.merger.emitted_frames(),
                        self.merger.gaps().len(),
                    );
                    self.finish(state);
                    return None;
                }
                None => {}
            }

            match run.recv() {
                Some(result) => {
                    if let Some(failure) = result.failure() {
                        self.failures.push(failure);
                        if self.fail_fast {
                            let failures = std::mem::take(&mut self.failures);
                            log::warn!("Failing fast after chunk {} failed", result.index());
                            self.finish(JobState::Failed);
                            return Some(Err(FrameChunkError::ChunkExtractionFailure { failures }));
                        }
                    }
                    self.merger.accept(result);
                }
                None if self.is_cancelled() => {}
                None => {
                    self.finish(JobState::Failed);
                    return Some(Err(FrameChunkError::WorkerPool(format!(
                        "worker pool stopped before chunk {} completed",
                        self.merger.cursor()
                    ))));
                }
            }
        }
    }

    /// End the job early, discarding everything not yet consumed.
    pub(crate) fn abort(&mut self, state: JobState) {
        if self.run.is_some() {
            self.finish(state);
        }
    }

    fn finish(&mut self, state: JobState) {
        self.tracker.set_state(state);
        self.merger.discard_buffered();
        // Stops dispatch, drains in-flight chunks and removes the workspace.
        self.run.take();
    }

    pub(crate) fn state(&self) -> JobState {
        self.tracker.state()
    }

    pub(crate) fn job(&self) -> ExtractionJob {
        self.tracker.snapshot()
    }

    pub(crate) fn missing_ranges(&self) -> Vec<TimeRange> {
        self.merger.missing_ranges()
    }

    pub(crate) fn emitted_frames(&self) -> u64 {
        self.merger.emitted_frames()
    }
}

impl Drop for MergeDriver {
    fn drop(&mut self) {
        self.abort(JobState::Cancelled);
    }
}
