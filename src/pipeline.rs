//! Streaming delivery of merged frames.
//!
//! [`FrameStream`] is a lazy iterator over the merged sequence: it yields as
//! soon as the chunk at the merge cursor is ready while the pool keeps
//! extracting later chunks in the background. Each frame is handed to a
//! caller-supplied processor together with its global index; the processor's
//! return value is what the iterator yields.
//!
//! Dropping the stream before it is exhausted cancels the job: nothing new is
//! dispatched, running chunks finish and their output is deleted along with
//! every temporary directory.

use std::marker::PhantomData;
use std::path::Path;

use crate::chunk::ChunkResult;
use crate::error::FrameChunkError;
use crate::merge::{MergeDriver, MergeStep};
use crate::planner::TimeRange;
use crate::pool::{ExtractionJob, JobState};

struct ActiveChunk {
    chunk: ChunkResult,
    first_global_index: u64,
    position: usize,
}

/// A lazy, single-pass sequence of processed frames in global order.
///
/// Created by [`FrameExtractor::extract_streaming`](crate::FrameExtractor::extract_streaming).
/// The processor is called at most once per frame, in increasing
/// global-index order. An error from the processor or from the job ends the
/// sequence; after that, [`next`](Iterator::next) returns `None`.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
///
/// use framechunk::{ExtractOptions, FfmpegDecoder, FrameExtractor};
///
/// let extractor = FrameExtractor::new(FfmpegDecoder::new("input.mp4"), ExtractOptions::new())?;
/// let stream = extractor.extract_streaming(Duration::from_secs(90), |path, index| {
///     Ok((index, std::fs::metadata(path)?.len()))
/// })?;
///
/// for item in stream {
///     let (index, bytes) = item?;
///     println!("frame {index}: {bytes} bytes");
/// }
/// # Ok::<(), framechunk::FrameChunkError>(())
/// ```
pub struct FrameStream<T, F>
where
    F: FnMut(&Path, u64) -> Result<T, FrameChunkError>,
{
    active: Option<ActiveChunk>,
    driver: MergeDriver,
    processor: F,
    delivered: u64,
    done: bool,
    _output: PhantomData<fn() -> T>,
}

impl<T, F> FrameStream<T, F>
where
    F: FnMut(&Path, u64) -> Result<T, FrameChunkError>,
{
    pub(crate) fn new(driver: MergeDriver, processor: F) -> Self {
        Self {
            active: None,
            driver,
            processor,
            delivered: 0,
            done: false,
            _output: PhantomData,
        }
    }

    /// Current job state. Terminal once the stream is exhausted.
    pub fn state(&self) -> JobState {
        self.driver.state()
    }

    /// Ranges skipped under [`GapPolicy::SkipFailed`](crate::GapPolicy::SkipFailed) so far.
    pub fn missing_ranges(&self) -> Vec<TimeRange> {
        self.driver.missing_ranges()
    }

    /// Snapshot of the job's chunk bookkeeping.
    pub fn job(&self) -> ExtractionJob {
        self.driver.job()
    }

    /// Number of frames handed to the processor so far.
    pub fn frames_delivered(&self) -> u64 {
        self.delivered
    }

    /// Stop the job now. Later calls to `next` return `None`.
    pub fn cancel(&mut self) {
        self.active.take();
        self.driver.abort(JobState::Cancelled);
        self.done = true;
    }
}

impl<T, F> Iterator for FrameStream<T, F>
where
    F: FnMut(&Path, u64) -> Result<T, FrameChunkError>,
{
    type Item = Result<T, FrameChunkError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            if self.active.is_some() && self.driver.is_cancelled() {
                self.active.take();
                self.driver.abort(JobState::Cancelled);
                self.done = true;
                return Some(Err(FrameChunkError::Cancelled));
            }

            let processor = &mut self.processor;
            let outcome = match self.active.as_mut() {
                Some(active) => match active.chunk.local_frames().get(active.position) {
                    Some(frame) => {
                        active.position += 1;
                        Some(processor(&frame.path, active.first_global_index + frame.local_index))
                    }
                    None => None,
                },
                None => None,
            };

            match outcome {
                Some(Ok(value)) => {
                    self.delivered += 1;
                    return Some(Ok(value));
                }
                Some(Err(error)) => {
                    log::warn!("Frame processor failed after {} frame(s): {error}", self.delivered);
                    self.active.take();
                    self.driver.abort(JobState::Failed);
                    self.done = true;
                    return Some(Err(error));
                }
                // The active chunk (if any) is used up; its directory goes with it.
                None => self.active = None,
            }

            match self.driver.next_step() {
                None => {
                    self.done = true;
                    return None;
                }
                Some(Ok(MergeStep::Emit {
                    chunk,
                    first_global_index,
                })) => {
                    self.active = Some(ActiveChunk {
                        chunk,
                        first_global_index,
                        position: 0,
                    });
                }
                Some(Ok(MergeStep::Gap(_))) => {}
                Some(Err(error)) => {
                    self.done = true;
                    return Some(Err(error));
                }
            }
        }
    }
}

impl<T, F> Drop for FrameStream<T, F>
where
    F: FnMut(&Path, u64) -> Result<T, FrameChunkError>,
{
    fn drop(&mut self) {
        if !self.done {
            log::debug!("Frame stream dropped after {} frame(s); cancelling", self.delivered);
        }
        self.active.take();
        self.driver.abort(JobState::Cancelled);
    }
}
