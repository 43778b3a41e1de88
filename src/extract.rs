//! Job orchestration: plan, dispatch, merge.
//!
//! [`FrameExtractor`] is the main entry point. It validates its
//! [`ExtractOptions`] once, owns the [`WorkerPool`], and runs jobs in one of
//! two modes:
//!
//! - [`extract_to_directory`](FrameExtractor::extract_to_directory) merges
//!   every chunk into one contiguously numbered directory and returns a
//!   [`JobReport`].
//! - [`extract_streaming`](FrameExtractor::extract_streaming) returns a lazy
//!   [`FrameStream`] that hands frames to a processor as they become ready.
//!
//! Each job gets a private workspace directory holding the per-chunk
//! directories. It is removed when the job ends, whatever the outcome.

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use crate::chunk::{ChunkExtractor, GlobalFrame};
use crate::configuration::ExtractOptions;
use crate::decoder::FrameDecoder;
use crate::error::FrameChunkError;
use crate::merge::{DirectoryWriter, MergeDriver, MergeStep};
use crate::pipeline::FrameStream;
use crate::planner::{ChunkPlanner, TimeRange};
use crate::pool::{ExtractionJob, JobState, WorkerPool};

/// Outcome of a successful (possibly partial) directory job.
#[derive(Debug, Clone)]
pub struct JobReport {
    /// `Completed` or `PartiallyCompleted`.
    pub state: JobState,
    /// Number of frames written.
    pub frame_count: u64,
    /// Number of chunks in the plan.
    pub total_chunks: usize,
    /// Ranges skipped because their chunk failed.
    pub missing_ranges: Vec<TimeRange>,
    /// Every written frame, in global order.
    pub frames: Vec<GlobalFrame>,
    /// The merged output directory.
    pub output_dir: PathBuf,
    /// Final chunk bookkeeping.
    pub job: ExtractionJob,
}

impl JobReport {
    /// Returns `true` if no chunk was skipped.
    pub fn is_complete(&self) -> bool {
        self.state == JobState::Completed
    }
}

/// Runs chunked extraction jobs with a fixed decoder and configuration.
pub struct FrameExtractor {
    decoder: Arc<dyn FrameDecoder>,
    options: ExtractOptions,
    planner: ChunkPlanner,
    pool: WorkerPool,
}

impl Debug for FrameExtractor {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("FrameExtractor")
            .field("options", &self.options)
            .field("workers", &self.pool.workers())
            .finish()
    }
}

impl FrameExtractor {
    /// Create an extractor.
    ///
    /// # Errors
    ///
    /// Returns [`FrameChunkError::InvalidConfiguration`] if `options` fails
    /// [`ExtractOptions::validate`], or [`FrameChunkError::WorkerPool`] if the
    /// worker threads cannot be created.
    pub fn new<D>(decoder: D, options: ExtractOptions) -> Result<Self, FrameChunkError>
    where
        D: FrameDecoder + 'static,
    {
        Self::with_shared_decoder(Arc::new(decoder), options)
    }

    /// Like [`new`](FrameExtractor::new) for a decoder that is already shared.
    pub fn with_shared_decoder(
        decoder: Arc<dyn FrameDecoder>,
        options: ExtractOptions,
    ) -> Result<Self, FrameChunkError> {
        options.validate()?;
        let planner = ChunkPlanner::new(options.chunk_span_seconds, options.sampling_rate_fps)?;
        let pool = WorkerPool::new(options.max_workers)?;
        Ok(Self {
            decoder,
            options,
            planner,
            pool,
        })
    }

    /// The configuration jobs run with.
    pub fn options(&self) -> &ExtractOptions {
        &self.options
    }

    /// The chunk plan for a video of `duration`.
    pub fn plan(&self, duration: Duration) -> Result<Vec<TimeRange>, FrameChunkError> {
        self.planner.plan(duration.as_secs_f64())
    }

    /// Extract every frame of a `duration`-long video into `output_dir`.
    ///
    /// Files are named `0001.jpg`, `0002.jpg`, ... (see
    /// [`ExtractOptions::with_pad_width`] and
    /// [`ExtractOptions::with_first_number`]).
    ///
    /// # Errors
    ///
    /// - [`FrameChunkError::MergeGap`] under the strict gap policy. Frames
    ///   merged before the gap stay in `output_dir`.
    /// - [`FrameChunkError::ChunkExtractionFailure`] under fail-fast.
    /// - [`FrameChunkError::Cancelled`] if the cancellation token fired. Any
    ///   frames already written are removed.
    /// - [`FrameChunkError::IoError`] if the output cannot be written.
    pub fn extract_to_directory<P: AsRef<Path>>(
        &self,
        duration: Duration,
        output_dir: P,
    ) -> Result<JobReport, FrameChunkError> {
        let mut writer = DirectoryWriter::create(
            output_dir,
            &self.options.file_extension,
            self.options.pad_width,
            self.options.first_number,
        )?;
        let (mut driver, total_chunks) = self.start(duration)?;
        log::info!(
            "Extracting {total_chunks} chunk(s) into {}",
            writer.output_dir().display()
        );

        let mut frames = Vec::new();
        while let Some(step) = driver.next_step() {
            match step {
                Ok(MergeStep::Emit {
                    chunk,
                    first_global_index,
                }) => match writer.write_chunk(&chunk, first_global_index) {
                    Ok(mut placed) => frames.append(&mut placed),
                    Err(error) => {
                        driver.abort(JobState::Failed);
                        return Err(error.into());
                    }
                },
                Ok(MergeStep::Gap(_)) => {}
                Err(FrameChunkError::Cancelled) => {
                    writer.discard();
                    return Err(FrameChunkError::Cancelled);
                }
                Err(error) => return Err(error),
            }
        }

        Ok(JobReport {
            state: driver.state(),
            frame_count: driver.emitted_frames(),
            total_chunks,
            missing_ranges: driver.missing_ranges(),
            frames,
            output_dir: writer.output_dir().to_path_buf(),
            job: driver.job(),
        })
    }

    /// Stream the frames of a `duration`-long video through `processor`.
    ///
    /// `processor` receives each frame's temporary path and global index, in
    /// increasing index order. The file is deleted once its chunk has been
    /// consumed, so the processor must copy anything it wants to keep.
    pub fn extract_streaming<T, F>(
        &self,
        duration: Duration,
        processor: F,
    ) -> Result<FrameStream<T, F>, FrameChunkError>
    where
        F: FnMut(&Path, u64) -> Result<T, FrameChunkError>,
    {
        let (driver, total_chunks) = self.start(duration)?;
        log::info!("Streaming {total_chunks} chunk(s)");
        Ok(FrameStream::new(driver, processor))
    }

    fn start(&self, duration: Duration) -> Result<(MergeDriver, usize), FrameChunkError> {
        let ranges = self.plan(duration)?;
        let total_chunks = ranges.len();

        let workspace = self.create_workspace()?;
        let extractor = Arc::new(ChunkExtractor::new(
            self.decoder.clone(),
            self.options.decode_settings(),
            workspace.path().to_path_buf(),
        ));

        let mut run = self.pool.start(ranges, extractor, &self.options)?;
        run.attach_workspace(workspace);
        Ok((MergeDriver::new(run, total_chunks, &self.options), total_chunks))
    }

    fn create_workspace(&self) -> Result<TempDir, FrameChunkError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("framechunk-");
        let workspace = match &self.options.temp_dir {
            Some(parent) => builder.tempdir_in(parent)?,
            None => builder.tempdir()?,
        };
        log::debug!("Job workspace: {}", workspace.path().display());
        Ok(workspace)
    }
}
