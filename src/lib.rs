//! # framechunk
//!
//! Chunked, parallel video frame extraction with ordered merging.
//!
//! `framechunk` splits a video's timeline into fixed-length chunks, runs an
//! external decoder (by default the `ffmpeg` command-line tool) on several
//! chunks at once, and reassembles the per-chunk outputs into one globally
//! contiguous, timeline-ordered frame sequence, however out of order the
//! chunks finish.
//!
//! ## Quick Start
//!
//! ### Extract Frames to a Directory
//!
//! ```no_run
//! use framechunk::{ExtractOptions, FfmpegDecoder, FrameExtractor, MediaProbe};
//!
//! let duration = MediaProbe::duration("input.mp4")?;
//! let options = ExtractOptions::new().with_max_workers(4).with_sampling_rate(0.5);
//! let extractor = FrameExtractor::new(FfmpegDecoder::new("input.mp4"), options)?;
//!
//! let report = extractor.extract_to_directory(duration, "frames")?;
//! println!("{} frames in {}", report.frame_count, report.output_dir.display());
//! # Ok::<(), framechunk::FrameChunkError>(())
//! ```
//!
//! ### Stream Frames as They Become Ready
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use framechunk::{ExtractOptions, FfmpegDecoder, FrameExtractor};
//!
//! let extractor = FrameExtractor::new(FfmpegDecoder::new("input.mp4"), ExtractOptions::new())?;
//! let frames = extractor.extract_streaming(Duration::from_secs(600), |path, index| {
//!     Ok(format!("{index}: {}", path.display()))
//! })?;
//!
//! // Stopping early cancels the remaining chunks.
//! for line in frames.take(20) {
//!     println!("{}", line?);
//! }
//! # Ok::<(), framechunk::FrameChunkError>(())
//! ```
//!
//! ## Features
//!
//! - **Chunk planning** with contiguous, non-overlapping ranges
//! - **Bounded parallelism** with FIFO dispatch over a fixed worker pool
//! - **Ordered merging** through a reorder buffer, independent of completion order
//! - **Gap policies**: strict (default) or skip failed chunks with reported missing ranges
//! - **Fail-fast**, per-chunk timeouts, cooperative cancellation
//! - **Progress callbacks** that never block or abort extraction
//! - **Streaming** with an optional bound on chunks buffered ahead of the consumer
//!
//! ### Optional Features
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `async` | `AsyncFrameStream` for async consumption via Tokio |
//! | `full` | Enables all of the above |
//!
//! ## Requirements
//!
//! [`FfmpegDecoder`] and [`MediaProbe`] need `ffmpeg` and `ffprobe` on `PATH`
//! (or configured explicitly). Custom [`FrameDecoder`] implementations have
//! no such requirement.

pub mod chunk;
pub mod configuration;
pub mod decoder;
pub mod error;
pub mod extract;
pub mod merge;
pub mod pipeline;
pub mod planner;
pub mod pool;
pub mod probe;
pub mod progress;
#[cfg(feature = "async")]
pub mod stream;

pub use chunk::{
    ChunkExtractor, ChunkFailure, ChunkResult, ChunkStatus, DecodeSettings, FailureReason,
    GlobalFrame, LocalFrame,
};
pub use configuration::{ExtractOptions, GapPolicy, default_max_workers};
pub use decoder::{DecodeRequest, FfmpegDecoder, FrameDecoder};
pub use error::FrameChunkError;
pub use extract::{FrameExtractor, JobReport};
pub use merge::{DirectoryWriter, MergeStep, ResultMerger};
pub use pipeline::FrameStream;
pub use planner::{ChunkPlanner, TimeRange};
pub use pool::{ExtractionJob, JobState, PoolRun, WorkerPool};
pub use probe::MediaProbe;
pub use progress::{CancellationToken, ProgressCallback, ProgressInfo};
#[cfg(feature = "async")]
pub use stream::AsyncFrameStream;
