//! Extraction configuration.
//!
//! [`ExtractOptions`] is a builder that carries the chunking, decoding,
//! concurrency and merge settings of a job, together with the progress
//! callback and cancellation token, without polluting every function
//! signature.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//!
//! use framechunk::{CancellationToken, ExtractOptions, GapPolicy};
//!
//! let token = CancellationToken::new();
//! let options = ExtractOptions::new()
//!     .with_chunk_span_seconds(5.0)
//!     .with_max_workers(4)
//!     .with_resolution(256, 144)
//!     .with_sampling_rate(0.5)
//!     .with_gap_policy(GapPolicy::SkipFailed)
//!     .with_chunk_timeout(Duration::from_secs(60))
//!     .with_cancellation(token.clone());
//!
//! assert!(options.validate().is_ok());
//! ```

use std::fmt::{Debug, Display, Formatter, Result as FmtResult};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::chunk::DecodeSettings;
use crate::error::FrameChunkError;
use crate::progress::{CancellationToken, NoOpProgress, ProgressCallback};

/// What the merger does when the chunk at its cursor failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum GapPolicy {
    /// Abort the job. This is the default: a silent hole would desynchronise
    /// any timeline computed from frame numbers.
    #[default]
    Strict,
    /// Skip the chunk, record it as a missing range and keep merging.
    SkipFailed,
}

impl Display for GapPolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            GapPolicy::Strict => write!(f, "strict"),
            GapPolicy::SkipFailed => write!(f, "skip_failed"),
        }
    }
}

impl FromStr for GapPolicy {
    type Err = FrameChunkError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "strict" => Ok(GapPolicy::Strict),
            "skip_failed" | "skip-failed" | "skip" => Ok(GapPolicy::SkipFailed),
            other => Err(FrameChunkError::InvalidConfiguration(format!(
                "unknown gap policy '{other}' (expected strict or skip_failed)"
            ))),
        }
    }
}

/// Default worker count: `min(8, available CPUs + 4)`.
pub fn default_max_workers() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|count| count.get())
        .unwrap_or(1);
    (cpus + 4).min(8)
}

/// Configuration for extraction jobs.
///
/// All fields have sensible defaults: 10-second chunks, 512×288 frames at
/// one frame per second, `min(8, CPUs + 4)` workers, strict gap policy,
/// `.jpg` output numbered from `0001`.
#[derive(Clone)]
pub struct ExtractOptions {
    pub(crate) chunk_span_seconds: f64,
    pub(crate) max_workers: usize,
    pub(crate) frame_width: u32,
    pub(crate) frame_height: u32,
    pub(crate) sampling_rate_fps: f64,
    pub(crate) fail_fast: bool,
    pub(crate) gap_policy: GapPolicy,
    /// Per-chunk decoder time limit. `None` means unlimited.
    pub(crate) chunk_timeout: Option<Duration>,
    /// Bound on dispatched chunks whose frames have not been consumed yet.
    pub(crate) max_buffered_chunks: Option<usize>,
    pub(crate) file_extension: String,
    /// Minimum digit count of materialised file names.
    pub(crate) pad_width: usize,
    /// Number given to the first materialised frame.
    pub(crate) first_number: u64,
    /// Parent of the per-job workspace. `None` uses the system temp dir.
    pub(crate) temp_dir: Option<PathBuf>,
    pub(crate) progress: Arc<dyn ProgressCallback>,
    pub(crate) cancellation: Option<CancellationToken>,
}

impl Debug for ExtractOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("ExtractOptions")
            .field("chunk_span_seconds", &self.chunk_span_seconds)
            .field("max_workers", &self.max_workers)
            .field("frame_width", &self.frame_width)
            .field("frame_height", &self.frame_height)
            .field("sampling_rate_fps", &self.sampling_rate_fps)
            .field("fail_fast", &self.fail_fast)
            .field("gap_policy", &self.gap_policy)
            .field("chunk_timeout", &self.chunk_timeout)
            .field("max_buffered_chunks", &self.max_buffered_chunks)
            .field("file_extension", &self.file_extension)
            .field("has_cancellation", &self.cancellation.is_some())
            .finish()
    }
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtractOptions {
    /// Create a new configuration with default settings.
    pub fn new() -> Self {
        Self {
            chunk_span_seconds: 10.0,
            max_workers: default_max_workers(),
            frame_width: 512,
            frame_height: 288,
            sampling_rate_fps: 1.0,
            fail_fast: false,
            gap_policy: GapPolicy::Strict,
            chunk_timeout: None,
            max_buffered_chunks: None,
            file_extension: "jpg".to_string(),
            pad_width: 4,
            first_number: 1,
            temp_dir: None,
            progress: Arc::new(NoOpProgress),
            cancellation: None,
        }
    }

    /// Set the length of each chunk, in seconds.
    #[must_use]
    pub fn with_chunk_span_seconds(mut self, seconds: f64) -> Self {
        self.chunk_span_seconds = seconds;
        self
    }

    /// Set how many chunks may be extracted at the same time.
    ///
    /// `1` gives purely sequential extraction.
    #[must_use]
    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers;
        self
    }

    /// Set the output frame size.
    #[must_use]
    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.frame_width = width;
        self.frame_height = height;
        self
    }

    /// Set the sampling rate in frames per second (`0.5` = one frame every
    /// two seconds).
    #[must_use]
    pub fn with_sampling_rate(mut self, frames_per_second: f64) -> Self {
        self.sampling_rate_fps = frames_per_second;
        self
    }

    /// Stop dispatching and fail the job as soon as any chunk fails.
    #[must_use]
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Choose how failed chunks are handled at merge time.
    #[must_use]
    pub fn with_gap_policy(mut self, policy: GapPolicy) -> Self {
        self.gap_policy = policy;
        self
    }

    /// Fail any chunk whose decoder runs longer than `timeout`.
    #[must_use]
    pub fn with_chunk_timeout(mut self, timeout: Duration) -> Self {
        self.chunk_timeout = Some(timeout);
        self
    }

    /// Bound how many chunks can be dispatched ahead of the merge cursor.
    ///
    /// Without a bound, extraction runs ahead of a slow consumer and
    /// completed chunks pile up on disk.
    #[must_use]
    pub fn with_max_buffered_chunks(mut self, chunks: usize) -> Self {
        self.max_buffered_chunks = Some(chunks);
        self
    }

    /// Set the image file extension the decoder writes (without the dot).
    #[must_use]
    pub fn with_file_extension<S: Into<String>>(mut self, extension: S) -> Self {
        self.file_extension = extension.into();
        self
    }

    /// Set the minimum digit count of materialised file names.
    #[must_use]
    pub fn with_pad_width(mut self, width: usize) -> Self {
        self.pad_width = width;
        self
    }

    /// Set the number given to the first materialised frame file.
    #[must_use]
    pub fn with_first_number(mut self, number: u64) -> Self {
        self.first_number = number;
        self
    }

    /// Create job workspaces under `directory` instead of the system temp dir.
    #[must_use]
    pub fn with_temp_dir<P: AsRef<Path>>(mut self, directory: P) -> Self {
        self.temp_dir = Some(directory.as_ref().to_path_buf());
        self
    }

    /// Attach a progress callback, invoked once per completed chunk.
    #[must_use]
    pub fn with_progress(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress = callback;
        self
    }

    /// Attach a cancellation token.
    ///
    /// When the token is cancelled, no further chunk is dispatched and the
    /// job returns [`FrameChunkError::Cancelled`].
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Chunk length in seconds.
    pub fn chunk_span_seconds(&self) -> f64 {
        self.chunk_span_seconds
    }

    /// Maximum concurrent extractions.
    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Output frame size as `(width, height)`.
    pub fn resolution(&self) -> (u32, u32) {
        (self.frame_width, self.frame_height)
    }

    /// Sampling rate in frames per second.
    pub fn sampling_rate(&self) -> f64 {
        self.sampling_rate_fps
    }

    /// Whether the job stops at the first failed chunk.
    pub fn fail_fast(&self) -> bool {
        self.fail_fast
    }

    /// The merge gap policy.
    pub fn gap_policy(&self) -> GapPolicy {
        self.gap_policy
    }

    /// Check every setting, returning the first problem found.
    pub fn validate(&self) -> Result<(), FrameChunkError> {
        let invalid = |message: String| Err(FrameChunkError::InvalidConfiguration(message));

        if !(self.chunk_span_seconds.is_finite() && self.chunk_span_seconds > 0.0) {
            return invalid(format!(
                "chunk span must be greater than zero (got {})",
                self.chunk_span_seconds
            ));
        }
        if !(self.sampling_rate_fps.is_finite() && self.sampling_rate_fps > 0.0) {
            return invalid(format!(
                "sampling rate must be greater than zero (got {})",
                self.sampling_rate_fps
            ));
        }
        if self.max_workers == 0 {
            return invalid("max workers must be at least 1".to_string());
        }
        if self.frame_width == 0 || self.frame_height == 0 {
            return invalid(format!(
                "frame size must be non-zero (got {}x{})",
                self.frame_width, self.frame_height
            ));
        }
        if self.max_buffered_chunks == Some(0) {
            return invalid("max buffered chunks must be at least 1".to_string());
        }
        if self.chunk_timeout == Some(Duration::ZERO) {
            return invalid("chunk timeout must be greater than zero".to_string());
        }
        if self.file_extension.is_empty()
            || self.file_extension.contains(['/', '\\', '.'])
        {
            return invalid(format!(
                "file extension '{}' must be a bare extension such as 'jpg'",
                self.file_extension
            ));
        }
        Ok(())
    }

    pub(crate) fn decode_settings(&self) -> DecodeSettings {
        DecodeSettings {
            width: self.frame_width,
            height: self.frame_height,
            frames_per_second: self.sampling_rate_fps,
            file_extension: self.file_extension.clone(),
            timeout: self.chunk_timeout,
        }
    }
}
