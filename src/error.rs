//! Error types for the `framechunk` crate.
//!
//! This module defines [`FrameChunkError`], the unified error type returned by
//! all fallible operations in the crate. Chunk-level failures are *not* errors:
//! they travel as [`ChunkFailure`] values inside
//! [`ChunkResult`](crate::ChunkResult) so the pool can keep dispatching. They
//! only become a [`FrameChunkError`] when a job-level policy (strict merging or
//! fail-fast) turns them into the job's terminal outcome.

use std::{io::Error as IoError, path::PathBuf};

use thiserror::Error;

use crate::chunk::ChunkFailure;

/// The unified error type for all `framechunk` operations.
///
/// Every public method that can fail returns `Result<T, FrameChunkError>`.
/// Job-level variants carry the failed chunk ranges together with their
/// individual diagnostics, so callers never need to dig through logs.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FrameChunkError {
    /// Planner or pipeline inputs were rejected before any work started.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A chunk failed while the job was configured to fail fast.
    #[error("Extraction aborted after {} failed chunk(s): {}", .failures.len(), describe_failures(.failures))]
    ChunkExtractionFailure {
        /// Every chunk failure observed before the job stopped.
        failures: Vec<ChunkFailure>,
    },

    /// The merge cursor reached a failed chunk under the strict gap policy.
    #[error("Merge gap at chunk {index} after {merged_frames} merged frame(s): {}", describe_failures(.failures))]
    MergeGap {
        /// Index of the chunk the cursor was waiting on.
        index: usize,
        /// Number of frames merged before the gap.
        merged_frames: u64,
        /// The failure at the cursor followed by any later failures already known.
        failures: Vec<ChunkFailure>,
    },

    /// The job was cancelled by the caller before it could complete.
    #[error("Operation cancelled")]
    Cancelled,

    /// The media file could not be probed for its duration.
    #[error("Failed to probe media file at {path}: {reason}")]
    ProbeError {
        /// Path that was passed to the probe.
        path: PathBuf,
        /// Underlying reason the probe failed.
        reason: String,
    },

    /// The worker pool could not be built or stopped unexpectedly.
    #[error("Worker pool error: {0}")]
    WorkerPool(String),

    /// A caller-supplied frame processor failed.
    #[error("Frame processing failed: {0}")]
    Processing(String),

    /// An I/O error occurred while reading or writing files.
    #[error("I/O error: {0}")]
    IoError(#[from] IoError),
}

fn describe_failures(failures: &[ChunkFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
