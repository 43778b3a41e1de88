//! Timeline partitioning.
//!
//! [`ChunkPlanner`] splits a media duration into an ordered sequence of
//! contiguous, non-overlapping [`TimeRange`]s. Every instant of `[0, duration)`
//! belongs to exactly one range, so no frame is extracted twice and none is
//! skipped at a boundary.
//!
//! # Example
//!
//! ```
//! use framechunk::ChunkPlanner;
//!
//! let planner = ChunkPlanner::new(10.0, 1.0)?;
//! let ranges = planner.plan(25.0)?;
//!
//! assert_eq!(ranges.len(), 3);
//! assert_eq!(ranges[2].start.as_secs_f64(), 20.0);
//! assert_eq!(ranges[2].end.as_secs_f64(), 25.0);
//! # Ok::<(), framechunk::FrameChunkError>(())
//! ```

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::time::Duration;

use crate::error::FrameChunkError;

/// One time-bounded unit of work, covering `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeRange {
    /// Position of the range in timeline order, starting at 0.
    pub index: usize,
    /// Inclusive start of the range.
    pub start: Duration,
    /// Exclusive end of the range.
    pub end: Duration,
}

impl TimeRange {
    /// Length of the range.
    pub fn length(&self) -> Duration {
        self.end.saturating_sub(self.start)
    }

    /// Returns `true` if `timestamp` falls inside `[start, end)`.
    pub fn contains(&self, timestamp: Duration) -> bool {
        timestamp >= self.start && timestamp < self.end
    }

    /// Rough number of frames the decoder should produce for this range at
    /// `frames_per_second`. Never less than one.
    ///
    /// The actual count is decided by the decoder; this estimate is only used
    /// for logging and sizing.
    pub fn expected_frames(&self, frames_per_second: f64) -> u64 {
        let frames = (self.length().as_secs_f64() * frames_per_second).floor();
        (frames as u64).max(1)
    }
}

impl Display for TimeRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(
            f,
            "#{} [{:.3}s, {:.3}s)",
            self.index,
            self.start.as_secs_f64(),
            self.end.as_secs_f64(),
        )
    }
}

/// Splits a duration into chunks of a fixed span.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkPlanner {
    chunk_span_seconds: f64,
    frames_per_second: f64,
}

impl ChunkPlanner {
    /// Create a planner for chunks of `chunk_span_seconds` sampled at
    /// `frames_per_second`.
    ///
    /// # Errors
    ///
    /// Returns [`FrameChunkError::InvalidConfiguration`] when either value is
    /// not a finite number greater than zero.
    pub fn new(chunk_span_seconds: f64, frames_per_second: f64) -> Result<Self, FrameChunkError> {
        require_positive("chunk span", chunk_span_seconds)?;
        require_positive("sampling rate", frames_per_second)?;
        Ok(Self {
            chunk_span_seconds,
            frames_per_second,
        })
    }

    /// The configured chunk span in seconds.
    pub fn chunk_span_seconds(&self) -> f64 {
        self.chunk_span_seconds
    }

    /// The configured sampling rate in frames per second.
    pub fn frames_per_second(&self) -> f64 {
        self.frames_per_second
    }

    /// Number of ranges [`plan`](ChunkPlanner::plan) produces for
    /// `duration_seconds`, i.e. `ceil(duration / span)`.
    pub fn chunk_count(&self, duration_seconds: f64) -> Result<usize, FrameChunkError> {
        require_positive("duration", duration_seconds)?;

        let mut count = (duration_seconds / self.chunk_span_seconds).ceil().max(1.0) as usize;
        // Division rounding can push an exact multiple one chunk too far,
        // which would leave a zero-length tail.
        while count > 1 && (count - 1) as f64 * self.chunk_span_seconds >= duration_seconds {
            count -= 1;
        }
        Ok(count)
    }

    /// Partition `[0, duration_seconds)` into ordered, contiguous ranges.
    ///
    /// The last range is truncated to the actual duration; it may be shorter
    /// than the chunk span but never longer.
    pub fn plan(&self, duration_seconds: f64) -> Result<Vec<TimeRange>, FrameChunkError> {
        let count = self.chunk_count(duration_seconds)?;
        let total = Duration::try_from_secs_f64(duration_seconds).map_err(|error| {
            FrameChunkError::InvalidConfiguration(format!(
                "duration {duration_seconds}s is not representable: {error}"
            ))
        })?;

        let mut ranges = Vec::with_capacity(count);
        let mut start = Duration::ZERO;
        for index in 0..count {
            let end = if index + 1 == count {
                total
            } else {
                Duration::from_secs_f64((index + 1) as f64 * self.chunk_span_seconds).min(total)
            };
            ranges.push(TimeRange { index, start, end });
            start = end;
        }

        log::debug!(
            "Planned {} chunk(s) of {:.3}s over {:.3}s",
            ranges.len(),
            self.chunk_span_seconds,
            duration_seconds,
        );
        Ok(ranges)
    }
}

fn require_positive(name: &str, value: f64) -> Result<(), FrameChunkError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(FrameChunkError::InvalidConfiguration(format!(
            "{name} must be a finite number greater than zero (got {value})"
        )))
    }
}
