//! Media duration probing through `ffprobe`.
//!
//! A job needs the video's duration before it can plan chunks. [`MediaProbe`]
//! asks `ffprobe` for the container duration, read from its JSON output.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use serde_json::Value;

use crate::error::FrameChunkError;

/// Reads media durations with the `ffprobe` command-line tool.
///
/// # Example
///
/// ```no_run
/// use framechunk::MediaProbe;
///
/// let duration = MediaProbe::duration("input.mp4")?;
/// println!("{:.1} s", duration.as_secs_f64());
/// # Ok::<(), framechunk::FrameChunkError>(())
/// ```
#[derive(Debug, Clone)]
pub struct MediaProbe {
    program: PathBuf,
}

impl Default for MediaProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaProbe {
    /// A probe using the `ffprobe` found on `PATH`.
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("ffprobe"),
        }
    }

    /// Use a specific ffprobe executable.
    #[must_use]
    pub fn with_program<P: AsRef<Path>>(mut self, program: P) -> Self {
        self.program = program.as_ref().to_path_buf();
        self
    }

    /// Probe `path` with the default `ffprobe`.
    pub fn duration<P: AsRef<Path>>(path: P) -> Result<Duration, FrameChunkError> {
        Self::new().probe_duration(path)
    }

    /// Probe several files. Files that cannot be probed produce an `Err`
    /// entry rather than aborting the batch.
    pub fn duration_many<P: AsRef<Path>>(&self, paths: &[P]) -> Vec<Result<Duration, FrameChunkError>> {
        paths.iter().map(|path| self.probe_duration(path)).collect()
    }

    /// Run ffprobe on `path` and return the container duration.
    ///
    /// # Errors
    ///
    /// Returns [`FrameChunkError::ProbeError`] if ffprobe cannot be run,
    /// exits unsuccessfully or reports no usable duration.
    pub fn probe_duration<P: AsRef<Path>>(&self, path: P) -> Result<Duration, FrameChunkError> {
        let path = path.as_ref();
        let probe_error = |reason: String| FrameChunkError::ProbeError {
            path: path.to_path_buf(),
            reason,
        };

        log::debug!("Probing {} with {}", path.display(), self.program.display());
        let output = Command::new(&self.program)
            .args(["-v", "error", "-show_entries", "format=duration", "-of", "json"])
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .map_err(|error| probe_error(format!("failed to run {}: {error}", self.program.display())))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(probe_error(format!(
                "ffprobe exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        Self::parse_duration(path, &String::from_utf8_lossy(&output.stdout))
    }

    /// Parse the duration out of ffprobe's
    /// `-show_entries format=duration -of json` output.
    ///
    /// `path` is only used in the error.
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use framechunk::MediaProbe;
    ///
    /// let json = r#"{ "format": { "duration": "25.000000" } }"#;
    /// assert_eq!(MediaProbe::parse_duration("clip.mp4", json)?, Duration::from_secs(25));
    /// # Ok::<(), framechunk::FrameChunkError>(())
    /// ```
    pub fn parse_duration<P: AsRef<Path>>(path: P, json: &str) -> Result<Duration, FrameChunkError> {
        let probe_error = |reason: String| FrameChunkError::ProbeError {
            path: path.as_ref().to_path_buf(),
            reason,
        };

        let document: Value = serde_json::from_str(json)
            .map_err(|error| probe_error(format!("invalid ffprobe output: {error}")))?;

        let seconds = match document.pointer("/format/duration") {
            Some(Value::String(text)) => text.trim().parse::<f64>().ok(),
            Some(Value::Number(number)) => number.as_f64(),
            _ => None,
        }
        .ok_or_else(|| probe_error("ffprobe reported no duration".to_string()))?;

        if !(seconds.is_finite() && seconds > 0.0) {
            return Err(probe_error(format!("unusable duration {seconds}")));
        }
        Duration::try_from_secs_f64(seconds).map_err(|error| probe_error(error.to_string()))
    }
}
