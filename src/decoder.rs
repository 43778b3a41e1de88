//! The external frame-decoding tool.
//!
//! [`FrameDecoder`] is the seam between the scheduler and whatever actually
//! turns a time range into image files. [`FfmpegDecoder`] drives the `ffmpeg`
//! command-line tool; tests and embedders can plug in their own
//! implementation.
//!
//! # Example
//!
//! ```no_run
//! use framechunk::{ExtractOptions, FfmpegDecoder, FrameExtractor};
//!
//! let decoder = FfmpegDecoder::new("input.mp4").with_program("/usr/local/bin/ffmpeg");
//! let extractor = FrameExtractor::new(decoder, ExtractOptions::new())?;
//! # Ok::<(), framechunk::FrameChunkError>(())
//! ```

use std::ffi::OsString;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::chunk::FailureReason;
use crate::planner::TimeRange;

/// How often a running decoder process is polled while a timeout is armed.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Everything a decoder needs to extract one chunk.
#[derive(Debug, Clone)]
pub struct DecodeRequest<'a> {
    /// The time range to decode, `[start, end)`.
    pub range: &'a TimeRange,
    /// Output frame width in pixels.
    pub width: u32,
    /// Output frame height in pixels.
    pub height: u32,
    /// Sampling rate in frames per second.
    pub frames_per_second: f64,
    /// Directory reserved for this chunk. Frames must be written here.
    pub output_dir: &'a Path,
    /// Extension of the image files to write.
    pub file_extension: &'a str,
    /// Per-chunk time limit, if any.
    pub timeout: Option<Duration>,
}

impl DecodeRequest<'_> {
    /// `printf`-style output pattern (`<dir>/%04d.<ext>`), the naming the
    /// merger expects from decoders.
    pub fn output_pattern(&self) -> PathBuf {
        self.output_dir.join(format!("%04d.{}", self.file_extension))
    }
}

/// Produces numbered frame files for one time range.
///
/// Implementations must be [`Send`] and [`Sync`] because they are invoked
/// concurrently from worker threads. They must only write inside
/// [`DecodeRequest::output_dir`].
pub trait FrameDecoder: Send + Sync {
    /// Decode `request.range` into `request.output_dir`.
    ///
    /// Returning `Ok(())` means the tool exited successfully; the produced
    /// files are discovered afterwards.
    fn decode(&self, request: &DecodeRequest<'_>) -> Result<(), FailureReason>;
}

/// Runs the `ffmpeg` command-line tool once per chunk.
#[derive(Debug, Clone)]
pub struct FfmpegDecoder {
    program: PathBuf,
    input: PathBuf,
    extra_args: Vec<OsString>,
}

impl FfmpegDecoder {
    /// Decode frames from `input` using the `ffmpeg` found on `PATH`.
    pub fn new<P: AsRef<Path>>(input: P) -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
            input: input.as_ref().to_path_buf(),
            extra_args: Vec::new(),
        }
    }

    /// Use a specific ffmpeg executable.
    #[must_use]
    pub fn with_program<P: AsRef<Path>>(mut self, program: P) -> Self {
        self.program = program.as_ref().to_path_buf();
        self
    }

    /// Append output options placed just before the output pattern.
    #[must_use]
    pub fn with_extra_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.extra_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// The media file frames are decoded from.
    pub fn input(&self) -> &Path {
        &self.input
    }

    /// Build the command for one chunk without running it.
    ///
    /// ```text
    /// ffmpeg -hide_banner -loglevel error -ss <start> -t <length> -i <input>
    ///        -vf scale=<w>:<h> -r <fps> [extra args] -y <dir>/%04d.<ext>
    /// ```
    pub fn command(&self, request: &DecodeRequest<'_>) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg("-hide_banner")
            .args(["-loglevel", "error"])
            .arg("-ss")
            .arg(format_seconds(request.range.start))
            .arg("-t")
            .arg(format_seconds(request.range.length()))
            .arg("-i")
            .arg(&self.input)
            .arg("-vf")
            .arg(format!("scale={}:{}", request.width, request.height))
            .arg("-r")
            .arg(request.frames_per_second.to_string())
            .args(&self.extra_args)
            .arg("-y")
            .arg(request.output_pattern());
        command
    }
}

impl FrameDecoder for FfmpegDecoder {
    fn decode(&self, request: &DecodeRequest<'_>) -> Result<(), FailureReason> {
        let mut command = self.command(request);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        log::debug!("Chunk {}: running {:?}", request.range, command);

        let mut child = command
            .spawn()
            .map_err(|error| FailureReason::Spawn(format!("{}: {error}", self.program.display())))?;

        let stderr_reader = child.stderr.take().map(|mut pipe| {
            thread::spawn(move || {
                let mut captured = String::new();
                let _ = pipe.read_to_string(&mut captured);
                captured
            })
        });

        let waited = match request.timeout {
            None => child
                .wait()
                .map_err(|error| FailureReason::Io(error.to_string())),
            Some(limit) => wait_with_deadline(&mut child, limit)
                .and_then(|status| status.ok_or(FailureReason::Timeout(limit))),
        };
        let status = match waited {
            Ok(status) => status,
            Err(reason) => {
                terminate(&mut child);
                join_reader(stderr_reader);
                return Err(reason);
            }
        };

        let stderr = join_reader(stderr_reader);

        if status.success() {
            Ok(())
        } else {
            Err(FailureReason::Exit {
                code: status.code(),
                stderr: stderr.trim().to_string(),
            })
        }
    }
}

/// Wait for `child` until `limit` elapses. `Ok(None)` means the deadline passed.
fn wait_with_deadline(child: &mut Child, limit: Duration) -> Result<Option<ExitStatus>, FailureReason> {
    let deadline = Instant::now() + limit;
    loop {
        if let Some(status) = child
            .try_wait()
            .map_err(|error| FailureReason::Io(error.to_string()))?
        {
            return Ok(Some(status));
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL.min(deadline - now));
    }
}

/// Kill `child` if it is still running and reap it.
fn terminate(child: &mut Child) {
    if let Err(error) = child.kill() {
        log::debug!("Decoder process {} already exited: {error}", child.id());
    }
    if let Err(error) = child.wait() {
        log::warn!("Failed to reap decoder process {}: {error}", child.id());
    }
}

fn join_reader(reader: Option<JoinHandle<String>>) -> String {
    reader
        .and_then(|reader| reader.join().ok())
        .unwrap_or_default()
}

fn format_seconds(value: Duration) -> String {
    format!("{:.3}", value.as_secs_f64())
}
