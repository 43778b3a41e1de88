//! Per-chunk extraction and its result records.
//!
//! [`ChunkExtractor`] runs the [`FrameDecoder`] for one [`TimeRange`] inside a
//! freshly created directory that no other chunk can touch, then collects the
//! produced files in decoder order. Extraction never returns an error: every
//! failure becomes a [`ChunkResult`] in the [`ChunkStatus::Failed`] state so
//! the pool can carry on with the remaining chunks.

use std::cmp::Ordering;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use crate::decoder::{DecodeRequest, FrameDecoder};
use crate::planner::TimeRange;

/// Lifecycle of a single chunk.
///
/// Transitions strictly `Pending → Running → {Succeeded, Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkStatus {
    /// Submitted to the pool, not started yet.
    Pending,
    /// The decoder is running for this chunk.
    Running,
    /// The decoder produced frames.
    Succeeded,
    /// The decoder failed, timed out, or produced nothing.
    Failed,
}

impl ChunkStatus {
    /// Returns `true` for `Succeeded` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, ChunkStatus::Succeeded | ChunkStatus::Failed)
    }
}

/// Why a chunk failed.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum FailureReason {
    /// The decoder exited unsuccessfully.
    Exit {
        /// Exit code, if the process was not killed by a signal.
        code: Option<i32>,
        /// Captured standard error output.
        stderr: String,
    },
    /// The decoder ran longer than the per-chunk timeout.
    Timeout(Duration),
    /// The decoder reported success but wrote no frame files.
    MissingOutput,
    /// The decoder process could not be started.
    Spawn(String),
    /// A filesystem operation around the decoder failed.
    Io(String),
    /// The decoder panicked.
    Panic(String),
}

impl Display for FailureReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            FailureReason::Exit { code: Some(code), stderr } if stderr.is_empty() => {
                write!(f, "decoder exited with status {code}")
            }
            FailureReason::Exit { code: Some(code), stderr } => {
                write!(f, "decoder exited with status {code}: {stderr}")
            }
            FailureReason::Exit { code: None, stderr } => {
                write!(f, "decoder terminated by signal: {stderr}")
            }
            FailureReason::Timeout(limit) => write!(f, "timed out after {limit:?}"),
            FailureReason::MissingOutput => write!(f, "decoder produced no frames"),
            FailureReason::Spawn(reason) => write!(f, "failed to start decoder: {reason}"),
            FailureReason::Io(reason) => write!(f, "I/O failure: {reason}"),
            FailureReason::Panic(reason) => write!(f, "{reason}"),
        }
    }
}

/// A failed chunk together with its diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFailure {
    /// The range that failed.
    pub range: TimeRange,
    /// What went wrong.
    pub reason: FailureReason,
}

impl Display for ChunkFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "chunk {}: {}", self.range, self.reason)
    }
}

/// A frame file as produced by the decoder for one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFrame {
    /// Position within the chunk output, starting at 0.
    pub local_index: u64,
    /// Location of the file inside the chunk directory.
    pub path: PathBuf,
}

/// A frame placed in the job-wide, timeline-ordered sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalFrame {
    /// Position in the merged sequence, contiguous from 0.
    pub global_index: u64,
    /// Index of the chunk that produced the frame.
    pub source_chunk_index: usize,
    /// Position of the frame inside its chunk.
    pub source_local_index: u64,
    /// Where the frame lives (the merged directory once materialised).
    pub path: PathBuf,
}

/// The outcome of extracting one chunk.
///
/// While the result is held, its frames live in a private directory that is
/// removed when the result is dropped.
#[derive(Debug)]
pub struct ChunkResult {
    range: TimeRange,
    status: ChunkStatus,
    local_frames: Vec<LocalFrame>,
    failure: Option<FailureReason>,
    directory: Option<TempDir>,
}

impl ChunkResult {
    /// A result in the `Pending` state, as created when a chunk is submitted.
    pub fn new(range: TimeRange) -> Self {
        Self {
            range,
            status: ChunkStatus::Pending,
            local_frames: Vec::new(),
            failure: None,
            directory: None,
        }
    }

    /// A successful result for frames that already exist on disk.
    ///
    /// The files are not owned by the result; they are moved or deleted only
    /// when the result is materialised.
    pub fn succeeded(range: TimeRange, frame_paths: Vec<PathBuf>) -> Self {
        let local_frames = frame_paths
            .into_iter()
            .enumerate()
            .map(|(position, path)| LocalFrame {
                local_index: position as u64,
                path,
            })
            .collect();
        Self {
            range,
            status: ChunkStatus::Succeeded,
            local_frames,
            failure: None,
            directory: None,
        }
    }

    /// A failed result.
    pub fn failed(range: TimeRange, reason: FailureReason) -> Self {
        Self {
            range,
            status: ChunkStatus::Failed,
            local_frames: Vec::new(),
            failure: Some(reason),
            directory: None,
        }
    }

    /// The range this result belongs to.
    pub fn range(&self) -> &TimeRange {
        &self.range
    }

    /// Index of the range.
    pub fn index(&self) -> usize {
        self.range.index
    }

    /// Current lifecycle state.
    pub fn status(&self) -> ChunkStatus {
        self.status
    }

    /// Frames in decoder order. Empty unless the chunk succeeded.
    pub fn local_frames(&self) -> &[LocalFrame] {
        &self.local_frames
    }

    /// Number of frames produced.
    pub fn frame_count(&self) -> usize {
        self.local_frames.len()
    }

    /// The failure, if the chunk failed.
    pub fn failure(&self) -> Option<ChunkFailure> {
        self.failure.as_ref().map(|reason| ChunkFailure {
            range: self.range,
            reason: reason.clone(),
        })
    }

    /// The private directory holding the chunk's frames, if one was created.
    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_ref().map(TempDir::path)
    }

    /// Map the local frames onto the global sequence starting at
    /// `first_global_index`.
    pub fn global_frames(&self, first_global_index: u64) -> impl Iterator<Item = GlobalFrame> + '_ {
        self.local_frames.iter().map(move |frame| GlobalFrame {
            global_index: first_global_index + frame.local_index,
            source_chunk_index: self.range.index,
            source_local_index: frame.local_index,
            path: frame.path.clone(),
        })
    }

    fn begin(&mut self) {
        debug_assert_eq!(self.status, ChunkStatus::Pending);
        self.status = ChunkStatus::Running;
    }

    fn succeed(&mut self, directory: TempDir, local_frames: Vec<LocalFrame>) {
        debug_assert_eq!(self.status, ChunkStatus::Running);
        self.status = ChunkStatus::Succeeded;
        self.local_frames = local_frames;
        self.directory = Some(directory);
    }

    fn fail(&mut self, reason: FailureReason, directory: Option<TempDir>) {
        debug_assert!(!self.status.is_terminal());
        self.status = ChunkStatus::Failed;
        self.local_frames.clear();
        self.failure = Some(reason);
        // Whatever the decoder left behind is deleted with the directory.
        self.directory = directory;
    }
}

/// Decoder parameters shared by every chunk of a job.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeSettings {
    /// Output frame width in pixels.
    pub width: u32,
    /// Output frame height in pixels.
    pub height: u32,
    /// Sampling rate in frames per second.
    pub frames_per_second: f64,
    /// Extension of the image files the decoder writes.
    pub file_extension: String,
    /// Per-chunk time limit.
    pub timeout: Option<Duration>,
}

/// Runs the decoder for individual chunks.
pub struct ChunkExtractor {
    decoder: Arc<dyn FrameDecoder>,
    settings: DecodeSettings,
    workspace: PathBuf,
}

impl ChunkExtractor {
    /// Create an extractor whose chunk directories are created under
    /// `workspace`.
    pub fn new(decoder: Arc<dyn FrameDecoder>, settings: DecodeSettings, workspace: PathBuf) -> Self {
        Self {
            decoder,
            settings,
            workspace,
        }
    }

    /// The decoder settings.
    pub fn settings(&self) -> &DecodeSettings {
        &self.settings
    }

    /// Extract the chunk described by a pending `result`.
    ///
    /// Always returns the same result in a terminal state.
    pub fn extract(&self, mut result: ChunkResult) -> ChunkResult {
        result.begin();
        let range = result.range;

        let directory = match tempfile::Builder::new()
            .prefix(&format!("chunk_{}_", range.index))
            .tempdir_in(&self.workspace)
        {
            Ok(directory) => directory,
            Err(error) => {
                log::warn!("Chunk {range}: cannot create output directory: {error}");
                result.fail(FailureReason::Io(error.to_string()), None);
                return result;
            }
        };

        log::debug!("Chunk {range}: extracting into {}", directory.path().display());

        let request = DecodeRequest {
            range: &range,
            width: self.settings.width,
            height: self.settings.height,
            frames_per_second: self.settings.frames_per_second,
            output_dir: directory.path(),
            file_extension: &self.settings.file_extension,
            timeout: self.settings.timeout,
        };

        let started = Instant::now();
        let outcome = self.decoder.decode(&request).and_then(|()| {
            match self.settings.timeout {
                Some(limit) if started.elapsed() > limit => Err(FailureReason::Timeout(limit)),
                _ => Ok(()),
            }
        });

        if let Err(reason) = outcome {
            log::warn!("Chunk {range} failed: {reason}");
            result.fail(reason, Some(directory));
            return result;
        }

        match collect_frames(directory.path(), &self.settings.file_extension) {
            Ok(frames) if frames.is_empty() => {
                log::warn!("Chunk {range} failed: decoder produced no frames");
                result.fail(FailureReason::MissingOutput, Some(directory));
            }
            Ok(frames) => {
                log::debug!(
                    "Chunk {range} complete: {} frame(s) in {:.2?}",
                    frames.len(),
                    started.elapsed(),
                );
                result.succeed(directory, frames);
            }
            Err(error) => {
                log::warn!("Chunk {range}: cannot list output: {error}");
                result.fail(FailureReason::Io(error.to_string()), Some(directory));
            }
        }
        result
    }
}

/// List the frame files in `directory`, ordered by the sequence number the
/// decoder put in each file stem.
fn collect_frames(directory: &Path, extension: &str) -> std::io::Result<Vec<LocalFrame>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(directory)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        let matches_extension = path
            .extension()
            .and_then(|value| value.to_str())
            .is_some_and(|value| value.eq_ignore_ascii_case(extension));
        if matches_extension {
            files.push(path);
        }
    }

    files.sort_by(|left, right| compare_frame_paths(left, right));

    Ok(files
        .into_iter()
        .enumerate()
        .map(|(position, path)| LocalFrame {
            local_index: position as u64,
            path,
        })
        .collect())
}

fn sequence_number(path: &Path) -> Option<u64> {
    let stem = path.file_stem()?.to_str()?;
    let digits: String = stem
        .chars()
        .rev()
        .take_while(char::is_ascii_digit)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    digits.parse().ok()
}

fn compare_frame_paths(left: &Path, right: &Path) -> Ordering {
    match (sequence_number(left), sequence_number(right)) {
        (Some(a), Some(b)) => a.cmp(&b).then_with(|| left.cmp(right)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => left.cmp(right),
    }
}
