//! Shared test helpers: a deterministic in-process decoder and a progress
//! recorder.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use framechunk::{DecodeRequest, FailureReason, FrameDecoder, ProgressCallback, ProgressInfo};

/// Writes `max(1, floor(len * fps))` small files per chunk, named like ffmpeg
/// output (`0001.jpg`, `0002.jpg`, ...). Each file holds the timestamp of
/// the frame it stands for, so merged output can be checked byte for byte.
#[derive(Default)]
pub struct SyntheticDecoder {
    delays: HashMap<usize, Duration>,
    failing: HashSet<usize>,
    silent: HashSet<usize>,
    invocations: Mutex<Vec<usize>>,
    running: AtomicUsize,
    peak_running: AtomicUsize,
}

impl SyntheticDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep for `delay` before producing chunk `index`.
    pub fn with_delay(mut self, index: usize, delay: Duration) -> Self {
        self.delays.insert(index, delay);
        self
    }

    /// Make chunk `index` exit with status 1.
    pub fn failing(mut self, index: usize) -> Self {
        self.failing.insert(index);
        self
    }

    /// Make chunk `index` succeed without writing anything.
    pub fn silent(mut self, index: usize) -> Self {
        self.silent.insert(index);
        self
    }

    /// Chunk indices in the order the decoder was invoked.
    pub fn invocations(&self) -> Vec<usize> {
        self.invocations.lock().unwrap().clone()
    }

    pub fn invocation_count(&self, index: usize) -> usize {
        self.invocations().iter().filter(|&&seen| seen == index).count()
    }

    /// Highest number of decode calls observed running at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak_running.load(Ordering::SeqCst)
    }
}

impl FrameDecoder for SyntheticDecoder {
    fn decode(&self, request: &DecodeRequest<'_>) -> Result<(), FailureReason> {
        let index = request.range.index;
        self.invocations.lock().unwrap().push(index);
        let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_running.fetch_max(now_running, Ordering::SeqCst);

        if let Some(delay) = self.delays.get(&index) {
            thread::sleep(*delay);
        }

        let outcome = if self.failing.contains(&index) {
            Err(FailureReason::Exit {
                code: Some(1),
                stderr: format!("synthetic failure in chunk {index}"),
            })
        } else if self.silent.contains(&index) {
            Ok(())
        } else {
            write_frames(request)
        };

        self.running.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

fn write_frames(request: &DecodeRequest<'_>) -> Result<(), FailureReason> {
    let count = request.range.expected_frames(request.frames_per_second);
    for number in 1..=count {
        let timestamp =
            request.range.start.as_secs_f64() + (number - 1) as f64 / request.frames_per_second;
        let path = request
            .output_dir
            .join(format!("{number:04}.{}", request.file_extension));
        fs::write(&path, format!("frame at {timestamp:.3}s"))
            .map_err(|error| FailureReason::Io(error.to_string()))?;
    }
    Ok(())
}

/// Sorted `(file name, contents)` pairs of every file in `directory`.
pub fn directory_contents(directory: &Path) -> Vec<(String, Vec<u8>)> {
    let mut entries: Vec<(String, Vec<u8>)> = fs::read_dir(directory)
        .unwrap()
        .map(|entry| {
            let path = entry.unwrap().path();
            let name = path.file_name().unwrap().to_string_lossy().into_owned();
            (name, fs::read(&path).unwrap())
        })
        .collect();
    entries.sort();
    entries
}

/// Number of entries directly inside `directory`.
pub fn entry_count(directory: &Path) -> usize {
    fs::read_dir(directory).unwrap().count()
}

pub struct RecordingProgress {
    pub infos: Mutex<Vec<ProgressInfo>>,
}

impl RecordingProgress {
    pub fn new() -> Self {
        Self {
            infos: Mutex::new(Vec::new()),
        }
    }

    pub fn completed_counts(&self) -> Vec<usize> {
        self.infos
            .lock()
            .unwrap()
            .iter()
            .map(|info| info.completed_chunks)
            .collect()
    }
}

impl ProgressCallback for RecordingProgress {
    fn on_progress(&self, info: &ProgressInfo) {
        self.infos.lock().unwrap().push(info.clone());
    }
}
