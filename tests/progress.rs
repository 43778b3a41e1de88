//! Progress and cancellation integration tests.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{RecordingProgress, SyntheticDecoder, entry_count};
use framechunk::{CancellationToken, ExtractOptions, FrameChunkError, FrameExtractor, GapPolicy};

fn options(workers: usize) -> ExtractOptions {
    ExtractOptions::new()
        .with_chunk_span_seconds(10.0)
        .with_sampling_rate(1.0)
        .with_max_workers(workers)
}

// ── CancellationToken ──────────────────────────────────────────────

#[test]
fn cancellation_token_default_not_cancelled() {
    let token = CancellationToken::new();
    assert!(!token.is_cancelled());
}

#[test]
fn cancellation_token_clone_shares_state() {
    let token = CancellationToken::default();
    let clone = token.clone();
    assert!(!clone.is_cancelled());

    token.cancel();
    assert!(clone.is_cancelled());
}

#[test]
fn cancelled_before_start_dispatches_nothing() {
    let decoder = Arc::new(SyntheticDecoder::new());
    let output = tempfile::tempdir().unwrap();
    let token = CancellationToken::new();
    token.cancel();

    let result = FrameExtractor::with_shared_decoder(
        decoder.clone(),
        options(4).with_cancellation(token),
    )
    .unwrap()
    .extract_to_directory(Duration::from_secs(40), output.path());

    assert!(matches!(result, Err(FrameChunkError::Cancelled)));
    assert!(decoder.invocations().is_empty());
    assert_eq!(entry_count(output.path()), 0);
}

#[test]
fn cancelled_directory_job_removes_written_frames() {
    let decoder = Arc::new(SyntheticDecoder::new().with_delay(1, Duration::from_millis(300)));
    let output = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let token = CancellationToken::new();

    let trigger = token.clone();
    let options = options(1)
        .with_temp_dir(scratch.path())
        .with_cancellation(token)
        .with_progress(Arc::new(move |completed: usize, _total: usize| {
            if completed == 1 {
                trigger.cancel();
            }
        }));

    let result = FrameExtractor::with_shared_decoder(decoder.clone(), options)
        .unwrap()
        .extract_to_directory(Duration::from_secs(30), output.path());

    assert!(matches!(result, Err(FrameChunkError::Cancelled)));
    assert_eq!(decoder.invocation_count(2), 0);
    assert_eq!(entry_count(output.path()), 0);
    assert_eq!(entry_count(scratch.path()), 0);
}

// ── ProgressCallback ───────────────────────────────────────────────

#[test]
fn progress_reports_every_chunk_monotonically() {
    let recorder = Arc::new(RecordingProgress::new());
    let decoder = SyntheticDecoder::new()
        .with_delay(0, Duration::from_millis(150))
        .with_delay(3, Duration::from_millis(50));
    let output = tempfile::tempdir().unwrap();

    FrameExtractor::new(decoder, options(4).with_progress(recorder.clone()))
        .unwrap()
        .extract_to_directory(Duration::from_secs(55), output.path())
        .unwrap();

    assert_eq!(recorder.completed_counts(), vec![1, 2, 3, 4, 5, 6]);

    let infos = recorder.infos.lock().unwrap();
    assert!(infos.iter().all(|info| info.total_chunks == 6));
    assert!(infos.iter().all(|info| info.succeeded));
    let last = infos.last().unwrap();
    assert!((last.percentage - 100.0).abs() < f32::EPSILON);
    assert_eq!(last.estimated_remaining, Some(Duration::ZERO));

    let mut reported: Vec<usize> = infos.iter().map(|info| info.chunk_index).collect();
    reported.sort_unstable();
    assert_eq!(reported, vec![0, 1, 2, 3, 4, 5]);
}

#[test]
fn progress_marks_failed_chunks() {
    let recorder = Arc::new(RecordingProgress::new());
    let output = tempfile::tempdir().unwrap();
    let options = options(1)
        .with_gap_policy(GapPolicy::SkipFailed)
        .with_progress(recorder.clone());

    FrameExtractor::new(SyntheticDecoder::new().failing(1), options)
        .unwrap()
        .extract_to_directory(Duration::from_secs(25), output.path())
        .unwrap();

    let outcomes: Vec<(usize, bool)> = recorder
        .infos
        .lock()
        .unwrap()
        .iter()
        .map(|info| (info.chunk_index, info.succeeded))
        .collect();
    assert_eq!(outcomes, vec![(0, true), (1, false), (2, true)]);
}

#[test]
fn closure_callbacks_receive_counts() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let output = tempfile::tempdir().unwrap();
    let options = options(2).with_progress(Arc::new(move |completed: usize, total: usize| {
        sink.lock().unwrap().push((completed, total));
    }));

    FrameExtractor::new(SyntheticDecoder::new(), options)
        .unwrap()
        .extract_to_directory(Duration::from_secs(25), output.path())
        .unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![(1, 3), (2, 3), (3, 3)]);
}

#[test]
fn panicking_callback_does_not_abort_extraction() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let output = tempfile::tempdir().unwrap();
    let options = options(2).with_progress(Arc::new(move |completed: usize, _total: usize| {
        counter.fetch_add(1, Ordering::SeqCst);
        if completed == 1 {
            panic!("callback bug");
        }
    }));

    let report = FrameExtractor::new(SyntheticDecoder::new(), options)
        .unwrap()
        .extract_to_directory(Duration::from_secs(30), output.path())
        .unwrap();

    assert_eq!(report.frame_count, 30);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[test]
fn slow_callback_does_not_block_workers() {
    let output = tempfile::tempdir().unwrap();
    let options = options(4).with_progress(Arc::new(|_completed: usize, _total: usize| {
        std::thread::sleep(Duration::from_millis(50));
    }));

    let report = FrameExtractor::new(SyntheticDecoder::new(), options)
        .unwrap()
        .extract_to_directory(Duration::from_secs(40), output.path())
        .unwrap();

    assert_eq!(report.frame_count, 40);
    assert_eq!(report.job.completed_count, 4);
}
