//! Gap policy, fail-fast and timeout tests.

mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use common::{SyntheticDecoder, directory_contents, entry_count};
use framechunk::{
    DecodeRequest, ExtractOptions, FailureReason, FrameChunkError, FrameDecoder, FrameExtractor,
    GapPolicy, JobState,
};

const DURATION: Duration = Duration::from_secs(25);

fn options(workers: usize) -> ExtractOptions {
    ExtractOptions::new()
        .with_chunk_span_seconds(10.0)
        .with_sampling_rate(1.0)
        .with_max_workers(workers)
}

fn run(
    decoder: SyntheticDecoder,
    options: ExtractOptions,
    output: &Path,
) -> Result<framechunk::JobReport, FrameChunkError> {
    FrameExtractor::new(decoder, options)
        .unwrap()
        .extract_to_directory(DURATION, output)
}

// ── skip_failed ────────────────────────────────────────────────────

#[test]
fn skip_failed_reports_partial_job_with_missing_range() {
    let output = tempfile::tempdir().unwrap();
    let report = run(
        SyntheticDecoder::new().failing(1),
        options(3).with_gap_policy(GapPolicy::SkipFailed),
        output.path(),
    )
    .unwrap();

    assert_eq!(report.state, JobState::PartiallyCompleted);
    assert!(!report.is_complete());
    assert_eq!(report.missing_ranges.len(), 1);
    assert_eq!(report.missing_ranges[0].index, 1);
    assert_eq!(report.missing_ranges[0].start, Duration::from_secs(10));
    assert_eq!(report.missing_ranges[0].end, Duration::from_secs(20));
    assert_eq!(report.frame_count, 25 - 10);
    assert!(report.job.failed_chunks.contains(&1));

    // Numbering stays contiguous across the hole.
    let contents = directory_contents(output.path());
    assert_eq!(contents.len(), 15);
    assert_eq!(contents[10].0, "0011.jpg");
    assert_eq!(contents[10].1, b"frame at 20.000s");
}

#[test]
fn skip_failed_with_every_chunk_failing_is_still_partial() {
    let output = tempfile::tempdir().unwrap();
    let report = run(
        SyntheticDecoder::new().failing(0).failing(1).failing(2),
        options(2).with_gap_policy(GapPolicy::SkipFailed),
        output.path(),
    )
    .unwrap();

    assert_eq!(report.state, JobState::PartiallyCompleted);
    assert_eq!(report.frame_count, 0);
    let missing: Vec<usize> = report.missing_ranges.iter().map(|range| range.index).collect();
    assert_eq!(missing, vec![0, 1, 2]);
}

// ── strict ─────────────────────────────────────────────────────────

#[test]
fn strict_failure_keeps_only_merged_prefix() {
    for workers in [1, 4] {
        let output = tempfile::tempdir().unwrap();
        let result = run(SyntheticDecoder::new().failing(1), options(workers), output.path());

        match result {
            Err(FrameChunkError::MergeGap {
                index,
                merged_frames,
                failures,
            }) => {
                assert_eq!(index, 1);
                assert_eq!(merged_frames, 10);
                assert_eq!(failures[0].range.index, 1);
                assert!(matches!(
                    failures[0].reason,
                    FailureReason::Exit { code: Some(1), .. }
                ));
            }
            other => panic!("Expected MergeGap, got: {other:?}"),
        }

        let names: Vec<String> = directory_contents(output.path())
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names.len(), 10, "workers = {workers}");
        assert_eq!(names.last().map(String::as_str), Some("0010.jpg"));
    }
}

#[test]
fn strict_failure_in_first_chunk_emits_nothing() {
    let output = tempfile::tempdir().unwrap();
    let result = run(SyntheticDecoder::new().failing(0), options(2), output.path());

    assert!(matches!(
        result,
        Err(FrameChunkError::MergeGap {
            index: 0,
            merged_frames: 0,
            ..
        })
    ));
    assert_eq!(entry_count(output.path()), 0);
}

#[test]
fn strict_gap_lists_later_known_failures() {
    // Chunk 0 is slow, so both failures are known when the cursor moves.
    let decoder = SyntheticDecoder::new()
        .with_delay(0, Duration::from_millis(300))
        .failing(1)
        .failing(2);
    let output = tempfile::tempdir().unwrap();

    match run(decoder, options(3), output.path()) {
        Err(FrameChunkError::MergeGap { index, failures, .. }) => {
            assert_eq!(index, 1);
            let indices: Vec<usize> = failures.iter().map(|failure| failure.range.index).collect();
            assert_eq!(indices, vec![1, 2]);
        }
        other => panic!("Expected MergeGap, got: {other:?}"),
    }
}

#[test]
fn missing_output_is_a_chunk_failure() {
    let output = tempfile::tempdir().unwrap();
    match run(SyntheticDecoder::new().silent(2), options(2), output.path()) {
        Err(FrameChunkError::MergeGap {
            index,
            merged_frames,
            failures,
        }) => {
            assert_eq!(index, 2);
            assert_eq!(merged_frames, 20);
            assert_eq!(failures[0].reason, FailureReason::MissingOutput);
        }
        other => panic!("Expected MergeGap, got: {other:?}"),
    }
}

#[test]
fn failures_do_not_stop_sibling_chunks() {
    let decoder = Arc::new(SyntheticDecoder::new().failing(0));
    let output = tempfile::tempdir().unwrap();
    let options = options(1).with_gap_policy(GapPolicy::SkipFailed);

    FrameExtractor::with_shared_decoder(decoder.clone(), options)
        .unwrap()
        .extract_to_directory(DURATION, output.path())
        .unwrap();

    assert_eq!(decoder.invocations(), vec![0, 1, 2]);
}

// ── fail_fast ──────────────────────────────────────────────────────

#[test]
fn fail_fast_stops_dispatch_after_first_failure() {
    let decoder = Arc::new(SyntheticDecoder::new().failing(1));
    let output = tempfile::tempdir().unwrap();
    let options = options(1)
        .with_fail_fast(true)
        .with_gap_policy(GapPolicy::SkipFailed);

    let result = FrameExtractor::with_shared_decoder(decoder.clone(), options)
        .unwrap()
        .extract_to_directory(Duration::from_secs(50), output.path());

    match result {
        Err(FrameChunkError::ChunkExtractionFailure { failures }) => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].range.index, 1);
        }
        other => panic!("Expected ChunkExtractionFailure, got: {other:?}"),
    }
    assert_eq!(decoder.invocations(), vec![0, 1]);
}

#[test]
fn fail_fast_error_message_names_the_chunk() {
    let output = tempfile::tempdir().unwrap();
    let error = run(
        SyntheticDecoder::new().failing(0),
        options(1).with_fail_fast(true),
        output.path(),
    )
    .unwrap_err();

    let message = error.to_string();
    assert!(message.contains("1 failed chunk"), "{message}");
    assert!(message.contains("synthetic failure in chunk 0"), "{message}");
}

// ── Timeouts and misbehaving decoders ───────────────────────────────

#[test]
fn slow_chunk_times_out() {
    let decoder = SyntheticDecoder::new().with_delay(1, Duration::from_millis(400));
    let output = tempfile::tempdir().unwrap();
    let options = options(3).with_chunk_timeout(Duration::from_millis(100));

    match run(decoder, options, output.path()) {
        Err(FrameChunkError::MergeGap { index, failures, .. }) => {
            assert_eq!(index, 1);
            assert_eq!(
                failures[0].reason,
                FailureReason::Timeout(Duration::from_millis(100))
            );
        }
        other => panic!("Expected MergeGap, got: {other:?}"),
    }
}

#[test]
fn timed_out_chunk_is_skippable() {
    let decoder = SyntheticDecoder::new().with_delay(2, Duration::from_millis(400));
    let output = tempfile::tempdir().unwrap();
    let options = options(3)
        .with_chunk_timeout(Duration::from_millis(100))
        .with_gap_policy(GapPolicy::SkipFailed);

    let report = run(decoder, options, output.path()).unwrap();
    assert_eq!(report.frame_count, 20);
    assert_eq!(report.missing_ranges[0].index, 2);
}

struct PanickingDecoder;

impl FrameDecoder for PanickingDecoder {
    fn decode(&self, request: &DecodeRequest<'_>) -> Result<(), FailureReason> {
        if request.range.index == 1 {
            panic!("decoder bug");
        }
        SyntheticDecoder::new().decode(request)
    }
}

#[test]
fn panicking_decoder_fails_only_its_chunk() {
    let output = tempfile::tempdir().unwrap();
    let options = options(2).with_gap_policy(GapPolicy::SkipFailed);

    let report = FrameExtractor::new(PanickingDecoder, options)
        .unwrap()
        .extract_to_directory(DURATION, output.path())
        .unwrap();

    assert_eq!(report.state, JobState::PartiallyCompleted);
    assert_eq!(report.frame_count, 15);
    assert_eq!(report.missing_ranges[0].index, 1);
}
