//! MediaProbe tests.

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use framechunk::{FrameChunkError, MediaProbe};

// Writing an executable while another test thread forks can make exec fail
// with ETXTBSY; every test that spawns a process holds this lock.
static SERIAL: Mutex<()> = Mutex::new(());

#[test]
fn parses_string_duration() {
    let json = r#"{ "format": { "duration": "25.500000" } }"#;
    assert_eq!(
        MediaProbe::parse_duration("clip.mp4", json).unwrap(),
        Duration::from_millis(25_500)
    );
}

#[test]
fn parses_numeric_duration() {
    let json = r#"{ "format": { "duration": 12 } }"#;
    assert_eq!(
        MediaProbe::parse_duration("clip.mp4", json).unwrap(),
        Duration::from_secs(12)
    );
}

#[test]
fn rejects_missing_or_unusable_duration() {
    for json in [
        r#"{ "format": {} }"#,
        r#"{ "format": { "duration": "N/A" } }"#,
        r#"{ "format": { "duration": "0.000000" } }"#,
        r#"{ "streams": [] }"#,
        "not json",
    ] {
        match MediaProbe::parse_duration("clip.mp4", json) {
            Err(FrameChunkError::ProbeError { path, .. }) => {
                assert_eq!(path, PathBuf::from("clip.mp4"));
            }
            other => panic!("Expected ProbeError for {json}, got: {other:?}"),
        }
    }
}

#[test]
fn missing_program_is_a_probe_error() {
    let _guard = SERIAL.lock().unwrap_or_else(|error| error.into_inner());
    let probe = MediaProbe::new().with_program("/nonexistent/ffprobe");
    match probe.probe_duration("clip.mp4") {
        Err(FrameChunkError::ProbeError { reason, .. }) => {
            assert!(reason.contains("failed to run"), "{reason}");
        }
        other => panic!("Expected ProbeError, got: {other:?}"),
    }
}

#[cfg(unix)]
mod scripted {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    use framechunk::{FrameChunkError, MediaProbe};

    use super::SERIAL;

    fn write_script(directory: &Path, body: &str) -> PathBuf {
        let path = directory.join("fake-ffprobe");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn reads_duration_from_ffprobe_output() {
        let _guard = SERIAL.lock().unwrap_or_else(|error| error.into_inner());
        let tools = tempfile::tempdir().unwrap();
        let script = write_script(
            tools.path(),
            r#"echo '{ "format": { "duration": "90.250000" } }'"#,
        );

        let probe = MediaProbe::new().with_program(&script);
        assert_eq!(
            probe.probe_duration("anything.mp4").unwrap(),
            Duration::from_millis(90_250)
        );

        let batch = probe.duration_many(&["a.mp4", "b.mp4"]);
        assert_eq!(batch.len(), 2);
        assert!(batch.iter().all(Result::is_ok));
    }

    #[test]
    fn failing_ffprobe_reports_stderr() {
        let _guard = SERIAL.lock().unwrap_or_else(|error| error.into_inner());
        let tools = tempfile::tempdir().unwrap();
        let script = write_script(tools.path(), "echo 'missing.mp4: No such file or directory' >&2\nexit 1");

        let probe = MediaProbe::new().with_program(&script);
        match probe.probe_duration("missing.mp4") {
            Err(FrameChunkError::ProbeError { reason, .. }) => {
                assert!(reason.contains("No such file or directory"), "{reason}");
            }
            other => panic!("Expected ProbeError, got: {other:?}"),
        }
    }
}
