//! End-to-end tests for job execution semantics.

use std::io::Write;
use std::time::{Duration, Instant};

use rust_hil::job::{self, JobSpec};
use rust_hil::HilError;

#[tokio::test]
async fn test_shell_command_captures_stdout() {
    let output = job::run(JobSpec::shell("echo hello | tr a-z A-Z")).await.unwrap();

    assert!(output.success());
    assert_eq!(output.exit_code, Some(0));
    assert_eq!(output.stdout_text(), "HELLO\n");
    assert!(output.stderr.is_empty());
}

#[tokio::test]
async fn test_exec_command_bypasses_shell() {
    // The pipe character must reach printf as a literal argument.
    let output = job::run(JobSpec::exec(["printf", "%s", "a|b"])).await.unwrap();

    assert_eq!(output.stdout_text(), "a|b");
    assert_eq!(output.command, "printf %s a|b");
}

#[tokio::test]
async fn test_nonzero_exit_is_an_error_with_output() {
    let err = job::run(JobSpec::shell("echo diagnostics >&2; exit 4"))
        .await
        .unwrap_err();

    match &err {
        HilError::CommandFailed(output) => {
            assert_eq!(output.exit_code, Some(4));
            assert_eq!(output.stderr_text(), "diagnostics\n");
        }
        other => panic!("expected CommandFailed, got {other:?}"),
    }
    assert!(err.to_string().contains("exit code 4"));
}

#[tokio::test]
async fn test_unchecked_nonzero_exit_is_ok() {
    let output = job::run(JobSpec::shell("exit 4").unchecked()).await.unwrap();

    assert!(!output.success());
    assert_eq!(output.exit_code, Some(4));
}

#[tokio::test]
async fn test_timeout_kills_process_quickly() {
    let spec = JobSpec::shell("echo started; sleep 30")
        .with_timeout(Duration::from_millis(500));

    let start = Instant::now();
    let err = job::run(spec).await.unwrap_err();
    let elapsed = start.elapsed();

    assert!(
        elapsed < Duration::from_secs(5),
        "timeout enforcement took too long: {:?}",
        elapsed
    );
    assert!(err.is_timeout());
    let output = err.output().expect("timeout carries output");
    assert!(output.timed_out);
    // Output produced before the kill is preserved.
    assert_eq!(output.stdout_text(), "started\n");
}

#[tokio::test]
async fn test_timeout_applies_to_unchecked_jobs_too() {
    let spec = JobSpec::shell("sleep 30")
        .with_timeout(Duration::from_millis(300))
        .unchecked();

    let err = job::run(spec).await.unwrap_err();
    assert!(err.is_timeout());
}

#[tokio::test]
async fn test_stdin_bytes_reach_child() {
    let output = job::run(JobSpec::exec(["cat"]).with_stdin_bytes("line one\nline two\n"))
        .await
        .unwrap();

    assert_eq!(output.stdout_text(), "line one\nline two\n");
}

#[tokio::test]
async fn test_stdin_from_file() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    write!(file, "ssid=lab-ap-5g\npassword=hunter2\n").expect("write");
    file.flush().expect("flush");

    let output = job::run(JobSpec::exec(["cat"]).with_stdin_file(file.path()))
        .await
        .unwrap();

    assert_eq!(output.stdout_text(), "ssid=lab-ap-5g\npassword=hunter2\n");
}

#[tokio::test]
async fn test_missing_stdin_file_fails_before_spawn() {
    let err = job::run(JobSpec::exec(["cat"]).with_stdin_file("/nonexistent/stdin-source"))
        .await
        .unwrap_err();

    assert!(matches!(err, HilError::Io(_)), "got {err:?}");
}

#[tokio::test]
async fn test_environment_and_working_directory() {
    let dir = tempfile::tempdir().expect("temp dir");
    let expected = dir.path().canonicalize().expect("canonicalize");

    let output = job::run(
        JobSpec::shell("printf '%s:%s' \"$HIL_TEST_MARKER\" \"$(pwd)\"")
            .with_env("HIL_TEST_MARKER", "wifi-6e")
            .with_cwd(dir.path()),
    )
    .await
    .unwrap();

    let text = output.stdout_text().into_owned();
    let (marker, cwd) = text.split_once(':').expect("marker:cwd");
    assert_eq!(marker, "wifi-6e");
    assert_eq!(
        std::path::Path::new(cwd).canonicalize().expect("canonicalize"),
        expected
    );
}

#[tokio::test]
async fn test_retention_limit_keeps_tail() {
    let output = job::run(JobSpec::shell("seq 1 2000").with_retention_limit(256))
        .await
        .unwrap();

    assert!(output.stdout_truncated);
    assert!(output.stdout.len() <= 256);
    // The newest output survives; the oldest is dropped.
    assert!(output.stdout_text().ends_with("2000\n"));
    assert!(!output.stdout_text().starts_with("1\n"));
}

#[tokio::test]
async fn test_spawn_failure_is_distinct_error() {
    let err = job::run(JobSpec::exec(["/nonexistent/hil-binary", "--version"]))
        .await
        .unwrap_err();

    match err {
        HilError::Spawn { program, .. } => assert_eq!(program, "/nonexistent/hil-binary"),
        other => panic!("expected Spawn, got {other:?}"),
    }
}

#[tokio::test]
async fn test_signal_death_reported() {
    let output = job::run(JobSpec::shell("kill -9 $$").unchecked()).await.unwrap();

    assert!(!output.success());
    assert_eq!(output.exit_code, None);
    assert_eq!(output.signal, Some(9));
    assert_eq!(output.status_display(), "signal 9");
}

#[tokio::test]
async fn test_signal_death_fails_checked_jobs() {
    let err = job::run(JobSpec::shell("kill -9 $$")).await.unwrap_err();
    assert!(matches!(err, HilError::CommandFailed(_)));
}

#[tokio::test]
async fn test_empty_stdin_bytes_still_reach_eof() {
    // cat with an empty stdin pipe must terminate, not hang.
    let spec = JobSpec::exec(["cat"])
        .with_stdin_bytes("")
        .with_timeout(Duration::from_secs(5));
    let output = job::run(spec).await.unwrap();

    assert!(output.success());
    assert!(output.stdout.is_empty());
}
