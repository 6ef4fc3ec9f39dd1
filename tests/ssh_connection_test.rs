//! SSH transport tests against fake ssh binaries.
//!
//! Real devices are not available everywhere these tests run, so they
//! substitute the `ssh` binary with small scripts that reproduce the
//! interesting transport behaviors: stderr diagnostics with exit 255,
//! transient DNS failures that deserve a retry, and ordinary remote command
//! failures that must not be mistaken for transport problems.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use rust_hil::ssh::{SshConnection, SshError, SshSettings};
use rust_hil::HilError;

fn fake_ssh(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write fake ssh");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod fake ssh");
    path
}

fn connection_for(binary: &Path) -> SshConnection {
    let mut settings = SshSettings::new("dut-1.lab").with_user("tester");
    settings.ssh_binary = binary.display().to_string();
    SshConnection::new(settings).expect("valid settings")
}

fn attempts(count_file: &Path) -> usize {
    fs::read_to_string(count_file)
        .map(|text| text.lines().count())
        .unwrap_or(0)
}

#[tokio::test]
async fn test_remote_command_success() {
    let dir = tempfile::tempdir().expect("temp dir");
    let binary = fake_ssh(dir.path(), "ssh", "echo remote-ok");
    let connection = connection_for(&binary);

    let output = connection.run("uname -a").await.unwrap();
    assert_eq!(output.stdout_text(), "remote-ok\n");
    assert!(output.success());
}

#[tokio::test]
async fn test_unresolved_host_is_classified() {
    let dir = tempfile::tempdir().expect("temp dir");
    let count = dir.path().join("count");
    let body = format!(
        "echo attempt >> {count}\n\
         echo 'ssh: Could not resolve hostname dut-1.lab: Name or service not known' >&2\n\
         exit 255",
        count = count.display()
    );
    let connection = connection_for(&fake_ssh(dir.path(), "ssh", &body));

    let err = connection.run("uname -a").await.unwrap_err();
    match err {
        HilError::Ssh(SshError::UnresolvedHost) => {}
        other => panic!("expected UnresolvedHost, got {other:?}"),
    }
    // A permanent resolution failure is not retried.
    assert_eq!(attempts(&count), 1);
}

#[tokio::test]
async fn test_transient_dns_failure_retries_then_succeeds() {
    let dir = tempfile::tempdir().expect("temp dir");
    let count = dir.path().join("count");
    let marker = dir.path().join("failed-once");
    let body = format!(
        "echo attempt >> {count}\n\
         if [ -f {marker} ]; then echo recovered; exit 0; fi\n\
         touch {marker}\n\
         echo 'ssh: connect to host dut-1.lab port 22: Temporary failure in name resolution' >&2\n\
         exit 255",
        count = count.display(),
        marker = marker.display()
    );
    let connection = connection_for(&fake_ssh(dir.path(), "ssh", &body));

    let output = connection.run("uname -a").await.unwrap();
    assert_eq!(output.stdout_text(), "recovered\n");
    assert_eq!(attempts(&count), 2);
}

#[tokio::test]
async fn test_transient_dns_failure_exhausts_after_two_attempts() {
    let dir = tempfile::tempdir().expect("temp dir");
    let count = dir.path().join("count");
    let body = format!(
        "echo attempt >> {count}\n\
         echo 'ssh: Temporary failure in name resolution' >&2\n\
         exit 255",
        count = count.display()
    );
    let connection = connection_for(&fake_ssh(dir.path(), "ssh", &body));

    let err = connection.run("uname -a").await.unwrap_err();
    match err {
        HilError::Ssh(SshError::TemporaryDnsFailure) => {}
        other => panic!("expected TemporaryDnsFailure, got {other:?}"),
    }
    assert_eq!(attempts(&count), 2);
}

#[tokio::test]
async fn test_permission_denied_is_fatal_and_not_retried() {
    let dir = tempfile::tempdir().expect("temp dir");
    let count = dir.path().join("count");
    let body = format!(
        "echo attempt >> {count}\n\
         echo 'tester@dut-1.lab: Permission denied (publickey,password).' >&2\n\
         exit 255",
        count = count.display()
    );
    let connection = connection_for(&fake_ssh(dir.path(), "ssh", &body));

    let err = connection.run("uname -a").await.unwrap_err();
    match err {
        HilError::Ssh(error) => {
            assert_eq!(error, SshError::PermissionDenied);
            assert!(error.is_fatal());
        }
        other => panic!("expected an SSH error, got {other:?}"),
    }
    assert_eq!(attempts(&count), 1);
}

#[tokio::test]
async fn test_changed_host_key_is_classified() {
    let dir = tempfile::tempdir().expect("temp dir");
    let body = "echo '@@@ WARNING: REMOTE HOST IDENTIFICATION HAS CHANGED! @@@' >&2\nexit 255";
    let connection = connection_for(&fake_ssh(dir.path(), "ssh", body));

    let err = connection.run("uname -a").await.unwrap_err();
    match err {
        HilError::Ssh(SshError::KeyVerificationFailure) => {}
        other => panic!("expected KeyVerificationFailure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_remote_failure_is_not_a_transport_error() {
    let dir = tempfile::tempdir().expect("temp dir");
    let body = "echo 'cat: /data/missing: No such file or directory' >&2\nexit 2";
    let connection = connection_for(&fake_ssh(dir.path(), "ssh", body));

    let err = connection.run("cat /data/missing").await.unwrap_err();
    match err {
        HilError::CommandFailed(output) => {
            assert_eq!(output.exit_code, Some(2));
            assert!(output.stderr_text().contains("No such file"));
        }
        other => panic!("expected CommandFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_run_unchecked_returns_remote_failures() {
    let dir = tempfile::tempdir().expect("temp dir");
    let body = "echo partial; exit 5";
    let connection = connection_for(&fake_ssh(dir.path(), "ssh", body));

    let output = connection.run_unchecked("flaky-tool").await.unwrap();
    assert_eq!(output.exit_code, Some(5));
    assert_eq!(output.stdout_text(), "partial\n");
}

#[tokio::test]
async fn test_remote_command_timeout() {
    let dir = tempfile::tempdir().expect("temp dir");
    let connection = connection_for(&fake_ssh(dir.path(), "ssh", "sleep 30"));

    let start = Instant::now();
    let err = connection
        .run_with_timeout("hang", Duration::from_millis(500))
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    assert!(
        start.elapsed() < Duration::from_secs(5),
        "timeout enforcement took too long"
    );
}

#[tokio::test]
async fn test_check_alive_reports_reachability() {
    let dir = tempfile::tempdir().expect("temp dir");

    let alive = connection_for(&fake_ssh(dir.path(), "ssh-ok", "echo alive"));
    assert!(alive.check_alive().await.unwrap());

    let dead = fake_ssh(
        dir.path(),
        "ssh-dead",
        "echo 'ssh: connect to host dut-1.lab port 22: Connection refused' >&2\nexit 255",
    );
    let dead = connection_for(&dead);
    assert!(!dead.check_alive().await.unwrap());
}

#[tokio::test]
async fn test_upload_invokes_scp_with_destination() {
    let dir = tempfile::tempdir().expect("temp dir");
    let args_file = dir.path().join("scp-args");
    let body = format!("echo \"$@\" > {}", args_file.display());
    let scp = fake_ssh(dir.path(), "scp", &body);

    let local = dir.path().join("firmware.bin");
    fs::write(&local, b"image").expect("write payload");

    let mut settings = SshSettings::new("dut-1.lab").with_user("tester");
    settings.scp_binary = scp.display().to_string();
    let connection = SshConnection::new(settings).expect("valid settings");

    connection.upload(&local, "/data/firmware.bin").await.unwrap();

    let recorded = fs::read_to_string(&args_file).expect("recorded argv");
    assert!(recorded.contains("-P 22"), "argv: {recorded}");
    assert!(recorded.contains("tester@dut-1.lab:/data/firmware.bin"), "argv: {recorded}");
    assert!(recorded.contains("firmware.bin"), "argv: {recorded}");
}

#[tokio::test]
async fn test_start_streams_remote_output() {
    let dir = tempfile::tempdir().expect("temp dir");
    let connection = connection_for(&fake_ssh(
        dir.path(),
        "ssh",
        "echo streaming; sleep 30",
    ));

    let mut job = connection.start("log_listener").await.unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if job.snapshot().stdout_text().contains("streaming") {
            break;
        }
        assert!(Instant::now() < deadline, "no output from remote session");
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    assert!(job.is_running());
    job.stop().await.unwrap();
}
