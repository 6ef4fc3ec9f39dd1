//! SSH transport for remote command execution.
//!
//! Test hosts reach devices and access points over plain `ssh`/`scp`
//! subprocesses rather than an in-process SSH library: lab images ship the
//! OpenSSH client, its behavior with flaky links is well understood, and its
//! stderr is stable enough to classify. This module provides:
//!
//! - [`SshSettings`]: connection parameters and argv construction
//! - [`SshConnection`]: run/start/upload/download against one destination
//! - [`SshError`]: typed classification of transport failures
//!
//! # Failure classification
//!
//! The OpenSSH client exits with status 255 when the *transport* failed and
//! with the remote command's own status otherwise. Only 255 exits are
//! classified into [`SshError`] by matching stderr; any other non-zero exit
//! is the remote command failing and surfaces as
//! [`crate::HilError::CommandFailed`] with the full output attached.
//!
//! # Transient DNS retry
//!
//! Lab DNS is the one infrastructure failure worth retrying: resolvers
//! restart during testbed bring-up and recover within moments. A command
//! whose transport fails with [`SshError::TemporaryDnsFailure`] is retried
//! once ([`DNS_RETRY_ATTEMPTS`] attempts in total). Every other transport
//! failure, and in particular [`SshError::PermissionDenied`] and
//! [`SshError::KeyVerificationFailure`], fails fast since retrying cannot
//! help.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

mod connection;
mod settings;

pub use connection::SshConnection;
pub use settings::SshSettings;

/// Exit status the OpenSSH client reserves for transport failures.
pub const TRANSPORT_EXIT_CODE: i32 = 255;

/// Total attempts for commands whose transport fails with a transient DNS
/// error. Everything else gets exactly one attempt.
pub const DNS_RETRY_ATTEMPTS: u32 = 2;

/// A classified SSH transport failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SshError {
    /// The TCP connection or SSH handshake timed out.
    #[error("connection timed out")]
    ConnectionTimeout,

    /// Authentication was rejected.
    #[error("permission denied by remote host")]
    PermissionDenied,

    /// The host key did not match what the client expected.
    #[error("host key verification failed")]
    KeyVerificationFailure,

    /// The hostname does not resolve at all.
    #[error("could not resolve hostname")]
    UnresolvedHost,

    /// Name resolution failed transiently; worth one retry.
    #[error("temporary DNS failure resolving hostname")]
    TemporaryDnsFailure,

    /// The remote host actively refused the connection.
    #[error("connection refused by remote host")]
    ConnectionRefused,

    /// Transport failed but stderr matched no known pattern.
    #[error("unclassified transport failure: {0}")]
    Unknown(String),
}

fn pattern(re: &str) -> Regex {
    #[allow(clippy::expect_used)]
    Regex::new(re).expect("static pattern must compile")
}

/// Ordered stderr patterns; the first match wins.
static CLASSIFIERS: Lazy<Vec<(Regex, SshError)>> = Lazy::new(|| {
    vec![
        (
            pattern(r"(?i)Temporary failure in name resolution"),
            SshError::TemporaryDnsFailure,
        ),
        (
            pattern(r"(?i)Could not resolve hostname|Name or service not known|No address associated with"),
            SshError::UnresolvedHost,
        ),
        (
            pattern(r"(?i)Host key verification failed|REMOTE HOST IDENTIFICATION HAS CHANGED"),
            SshError::KeyVerificationFailure,
        ),
        (pattern(r"(?i)Permission denied"), SshError::PermissionDenied),
        (
            pattern(r"(?i)Connection timed out|timed out during banner exchange|Operation timed out"),
            SshError::ConnectionTimeout,
        ),
        (pattern(r"(?i)Connection refused"), SshError::ConnectionRefused),
    ]
});

impl SshError {
    /// Classifies a transport failure from the client's stderr.
    pub fn classify(stderr: &str) -> Self {
        for (regex, error) in CLASSIFIERS.iter() {
            if regex.is_match(stderr) {
                return error.clone();
            }
        }
        let detail = stderr
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .unwrap_or("no diagnostic output")
            .trim()
            .to_string();
        SshError::Unknown(detail)
    }

    /// True for failures that may clear on an immediate retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, SshError::TemporaryDnsFailure)
    }

    /// True for failures that no amount of retrying can fix.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SshError::PermissionDenied | SshError::KeyVerificationFailure
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_temporary_dns() {
        let err = SshError::classify(
            "ssh: connect to host dut-3.lab port 22: Temporary failure in name resolution",
        );
        assert_eq!(err, SshError::TemporaryDnsFailure);
        assert!(err.is_transient());
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_classify_unresolved_host() {
        let err =
            SshError::classify("ssh: Could not resolve hostname dut-3.lab: Name or service not known");
        assert_eq!(err, SshError::UnresolvedHost);
        assert!(!err.is_transient());
    }

    #[test]
    fn test_classify_permission_denied() {
        let err = SshError::classify("root@192.168.42.11: Permission denied (publickey,password).");
        assert_eq!(err, SshError::PermissionDenied);
        assert!(err.is_fatal());
    }

    #[test]
    fn test_classify_connection_timeout() {
        let err = SshError::classify(
            "ssh: connect to host 192.168.42.11 port 22: Connection timed out",
        );
        assert_eq!(err, SshError::ConnectionTimeout);

        let banner = SshError::classify("Connection timed out during banner exchange");
        assert_eq!(banner, SshError::ConnectionTimeout);
    }

    #[test]
    fn test_classify_connection_refused() {
        let err =
            SshError::classify("ssh: connect to host 192.168.42.11 port 22: Connection refused");
        assert_eq!(err, SshError::ConnectionRefused);
    }

    #[test]
    fn test_classify_host_key_change() {
        let err = SshError::classify(
            "@@@@@@@@@@@@\nWARNING: REMOTE HOST IDENTIFICATION HAS CHANGED!\n@@@@@@@@@@@@",
        );
        assert_eq!(err, SshError::KeyVerificationFailure);
        assert!(err.is_fatal());
    }

    #[test]
    fn test_classify_unknown_keeps_last_line() {
        let err = SshError::classify("kex_exchange_identification: read: reset by peer\n\n");
        match err {
            SshError::Unknown(detail) => assert!(detail.contains("kex_exchange_identification")),
            other => panic!("expected Unknown, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_empty_stderr() {
        assert_eq!(
            SshError::classify(""),
            SshError::Unknown("no diagnostic output".to_string())
        );
    }
}
