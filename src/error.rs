//! Custom error types for the framework.
//!
//! This module defines the primary error type, `HilError`, for the entire framework.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! different kinds of errors that can occur, from I/O and configuration issues to
//! subprocess and SSH transport problems.
//!
//! ## Error Hierarchy
//!
//! `HilError` is an enum that consolidates various error sources:
//!
//! - **`Config`**: Wraps errors from the `figment` crate, typically related to file parsing
//!   or format issues in the configuration files.
//! - **`Configuration`**: Represents semantic errors in the configuration, such as invalid
//!   values that pass parsing but are logically incorrect (e.g., a zero retention limit).
//!   These are usually caught during the validation step.
//! - **`Io`**: Wraps standard `std::io::Error`, covering file and pipe I/O issues.
//! - **`Spawn`**: Raised when a child process cannot be started at all (missing binary,
//!   permission problem). Kept distinct from `Io` so callers can tell "the program never
//!   ran" apart from "the program ran and its streams failed".
//! - **`CommandFailed` / `CommandTimeout`**: A child process ran but exited non-zero, or
//!   was killed when its wall-clock limit expired. Both carry the full [`JobOutput`],
//!   including any stdout/stderr captured before the failure.
//! - **`Ssh`**: Typed SSH transport failures classified from the `ssh` client's exit
//!   status and stderr. See [`crate::ssh::SshError`].
//! - **`Controller` / `Agent`**: Errors from device controller lifecycle management and
//!   on-device agent launches.
//! - **`ShutdownFailed`**: Collects every error encountered while tearing down a set of
//!   controllers, so one bad controller cannot hide failures in the others.
//!
//! By using `#[from]`, `HilError` can be seamlessly created from underlying error types,
//! simplifying error handling throughout the framework with the `?` operator.

use thiserror::Error;

use crate::job::JobOutput;
use crate::ssh::SshError;

/// Convenience alias for results using the framework error type.
pub type AppResult<T> = std::result::Result<T, HilError>;

/// Unified error type for all framework operations.
#[derive(Error, Debug)]
pub enum HilError {
    /// Configuration file could not be loaded or parsed.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Configuration parsed but contained invalid values.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A child process could not be started.
    #[error("Failed to spawn `{program}`: {source}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// OS-level cause.
        #[source]
        source: std::io::Error,
    },

    /// A child process exited with a non-zero status while checking was enabled.
    #[error("Command `{}` failed with {}", .0.command, .0.status_display())]
    CommandFailed(Box<JobOutput>),

    /// A child process exceeded its wall-clock limit and was killed.
    #[error("Command `{}` timed out after {:.1}s", .0.command, .0.duration.as_secs_f64())]
    CommandTimeout(Box<JobOutput>),

    /// A write to a job's stdin was requested but no pipe is open.
    #[error("Job stdin is not piped or was already closed")]
    StdinUnavailable,

    /// A background task backing a job panicked or was cancelled.
    #[error("Background task failed: {0}")]
    TaskFailure(String),

    /// A run report could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// SSH transport failure, classified from client exit status and stderr.
    #[error("SSH error: {0}")]
    Ssh(#[from] SshError),

    /// Device controller lifecycle error.
    #[error("Controller error: {0}")]
    Controller(String),

    /// On-device agent launch or readiness error.
    #[error("Agent error: {0}")]
    Agent(String),

    /// One or more controllers failed during teardown.
    #[error("Shutdown failed with errors")]
    ShutdownFailed(Vec<HilError>),
}

impl HilError {
    /// Returns the captured [`JobOutput`] for command failures and timeouts.
    ///
    /// Lets callers inspect partial stdout/stderr without matching on the
    /// error variant themselves.
    pub fn output(&self) -> Option<&JobOutput> {
        match self {
            HilError::CommandFailed(output) | HilError::CommandTimeout(output) => Some(output),
            _ => None,
        }
    }

    /// True when the error represents a wall-clock timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, HilError::CommandTimeout(_))
    }
}
