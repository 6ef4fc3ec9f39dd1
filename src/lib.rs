//! Core library for the rust_hil test automation framework.
//!
//! This library contains the building blocks for driving hardware-in-the-loop
//! connectivity tests: background job execution with output capture and
//! timeouts, an SSH transport with typed failure classification, device
//! controller lifecycle management, and run result reporting. It is used by
//! the `rust_hil` command-line tool and by test harness binaries.

pub mod config;
pub mod controller;
pub mod error;
pub mod job;
pub mod results;
pub mod ssh;

pub use config::Settings;
pub use error::{AppResult, HilError};
pub use job::{BackgroundJob, JobOutput, JobSpec};
pub use ssh::{SshConnection, SshSettings};
