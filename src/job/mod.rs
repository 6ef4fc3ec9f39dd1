//! Subprocess execution layer.
//!
//! Everything the framework runs, locally or through `ssh`, goes through this
//! module. It provides:
//!
//! - [`CommandLine`]: shell-string or exec-argv command descriptions
//! - [`JobSpec`]: execution policy (env, cwd, stdin, timeout, retention, checking)
//! - [`run`]: one-shot execution returning a [`JobOutput`]
//! - [`BackgroundJob`]: long-running processes with live output streaming
//! - [`JobSupervisor`]: keep-alive restarts for session-length jobs
//!
//! # Data Flow
//!
//! ```text
//! child stdout/stderr --> pump tasks --> RetainedBuffer (JobOutput/snapshot)
//!                                   \--> broadcast::channel --> subscribers
//! ```
//!
//! Output is buffered up to a per-stream retention limit (oldest bytes are
//! dropped first) and simultaneously broadcast to any number of subscribers.
//! Subscribers that fall behind lose old chunks rather than slowing the
//! child down.
//!
//! # Termination
//!
//! Children run in their own process groups. Wall-clock timeouts kill the
//! whole group with SIGKILL and surface as [`crate::HilError::CommandTimeout`]
//! with the partial output attached; [`BackgroundJob::stop`] sends SIGTERM
//! first and escalates after a grace period.
//!
//! # Example
//!
//! ```no_run
//! use rust_hil::job::{self, JobSpec};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let output = job::run(JobSpec::shell("uname -a")).await?;
//!     println!("{}", output.stdout_text());
//!     Ok(())
//! }
//! ```

use std::time::Duration;

mod background;
mod command;
mod output;
mod supervisor;

pub use background::BackgroundJob;
pub use command::{CommandLine, JobSpec, StdinSource, SHELL};
pub use output::{JobOutput, JobSnapshot, OutputChunk, StreamKind};
pub use supervisor::{JobSupervisor, RestartPolicy, SupervisorEvent, SupervisorReport};

use crate::error::AppResult;

/// Default per-stream retention limit in bytes.
pub const DEFAULT_RETENTION_LIMIT: usize = 2 * 1024 * 1024;

/// Default grace period between SIGTERM and SIGKILL in [`BackgroundJob::stop`].
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(3);

/// Capacity of the per-job output broadcast channel, in chunks.
pub(crate) const OUTPUT_CHANNEL_CAPACITY: usize = 1024;

/// Runs a job to completion and returns its captured output.
///
/// Equivalent to [`BackgroundJob::spawn`] followed by
/// [`BackgroundJob::wait`]: the [`JobSpec`] wall-clock limit and exit
/// checking apply, with failures carrying the captured output.
pub async fn run(spec: JobSpec) -> AppResult<JobOutput> {
    let mut job = BackgroundJob::spawn(spec).await?;
    job.wait().await
}
