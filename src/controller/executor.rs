//! Uniform command execution over local and remote targets.
//!
//! Controllers and agents do not care whether their target is the test host
//! itself or a device on the other end of an SSH link. [`CommandExecutor`]
//! is that seam: commands are shell strings with the target's own shell
//! semantics, and both implementations return the same [`JobOutput`] and
//! error shapes as the [`crate::job`] layer.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::AppResult;
use crate::job::{self, BackgroundJob, JobOutput, JobSpec};
use crate::ssh::SshConnection;

/// Runs shell commands on some target, foreground or background.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Where commands land, for logs: `local` or `user@host`.
    fn target(&self) -> String;

    /// Runs a command to completion, failing on non-zero exit.
    async fn run(&self, command: &str) -> AppResult<JobOutput>;

    /// Like [`CommandExecutor::run`] with a wall-clock limit.
    async fn run_with_timeout(&self, command: &str, limit: Duration) -> AppResult<JobOutput>;

    /// Starts a long-running command; exit status is not checked.
    async fn start(&self, command: &str) -> AppResult<BackgroundJob>;
}

/// Executes commands on the test host itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalExecutor;

#[async_trait]
impl CommandExecutor for LocalExecutor {
    fn target(&self) -> String {
        "local".to_string()
    }

    async fn run(&self, command: &str) -> AppResult<JobOutput> {
        job::run(JobSpec::shell(command)).await
    }

    async fn run_with_timeout(&self, command: &str, limit: Duration) -> AppResult<JobOutput> {
        job::run(JobSpec::shell(command).with_timeout(limit)).await
    }

    async fn start(&self, command: &str) -> AppResult<BackgroundJob> {
        BackgroundJob::spawn(JobSpec::shell(command).unchecked()).await
    }
}

/// Executes commands on a remote device over SSH.
#[derive(Debug, Clone)]
pub struct SshExecutor {
    connection: SshConnection,
}

impl SshExecutor {
    /// Wraps an established connection.
    pub fn new(connection: SshConnection) -> Self {
        Self { connection }
    }

    /// The underlying connection, for transfers and liveness probes.
    pub fn connection(&self) -> &SshConnection {
        &self.connection
    }
}

#[async_trait]
impl CommandExecutor for SshExecutor {
    fn target(&self) -> String {
        self.connection.destination()
    }

    async fn run(&self, command: &str) -> AppResult<JobOutput> {
        self.connection.run(command).await
    }

    async fn run_with_timeout(&self, command: &str, limit: Duration) -> AppResult<JobOutput> {
        self.connection.run_with_timeout(command, limit).await
    }

    async fn start(&self, command: &str) -> AppResult<BackgroundJob> {
        self.connection.start(command).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HilError;

    #[tokio::test]
    async fn test_local_run_captures_output() {
        let executor = LocalExecutor;
        let output = executor.run("printf 'a b c' | tr ' ' '\n'").await.unwrap();
        assert_eq!(output.stdout_text(), "a\nb\nc");
    }

    #[tokio::test]
    async fn test_local_run_checks_exit() {
        let executor = LocalExecutor;
        let err = executor.run("exit 7").await.unwrap_err();
        match err {
            HilError::CommandFailed(output) => assert_eq!(output.exit_code, Some(7)),
            other => panic!("expected CommandFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_trait_object_dispatch() {
        let executor: Box<dyn CommandExecutor> = Box::new(LocalExecutor);
        assert_eq!(executor.target(), "local");
        let output = executor.run("true").await.unwrap();
        assert!(output.success());
    }
}
