//! Command execution against one SSH destination.

use std::path::Path;
use std::time::Duration;

use super::{SshError, SshSettings, DNS_RETRY_ATTEMPTS, TRANSPORT_EXIT_CODE};
use crate::error::{AppResult, HilError};
use crate::job::{self, BackgroundJob, JobOutput, JobSpec};

/// A destination to run remote commands on.
///
/// Stateless by design: every call is a fresh `ssh` invocation, so there is
/// no session to re-establish after a device reboot mid-test. Connection
/// reuse, when wanted, comes from `ControlMaster` options in
/// [`SshSettings::extra_options`].
#[derive(Debug, Clone)]
pub struct SshConnection {
    settings: SshSettings,
}

impl SshConnection {
    /// Creates a connection after validating the settings.
    pub fn new(settings: SshSettings) -> AppResult<Self> {
        settings.validate()?;
        Ok(Self { settings })
    }

    /// The settings this connection was built with.
    pub fn settings(&self) -> &SshSettings {
        &self.settings
    }

    /// The `user@host` destination string.
    pub fn destination(&self) -> String {
        self.settings.destination()
    }

    /// Runs a remote command, failing on non-zero remote exit.
    ///
    /// Transport failures are classified into [`SshError`]; a transient DNS
    /// failure is retried once before giving up.
    pub async fn run(&self, command: &str) -> AppResult<JobOutput> {
        self.execute(command, None, true).await
    }

    /// Like [`SshConnection::run`] with a wall-clock limit on the whole
    /// invocation, connect time included.
    pub async fn run_with_timeout(
        &self,
        command: &str,
        limit: Duration,
    ) -> AppResult<JobOutput> {
        self.execute(command, Some(limit), true).await
    }

    /// Runs a remote command and returns its output regardless of exit
    /// status. Transport failures still error.
    pub async fn run_unchecked(&self, command: &str) -> AppResult<JobOutput> {
        self.execute(command, None, false).await
    }

    /// Starts a long-running remote command as a [`BackgroundJob`].
    ///
    /// The job's output channel carries the remote stdout/stderr. Transport
    /// failures show up as the job exiting 255; callers watching a session
    /// should treat that exit as the link going down.
    pub async fn start(&self, command: &str) -> AppResult<BackgroundJob> {
        let argv = self.settings.command_argv(command);
        tracing::debug!(destination = %self.destination(), command, "starting remote session");
        BackgroundJob::spawn(JobSpec::exec(argv).unchecked()).await
    }

    /// Copies a local file to the destination via `scp`.
    pub async fn upload(&self, local: &Path, remote: &str) -> AppResult<()> {
        tracing::debug!(
            destination = %self.destination(),
            local = %local.display(),
            remote,
            "uploading file"
        );
        self.transfer(self.settings.upload_argv(local, remote)).await
    }

    /// Copies a remote file to the local host via `scp`.
    pub async fn download(&self, remote: &str, local: &Path) -> AppResult<()> {
        tracing::debug!(
            destination = %self.destination(),
            remote,
            local = %local.display(),
            "downloading file"
        );
        self.transfer(self.settings.download_argv(remote, local)).await
    }

    /// Probes the destination with a trivial remote command.
    ///
    /// Returns `Ok(false)` for any transport or remote failure and reserves
    /// `Err` for local problems such as a missing `ssh` binary.
    pub async fn check_alive(&self) -> AppResult<bool> {
        let limit = self.settings.connect_timeout + Duration::from_secs(5);
        match self.execute("echo alive", Some(limit), true).await {
            Ok(_) => Ok(true),
            Err(HilError::Ssh(error)) => {
                tracing::debug!(destination = %self.destination(), %error, "liveness probe failed");
                Ok(false)
            }
            Err(HilError::CommandFailed(_)) | Err(HilError::CommandTimeout(_)) => Ok(false),
            Err(other) => Err(other),
        }
    }

    async fn execute(
        &self,
        command: &str,
        limit: Option<Duration>,
        check: bool,
    ) -> AppResult<JobOutput> {
        let argv = self.settings.command_argv(command);
        let output = self.transport_run(argv, limit).await?;
        if check && !output.success() {
            return Err(HilError::CommandFailed(Box::new(output)));
        }
        Ok(output)
    }

    /// Runs one client invocation, classifying 255 exits and retrying
    /// transient DNS failures up to [`DNS_RETRY_ATTEMPTS`] total attempts.
    async fn transport_run(
        &self,
        argv: Vec<String>,
        limit: Option<Duration>,
    ) -> AppResult<JobOutput> {
        let mut attempt = 1;
        loop {
            let mut spec = JobSpec::exec(argv.clone()).unchecked();
            if let Some(limit) = limit {
                spec = spec.with_timeout(limit);
            }
            let output = job::run(spec).await?;
            if output.exit_code != Some(TRANSPORT_EXIT_CODE) {
                return Ok(output);
            }
            let error = SshError::classify(&output.stderr_text());
            if error.is_transient() && attempt < DNS_RETRY_ATTEMPTS {
                tracing::warn!(
                    destination = %self.destination(),
                    attempt,
                    %error,
                    "transient transport failure, retrying"
                );
                attempt += 1;
                continue;
            }
            tracing::debug!(destination = %self.destination(), %error, "transport failure");
            return Err(error.into());
        }
    }

    /// Runs one `scp` invocation with the same classification and DNS retry
    /// as remote commands.
    ///
    /// `scp` reports its own failures (missing source, full disk) with exit 1
    /// and no transport-shaped stderr; those surface as `CommandFailed` with
    /// the output attached rather than as an [`SshError`].
    async fn transfer(&self, argv: Vec<String>) -> AppResult<()> {
        let mut attempt = 1;
        loop {
            let output = job::run(JobSpec::exec(argv.clone()).unchecked()).await?;
            if output.success() {
                return Ok(());
            }
            let error = SshError::classify(&output.stderr_text());
            if error.is_transient() && attempt < DNS_RETRY_ATTEMPTS {
                tracing::warn!(
                    destination = %self.destination(),
                    attempt,
                    %error,
                    "transient transport failure, retrying transfer"
                );
                attempt += 1;
                continue;
            }
            if matches!(error, SshError::Unknown(_))
                && output.exit_code != Some(TRANSPORT_EXIT_CODE)
            {
                return Err(HilError::CommandFailed(Box::new(output)));
            }
            return Err(error.into());
        }
    }
}
