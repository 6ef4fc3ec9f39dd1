//! On-device agent launch and readiness.
//!
//! Several test flows need a helper daemon running on the target before any
//! case can start: an RPC server exposing the device's radio stacks, a GNSS
//! fix injector, a traffic responder. Launching one is always the same dance:
//! start the command through a [`CommandExecutor`], then watch its output for
//! a ready marker, bounded by a timeout so a crash-looping agent fails the
//! setup instead of hanging it.

use std::time::Duration;

use tokio::sync::broadcast;

use super::CommandExecutor;
use crate::error::{AppResult, HilError};
use crate::job::{BackgroundJob, JobOutput, JobSnapshot, OutputChunk};

/// Default limit on waiting for an agent's ready marker.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(30);

/// Bytes of recent output kept while scanning for the ready marker.
const READY_WINDOW: usize = 64 * 1024;

/// How to launch one agent and recognize that it is up.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Agent name for logs and errors.
    pub name: String,
    /// Command that starts the agent on the target.
    pub launch_command: String,
    /// Substring the agent prints once it is serving.
    pub ready_marker: String,
    /// How long to wait for the marker before giving up.
    pub ready_timeout: Duration,
}

impl AgentConfig {
    /// Config with the default ready timeout.
    pub fn new(
        name: impl Into<String>,
        launch_command: impl Into<String>,
        ready_marker: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            launch_command: launch_command.into(),
            ready_marker: ready_marker.into(),
            ready_timeout: DEFAULT_READY_TIMEOUT,
        }
    }

    /// Overrides the ready timeout.
    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }
}

/// A running agent, stopped on demand or killed when dropped.
#[derive(Debug)]
pub struct AgentHandle {
    name: String,
    job: BackgroundJob,
}

impl AgentHandle {
    /// Launches the agent and waits for its ready marker.
    ///
    /// Fails with [`HilError::Agent`] when the agent exits before printing
    /// the marker or when the marker does not appear within the timeout; in
    /// the timeout case the half-started agent is stopped first.
    pub async fn launch(
        executor: &dyn CommandExecutor,
        config: AgentConfig,
    ) -> AppResult<AgentHandle> {
        tracing::info!(
            agent = %config.name,
            target = %executor.target(),
            "launching agent"
        );
        let mut job = executor.start(&config.launch_command).await?;
        let mut output_rx = job.output_channel();
        let deadline = tokio::time::Instant::now() + config.ready_timeout;
        let marker = config.ready_marker.as_bytes();

        // Anything printed between spawn and subscribe only reaches the
        // retained buffers, so seed the scan window from a snapshot.
        let seed = job.snapshot();
        let mut window = seed.stdout;
        window.extend_from_slice(&seed.stderr);
        if marker_found(&window, marker) {
            tracing::info!(agent = %config.name, "agent ready");
            return Ok(AgentHandle {
                name: config.name,
                job,
            });
        }

        loop {
            let received = tokio::time::timeout_at(deadline, output_rx.recv()).await;
            match received {
                Err(_) => {
                    let _ = job.stop().await;
                    return Err(HilError::Agent(format!(
                        "{} did not report ready within {:?}",
                        config.name, config.ready_timeout
                    )));
                }
                Ok(Ok(OutputChunk { data, .. })) => {
                    window.extend_from_slice(&data);
                    if marker_found(&window, marker) {
                        tracing::info!(agent = %config.name, "agent ready");
                        return Ok(AgentHandle {
                            name: config.name,
                            job,
                        });
                    }
                    if window.len() > READY_WINDOW {
                        let excess = window.len() - READY_WINDOW;
                        window.drain(..excess);
                    }
                }
                Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                    tracing::warn!(
                        agent = %config.name,
                        skipped,
                        "output lagged while waiting for ready marker"
                    );
                }
                Ok(Err(broadcast::error::RecvError::Closed)) => {
                    let detail = match job.wait().await {
                        Ok(output) => {
                            let stderr = output.stderr_text().into_owned();
                            let last_line = stderr
                                .lines()
                                .rev()
                                .find(|line| !line.trim().is_empty())
                                .unwrap_or("")
                                .to_string();
                            format!(
                                "exited with {} before reporting ready: {}",
                                output.status_display(),
                                last_line
                            )
                        }
                        Err(error) => error.to_string(),
                    };
                    return Err(HilError::Agent(format!("{} {}", config.name, detail)));
                }
            }
        }
    }

    /// Agent name from the config.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True while the agent process is alive.
    pub fn is_running(&self) -> bool {
        self.job.is_running()
    }

    /// Subscribes to the agent's live output.
    pub fn output_channel(&self) -> broadcast::Receiver<OutputChunk> {
        self.job.output_channel()
    }

    /// Output retained so far.
    pub fn snapshot(&self) -> JobSnapshot {
        self.job.snapshot()
    }

    /// Stops the agent: SIGTERM, grace, SIGKILL.
    pub async fn stop(mut self) -> AppResult<JobOutput> {
        tracing::info!(agent = %self.name, "stopping agent");
        self.job.stop().await
    }
}

/// Substring scan; an empty marker matches immediately, like `str::contains`.
fn marker_found(window: &[u8], marker: &[u8]) -> bool {
    marker.is_empty() || window.windows(marker.len()).any(|candidate| candidate == marker)
}
