//! Keep-alive supervision for long-running jobs.
//!
//! Device log streamers and packet captures are expected to run for the whole
//! test session. [`JobSupervisor`] respawns such a job whenever it exits,
//! with exponential backoff between restarts, until the restart budget is
//! spent or [`JobSupervisor::stop`] is called. Subscribers can follow the
//! spawn/exit/restart cycle through [`JobSupervisor::events`].

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use super::background::BackgroundJob;
use super::command::JobSpec;
use super::output::JobOutput;
use crate::error::{AppResult, HilError};

/// Restart budget and backoff schedule for a supervised job.
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    /// Maximum number of restarts before the supervisor gives up.
    pub max_restarts: u32,
    /// Delay before the first restart.
    pub backoff: Duration,
    /// Upper bound on the backoff delay.
    pub max_backoff: Duration,
    /// Multiplier applied to the delay after each restart.
    pub multiplier: f64,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_restarts: 3,
            backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RestartPolicy {
    /// Backoff delay before the given restart (1-based), clamped to
    /// `max_backoff` and never below zero.
    pub fn delay_for(&self, restart: u32) -> Duration {
        let factor = self.multiplier.powi(restart.saturating_sub(1) as i32);
        // from_secs_f64 rejects negatives and NaN, which a runaway
        // multiplier can produce.
        let secs = (self.backoff.as_secs_f64() * factor)
            .min(self.max_backoff.as_secs_f64())
            .max(0.0);
        Duration::from_secs_f64(secs)
    }
}

/// Lifecycle events are low-rate, so a small buffer is enough for any
/// subscriber that polls at all.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// One step in a supervised job's spawn/exit/restart cycle.
#[derive(Debug, Clone)]
pub enum SupervisorEvent {
    /// A job instance came up. `restart` is 0 for the initial spawn.
    Started {
        /// Restarts performed before this instance.
        restart: u32,
        /// Process id of the new instance.
        pid: i32,
    },
    /// The current instance ended, or a spawn attempt failed.
    Exited {
        /// [`JobOutput::status_display`] form, or the spawn error text.
        status: String,
    },
    /// A restart was scheduled and its backoff delay started.
    Restarting {
        /// Restart number, 1-based.
        restart: u32,
        /// Backoff delay before the respawn.
        delay: Duration,
    },
}

/// Final account of a supervised job after the supervisor ends.
#[derive(Debug, Clone)]
pub struct SupervisorReport {
    /// Restarts performed over the supervisor's lifetime.
    pub restarts: u32,
    /// Output of the last run, when one completed.
    pub last_output: Option<JobOutput>,
}

/// Supervises a job, restarting it per [`RestartPolicy`] whenever it exits.
///
/// A supervised job is expected to run until stopped, so any exit, clean or
/// not, consumes a restart slot.
#[derive(Debug)]
pub struct JobSupervisor {
    command: String,
    restarts: Arc<AtomicU32>,
    stop_tx: watch::Sender<bool>,
    events_tx: broadcast::Sender<SupervisorEvent>,
    handle: JoinHandle<SupervisorReport>,
}

impl JobSupervisor {
    /// Starts supervising the given spec. Must be called from a runtime.
    pub fn start(spec: JobSpec, policy: RestartPolicy) -> Self {
        let command = spec.command().display();
        let restarts = Arc::new(AtomicU32::new(0));
        let (stop_tx, stop_rx) = watch::channel(false);
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let handle = tokio::spawn(supervise(
            spec,
            policy,
            Arc::clone(&restarts),
            stop_rx,
            events_tx.clone(),
        ));
        Self {
            command,
            restarts,
            stop_tx,
            events_tx,
            handle,
        }
    }

    /// Display form of the supervised command.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Subscribes to lifecycle events. Only events sent after the
    /// subscription are delivered.
    pub fn events(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.events_tx.subscribe()
    }

    /// Restarts performed so far.
    pub fn restarts(&self) -> u32 {
        self.restarts.load(Ordering::Acquire)
    }

    /// True while the supervision loop is alive.
    pub fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Stops the current job and ends supervision.
    pub async fn stop(self) -> AppResult<SupervisorReport> {
        let _ = self.stop_tx.send(true);
        self.handle
            .await
            .map_err(|e| HilError::TaskFailure(format!("supervisor task panicked: {e}")))
    }

    /// Waits for the supervisor to end on its own (restart budget spent).
    pub async fn join(self) -> AppResult<SupervisorReport> {
        self.handle
            .await
            .map_err(|e| HilError::TaskFailure(format!("supervisor task panicked: {e}")))
    }
}

async fn supervise(
    spec: JobSpec,
    policy: RestartPolicy,
    restarts: Arc<AtomicU32>,
    mut stop_rx: watch::Receiver<bool>,
    events: broadcast::Sender<SupervisorEvent>,
) -> SupervisorReport {
    let command = spec.command().display();
    let mut last_output = None;
    loop {
        if *stop_rx.borrow() {
            break;
        }
        let mut job = match BackgroundJob::spawn(spec.clone()).await {
            Ok(job) => job,
            Err(error) => {
                tracing::error!(%error, command = %command, "supervised job failed to spawn");
                let _ = events.send(SupervisorEvent::Exited {
                    status: error.to_string(),
                });
                if backoff_or_stop(&policy, &restarts, &mut stop_rx, &events).await {
                    continue;
                }
                break;
            }
        };
        let _ = events.send(SupervisorEvent::Started {
            restart: restarts.load(Ordering::Acquire),
            pid: job.pid(),
        });
        let waited = tokio::select! {
            waited = job.wait() => Some(waited),
            _ = stop_rx.changed() => None,
        };
        match waited {
            Some(Ok(output)) => {
                tracing::warn!(
                    command = %command,
                    status = %output.status_display(),
                    "supervised job exited"
                );
                let _ = events.send(SupervisorEvent::Exited {
                    status: output.status_display(),
                });
                last_output = Some(output);
            }
            Some(Err(error)) => {
                tracing::warn!(command = %command, %error, "supervised job exited");
                let status = match error.output() {
                    Some(output) => output.status_display(),
                    None => error.to_string(),
                };
                let _ = events.send(SupervisorEvent::Exited { status });
                last_output = error.output().cloned();
            }
            None => {
                match job.stop().await {
                    Ok(output) => last_output = Some(output),
                    Err(error) => {
                        tracing::warn!(command = %command, %error, "failed to stop supervised job");
                    }
                }
                break;
            }
        }
        if !backoff_or_stop(&policy, &restarts, &mut stop_rx, &events).await {
            break;
        }
    }
    SupervisorReport {
        restarts: restarts.load(Ordering::Acquire),
        last_output,
    }
}

/// Burns one restart slot and sleeps out the backoff.
///
/// Returns false when the budget is spent or a stop arrived during the delay.
async fn backoff_or_stop(
    policy: &RestartPolicy,
    restarts: &AtomicU32,
    stop_rx: &mut watch::Receiver<bool>,
    events: &broadcast::Sender<SupervisorEvent>,
) -> bool {
    let performed = restarts.load(Ordering::Acquire);
    if performed >= policy.max_restarts {
        tracing::warn!(
            max_restarts = policy.max_restarts,
            "supervised job exhausted its restart budget"
        );
        return false;
    }
    let attempt = performed + 1;
    restarts.store(attempt, Ordering::Release);
    let delay = policy.delay_for(attempt);
    tracing::info!(restart = attempt, delay = ?delay, "restarting supervised job");
    let _ = events.send(SupervisorEvent::Restarting {
        restart: attempt,
        delay,
    });
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = stop_rx.changed() => false,
    }
}
