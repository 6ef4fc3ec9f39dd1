//! Testbed resource lifecycle management.
//!
//! A testbed is a set of resources with setup/teardown order dependencies:
//! devices under test, access points, attenuators, packet sniffers. Each one
//! is driven by a [`Controller`]; a [`ControllerRegistry`] owns them all and
//! enforces the ordering contract:
//!
//! ```text
//! initialize_all:  first --> last      (registration order)
//! shutdown_all:    last  --> first     (reverse order)
//! ```
//!
//! Teardown is reverse so that resources a controller depends on (the AP a
//! device is associated to, the sniffer capturing its traffic) outlive it.
//! `shutdown_all` keeps going past failures and reports them all at the end,
//! so one wedged controller cannot leave the rest of the testbed powered and
//! claimed.
//!
//! The [`CommandExecutor`] seam lets the same controller logic drive a local
//! process or a remote device over SSH; [`agent`] builds on it to launch
//! on-device helper daemons and wait for their ready marker.

use async_trait::async_trait;
use futures::future::join_all;

use crate::error::{AppResult, HilError};

pub mod agent;
mod executor;

pub use agent::{AgentConfig, AgentHandle};
pub use executor::{CommandExecutor, LocalExecutor, SshExecutor};

/// Result of a controller health probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Resource responds and is in its expected state.
    Healthy,
    /// Resource responds but reported something off-nominal.
    Degraded(String),
    /// Resource did not respond to the probe.
    Unresponsive(String),
}

impl HealthStatus {
    /// True only for [`HealthStatus::Healthy`].
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

/// Lifecycle contract for one testbed resource.
#[async_trait]
pub trait Controller: Send + Sync {
    /// Stable identifier used in logs and health reports.
    fn id(&self) -> &str;

    /// Brings the resource into a known-good state before a run.
    async fn initialize(&mut self) -> AppResult<()>;

    /// Releases the resource, leaving it safe for the next run.
    async fn shutdown(&mut self) -> AppResult<()>;

    /// Cheap liveness probe between test cases.
    async fn check_health(&mut self) -> AppResult<HealthStatus> {
        Ok(HealthStatus::Healthy)
    }
}

/// Owns a testbed's controllers and runs their lifecycle in order.
#[derive(Default)]
pub struct ControllerRegistry {
    controllers: Vec<Box<dyn Controller>>,
}

impl ControllerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a controller at the end of the setup order.
    pub fn register(&mut self, controller: Box<dyn Controller>) {
        tracing::debug!(controller = controller.id(), "registered controller");
        self.controllers.push(controller);
    }

    /// Number of registered controllers.
    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    /// True when no controllers are registered.
    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }

    /// Registered controller ids in setup order.
    pub fn ids(&self) -> Vec<String> {
        self.controllers.iter().map(|c| c.id().to_string()).collect()
    }

    /// Initializes every controller in registration order.
    ///
    /// On failure, controllers that were already initialized are shut down
    /// in reverse before the error is returned, so a half-built testbed is
    /// never left holding resources.
    pub async fn initialize_all(&mut self) -> AppResult<()> {
        for idx in 0..self.controllers.len() {
            if let Err(error) = self.controllers[idx].initialize().await {
                tracing::error!(
                    controller = self.controllers[idx].id(),
                    %error,
                    "controller initialization failed, unwinding"
                );
                for prev in self.controllers[..idx].iter_mut().rev() {
                    if let Err(shutdown_error) = prev.shutdown().await {
                        tracing::warn!(
                            controller = prev.id(),
                            %shutdown_error,
                            "cleanup shutdown failed"
                        );
                    }
                }
                return Err(error);
            }
            tracing::info!(controller = self.controllers[idx].id(), "controller initialized");
        }
        Ok(())
    }

    /// Shuts down every controller in reverse registration order.
    ///
    /// Failures do not stop the sweep; they are collected into
    /// [`HilError::ShutdownFailed`] so every controller gets its teardown.
    pub async fn shutdown_all(&mut self) -> AppResult<()> {
        let mut failures = Vec::new();
        for controller in self.controllers.iter_mut().rev() {
            if let Err(error) = controller.shutdown().await {
                tracing::error!(controller = controller.id(), %error, "controller shutdown failed");
                failures.push(error);
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(HilError::ShutdownFailed(failures))
        }
    }

    /// Probes every controller concurrently, mapping probe errors to
    /// [`HealthStatus::Unresponsive`]. Statuses come back in registration
    /// order.
    pub async fn check_all(&mut self) -> Vec<(String, HealthStatus)> {
        let probes = self.controllers.iter_mut().map(|controller| async move {
            let id = controller.id().to_string();
            let status = match controller.check_health().await {
                Ok(status) => status,
                Err(error) => HealthStatus::Unresponsive(error.to_string()),
            };
            (id, status)
        });
        join_all(probes).await
    }
}
