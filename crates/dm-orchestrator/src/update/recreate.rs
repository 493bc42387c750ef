//! Recreate/rollback engine
//!
//! Replaces one container with a new one running a freshly pulled image.
//!
//! ```text
//! inspect old -> stop old -> was it running?
//!   no:  remove old -> create new (same name) -> done
//!   yes: create new (temporary name) -> start new -> health check new
//!          ok:   remove old -> rename new -> done
//!          fail: remove new (if created) -> start old -> error
//! ```
//!
//! The old container is never removed before its replacement proved
//! healthy, so a running service is never left with nothing running.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use dm_core::parse_labels;

use super::health::{HealthChecker, HealthError};
use crate::daemon::{ContainerDetails, DaemonClient, DaemonError};

/// Suffix of the replacement's name while it is being validated
pub const REPLACEMENT_SUFFIX: &str = "-dockman-update";

/// Name the replacement of `name` is created under while validated
pub fn replacement_name(name: &str) -> String {
    format!("{}{}", name, REPLACEMENT_SUFFIX)
}

/// Daemon step that failed outside of the rollback window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecreateStep {
    Inspect,
    Stop,
    Remove,
    Create,
    Rename,
}

impl std::fmt::Display for RecreateStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let step = match self {
            RecreateStep::Inspect => "inspecting",
            RecreateStep::Stop => "stopping",
            RecreateStep::Remove => "removing",
            RecreateStep::Create => "creating",
            RecreateStep::Rename => "renaming",
        };
        write!(f, "{}", step)
    }
}

/// Why the replacement of a running container was abandoned
#[derive(Error, Debug)]
pub enum ReplaceFailure {
    #[error("creating replacement failed: {0}")]
    Create(#[source] DaemonError),

    #[error("starting replacement failed: {0}")]
    Start(#[source] DaemonError),

    #[error("replacement is unhealthy: {0}")]
    Health(#[source] HealthError),
}

#[derive(Error, Debug)]
pub enum RecreateError {
    /// A daemon call failed where no rollback applies
    #[error("{step} container {container} failed: {source}")]
    Step {
        step: RecreateStep,
        container: String,
        #[source]
        source: DaemonError,
    },

    /// The replacement failed and the original container runs again
    #[error("updating {container} failed and was rolled back: {cause}")]
    RolledBack {
        container: String,
        #[source]
        cause: ReplaceFailure,
    },

    /// The replacement failed and restarting the original failed too
    #[error("updating {container} failed ({cause}) and restarting the original failed: {rollback}")]
    RollbackFailed {
        container: String,
        cause: ReplaceFailure,
        rollback: DaemonError,
    },
}

impl RecreateError {
    fn step(step: RecreateStep, container: &str, source: DaemonError) -> Self {
        RecreateError::Step {
            step,
            container: container.to_string(),
            source,
        }
    }
}

/// Where a recreate attempt currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Inspected,
    Stopped,
    Created,
    Started,
}

/// In-memory bookkeeping of one attempt; decides what a rollback undoes
struct RecreateTransaction {
    old: ContainerDetails,
    new_id: Option<String>,
    phase: Phase,
}

/// Result of a successful recreate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recreated {
    pub old_id: String,
    pub new_id: String,
    /// Whether the replacement went through the health check
    pub health_checked: bool,
}

/// Stops, recreates, validates and if needed rolls back containers
#[derive(Debug, Clone)]
pub struct RecreateEngine {
    stop_timeout: Duration,
    health: HealthChecker,
}

impl RecreateEngine {
    pub fn new(stop_timeout: Duration, health: HealthChecker) -> Self {
        Self {
            stop_timeout,
            health,
        }
    }

    /// Replace `container_id` with a container running `image`.
    ///
    /// Only the image reference changes; everything else is copied from
    /// the inspected container.
    pub async fn recreate(
        &self,
        client: Arc<dyn DaemonClient>,
        container_id: &str,
        image: &str,
    ) -> Result<Recreated, RecreateError> {
        let old = client
            .inspect_container(container_id)
            .await
            .map_err(|e| RecreateError::step(RecreateStep::Inspect, container_id, e))?;
        let was_running = old.running;
        let mut tx = RecreateTransaction {
            old,
            new_id: None,
            phase: Phase::Inspected,
        };

        if was_running {
            client
                .stop_container(&tx.old.id, self.stop_timeout)
                .await
                .map_err(|e| RecreateError::step(RecreateStep::Stop, &tx.old.name, e))?;
        }
        tx.phase = Phase::Stopped;

        if was_running {
            self.replace_running(client, tx, image).await
        } else {
            self.replace_stopped(client.as_ref(), tx, image).await
        }
    }

    /// Nothing was serving traffic: swap in place without a health check
    async fn replace_stopped(
        &self,
        client: &dyn DaemonClient,
        tx: RecreateTransaction,
        image: &str,
    ) -> Result<Recreated, RecreateError> {
        let old = tx.old;
        client
            .remove_container(&old.id)
            .await
            .map_err(|e| RecreateError::step(RecreateStep::Remove, &old.name, e))?;

        let spec = old.spec.clone().with_image(image);
        let new_id = client
            .create_container(&old.name, spec)
            .await
            .map_err(|e| RecreateError::step(RecreateStep::Create, &old.name, e))?;

        tracing::info!(container = %old.name, image, "Recreated stopped container");
        Ok(Recreated {
            old_id: old.id,
            new_id,
            health_checked: false,
        })
    }

    async fn replace_running(
        &self,
        client: Arc<dyn DaemonClient>,
        mut tx: RecreateTransaction,
        image: &str,
    ) -> Result<Recreated, RecreateError> {
        let name = tx.old.name.clone();

        if let Err(cause) = self.start_replacement(Arc::clone(&client), &mut tx, image).await {
            return Err(self.rollback(client.as_ref(), tx, cause).await);
        }

        let new_id = tx.new_id.clone().unwrap_or_default();
        client
            .remove_container(&tx.old.id)
            .await
            .map_err(|e| RecreateError::step(RecreateStep::Remove, &name, e))?;
        client
            .rename_container(&new_id, &name)
            .await
            .map_err(|e| RecreateError::step(RecreateStep::Rename, &name, e))?;

        tracing::info!(container = %name, image, "Replacement is healthy, old container removed");
        Ok(Recreated {
            old_id: tx.old.id,
            new_id,
            health_checked: true,
        })
    }

    /// Create, start and validate the replacement under a temporary name
    async fn start_replacement(
        &self,
        client: Arc<dyn DaemonClient>,
        tx: &mut RecreateTransaction,
        image: &str,
    ) -> Result<(), ReplaceFailure> {
        let spec = tx.old.spec.clone().with_image(image);
        let new_id = client
            .create_container(&replacement_name(&tx.old.name), spec)
            .await
            .map_err(ReplaceFailure::Create)?;
        tx.new_id = Some(new_id.clone());
        tx.phase = Phase::Created;

        client
            .start_container(&new_id)
            .await
            .map_err(ReplaceFailure::Start)?;
        tx.phase = Phase::Started;

        let labels = parse_labels(&tx.old.labels);
        self.health
            .check(client, &new_id, &labels)
            .await
            .map_err(ReplaceFailure::Health)
    }

    /// Remove the replacement if one was created and restart the original
    async fn rollback(
        &self,
        client: &dyn DaemonClient,
        tx: RecreateTransaction,
        cause: ReplaceFailure,
    ) -> RecreateError {
        let name = tx.old.name.clone();
        tracing::warn!(container = %name, phase = ?tx.phase, "Rolling back: {}", cause);

        if let Some(new_id) = &tx.new_id {
            if let Err(e) = client.remove_container(new_id).await {
                tracing::warn!(container = %name, "Removing failed replacement {} failed: {}", new_id, e);
            }
        }

        match client.start_container(&tx.old.id).await {
            Ok(()) => RecreateError::RolledBack {
                container: name,
                cause,
            },
            Err(rollback) => {
                tracing::error!(container = %name, "Restarting original container failed: {}", rollback);
                RecreateError::RollbackFailed {
                    container: name,
                    cause,
                    rollback,
                }
            }
        }
    }
}
