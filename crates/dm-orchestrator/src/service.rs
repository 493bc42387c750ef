//! Per-host service facade
//!
//! The handle other code gets for one fleet member: plain container
//! operations plus the four update entry points. The entry points differ
//! only in how they pick the containers handed to the update loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use dm_core::error::StoreError;
use dm_core::{ContainerRecord, ImageUpdateRecord, UpdatePolicy};

use crate::connection::Host;
use crate::daemon::{DaemonClient, DaemonError};
use crate::update::{resolve_reference, UpdateReport, Updater};

#[derive(Error, Debug)]
pub enum UpdateError {
    /// Listing the host's containers or images failed
    #[error("Daemon error: {0}")]
    Daemon(#[from] DaemonError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The request matched no container on the host
    #[error("No container on {host} matches {selector}")]
    NoMatch { host: String, selector: String },
}

/// Container and update operations bound to one verified host
#[derive(Clone)]
pub struct HostService {
    host: Arc<Host>,
    updater: Arc<Updater>,
    stop_timeout: Duration,
}

impl HostService {
    pub fn new(host: Arc<Host>, updater: Arc<Updater>, stop_timeout: Duration) -> Self {
        Self {
            host,
            updater,
            stop_timeout,
        }
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn name(&self) -> &str {
        &self.host.name
    }

    fn client(&self) -> &dyn DaemonClient {
        self.host.client().as_ref()
    }

    pub async fn list_containers(&self, all: bool) -> Result<Vec<ContainerRecord>, DaemonError> {
        self.client().list_containers(all).await
    }

    pub async fn start_container(&self, id: &str) -> Result<(), DaemonError> {
        self.client().start_container(id).await
    }

    pub async fn stop_container(&self, id: &str) -> Result<(), DaemonError> {
        self.client().stop_container(id, self.stop_timeout).await
    }

    pub async fn remove_container(&self, id: &str) -> Result<(), DaemonError> {
        self.client().remove_container(id).await
    }

    /// Recorded updates for images currently present on the host
    pub async fn pending_updates(&self) -> Result<HashMap<String, ImageUpdateRecord>, UpdateError> {
        let image_ids = self.client().list_image_ids().await?;
        Ok(self
            .updater
            .store()
            .get_update_available(self.name(), &image_ids)
            .await?)
    }

    /// Record available updates for every container without changing any
    pub async fn check_updates(&self, cancel: &CancellationToken) -> Result<UpdateReport, UpdateError> {
        self.update_all(UpdatePolicy::new().with_notify_only(true), cancel)
            .await
    }

    /// Run the update loop over every container on the host
    pub async fn update_all(
        &self,
        policy: UpdatePolicy,
        cancel: &CancellationToken,
    ) -> Result<UpdateReport, UpdateError> {
        let containers = self.list_containers(true).await?;
        Ok(self.run(containers, policy, cancel).await)
    }

    /// Update the given containers (by ID, ID prefix or name), ignoring their
    /// disable label
    pub async fn update_by_container_id(
        &self,
        ids: &[String],
        policy: UpdatePolicy,
        cancel: &CancellationToken,
    ) -> Result<UpdateReport, UpdateError> {
        let all = self.list_containers(true).await?;

        let missing: Vec<&str> = ids
            .iter()
            .filter(|id| !all.iter().any(|c| matches_id(c, id)))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(UpdateError::NoMatch {
                host: self.name().to_string(),
                selector: missing.join(", "),
            });
        }

        let containers = all
            .into_iter()
            .filter(|c| ids.iter().any(|id| matches_id(c, id)))
            .collect();
        Ok(self
            .run(containers, policy.with_force_update(true), cancel)
            .await)
    }

    /// Update every container created from the image reference `tag`
    pub async fn update_by_image(
        &self,
        tag: &str,
        policy: UpdatePolicy,
        cancel: &CancellationToken,
    ) -> Result<UpdateReport, UpdateError> {
        let mut containers = Vec::new();
        for mut container in self.list_containers(true).await? {
            resolve_reference(self.client(), &mut container).await?;
            if container.image == tag {
                containers.push(container);
            }
        }

        if containers.is_empty() {
            return Err(UpdateError::NoMatch {
                host: self.name().to_string(),
                selector: format!("image {}", tag),
            });
        }
        Ok(self
            .run(containers, policy.with_force_update(true), cancel)
            .await)
    }

    /// Update dockman's own container in place
    pub async fn update_self(
        &self,
        container_id: &str,
        cancel: &CancellationToken,
    ) -> Result<UpdateReport, UpdateError> {
        let containers: Vec<ContainerRecord> = self
            .list_containers(true)
            .await?
            .into_iter()
            .filter(|c| matches_id(c, container_id))
            .collect();

        if containers.is_empty() {
            return Err(UpdateError::NoMatch {
                host: self.name().to_string(),
                selector: container_id.to_string(),
            });
        }
        let policy = UpdatePolicy::new()
            .with_allow_self_update(true)
            .with_force_update(true);
        Ok(self.run(containers, policy, cancel).await)
    }

    async fn run(
        &self,
        containers: Vec<ContainerRecord>,
        policy: UpdatePolicy,
        cancel: &CancellationToken,
    ) -> UpdateReport {
        self.updater
            .update_loop(&self.host, containers, policy, cancel)
            .await
    }
}

impl std::fmt::Debug for HostService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostService")
            .field("host", &self.host)
            .finish()
    }
}

/// Full ID, name, or an ID prefix of at least 12 characters
fn matches_id(container: &ContainerRecord, id: &str) -> bool {
    container.id == id
        || container.name == id
        || (id.len() >= 12 && container.id.starts_with(id))
}
