//! Docker daemon RPC client
//!
//! [`DaemonClient`] is the narrow set of daemon calls the fleet and the
//! update engine need. [`DockerDaemon`] implements it on top of bollard.

mod docker;
mod spec;

pub use docker::DockerDaemon;
pub use spec::{recreate_spec, ContainerSpec};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

use dm_core::ContainerRecord;

/// Daemon RPC failures
#[derive(Error, Debug)]
pub enum DaemonError {
    /// The daemon or registry answered with an error
    #[error("Docker API error: {0}")]
    Api(#[from] bollard::errors::Error),

    /// Container or image does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// The daemon answered with something unusable
    #[error("Unexpected daemon response: {0}")]
    Unexpected(String),
}

/// Daemon identification returned by the system info call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DaemonInfo {
    pub name: String,
    pub kernel_version: String,
    pub server_version: String,
}

/// Full inspection of one container
#[derive(Debug, Clone, Default)]
pub struct ContainerDetails {
    pub id: String,
    pub name: String,
    /// Image reference from the container config
    pub image: String,
    /// ID of the image the container runs
    pub image_id: String,
    pub running: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub labels: HashMap<String, String>,
    /// Configuration needed to create an identical container
    pub spec: ContainerSpec,
}

impl ContainerDetails {
    /// How long the container has been up, if it is running
    pub fn uptime(&self) -> Option<Duration> {
        if !self.running {
            return None;
        }
        let started_at = self.started_at?;
        (Utc::now() - started_at).to_std().ok()
    }
}

/// Local image metadata
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageDetails {
    pub id: String,
    /// `repository@algorithm:hex` digests the image was pulled by
    pub repo_digests: Vec<String>,
}

/// Result of pruning dangling images
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// IDs of the deleted images
    pub deleted: Vec<String>,
    pub space_reclaimed: u64,
}

/// The daemon calls used by dockman
#[async_trait]
pub trait DaemonClient: Send + Sync {
    /// System info, used as the liveness probe
    async fn info(&self) -> Result<DaemonInfo, DaemonError>;

    /// Containers on the host (`all` includes stopped ones)
    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerRecord>, DaemonError>;

    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails, DaemonError>;

    /// Create a container and return its ID
    async fn create_container(&self, name: &str, spec: ContainerSpec) -> Result<String, DaemonError>;

    async fn start_container(&self, id: &str) -> Result<(), DaemonError>;

    async fn stop_container(&self, id: &str, timeout: Duration) -> Result<(), DaemonError>;

    /// Force-remove a container
    async fn remove_container(&self, id: &str) -> Result<(), DaemonError>;

    async fn rename_container(&self, id: &str, name: &str) -> Result<(), DaemonError>;

    async fn inspect_image(&self, image: &str) -> Result<ImageDetails, DaemonError>;

    /// IDs of all top-level images on the host
    async fn list_image_ids(&self) -> Result<Vec<String>, DaemonError>;

    /// Digest the registry currently serves for an image reference
    async fn registry_digest(&self, image: &str) -> Result<String, DaemonError>;

    async fn pull_image(&self, image: &str) -> Result<(), DaemonError>;

    /// Remove untagged images no container uses
    async fn prune_dangling_images(&self) -> Result<PruneReport, DaemonError>;

    /// Release the connection
    async fn close(&self) {}
}
