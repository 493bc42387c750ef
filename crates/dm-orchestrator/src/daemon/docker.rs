//! bollard-backed daemon client

use async_trait::async_trait;
use bollard::container::{
    CreateContainerOptions, InspectContainerOptions, ListContainersOptions,
    RemoveContainerOptions, RenameContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::image::{CreateImageOptions, ListImagesOptions, PruneImagesOptions};
use bollard::Docker;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use std::collections::HashMap;
use std::time::Duration;

use dm_core::ContainerRecord;

use super::{
    recreate_spec, ContainerDetails, ContainerSpec, DaemonClient, DaemonError, DaemonInfo,
    ImageDetails, PruneReport,
};
use crate::connection::Forwarder;

/// A Docker daemon reached through bollard, either directly or through a
/// loopback forwarder into an SSH session.
pub struct DockerDaemon {
    docker: Docker,
    /// Keeps the tunnel alive for remote hosts
    forwarder: Option<Forwarder>,
}

impl DockerDaemon {
    pub fn new(docker: Docker) -> Self {
        Self {
            docker,
            forwarder: None,
        }
    }

    /// A daemon reached through `forwarder`
    pub fn forwarded(docker: Docker, forwarder: Forwarder) -> Self {
        Self {
            docker,
            forwarder: Some(forwarder),
        }
    }
}

#[async_trait]
impl DaemonClient for DockerDaemon {
    async fn info(&self) -> Result<DaemonInfo, DaemonError> {
        let info = self.docker.info().await?;
        Ok(DaemonInfo {
            name: info.name.unwrap_or_default(),
            kernel_version: info.kernel_version.unwrap_or_default(),
            server_version: info.server_version.unwrap_or_default(),
        })
    }

    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerRecord>, DaemonError> {
        let opts = ListContainersOptions::<String> {
            all,
            ..Default::default()
        };
        let containers = self.docker.list_containers(Some(opts)).await?;

        Ok(containers
            .into_iter()
            .filter_map(|c| {
                let id = c.id?;
                let name = c
                    .names
                    .as_ref()
                    .and_then(|n| n.first())
                    .map(|n| n.trim_start_matches('/').to_string())
                    .unwrap_or_else(|| id.clone());
                Some(ContainerRecord {
                    id,
                    name,
                    image: c.image.unwrap_or_default(),
                    image_id: c.image_id.unwrap_or_default(),
                    labels: c.labels.unwrap_or_default(),
                    state: c.state,
                })
            })
            .collect())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails, DaemonError> {
        let inspect = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await?;

        let spec = recreate_spec(&inspect);
        let state = inspect.state.as_ref();
        let running = state.and_then(|s| s.running).unwrap_or(false);
        let started_at = state
            .and_then(|s| s.started_at.as_deref())
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|ts| ts.with_timezone(&Utc));
        let labels = inspect
            .config
            .as_ref()
            .and_then(|c| c.labels.clone())
            .unwrap_or_default();

        Ok(ContainerDetails {
            id: inspect.id.clone().unwrap_or_else(|| id.to_string()),
            name: inspect
                .name
                .as_deref()
                .map(|n| n.trim_start_matches('/').to_string())
                .unwrap_or_default(),
            image: spec.image().unwrap_or_default().to_string(),
            image_id: inspect.image.clone().unwrap_or_default(),
            running,
            started_at,
            labels,
            spec,
        })
    }

    async fn create_container(&self, name: &str, spec: ContainerSpec) -> Result<String, DaemonError> {
        let opts = CreateContainerOptions {
            name: name.to_string(),
            platform: None,
        };
        let created = self
            .docker
            .create_container(Some(opts), spec.into_config())
            .await?;

        for warning in &created.warnings {
            tracing::warn!(container = name, "Daemon warning on create: {}", warning);
        }
        Ok(created.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), DaemonError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn stop_container(&self, id: &str, timeout: Duration) -> Result<(), DaemonError> {
        let opts = StopContainerOptions {
            t: timeout.as_secs() as i64,
        };
        self.docker.stop_container(id, Some(opts)).await?;
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<(), DaemonError> {
        let opts = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        self.docker.remove_container(id, Some(opts)).await?;
        Ok(())
    }

    async fn rename_container(&self, id: &str, name: &str) -> Result<(), DaemonError> {
        let opts = RenameContainerOptions {
            name: name.to_string(),
        };
        self.docker.rename_container(id, opts).await?;
        Ok(())
    }

    async fn inspect_image(&self, image: &str) -> Result<ImageDetails, DaemonError> {
        let inspect = self.docker.inspect_image(image).await?;
        let id = inspect
            .id
            .ok_or_else(|| DaemonError::Unexpected(format!("image {} has no ID", image)))?;
        Ok(ImageDetails {
            id,
            repo_digests: inspect.repo_digests.unwrap_or_default(),
        })
    }

    async fn list_image_ids(&self) -> Result<Vec<String>, DaemonError> {
        let opts = ListImagesOptions::<String> {
            all: false,
            ..Default::default()
        };
        let images = self.docker.list_images(Some(opts)).await?;
        Ok(images.into_iter().map(|image| image.id).collect())
    }

    async fn registry_digest(&self, image: &str) -> Result<String, DaemonError> {
        let distribution = self.docker.inspect_registry_image(image, None).await?;
        distribution.descriptor.digest.ok_or_else(|| {
            DaemonError::Unexpected(format!("registry returned no digest for {}", image))
        })
    }

    async fn pull_image(&self, image: &str) -> Result<(), DaemonError> {
        let opts = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };
        let progress: Vec<_> = self
            .docker
            .create_image(Some(opts), None, None)
            .try_collect()
            .await?;

        tracing::debug!(image, "Pull finished after {} progress events", progress.len());
        Ok(())
    }

    async fn prune_dangling_images(&self) -> Result<PruneReport, DaemonError> {
        let mut filters = HashMap::new();
        filters.insert("dangling".to_string(), vec!["true".to_string()]);
        let response = self
            .docker
            .prune_images(Some(PruneImagesOptions { filters }))
            .await?;

        Ok(PruneReport {
            deleted: response
                .images_deleted
                .unwrap_or_default()
                .into_iter()
                .filter_map(|item| item.deleted)
                .collect(),
            space_reclaimed: response.space_reclaimed.unwrap_or(0).max(0) as u64,
        })
    }

    async fn close(&self) {
        if let Some(forwarder) = &self.forwarder {
            forwarder.shutdown();
        }
    }
}
