//! Update loop coordinator
//!
//! Drives one host's containers through classify -> compare -> (record or
//! pull) -> recreate, one container at a time. Failures stay with their
//! container. After the loop, dangling images are pruned and a deferred
//! self-update is handed to the sidecar, in that order.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use dm_core::config::UpdaterConfig;
use dm_core::traits::UpdateStore;
use dm_core::{ContainerRecord, ImageUpdateRecord, UpdatePolicy};

use super::classifier::{classify, Classification};
use super::digest::{check_image, resolve_reference};
use super::health::HealthChecker;
use super::recreate::{RecreateEngine, RecreateError};
use super::report::{ContainerOutcome, ContainerReport, PruneSummary, SelfUpdate, UpdateReport};
use super::sidecar::SidecarClient;
use crate::connection::Host;
use crate::daemon::DaemonClient;

/// Runs update loops; one instance is shared by every host
pub struct Updater {
    store: Arc<dyn UpdateStore>,
    sidecar: SidecarClient,
    engine: RecreateEngine,
    self_container_id: Option<String>,
}

impl Updater {
    pub fn new(store: Arc<dyn UpdateStore>, sidecar: SidecarClient, engine: RecreateEngine) -> Self {
        Self {
            store,
            sidecar,
            engine,
            self_container_id: None,
        }
    }

    pub fn from_config(config: &UpdaterConfig, store: Arc<dyn UpdateStore>) -> Self {
        let engine = RecreateEngine::new(config.stop_timeout, HealthChecker::default());
        let mut updater = Self::new(store, SidecarClient::new(config.sidecar_url.clone()), engine);
        updater.self_container_id = config.self_container_id.clone();
        updater
    }

    /// Container ID sent to the sidecar instead of the deferred container's own
    pub fn with_self_container_id(mut self, id: impl Into<String>) -> Self {
        self.self_container_id = Some(id.into());
        self
    }

    pub fn store(&self) -> &Arc<dyn UpdateStore> {
        &self.store
    }

    /// Process `containers` on `host` under `policy`.
    ///
    /// Never fails as a whole: per-container results, the prune summary and
    /// the self-update state are collected in the returned report.
    pub async fn update_loop(
        &self,
        host: &Host,
        containers: Vec<ContainerRecord>,
        policy: UpdatePolicy,
        cancel: &CancellationToken,
    ) -> UpdateReport {
        let mut report = UpdateReport::new(&host.name);
        let mut deferred: Option<ContainerRecord> = None;

        tracing::info!(host = %host.name, count = containers.len(), ?policy, "Starting update loop");

        for mut container in containers {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            if let Err(e) = resolve_reference(host.client().as_ref(), &mut container).await {
                tracing::warn!(host = %host.name, container = %container.name, image = %container.image, "Resolving image reference failed: {}", e);
                report.containers.push(ContainerReport {
                    id: container.id,
                    name: container.name,
                    image: container.image,
                    outcome: ContainerOutcome::Failed {
                        reason: format!("resolving image reference failed: {}", e),
                    },
                });
                continue;
            }

            let outcome = match classify(&container, &policy, host.is_local()) {
                Classification::Skip(reason) => {
                    tracing::debug!(host = %host.name, container = %container.name, "Skipping: {}", reason);
                    ContainerOutcome::Skipped(reason)
                }
                Classification::DeferSelf => {
                    tracing::info!(host = %host.name, container = %container.name, "Deferring self-update until the loop completes");
                    deferred = Some(container.clone());
                    ContainerOutcome::DeferredSelf
                }
                Classification::Eligible => self.process(host, &container, &policy, cancel).await,
            };

            report.containers.push(ContainerReport {
                id: container.id,
                name: container.name,
                image: container.image,
                outcome,
            });
        }

        if cancel.is_cancelled() {
            report.cancelled = true;
        }

        if !report.cancelled {
            report.prune = Some(self.prune(host).await);
        }

        if let Some(me) = deferred {
            report.self_update = if report.cancelled {
                SelfUpdate::Cancelled
            } else {
                self.self_update(host, &me, &policy).await
            };
        }

        tracing::info!(
            host = %host.name,
            updated = report.updated(),
            failed = report.failed(),
            "Update loop finished"
        );
        report
    }

    async fn process(
        &self,
        host: &Host,
        container: &ContainerRecord,
        policy: &UpdatePolicy,
        cancel: &CancellationToken,
    ) -> ContainerOutcome {
        let client = host.client();

        let check = match check_image(client.as_ref(), &container.image).await {
            Ok(check) => check,
            Err(e) => {
                tracing::warn!(host = %host.name, container = %container.name, image = %container.image, "Digest check failed: {}", e);
                return ContainerOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };

        // A sibling sharing the tag may already have pulled the new image
        let superseded = !container.image_id.is_empty() && container.image_id != check.local_id;
        if !check.update_available && !superseded {
            tracing::debug!(host = %host.name, container = %container.name, image = %container.image, "Image is up to date");
            return ContainerOutcome::UpToDate;
        }

        if policy.notify_only {
            let image_id = if container.image_id.is_empty() {
                &check.local_id
            } else {
                &container.image_id
            };
            let record = ImageUpdateRecord::new(&host.name, image_id, &check.remote_digest);
            return match self.store.save(record).await {
                Ok(()) => {
                    tracing::info!(host = %host.name, container = %container.name, image = %container.image, "Update available: {}", check.remote_digest);
                    ContainerOutcome::Notified {
                        update_ref: check.remote_digest,
                    }
                }
                Err(e) => {
                    tracing::warn!(host = %host.name, container = %container.name, "Recording update failed: {}", e);
                    ContainerOutcome::Failed {
                        reason: e.to_string(),
                    }
                }
            };
        }

        if check.update_available {
            tracing::info!(host = %host.name, container = %container.name, image = %container.image, "Pulling {}", check.remote_digest);
            let pulled = tokio::select! {
                result = client.pull_image(&container.image) => result,
                _ = cancel.cancelled() => {
                    tracing::warn!(host = %host.name, container = %container.name, "Pull abandoned: update cancelled");
                    return ContainerOutcome::Failed {
                        reason: "cancelled during pull".to_string(),
                    };
                }
            };
            if let Err(e) = pulled {
                tracing::warn!(host = %host.name, container = %container.name, image = %container.image, "Pull failed: {}", e);
                return ContainerOutcome::Failed {
                    reason: format!("pulling {} failed: {}", container.image, e),
                };
            }
        } else {
            tracing::info!(host = %host.name, container = %container.name, image = %container.image, "Container runs a superseded image, recreating");
        }

        match self
            .engine
            .recreate(Arc::clone(client), &container.id, &container.image)
            .await
        {
            Ok(done) => ContainerOutcome::Updated { new_id: done.new_id },
            Err(e @ RecreateError::RolledBack { .. }) => {
                tracing::warn!(host = %host.name, container = %container.name, image = %container.image, "{}", e);
                ContainerOutcome::RolledBack {
                    reason: e.to_string(),
                }
            }
            Err(e) => {
                tracing::error!(host = %host.name, container = %container.name, image = %container.image, "{}", e);
                ContainerOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn prune(&self, host: &Host) -> PruneSummary {
        let client: &dyn DaemonClient = host.client().as_ref();
        let pruned = match client.prune_dangling_images().await {
            Ok(pruned) => pruned,
            Err(e) => {
                tracing::warn!(host = %host.name, "Pruning dangling images failed: {}", e);
                return PruneSummary {
                    error: Some(e.to_string()),
                    ..Default::default()
                };
            }
        };

        tracing::info!(
            host = %host.name,
            images = pruned.deleted.len(),
            "Pruned dangling images, reclaimed {} bytes",
            pruned.space_reclaimed
        );

        let mut summary = PruneSummary {
            deleted: pruned.deleted,
            space_reclaimed: pruned.space_reclaimed,
            error: None,
        };
        if !summary.deleted.is_empty() {
            if let Err(e) = self.store.delete(&host.name, &summary.deleted).await {
                tracing::warn!(host = %host.name, "Dropping records of pruned images failed: {}", e);
                summary.error = Some(e.to_string());
            }
        }
        summary
    }

    async fn self_update(&self, host: &Host, me: &ContainerRecord, policy: &UpdatePolicy) -> SelfUpdate {
        let check = match check_image(host.client().as_ref(), &me.image).await {
            Ok(check) => check,
            Err(e) => {
                tracing::warn!(host = %host.name, container = %me.name, "Self-update digest check failed: {}", e);
                return SelfUpdate::Failed(e.to_string());
            }
        };

        if !check.update_available {
            return SelfUpdate::UpToDate;
        }

        if policy.notify_only {
            let record = ImageUpdateRecord::new(&host.name, &check.local_id, &check.remote_digest);
            return match self.store.save(record).await {
                Ok(()) => SelfUpdate::Notified,
                Err(e) => SelfUpdate::Failed(e.to_string()),
            };
        }

        let id = self.self_container_id.as_deref().unwrap_or(&me.id);
        match self.sidecar.trigger(id).await {
            Ok(()) => SelfUpdate::Triggered,
            Err(e) => {
                tracing::error!(host = %host.name, container = %me.name, "Self-update trigger failed: {}", e);
                SelfUpdate::Failed(e.to_string())
            }
        }
    }
}
