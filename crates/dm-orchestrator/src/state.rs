//! Global control plane state

use std::sync::Arc;

use dm_core::config::DockmanConfig;
use dm_core::error::RegistryError;
use dm_core::traits::UpdateStore;

use crate::connection::{DockerDialer, HostRegistry};
use crate::service::HostService;
use crate::transport::SshTransportProvider;
use crate::update::{JsonFileUpdateStore, MemoryUpdateStore, Updater};

/// Shared state of the dockman control plane
pub struct OrchestratorState {
    /// Configuration
    pub config: DockmanConfig,
    /// The fleet of verified hosts
    pub registry: Arc<HostRegistry>,
    /// Update engine shared by every host
    pub updater: Arc<Updater>,
}

impl OrchestratorState {
    /// Wire the production collaborators from `config`: bollard dialer,
    /// russh transports and the configured update store
    pub fn new(config: DockmanConfig) -> Self {
        let dialer = Arc::new(DockerDialer::new(&config));
        let transports = Arc::new(SshTransportProvider::new(
            config.machines.clone(),
            config.rpc_timeout,
        ));
        let registry = Arc::new(HostRegistry::new(
            config.local_host_name.clone(),
            dialer,
            transports,
        ));

        let store: Arc<dyn UpdateStore> = match &config.update_store_path {
            Some(path) => Arc::new(JsonFileUpdateStore::new(path)),
            None => Arc::new(MemoryUpdateStore::new()),
        };
        let updater = Arc::new(Updater::from_config(&config.updater, store));

        Self::with_parts(config, registry, updater)
    }

    /// Assemble state from already built parts
    pub fn with_parts(config: DockmanConfig, registry: Arc<HostRegistry>, updater: Arc<Updater>) -> Self {
        Self {
            config,
            registry,
            updater,
        }
    }

    /// Connect the local daemon and every enabled machine.
    ///
    /// Returns the default host name; fails only if nothing is reachable.
    pub async fn bootstrap(&self) -> Result<String, RegistryError> {
        self.registry.bootstrap(&self.config.enabled_machines()).await
    }

    /// Service facade for the host called `name`
    pub fn get_service(&self, name: &str) -> Result<HostService, RegistryError> {
        let host = self.registry.get(name)?;
        Ok(HostService::new(
            host,
            Arc::clone(&self.updater),
            self.config.updater.stop_timeout,
        ))
    }

    /// Service facade for the default host
    pub fn default_service(&self) -> Result<HostService, RegistryError> {
        let name = self
            .registry
            .default_host()
            .ok_or(RegistryError::NoReachableHosts)?;
        self.get_service(&name)
    }

    /// Close every host connection
    pub async fn shutdown(&self) {
        self.registry.shutdown().await;
    }
}
