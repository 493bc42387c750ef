//! Container configuration carried across a recreate

use bollard::container::{Config, NetworkingConfig};
use bollard::models::{ContainerInspectResponse, EndpointSettings};
use std::collections::HashMap;

/// Everything needed to create a container: config, host config and
/// network attachments.
#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    config: Config<String>,
}

impl ContainerSpec {
    pub fn new(config: Config<String>) -> Self {
        Self { config }
    }

    pub fn image(&self) -> Option<&str> {
        self.config.image.as_deref()
    }

    /// Same spec running a different image
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.config.image = Some(image.into());
        self
    }

    pub fn config(&self) -> &Config<String> {
        &self.config
    }

    pub fn into_config(self) -> Config<String> {
        self.config
    }
}

/// Build the creation spec of a replacement from an inspected container.
///
/// Config and host config are copied unchanged. Runtime-assigned state is
/// dropped so the daemon can assign it afresh:
/// - the hostname, when it is the daemon-generated short container ID
/// - endpoint IDs, addresses and gateways of each network attachment
/// - network aliases equal to the old short container ID
pub fn recreate_spec(inspect: &ContainerInspectResponse) -> ContainerSpec {
    let short_id: String = inspect
        .id
        .as_deref()
        .unwrap_or_default()
        .chars()
        .take(12)
        .collect();

    let mut config: Config<String> = inspect.config.clone().map(Config::from).unwrap_or_default();

    if !short_id.is_empty() && config.hostname.as_deref() == Some(short_id.as_str()) {
        config.hostname = None;
    }

    config.host_config = inspect.host_config.clone();

    let endpoints: HashMap<String, EndpointSettings> = inspect
        .network_settings
        .as_ref()
        .and_then(|settings| settings.networks.as_ref())
        .map(|networks| {
            networks
                .iter()
                .map(|(name, endpoint)| (name.clone(), portable_endpoint(endpoint, &short_id)))
                .collect()
        })
        .unwrap_or_default();

    if !endpoints.is_empty() {
        config.networking_config = Some(NetworkingConfig {
            endpoints_config: endpoints,
        });
    }

    ContainerSpec::new(config)
}

fn portable_endpoint(endpoint: &EndpointSettings, short_id: &str) -> EndpointSettings {
    let aliases = endpoint.aliases.as_ref().map(|aliases| {
        aliases
            .iter()
            .filter(|alias| alias.as_str() != short_id)
            .cloned()
            .collect::<Vec<_>>()
    });

    EndpointSettings {
        ipam_config: endpoint.ipam_config.clone(),
        links: endpoint.links.clone(),
        aliases: aliases.filter(|a| !a.is_empty()),
        driver_opts: endpoint.driver_opts.clone(),
        ..Default::default()
    }
}
