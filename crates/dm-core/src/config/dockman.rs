//! Control plane configuration

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::duration;
use super::MachineProfile;
use crate::types::UpdatePolicy;

/// Name under which the local daemon is registered
pub const DEFAULT_LOCAL_HOST: &str = "local";

/// Configuration for the dockman control plane
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DockmanConfig {
    /// Registry name of the local daemon
    pub local_host_name: String,

    /// Local daemon socket (None = platform default)
    pub local_socket: Option<PathBuf>,

    /// Deadline applied to connecting and to every daemon RPC
    #[serde(with = "duration")]
    pub rpc_timeout: Duration,

    /// Docker socket path probed first on remote hosts
    pub remote_socket_path: String,

    /// Plaintext daemon port tried when the remote socket is unreachable
    pub remote_tcp_port: u16,

    /// Remote machines, keyed by host name
    pub machines: HashMap<String, MachineProfile>,

    /// Container update settings
    pub updater: UpdaterConfig,

    /// File the detected image updates are persisted to (None = in memory)
    pub update_store_path: Option<PathBuf>,
}

impl Default for DockmanConfig {
    fn default() -> Self {
        Self {
            local_host_name: DEFAULT_LOCAL_HOST.to_string(),
            local_socket: None,
            rpc_timeout: Duration::from_secs(120),
            remote_socket_path: "/var/run/docker.sock".to_string(),
            remote_tcp_port: 2375,
            machines: HashMap::new(),
            updater: UpdaterConfig::default(),
            update_store_path: None,
        }
    }
}

impl DockmanConfig {
    /// Names of the machines that should be dialed at bootstrap
    pub fn enabled_machines(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .machines
            .iter()
            .filter(|(_, profile)| profile.enabled)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }
}

/// Container update settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdaterConfig {
    /// Base URL of the sidecar that replaces dockman's own container
    pub sidecar_url: String,

    /// Dockman's own container ID, used for the self-update trigger
    pub self_container_id: Option<String>,

    /// Grace period given to a container before it is killed on stop
    #[serde(with = "duration")]
    pub stop_timeout: Duration,

    /// Allow replacing dockman's own container inside the loop
    pub allow_self_update: bool,

    /// Only record available updates
    pub notify_only: bool,

    /// Only update containers labelled `dockman.update`
    pub opt_in_only: bool,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            sidecar_url: "http://dockman-updater:8869".to_string(),
            self_container_id: None,
            stop_timeout: Duration::from_secs(10),
            allow_self_update: false,
            notify_only: false,
            opt_in_only: false,
        }
    }
}

impl UpdaterConfig {
    /// Baseline policy for scheduled, unattended runs
    pub fn policy(&self) -> UpdatePolicy {
        UpdatePolicy::new()
            .with_allow_self_update(self.allow_self_update)
            .with_notify_only(self.notify_only)
            .with_opt_in_only(self.opt_in_only)
    }
}
