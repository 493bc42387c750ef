//! Remote machine profile

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How to reach one remote Docker host over SSH
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineProfile {
    /// SSH address (`host:port`)
    pub address: String,

    /// SSH user
    pub username: String,

    /// Private key used for public-key authentication
    #[serde(default = "default_key_path")]
    pub private_key_path: PathBuf,

    /// Expected SSH host key fingerprint (None = accept any)
    #[serde(default)]
    pub host_key: Option<String>,

    /// Disabled machines are never dialed
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Notes/description for this machine
    #[serde(default)]
    pub notes: Option<String>,
}

fn default_key_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_default()
        .join(".ssh")
        .join("id_ed25519")
}

fn default_enabled() -> bool {
    true
}

impl MachineProfile {
    pub fn new(address: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            username: username.into(),
            private_key_path: default_key_path(),
            host_key: None,
            enabled: true,
            notes: None,
        }
    }

    /// The SSH address with the default port filled in
    pub fn socket_address(&self) -> String {
        if self.address.rsplit_once(':').is_some_and(|(_, port)| port.parse::<u16>().is_ok()) {
            self.address.clone()
        } else {
            format!("{}:22", self.address)
        }
    }
}
