//! Core domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::labels::{parse_labels, LabelSet};

/// Transport used to reach a host's daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostKind {
    /// The daemon on the machine running dockman
    Local,
    /// A remote daemon tunnelled through an SSH session
    Ssh,
}

impl fmt::Display for HostKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostKind::Local => write!(f, "local"),
            HostKind::Ssh => write!(f, "ssh"),
        }
    }
}

/// Read-only projection of a container as reported by the daemon
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerRecord {
    /// Container ID
    pub id: String,
    /// Container name without the leading slash
    pub name: String,
    /// Image reference the container was created from (e.g. `nginx:1.25`)
    pub image: String,
    /// Content-addressed ID of the image the container runs
    pub image_id: String,
    /// Raw container labels
    pub labels: HashMap<String, String>,
    /// Daemon-reported state (`running`, `exited`, ...)
    pub state: Option<String>,
}

impl ContainerRecord {
    /// Typed view of the dockman labels on this container
    pub fn update_labels(&self) -> LabelSet {
        parse_labels(&self.labels)
    }

    /// Short form of the container ID for log lines
    pub fn short_id(&self) -> &str {
        let end = self.id.len().min(12);
        &self.id[..end]
    }
}

/// Immutable option set for one update invocation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePolicy {
    /// Allow replacing the orchestrator's own container in the loop
    pub allow_self_update: bool,
    /// Ignore the per-container `dockman.update.disable` label
    pub force_update: bool,
    /// Only record available updates, never pull or recreate
    pub notify_only: bool,
    /// Only consider containers carrying the `dockman.update` label
    pub opt_in_only: bool,
}

impl UpdatePolicy {
    /// Policy with every flag off
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_allow_self_update(mut self, allow: bool) -> Self {
        self.allow_self_update = allow;
        self
    }

    pub fn with_force_update(mut self, force: bool) -> Self {
        self.force_update = force;
        self
    }

    pub fn with_notify_only(mut self, notify_only: bool) -> Self {
        self.notify_only = notify_only;
        self
    }

    pub fn with_opt_in_only(mut self, opt_in_only: bool) -> Self {
        self.opt_in_only = opt_in_only;
        self
    }
}

/// A newer image is available in the registry for an image present on a host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageUpdateRecord {
    /// Host the image lives on
    pub host: String,
    /// Local image ID
    pub image_id: String,
    /// Registry digest of the newer image
    pub update_ref: String,
    /// When the update was detected
    pub checked_at: DateTime<Utc>,
}

impl ImageUpdateRecord {
    pub fn new(
        host: impl Into<String>,
        image_id: impl Into<String>,
        update_ref: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            image_id: image_id.into(),
            update_ref: update_ref.into(),
            checked_at: Utc::now(),
        }
    }
}
