//! Outcome of one update loop

use super::classifier::SkipReason;

/// What happened to one container
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerOutcome {
    Skipped(SkipReason),
    /// dockman's own container, handed to the sidecar after the loop
    DeferredSelf,
    UpToDate,
    /// Newer image recorded, nothing changed (notify-only mode)
    Notified { update_ref: String },
    Updated { new_id: String },
    /// Replacement failed and the original runs again
    RolledBack { reason: String },
    Failed { reason: String },
}

impl ContainerOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ContainerOutcome::Skipped(_) => "skipped",
            ContainerOutcome::DeferredSelf => "deferred",
            ContainerOutcome::UpToDate => "up to date",
            ContainerOutcome::Notified { .. } => "update available",
            ContainerOutcome::Updated { .. } => "updated",
            ContainerOutcome::RolledBack { .. } => "rolled back",
            ContainerOutcome::Failed { .. } => "failed",
        }
    }

    pub fn detail(&self) -> String {
        match self {
            ContainerOutcome::Skipped(reason) => reason.to_string(),
            ContainerOutcome::Notified { update_ref } => update_ref.clone(),
            ContainerOutcome::Updated { new_id } => new_id.chars().take(12).collect(),
            ContainerOutcome::RolledBack { reason } | ContainerOutcome::Failed { reason } => {
                reason.clone()
            }
            ContainerOutcome::DeferredSelf | ContainerOutcome::UpToDate => String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerReport {
    pub id: String,
    pub name: String,
    pub image: String,
    pub outcome: ContainerOutcome,
}

/// State of the deferred self-update after the loop
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SelfUpdate {
    /// No self container was deferred
    #[default]
    NotDeferred,
    /// The self container's image is current
    UpToDate,
    /// Newer image recorded only (notify-only mode)
    Notified,
    /// Sidecar accepted the request
    Triggered,
    /// Cancelled before the sidecar was called
    Cancelled,
    Failed(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneSummary {
    pub deleted: Vec<String>,
    pub space_reclaimed: u64,
    /// Set when pruning failed; the loop result is otherwise unaffected
    pub error: Option<String>,
}

/// Everything one run of the update loop did on one host
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateReport {
    pub host: String,
    pub containers: Vec<ContainerReport>,
    /// None when the loop was cancelled before pruning
    pub prune: Option<PruneSummary>,
    pub self_update: SelfUpdate,
    pub cancelled: bool,
}

impl UpdateReport {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }

    pub fn outcome(&self, name: &str) -> Option<&ContainerOutcome> {
        self.containers
            .iter()
            .find(|c| c.name == name)
            .map(|c| &c.outcome)
    }

    pub fn updated(&self) -> usize {
        self.count(|o| matches!(o, ContainerOutcome::Updated { .. }))
    }

    /// Containers that rolled back or failed
    pub fn failed(&self) -> usize {
        self.count(|o| {
            matches!(
                o,
                ContainerOutcome::RolledBack { .. } | ContainerOutcome::Failed { .. }
            )
        })
    }

    fn count(&self, pred: impl Fn(&ContainerOutcome) -> bool) -> usize {
        self.containers.iter().filter(|c| pred(&c.outcome)).count()
    }
}
