//! Per-container update decision

use dm_core::{ContainerRecord, UpdatePolicy};

/// What the update loop does with one container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Leave the container alone
    Skip(SkipReason),
    /// The orchestrator's own container; handled after the loop
    DeferSelf,
    /// Check for a newer image and update if there is one
    Eligible,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Opt-in-only mode and the container lacks `dockman.update`
    NotOptedIn,
    /// `dockman.update.disable=true` without a forced update
    Disabled,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::NotOptedIn => write!(f, "not opted in"),
            SkipReason::Disabled => write!(f, "updates disabled by label"),
        }
    }
}

/// Classify a container. Rules apply in order and the first match wins:
///
/// 1. self container on the local host without `allow_self_update` → defer
/// 2. opt-in-only mode and no opt-in label → skip
/// 3. disable label and no `force_update` → skip
/// 4. otherwise eligible
pub fn classify(container: &ContainerRecord, policy: &UpdatePolicy, is_local_host: bool) -> Classification {
    let labels = container.update_labels();

    if labels.is_self_container() && is_local_host && !policy.allow_self_update {
        return Classification::DeferSelf;
    }

    if policy.opt_in_only && !labels.is_opted_in() {
        return Classification::Skip(SkipReason::NotOptedIn);
    }

    if labels.is_update_disabled() && !policy.force_update {
        return Classification::Skip(SkipReason::Disabled);
    }

    Classification::Eligible
}
