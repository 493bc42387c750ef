//! Container label contract
//!
//! Operators steer dockman by putting labels on their own containers.
//! [`parse_labels`] is the only place raw label strings are inspected; the
//! rest of the update engine works with the typed [`LabelSet`].

use std::collections::HashMap;
use std::time::Duration;

/// Marks the orchestrator's own container
pub const LABEL_SELF_CONTAINER: &str = "dockman.container";
/// Opts a container out of automatic updates
pub const LABEL_UPDATE_DISABLE: &str = "dockman.update.disable";
/// Opts a container in when running in opt-in-only mode (presence only)
pub const LABEL_UPDATE_OPT_IN: &str = "dockman.update";
/// Minimum uptime the replacement must reach after a recreate
pub const LABEL_HEALTH_UPTIME: &str = "dockman.update.healthcheck.uptime";
/// HTTP endpoint probed after a recreate
pub const LABEL_HEALTH_PING: &str = "dockman.update.healthcheck.ping";
/// Delay before the ping endpoint is probed
pub const LABEL_HEALTH_TIME: &str = "dockman.update.healthcheck.time";

/// A recognised, well-formed dockman label
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateLabel {
    /// `dockman.container=true`
    SelfContainer,
    /// `dockman.update.disable=true`
    UpdateDisabled,
    /// `dockman.update` present
    OptIn,
    /// `dockman.update.healthcheck.uptime=<duration>`
    HealthUptime(Duration),
    /// `dockman.update.healthcheck.ping=<url>` together with
    /// `dockman.update.healthcheck.time=<duration>`
    HealthPing { url: String, delay: Duration },
}

/// Typed labels of one container
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSet {
    labels: Vec<UpdateLabel>,
}

impl LabelSet {
    pub fn is_self_container(&self) -> bool {
        self.labels.contains(&UpdateLabel::SelfContainer)
    }

    pub fn is_update_disabled(&self) -> bool {
        self.labels.contains(&UpdateLabel::UpdateDisabled)
    }

    pub fn is_opted_in(&self) -> bool {
        self.labels.contains(&UpdateLabel::OptIn)
    }

    /// Declared minimum uptime, if the label is present and parses
    pub fn health_uptime(&self) -> Option<Duration> {
        self.labels.iter().find_map(|label| match label {
            UpdateLabel::HealthUptime(duration) => Some(*duration),
            _ => None,
        })
    }

    /// Ping endpoint and probe delay, if both labels are present and parse
    pub fn health_ping(&self) -> Option<(&str, Duration)> {
        self.labels.iter().find_map(|label| match label {
            UpdateLabel::HealthPing { url, delay } => Some((url.as_str(), *delay)),
            _ => None,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &UpdateLabel> {
        self.labels.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Parse the dockman labels out of a container's raw label map.
///
/// Malformed values are dropped with a debug log: a bad label disables the
/// behavior it controls, it never fails the container.
pub fn parse_labels(raw: &HashMap<String, String>) -> LabelSet {
    let mut labels = Vec::new();

    if raw.get(LABEL_SELF_CONTAINER).is_some_and(|v| is_true(v)) {
        labels.push(UpdateLabel::SelfContainer);
    }

    if raw.get(LABEL_UPDATE_DISABLE).is_some_and(|v| is_true(v)) {
        labels.push(UpdateLabel::UpdateDisabled);
    }

    if raw.contains_key(LABEL_UPDATE_OPT_IN) {
        labels.push(UpdateLabel::OptIn);
    }

    if let Some(value) = raw.get(LABEL_HEALTH_UPTIME) {
        match parse_duration(value) {
            Some(duration) => labels.push(UpdateLabel::HealthUptime(duration)),
            None => tracing::debug!(
                label = LABEL_HEALTH_UPTIME,
                value = %value,
                "ignoring unparsable duration label"
            ),
        }
    }

    if let (Some(url), Some(time)) = (raw.get(LABEL_HEALTH_PING), raw.get(LABEL_HEALTH_TIME)) {
        match (is_http_url(url), parse_duration(time)) {
            (true, Some(delay)) => labels.push(UpdateLabel::HealthPing {
                url: url.trim().to_string(),
                delay,
            }),
            _ => tracing::debug!(
                url = %url,
                time = %time,
                "ignoring malformed ping healthcheck labels"
            ),
        }
    }

    LabelSet { labels }
}

fn is_true(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("true")
}

fn is_http_url(value: &str) -> bool {
    let value = value.trim();
    value.starts_with("http://") || value.starts_with("https://")
}

fn parse_duration(value: &str) -> Option<Duration> {
    humantime::parse_duration(value.trim()).ok()
}
