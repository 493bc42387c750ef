//! Terminal output for the `dockman` binary

use std::sync::Arc;

use tabled::{settings::Style, Table, Tabled};

use crate::connection::Host;
use crate::update::{SelfUpdate, UpdateReport};

/// Format the fleet as a table, marking the default host
pub fn format_hosts(hosts: &[Arc<Host>], default: Option<&str>) -> String {
    if hosts.is_empty() {
        return "No hosts connected".to_string();
    }

    #[derive(Tabled)]
    struct HostRow {
        #[tabled(rename = "HOST")]
        name: String,
        #[tabled(rename = "TRANSPORT")]
        kind: String,
        #[tabled(rename = "VERIFIED")]
        verified: String,
        #[tabled(rename = "DEFAULT")]
        default: String,
    }

    let rows: Vec<HostRow> = hosts
        .iter()
        .map(|h| HostRow {
            name: h.name.clone(),
            kind: h.kind.to_string(),
            verified: h.last_verified.format("%Y-%m-%d %H:%M:%S").to_string(),
            default: if Some(h.name.as_str()) == default { "*" } else { "" }.to_string(),
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Format one host's update report
pub fn format_report(report: &UpdateReport) -> String {
    #[derive(Tabled)]
    struct ContainerRow {
        #[tabled(rename = "CONTAINER")]
        name: String,
        #[tabled(rename = "IMAGE")]
        image: String,
        #[tabled(rename = "RESULT")]
        result: String,
        #[tabled(rename = "DETAIL")]
        detail: String,
    }

    let mut output = format!("Host: {}\n", report.host);

    if report.containers.is_empty() {
        output.push_str("No containers processed\n");
    } else {
        let rows: Vec<ContainerRow> = report
            .containers
            .iter()
            .map(|c| ContainerRow {
                name: c.name.clone(),
                image: c.image.clone(),
                result: c.outcome.label().to_string(),
                detail: truncate(&c.outcome.detail(), 60),
            })
            .collect();
        output.push_str(&Table::new(rows).with(Style::rounded()).to_string());
        output.push('\n');
    }

    if let Some(prune) = &report.prune {
        match &prune.error {
            Some(error) => output.push_str(&format!("Prune failed: {}\n", error)),
            None => output.push_str(&format!(
                "Pruned {} images, reclaimed {}\n",
                prune.deleted.len(),
                format_bytes(prune.space_reclaimed)
            )),
        }
    }

    match &report.self_update {
        SelfUpdate::NotDeferred => {}
        SelfUpdate::UpToDate => output.push_str("Self-update: up to date\n"),
        SelfUpdate::Notified => output.push_str("Self-update: update available\n"),
        SelfUpdate::Triggered => output.push_str("Self-update: handed to sidecar\n"),
        SelfUpdate::Cancelled => output.push_str("Self-update: cancelled\n"),
        SelfUpdate::Failed(e) => output.push_str(&format!("Self-update failed: {}\n", e)),
    }

    if report.cancelled {
        output.push_str("Update cancelled before all containers were processed\n");
    }

    output
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// Truncate a string with ellipsis if too long
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
