//! Post-recreate health checks
//!
//! Two label-driven sub-checks, each optional:
//! - uptime: wait 1.5x the declared uptime, then require the container to
//!   still be running and to have been up at least that long
//! - ping: wait the declared delay, then require a 2xx answer to one GET
//!
//! Both run concurrently and both are awaited. The waits are plain timers
//! and are not interrupted by cancellation.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use thiserror::Error;

use dm_core::LabelSet;

use crate::concurrency::scatter_gather;
use crate::daemon::DaemonClient;

/// Timeout of the single ping request
const PING_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HealthError {
    #[error("uptime check failed: {0}")]
    Uptime(String),

    #[error("ping check failed: {0}")]
    Ping(String),

    #[error("uptime check failed: {uptime}; ping check failed: {ping}")]
    Both { uptime: String, ping: String },

    #[error("health check task aborted: {0}")]
    Aborted(String),
}

/// Runs the label-declared checks against a freshly started container
#[derive(Debug, Clone, Default)]
pub struct HealthChecker {
    http: reqwest::Client,
}

impl HealthChecker {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Check `container_id`; checks whose labels are missing pass
    pub async fn check(
        &self,
        client: Arc<dyn DaemonClient>,
        container_id: &str,
        labels: &LabelSet,
    ) -> Result<(), HealthError> {
        let uptime: BoxFuture<'static, Result<(), String>> = match labels.health_uptime() {
            Some(required) => Box::pin(uptime_check(client, container_id.to_string(), required)),
            None => Box::pin(async { Ok(()) }),
        };

        let ping: BoxFuture<'static, Result<(), String>> = match labels.health_ping() {
            Some((url, delay)) => Box::pin(ping_check(self.http.clone(), url.to_string(), delay)),
            None => Box::pin(async { Ok(()) }),
        };

        let mut results = scatter_gather([uptime, ping]).await.into_iter().map(|joined| {
            joined.map_err(|e| HealthError::Aborted(e.to_string()))
        });
        let uptime = results.next().unwrap_or(Ok(Ok(())))?;
        let ping = results.next().unwrap_or(Ok(Ok(())))?;

        match (uptime, ping) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(uptime), Ok(())) => Err(HealthError::Uptime(uptime)),
            (Ok(()), Err(ping)) => Err(HealthError::Ping(ping)),
            (Err(uptime), Err(ping)) => Err(HealthError::Both { uptime, ping }),
        }
    }
}

async fn uptime_check(
    client: Arc<dyn DaemonClient>,
    container_id: String,
    required: Duration,
) -> Result<(), String> {
    tokio::time::sleep(required.mul_f64(1.5)).await;

    let details = client
        .inspect_container(&container_id)
        .await
        .map_err(|e| format!("inspecting container: {}", e))?;

    if !details.running {
        return Err("container is not running".to_string());
    }

    let uptime = details
        .uptime()
        .ok_or_else(|| "container start time unknown".to_string())?;
    if uptime < required {
        return Err(format!(
            "container up for {}, required {}",
            humantime::format_duration(Duration::from_secs(uptime.as_secs())),
            humantime::format_duration(required)
        ));
    }
    Ok(())
}

async fn ping_check(http: reqwest::Client, url: String, delay: Duration) -> Result<(), String> {
    tokio::time::sleep(delay).await;

    let response = http
        .get(&url)
        .timeout(PING_TIMEOUT)
        .send()
        .await
        .map_err(|e| format!("GET {}: {}", url, e))?;

    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(format!("GET {} returned {}", url, status))
    }
}
