//! Connection tester
//!
//! A freshly dialed daemon is only trusted once it answers a system info
//! call. The returned metadata is logged and then dropped.

use dm_core::error::ConnectionError;

use crate::daemon::{DaemonClient, DaemonInfo};

/// Probe `client` and report whether `host` is usable
pub async fn test_connection(
    host: &str,
    client: &dyn DaemonClient,
) -> Result<DaemonInfo, ConnectionError> {
    match client.info().await {
        Ok(info) => {
            tracing::info!(
                host,
                daemon = %info.name,
                kernel = %info.kernel_version,
                version = %info.server_version,
                "Connected to Docker daemon"
            );
            Ok(info)
        }
        Err(e) => Err(ConnectionError::Unavailable {
            host: host.to_string(),
            reason: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockDaemon;

    #[tokio::test]
    async fn test_live_daemon_passes() {
        let daemon = MockDaemon::new();
        let info = test_connection("local", &daemon).await.unwrap();
        assert_eq!(info.name, "mock-daemon");
    }

    #[tokio::test]
    async fn test_dead_daemon_is_unavailable() {
        let daemon = MockDaemon::new().unreachable();
        let err = test_connection("edge-1", &daemon).await.unwrap_err();
        assert!(matches!(err, ConnectionError::Unavailable { ref host, .. } if host == "edge-1"));
    }
}
