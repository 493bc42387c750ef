//! Transport dialer
//!
//! Turns a destination (local, or an authenticated SSH session) into a
//! daemon client. Remote daemons are tried on their Unix socket first and
//! on the plaintext TCP port second; there is no third option.

use async_trait::async_trait;
use bollard::{Docker, API_DEFAULT_VERSION};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dm_core::config::DockmanConfig;
use dm_core::error::ConnectionError;
use dm_core::traits::ShellSession;

use super::forward::{DaemonRoute, Forwarder};
use crate::daemon::{DaemonClient, DockerDaemon};

/// Loopback address the TCP fallback connects to on the remote host
const REMOTE_TCP_HOST: &str = "127.0.0.1";

/// Produces daemon clients for hosts
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Connect to the daemon of `host`; `session` is `None` for the local host
    async fn dial(
        &self,
        host: &str,
        session: Option<Arc<dyn ShellSession>>,
    ) -> Result<Arc<dyn DaemonClient>, ConnectionError>;
}

/// Dials Docker daemons through bollard
#[derive(Debug, Clone)]
pub struct DockerDialer {
    local_socket: Option<PathBuf>,
    remote_socket_path: String,
    remote_tcp_port: u16,
    timeout: Duration,
}

impl DockerDialer {
    pub fn new(config: &DockmanConfig) -> Self {
        Self {
            local_socket: config.local_socket.clone(),
            remote_socket_path: config.remote_socket_path.clone(),
            remote_tcp_port: config.remote_tcp_port,
            timeout: config.rpc_timeout,
        }
    }

    fn dial_local(&self, host: &str) -> Result<Docker, ConnectionError> {
        let docker = match &self.local_socket {
            Some(path) => Docker::connect_with_unix(
                &path.to_string_lossy(),
                self.timeout.as_secs(),
                API_DEFAULT_VERSION,
            ),
            None => Docker::connect_with_local_defaults().map(|d| d.with_timeout(self.timeout)),
        };
        docker.map_err(|e| ConnectionError::Client {
            host: host.to_string(),
            reason: e.to_string(),
        })
    }

    async fn dial_remote(
        &self,
        host: &str,
        session: Arc<dyn ShellSession>,
    ) -> Result<DockerDaemon, ConnectionError> {
        let route = resolve_route(session.as_ref(), &self.remote_socket_path, self.remote_tcp_port).await?;

        let forwarder = Forwarder::spawn(session, route)
            .await
            .map_err(|e| ConnectionError::Tunnel(format!("loopback listener for {}: {}", host, e)))?;

        let addr = format!("tcp://{}", forwarder.local_addr());
        let docker = Docker::connect_with_http(&addr, self.timeout.as_secs(), API_DEFAULT_VERSION)
            .map_err(|e| ConnectionError::Client {
                host: host.to_string(),
                reason: e.to_string(),
            })?;

        Ok(DockerDaemon::forwarded(docker, forwarder))
    }
}

#[async_trait]
impl Dialer for DockerDialer {
    async fn dial(
        &self,
        host: &str,
        session: Option<Arc<dyn ShellSession>>,
    ) -> Result<Arc<dyn DaemonClient>, ConnectionError> {
        let client = match session {
            None => DockerDaemon::new(self.dial_local(host)?),
            Some(session) => {
                tokio::time::timeout(self.timeout, self.dial_remote(host, session))
                    .await
                    .map_err(|_| ConnectionError::Timeout(host.to_string()))??
            }
        };
        Ok(Arc::new(client))
    }
}

/// Pick the route to a remote daemon.
///
/// The Unix socket is probed first by opening (and dropping) a channel to
/// it. When that fails a warning names both routes and the TCP port is
/// probed the same way.
pub async fn resolve_route(
    session: &dyn ShellSession,
    socket_path: &str,
    tcp_port: u16,
) -> Result<DaemonRoute, ConnectionError> {
    let unix = DaemonRoute::UnixSocket(socket_path.to_string());
    let unix_error = match unix.open(session).await {
        Ok(_probe) => return Ok(unix),
        Err(e) => e,
    };

    let tcp = DaemonRoute::Tcp {
        host: REMOTE_TCP_HOST.to_string(),
        port: tcp_port,
    };
    tracing::warn!(
        host = session.host(),
        "Docker socket {} unreachable ({}), falling back to {}",
        socket_path,
        unix_error,
        tcp
    );

    match tcp.open(session).await {
        Ok(_probe) => Ok(tcp),
        Err(tcp_error) => Err(ConnectionError::Dial {
            host: session.host().to_string(),
            socket_path: socket_path.to_string(),
            unix_error: unix_error.to_string(),
            tcp_addr: format!("{}:{}", REMOTE_TCP_HOST, tcp_port),
            tcp_error: tcp_error.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeSession;

    #[tokio::test]
    async fn test_prefers_unix_socket() {
        let session = FakeSession::echo("edge-1");

        let route = resolve_route(&session, "/var/run/docker.sock", 2375).await.unwrap();

        assert_eq!(route, DaemonRoute::UnixSocket("/var/run/docker.sock".into()));
        assert!(session.tcp_attempts().is_empty());
    }

    #[tokio::test]
    async fn test_falls_back_to_tcp() {
        let session = FakeSession::echo("edge-1").without_unix_socket();

        let route = resolve_route(&session, "/var/run/docker.sock", 2375).await.unwrap();

        assert_eq!(
            route,
            DaemonRoute::Tcp {
                host: "127.0.0.1".into(),
                port: 2375
            }
        );
        assert_eq!(session.unix_attempts(), vec!["/var/run/docker.sock".to_string()]);
        assert_eq!(session.tcp_attempts(), vec![("127.0.0.1".to_string(), 2375)]);
    }

    #[tokio::test]
    async fn test_fails_when_both_routes_fail() {
        let session = FakeSession::echo("edge-1").without_unix_socket().without_tcp();

        let err = resolve_route(&session, "/run/docker.sock", 2376).await.unwrap_err();

        match err {
            ConnectionError::Dial {
                host,
                socket_path,
                tcp_addr,
                ..
            } => {
                assert_eq!(host, "edge-1");
                assert_eq!(socket_path, "/run/docker.sock");
                assert_eq!(tcp_addr, "127.0.0.1:2376");
            }
            other => panic!("expected dial error, got {:?}", other),
        }
        assert_eq!(session.tcp_attempts().len(), 1);
    }

    #[tokio::test]
    async fn test_remote_dial_uses_fallback_route() {
        let dialer = DockerDialer::new(&DockmanConfig::default());
        let session = Arc::new(FakeSession::echo("edge-1").without_unix_socket());

        // Client construction is lazy; dialing only has to establish the route.
        let client = dialer.dial("edge-1", Some(session.clone())).await;

        assert!(client.is_ok());
        assert_eq!(session.tcp_attempts(), vec![("127.0.0.1".to_string(), 2375)]);
    }
}
