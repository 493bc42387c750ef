//! Loopback forwarder into an SSH session
//!
//! bollard speaks HTTP over a socket it opens itself, so a remote daemon is
//! exposed on a loopback TCP port. Every accepted connection gets its own
//! channel over the shell session on the route chosen at dial time.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use dm_core::error::ConnectionError;
use dm_core::traits::{ShellSession, TunnelStream};

/// Where the daemon listens on the remote host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonRoute {
    /// Unix domain socket path
    UnixSocket(String),
    /// TCP address as seen from the remote host
    Tcp { host: String, port: u16 },
}

impl DaemonRoute {
    /// Open one channel to the daemon over `session`
    pub async fn open(&self, session: &dyn ShellSession) -> Result<TunnelStream, ConnectionError> {
        match self {
            DaemonRoute::UnixSocket(path) => session.open_unix_socket(path).await,
            DaemonRoute::Tcp { host, port } => session.open_tcp(host, *port).await,
        }
    }
}

impl std::fmt::Display for DaemonRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DaemonRoute::UnixSocket(path) => write!(f, "unix://{}", path),
            DaemonRoute::Tcp { host, port } => write!(f, "tcp://{}:{}", host, port),
        }
    }
}

/// A running loopback listener forwarding into one shell session
pub struct Forwarder {
    local_addr: SocketAddr,
    cancel: CancellationToken,
}

impl Forwarder {
    /// Bind a loopback port and start forwarding to `route`
    pub async fn spawn(session: Arc<dyn ShellSession>, route: DaemonRoute) -> io::Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let local_addr = listener.local_addr()?;
        let cancel = CancellationToken::new();

        tracing::debug!(
            host = session.host(),
            "Forwarding {} to {}",
            local_addr,
            route
        );
        tokio::spawn(accept_loop(listener, session, route, cancel.clone()));

        Ok(Self { local_addr, cancel })
    }

    /// Loopback address the daemon client should connect to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting and tear down open channels
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Forwarder {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn accept_loop(
    listener: TcpListener,
    session: Arc<dyn ShellSession>,
    route: DaemonRoute,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((inbound, _)) => {
                    let session = Arc::clone(&session);
                    let route = route.clone();
                    let cancel = cancel.clone();
                    tokio::spawn(async move {
                        tokio::select! {
                            _ = cancel.cancelled() => {}
                            _ = pipe(inbound, session, route) => {}
                        }
                    });
                }
                Err(e) => {
                    tracing::warn!("Forwarder accept failed: {}", e);
                }
            }
        }
    }
    tracing::debug!(host = session.host(), "Forwarder stopped");
}

async fn pipe(mut inbound: TcpStream, session: Arc<dyn ShellSession>, route: DaemonRoute) {
    let mut outbound = match route.open(session.as_ref()).await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(host = session.host(), "Could not open {}: {}", route, e);
            return;
        }
    };

    if let Err(e) = tokio::io::copy_bidirectional(&mut inbound, &mut outbound).await {
        tracing::trace!(host = session.host(), "Forwarded connection ended: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeSession;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_forwards_bytes_both_ways() {
        let session = Arc::new(FakeSession::echo("edge-1"));
        let forwarder = Forwarder::spawn(session.clone(), DaemonRoute::UnixSocket("/var/run/docker.sock".into()))
            .await
            .unwrap();

        let mut client = TcpStream::connect(forwarder.local_addr()).await.unwrap();
        client.write_all(b"GET /_ping").await.unwrap();

        let mut buf = [0u8; 10];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"GET /_ping");
        assert_eq!(session.unix_attempts(), vec!["/var/run/docker.sock".to_string()]);
    }

    #[tokio::test]
    async fn test_shutdown_stops_accepting() {
        let session = Arc::new(FakeSession::echo("edge-1"));
        let forwarder = Forwarder::spawn(session, DaemonRoute::Tcp { host: "127.0.0.1".into(), port: 2375 })
            .await
            .unwrap();
        let addr = forwarder.local_addr();

        forwarder.shutdown();
        // Let the accept loop observe the cancellation and drop the listener
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[test]
    fn test_route_display() {
        assert_eq!(
            DaemonRoute::UnixSocket("/var/run/docker.sock".into()).to_string(),
            "unix:///var/run/docker.sock"
        );
        assert_eq!(
            DaemonRoute::Tcp { host: "127.0.0.1".into(), port: 2375 }.to_string(),
            "tcp://127.0.0.1:2375"
        );
    }
}
