//! Authenticated transport traits

use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::ConnectionError;

/// Byte stream forwarded over a remote shell session
pub trait TunnelIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> TunnelIo for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Boxed forwarded stream
pub type TunnelStream = Box<dyn TunnelIo>;

/// A live, already-authenticated remote shell session.
///
/// Dockman never authenticates on its own; it only opens forwarded
/// channels over a session handed to it.
#[async_trait]
pub trait ShellSession: Send + Sync {
    /// Name of the host this session is connected to
    fn host(&self) -> &str;

    /// Open a channel to a Unix domain socket on the remote host
    async fn open_unix_socket(&self, path: &str) -> Result<TunnelStream, ConnectionError>;

    /// Open a channel to a TCP address as seen from the remote host
    async fn open_tcp(&self, host: &str, port: u16) -> Result<TunnelStream, ConnectionError>;

    /// Tear the session down
    async fn close(&self);
}

/// Hands out sessions by host name
#[async_trait]
pub trait TransportProvider: Send + Sync {
    /// Session for `host`, or `None` when the host is reached locally
    async fn session(&self, host: &str) -> Result<Option<Arc<dyn ShellSession>>, ConnectionError>;
}
