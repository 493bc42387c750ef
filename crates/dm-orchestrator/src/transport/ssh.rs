//! SSH transport provider
//!
//! Opens an authenticated SSH session to each configured machine using the
//! machine's private key. Dockman only forwards channels over the session;
//! it never runs remote commands.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Config, Handle};
use russh::Disconnect;
use russh_keys::key::PublicKey;

use dm_core::config::MachineProfile;
use dm_core::error::ConnectionError;
use dm_core::traits::{ShellSession, TransportProvider, TunnelStream};

/// Provides SSH sessions for the machines in the configuration
pub struct SshTransportProvider {
    machines: HashMap<String, MachineProfile>,
    connect_timeout: Duration,
}

impl SshTransportProvider {
    pub fn new(machines: HashMap<String, MachineProfile>, connect_timeout: Duration) -> Self {
        Self {
            machines,
            connect_timeout,
        }
    }

    async fn open(&self, host: &str, profile: &MachineProfile) -> Result<SshSession, ConnectionError> {
        let ssh_error = |reason: String| ConnectionError::Ssh {
            host: host.to_string(),
            reason,
        };

        let key = russh_keys::load_secret_key(&profile.private_key_path, None).map_err(|e| {
            ssh_error(format!(
                "failed to load key {}: {}",
                profile.private_key_path.display(),
                e
            ))
        })?;

        let address = profile.socket_address();
        let handler = ClientHandler {
            host: host.to_string(),
            expected_host_key: profile.host_key.clone(),
        };

        tracing::debug!(host, "Connecting to {}", address);
        let mut handle = tokio::time::timeout(
            self.connect_timeout,
            client::connect(Arc::new(Config::default()), address.as_str(), handler),
        )
        .await
        .map_err(|_| ConnectionError::Timeout(host.to_string()))?
        .map_err(|e| ssh_error(format!("failed to connect to {}: {}", address, e)))?;

        tracing::debug!(host, "Authenticating as user '{}'", profile.username);
        let authenticated = handle
            .authenticate_publickey(&profile.username, Arc::new(key))
            .await
            .map_err(|e| ssh_error(format!("authentication error: {}", e)))?;

        if !authenticated {
            return Err(ConnectionError::AuthenticationFailed(host.to_string()));
        }

        Ok(SshSession {
            host: host.to_string(),
            handle,
        })
    }
}

#[async_trait]
impl TransportProvider for SshTransportProvider {
    async fn session(&self, host: &str) -> Result<Option<Arc<dyn ShellSession>>, ConnectionError> {
        let Some(profile) = self.machines.get(host) else {
            return Ok(None);
        };
        let session = self.open(host, profile).await?;
        Ok(Some(Arc::new(session)))
    }
}

/// An authenticated SSH session to one machine
pub struct SshSession {
    host: String,
    handle: Handle<ClientHandler>,
}

#[async_trait]
impl ShellSession for SshSession {
    fn host(&self) -> &str {
        &self.host
    }

    async fn open_unix_socket(&self, path: &str) -> Result<TunnelStream, ConnectionError> {
        let channel = self
            .handle
            .channel_open_direct_streamlocal(path)
            .await
            .map_err(|e| ConnectionError::Tunnel(format!("{}: unix socket {}: {}", self.host, path, e)))?;
        Ok(Box::new(channel.into_stream()))
    }

    async fn open_tcp(&self, host: &str, port: u16) -> Result<TunnelStream, ConnectionError> {
        let channel = self
            .handle
            .channel_open_direct_tcpip(host, port as u32, "127.0.0.1", 0)
            .await
            .map_err(|e| {
                ConnectionError::Tunnel(format!("{}: tcp {}:{}: {}", self.host, host, port, e))
            })?;
        Ok(Box::new(channel.into_stream()))
    }

    async fn close(&self) {
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "closing", "en")
            .await
        {
            tracing::debug!(host = %self.host, "SSH disconnect failed: {}", e);
        }
    }
}

/// SSH client handler verifying the server key against the profile
struct ClientHandler {
    host: String,
    expected_host_key: Option<String>,
}

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let fingerprint = server_public_key.fingerprint();
        tracing::debug!(host = %self.host, "Server host key: {}", fingerprint);

        match &self.expected_host_key {
            Some(expected) if *expected != fingerprint => {
                tracing::error!(
                    host = %self.host,
                    "Host key mismatch: expected {}, got {}",
                    expected,
                    fingerprint
                );
                Ok(false)
            }
            _ => Ok(true),
        }
    }
}
