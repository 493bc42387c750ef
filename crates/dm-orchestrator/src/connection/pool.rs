//! Host registry
//!
//! The set of named, verified daemon connections that make up the fleet.
//! A host only becomes visible here after it passed the connection tester;
//! hosts that fail are logged and left out, there is no degraded state.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use dm_core::error::{ConnectionError, RegistryError};
use dm_core::traits::{ShellSession, TransportProvider};
use dm_core::HostKind;

use super::dialer::Dialer;
use super::health::test_connection;
use crate::concurrency::scatter_gather;
use crate::daemon::DaemonClient;

/// One verified daemon endpoint
pub struct Host {
    /// Unique host name
    pub name: String,
    /// How the daemon is reached
    pub kind: HostKind,
    /// When the daemon last passed the connection tester
    pub last_verified: DateTime<Utc>,
    client: Arc<dyn DaemonClient>,
    transport: Option<Arc<dyn ShellSession>>,
}

impl Host {
    pub fn new(
        name: impl Into<String>,
        client: Arc<dyn DaemonClient>,
        transport: Option<Arc<dyn ShellSession>>,
    ) -> Self {
        let kind = if transport.is_some() {
            HostKind::Ssh
        } else {
            HostKind::Local
        };
        Self {
            name: name.into(),
            kind,
            last_verified: Utc::now(),
            client,
            transport,
        }
    }

    /// Daemon RPC client for this host
    pub fn client(&self) -> &Arc<dyn DaemonClient> {
        &self.client
    }

    pub fn is_local(&self) -> bool {
        self.kind == HostKind::Local
    }

    /// Close the daemon client and the SSH session behind it
    pub async fn close(&self) {
        self.client.close().await;
        if let Some(transport) = &self.transport {
            transport.close().await;
        }
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("last_verified", &self.last_verified)
            .finish()
    }
}

/// Observable lifecycle of the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryState {
    /// `bootstrap` is dialing hosts
    Bootstrapping,
    /// Serving lookups and hot changes
    Steady,
}

/// Concurrent map of the fleet's verified hosts
pub struct HostRegistry {
    hosts: DashMap<String, Arc<Host>>,
    dialer: Arc<dyn Dialer>,
    transports: Arc<dyn TransportProvider>,
    local_name: String,
    default_host: RwLock<Option<String>>,
    bootstrapping: AtomicBool,
}

impl HostRegistry {
    /// Create an empty registry; `local_name` is the name the local daemon
    /// is registered under.
    pub fn new(
        local_name: impl Into<String>,
        dialer: Arc<dyn Dialer>,
        transports: Arc<dyn TransportProvider>,
    ) -> Self {
        Self {
            hosts: DashMap::new(),
            dialer,
            transports,
            local_name: local_name.into(),
            default_host: RwLock::new(None),
            bootstrapping: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> RegistryState {
        if self.bootstrapping.load(Ordering::Acquire) {
            RegistryState::Bootstrapping
        } else {
            RegistryState::Steady
        }
    }

    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    /// Dial and test the local daemon and every machine concurrently.
    ///
    /// Returns the default host name. Fails only when no host at all could
    /// be verified.
    pub async fn bootstrap(&self, machines: &[String]) -> Result<String, RegistryError> {
        self.bootstrapping.store(true, Ordering::Release);

        let mut names = vec![self.local_name.clone()];
        names.extend(machines.iter().filter(|m| **m != self.local_name).cloned());

        let tasks = names.iter().cloned().map(|name| {
            let dialer = Arc::clone(&self.dialer);
            let transports = Arc::clone(&self.transports);
            let is_local = name == self.local_name;
            async move {
                let result = connect(&name, is_local, dialer, transports).await;
                (name, result)
            }
        });

        for (name, joined) in names.iter().zip(scatter_gather(tasks).await) {
            match joined {
                Ok((_, Ok(host))) => {
                    self.hosts.insert(name.clone(), Arc::new(host));
                }
                Ok((_, Err(e))) => {
                    tracing::warn!(host = %name, "Host unavailable, leaving it out of the fleet: {}", e);
                }
                Err(e) => {
                    tracing::error!(host = %name, "Connecting host panicked: {}", e);
                }
            }
        }

        self.bootstrapping.store(false, Ordering::Release);

        if self.hosts.is_empty() {
            return Err(RegistryError::NoReachableHosts);
        }

        let default = self.elect_default().ok_or(RegistryError::NoReachableHosts)?;
        tracing::info!(
            hosts = self.hosts.len(),
            default = %default,
            "Fleet ready"
        );
        Ok(default)
    }

    /// Look a host up by name
    pub fn get(&self, name: &str) -> Result<Arc<Host>, RegistryError> {
        self.hosts
            .get(name)
            .map(|r| Arc::clone(&r))
            .ok_or_else(|| RegistryError::HostNotFound(name.to_string()))
    }

    /// Name of the default host, if any host is registered
    pub fn default_host(&self) -> Option<String> {
        self.default_host
            .read()
            .ok()
            .and_then(|guard| guard.clone())
            .filter(|name| self.hosts.contains_key(name))
    }

    /// Dial and test `name` over `transport`, replacing any previous entry.
    pub async fn add(
        &self,
        name: &str,
        transport: Option<Arc<dyn ShellSession>>,
    ) -> Result<(), RegistryError> {
        let host = verify(name, transport, self.dialer.as_ref()).await?;

        if let Some((_, previous)) = self.hosts.remove(name) {
            tracing::info!(host = name, "Replacing existing connection");
            previous.close().await;
        }
        self.hosts.insert(name.to_string(), Arc::new(host));

        if self.default_host().is_none() || name == self.local_name {
            self.elect_default();
        }
        Ok(())
    }

    /// Obtain a session for `name` from the transport provider and add it
    pub async fn connect(&self, name: &str) -> Result<(), RegistryError> {
        let is_local = name == self.local_name;
        let transport = if is_local {
            None
        } else {
            Some(remote_session(name, self.transports.as_ref()).await?)
        };
        self.add(name, transport).await
    }

    /// Enable (connect) or disable (delete) a host
    pub async fn toggle(&self, name: &str, enabled: bool) -> Result<(), RegistryError> {
        if enabled {
            self.connect(name).await
        } else {
            self.delete(name).await;
            Ok(())
        }
    }

    /// Close and forget a host. Deleting an unknown host is a no-op.
    pub async fn delete(&self, name: &str) {
        if let Some((_, host)) = self.hosts.remove(name) {
            host.close().await;
            tracing::info!(host = name, "Host removed from fleet");
        }

        let was_default = self
            .default_host
            .read()
            .map(|guard| guard.as_deref() == Some(name))
            .unwrap_or(false);
        if was_default {
            self.elect_default();
        }
    }

    /// Sorted names of all registered hosts
    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.hosts.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }

    /// Snapshot of all registered hosts
    pub fn list_all(&self) -> HashMap<String, Arc<Host>> {
        self.hosts
            .iter()
            .map(|r| (r.key().clone(), Arc::clone(r.value())))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Close every connection and empty the registry
    pub async fn shutdown(&self) {
        for name in self.list_names() {
            self.delete(&name).await;
        }
    }

    /// Local host if present, otherwise the first name in sorted order
    fn elect_default(&self) -> Option<String> {
        let elected = if self.hosts.contains_key(&self.local_name) {
            Some(self.local_name.clone())
        } else {
            self.list_names().into_iter().next()
        };

        if let Ok(mut guard) = self.default_host.write() {
            *guard = elected.clone();
        }
        elected
    }
}

async fn remote_session(
    name: &str,
    transports: &dyn TransportProvider,
) -> Result<Arc<dyn ShellSession>, ConnectionError> {
    transports
        .session(name)
        .await?
        .ok_or_else(|| ConnectionError::Ssh {
            host: name.to_string(),
            reason: "no SSH transport configured".to_string(),
        })
}

async fn connect(
    name: &str,
    is_local: bool,
    dialer: Arc<dyn Dialer>,
    transports: Arc<dyn TransportProvider>,
) -> Result<Host, ConnectionError> {
    let transport = if is_local {
        None
    } else {
        Some(remote_session(name, transports.as_ref()).await?)
    };
    verify(name, transport, dialer.as_ref()).await
}

/// Dial, then test; a host that fails the test is closed before returning
async fn verify(
    name: &str,
    transport: Option<Arc<dyn ShellSession>>,
    dialer: &dyn Dialer,
) -> Result<Host, ConnectionError> {
    let client = match dialer.dial(name, transport.clone()).await {
        Ok(client) => client,
        Err(e) => {
            if let Some(transport) = &transport {
                transport.close().await;
            }
            return Err(e);
        }
    };

    let host = Host::new(name, client, transport);
    match test_connection(name, host.client().as_ref()).await {
        Ok(_) => Ok(host),
        Err(e) => {
            host.close().await;
            Err(e)
        }
    }
}
