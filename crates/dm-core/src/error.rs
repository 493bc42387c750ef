//! Core error types for dockman

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the dockman control plane
#[derive(Error, Debug)]
pub enum DmError {
    /// Connection error
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Host registry error
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Update record store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Connectivity errors: dialing, testing or tunnelling to a daemon.
///
/// These are always scoped to a single host and never fatal to the fleet.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// SSH handshake or session setup failed
    #[error("SSH connection to {host} failed: {reason}")]
    Ssh { host: String, reason: String },

    /// Authentication was rejected by the remote host
    #[error("Authentication rejected by {0}")]
    AuthenticationFailed(String),

    /// Opening a forwarded channel over an SSH session failed
    #[error("Tunnel error: {0}")]
    Tunnel(String),

    /// Neither the Unix socket nor the TCP fallback could be reached
    #[error("Could not reach daemon on {host}: unix socket {socket_path} ({unix_error}); tcp fallback {tcp_addr} ({tcp_error})")]
    Dial {
        host: String,
        socket_path: String,
        unix_error: String,
        tcp_addr: String,
        tcp_error: String,
    },

    /// The daemon client could not be constructed
    #[error("Daemon client for {host} could not be created: {reason}")]
    Client { host: String, reason: String },

    /// The daemon did not answer the liveness probe
    #[error("Daemon on {host} is unavailable: {reason}")]
    Unavailable { host: String, reason: String },

    /// Operation exceeded its deadline
    #[error("Timed out connecting to {0}")]
    Timeout(String),
}

/// Host registry errors
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Bootstrap finished with no verified host at all
    #[error("No reachable Docker daemon: every configured host failed to connect")]
    NoReachableHosts,

    /// Lookup miss for a name that should have been validated by the caller
    #[error("Host {0:?} is not registered (this should never happen, please report it)")]
    HostNotFound(String),

    /// Connecting a host failed
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// Update record store errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// Backing file could not be read or written
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Backing file is not valid JSON
    #[error("Store serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),
}
