//! dm-orchestrator: Docker fleet control plane
//!
//! Keeps a registry of verified Docker daemons (the local one plus remote
//! machines reached over SSH) and runs the container update engine
//! against them: classify, compare digests, pull, recreate, health check
//! and roll back.

pub mod concurrency;
pub mod connection;
pub mod daemon;
pub mod output;
pub mod service;
pub mod state;
pub mod transport;
pub mod update;

#[cfg(test)]
mod testing;

pub use service::{HostService, UpdateError};
pub use state::OrchestratorState;
