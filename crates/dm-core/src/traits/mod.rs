//! Collaborator traits consumed by the orchestrator core

mod store;
mod transport;

pub use store::UpdateStore;
pub use transport::{ShellSession, TransportProvider, TunnelIo, TunnelStream};
