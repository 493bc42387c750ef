//! Authenticated transports to remote hosts

mod ssh;

pub use ssh::{SshSession, SshTransportProvider};
