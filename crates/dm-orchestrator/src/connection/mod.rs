//! Connection management

mod dialer;
mod forward;
mod health;
mod pool;

pub use dialer::{resolve_route, Dialer, DockerDialer};
pub use forward::{DaemonRoute, Forwarder};
pub use health::test_connection;
pub use pool::{Host, HostRegistry, RegistryState};
