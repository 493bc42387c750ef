//! Container update engine

pub mod classifier;
pub mod coordinator;
pub mod digest;
pub mod health;
pub mod recreate;
pub mod report;
pub mod sidecar;
pub mod store;

pub use classifier::{classify, Classification, SkipReason};
pub use coordinator::Updater;
pub use digest::{check_image, resolve_reference, DigestCheck, DigestError};
pub use health::{HealthChecker, HealthError};
pub use recreate::{replacement_name, RecreateEngine, RecreateError, Recreated, ReplaceFailure};
pub use report::{ContainerOutcome, ContainerReport, PruneSummary, SelfUpdate, UpdateReport};
pub use sidecar::{SidecarClient, SidecarError};
pub use store::{JsonFileUpdateStore, MemoryUpdateStore};
