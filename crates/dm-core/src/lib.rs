//! dm-core: Core abstractions and configuration for dockman
//!
//! This crate provides the shared types, the container label contract,
//! configuration structures and the collaborator traits used by the
//! orchestrator.

pub mod config;
pub mod error;
pub mod labels;
pub mod traits;
pub mod types;

pub use error::DmError;
pub use labels::{parse_labels, LabelSet, UpdateLabel};
pub use types::{ContainerRecord, HostKind, ImageUpdateRecord, UpdatePolicy};
