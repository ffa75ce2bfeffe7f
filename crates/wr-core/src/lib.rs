//! wr-core: Core abstractions and configuration for the warren tunnel mesh
//!
//! This crate provides the domain model (orgs, clients, sites, exit nodes,
//! resources, targets, certificates), the error taxonomy, configuration
//! structures, and the collaborator traits the coordinator is written
//! against. [`MemoryStore`] implements those traits over a JSON snapshot.

pub mod config;
pub mod error;
pub mod memory;
pub mod model;
pub mod net;
pub mod traits;
pub mod types;

pub use error::{BusError, ConfigError, MeshError};
pub use memory::MemoryStore;
pub use types::{
    ClientId, DomainId, ExitNodeId, LoginPageId, OrgId, ResourceId, SiteId, SiteKind,
    SiteResourceId, TargetId, UserId,
};
