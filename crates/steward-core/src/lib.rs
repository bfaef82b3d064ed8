//! Steward write orchestration
//!
//! Every entity write runs through one pipeline:
//!
//! ```text
//! load (update/delete) -> authorize -> validate -> commit -> notify
//! ```
//!
//! - [`authorization`]: owner write groups, service admins and the fixed
//!   variant editor groups, with cached memberships
//! - [`writer`]: the generic [`EntityWriter`] and the [`EntityPolicy`] seam
//! - [`policies`]: the rules of each entity kind
//! - [`readers`]: read-side collaborators and an in-memory read model
//! - [`incident`]: post-commit notifications
//!
//! Validation and authorization failures happen before any store access.
//! The commit itself is delegated to a [`steward_store::StorageWriter`].

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod authorization;
pub mod config;
pub mod incident;
pub mod logging;
pub mod pipeline;
pub mod policies;
pub mod readers;
pub mod writer;

pub use authorization::{
    AuthorizationGate, AuthorizationRole, OwnerResolution, SecurityGroupDirectory,
    StaticGroupDirectory,
};
pub use config::{CacheConfig, ConfigError, LoggingConfig, WriterConfig};
pub use incident::{IncidentEvent, IncidentNotifier, LoggingNotifier};
pub use logging::init_logging;
pub use pipeline::{StageTracker, WriteStage};
pub use readers::{EntityFilter, EntityReader, Expand, MemoryReadModel, Readers, VariantLinks};
pub use writer::{
    AssetGroupWriter, DataOwnerWriter, DeleteAgentWriter, DeleteOptions, EntityPolicy,
    EntityWriter, VariantDefinitionWriter, WriteContext, WriterServices, Writers,
};

/// Prelude module for common imports
pub mod prelude {
    //! Everything needed to wire and call the writers
    pub use crate::{
        AuthorizationGate, DeleteOptions, IncidentNotifier, MemoryReadModel, Readers,
        WriteContext, WriterConfig, WriterServices, Writers,
    };
    pub use steward_model::prelude::*;
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
