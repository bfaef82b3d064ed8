//! Steward data model
//!
//! Types shared by every stage of the entity write pipeline:
//! - Identifiers and concurrency tokens
//! - The four writable entity kinds and their common header
//! - Connection configuration for data agents
//! - History records and the document sum type persisted by the store
//! - The caller-facing error taxonomy
//!
//! # Example
//!
//! ```rust
//! use steward_model::{DataOwner, Entity, EntityKind};
//! use uuid::Uuid;
//!
//! let owner = DataOwner::new("Contoso Privacy", "Owns the contoso agents")
//!     .with_write_security_group(Uuid::new_v4());
//!
//! assert_eq!(DataOwner::KIND, EntityKind::DataOwner);
//! assert!(owner.header().id.is_none());
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod connection;
pub mod document;
pub mod entities;
pub mod error;
pub mod ids;
pub mod tracking;

pub use connection::{
    AgentReadiness, AuthenticationType, ConnectionDetail, ConnectionDetails, ProtocolFamily,
    ProtocolId, ReleaseState,
};
pub use document::{EntityDocument, HistoryItem};
pub use entities::{
    AssetGroup, AssetGroupVariant, DataOwner, DeleteAgent, Entity, EntityHeader, Icm,
    VariantDefinition, VariantReason, VariantState,
};
pub use error::{ConflictKind, StoreError, WriteError, WriteResult};
pub use ids::{CorrelationId, ETag, EntityId, PrincipalId};
pub use tracking::{EntityKind, TrackingDetails, WriteAction};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with steward entities
    pub use crate::{
        AssetGroup, ConnectionDetail, DataOwner, DeleteAgent, ETag, Entity, EntityDocument,
        EntityId, EntityKind, PrincipalId, ProtocolId, ReleaseState, VariantDefinition,
        WriteAction, WriteError, WriteResult,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
