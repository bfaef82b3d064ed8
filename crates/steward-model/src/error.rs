//! Error types for the write pipeline
//!
//! [`WriteError`] is the single caller-facing taxonomy. Every validation and
//! authorization failure carries the offending field (`target`) and, where
//! useful, the offending value so callers can build precise responses.

use uuid::Uuid;

use crate::ids::{ETag, EntityId};
use crate::tracking::EntityKind;

/// Result alias used throughout the pipeline
pub type WriteResult<T> = Result<T, WriteError>;

/// Conflict subtypes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConflictKind {
    /// A non-deleted entity with the same unique value exists
    AlreadyExists,
    /// A referenced entity does not exist
    DoesNotExist,
    /// The requested state transition is not allowed
    InvalidState,
    /// Other entities still link to this one
    PendingDependency,
    /// The agent still has commands in flight
    PendingCommands,
    /// The value may no longer change
    Immutable,
    /// A value required by the entity's current state is absent
    NullValue,
}

impl std::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::AlreadyExists => "AlreadyExists",
            Self::DoesNotExist => "DoesNotExist",
            Self::InvalidState => "InvalidState",
            Self::PendingDependency => "PendingDependency",
            Self::PendingCommands => "PendingCommands",
            Self::Immutable => "Immutable",
            Self::NullValue => "NullValue",
        };
        f.write_str(name)
    }
}

/// Failures reported by the document store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Token mismatch, or create over an existing document
    #[error("precondition failed for document '{id}'")]
    PreconditionFailed { id: String },

    /// Delete of a document that does not exist
    #[error("document '{id}' not found")]
    DocumentNotFound { id: String },

    /// Transient unavailability; retry is the caller's call
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("document serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    #[inline]
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Main write pipeline error type
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("missing property '{target}': {message}")]
    MissingProperty { target: String, message: String },

    #[error("invalid property '{target}': {message}")]
    InvalidProperty {
        target: String,
        value: Option<String>,
        message: String,
    },

    #[error("invalid character in '{target}': {value}")]
    InvalidCharacter { target: String, value: String },

    #[error("conflict ({kind}) on '{target}': {message}")]
    Conflict {
        kind: ConflictKind,
        target: String,
        value: Option<String>,
        message: String,
    },

    /// The principal is not in any group granting the required role
    #[error("principal '{principal}' is missing the {role} write permission")]
    MissingWritePermission {
        principal: String,
        role: String,
        groups: Vec<Uuid>,
    },

    #[error("{kind} '{id}' not found")]
    NotFound { id: EntityId, kind: EntityKind },

    /// Stale concurrency token; the caller must re-read and retry
    #[error("etag mismatch (supplied: {})", .etag.as_ref().map_or("<none>", ETag::as_str))]
    ETagMismatch { etag: Option<ETag> },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A collaborator (reader, directory) failed
    #[error("{service} unavailable: {message}")]
    Dependency {
        service: &'static str,
        message: String,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl WriteError {
    #[inline]
    pub fn missing(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MissingProperty {
            target: target.into(),
            message: message.into(),
        }
    }

    #[inline]
    pub fn invalid(
        target: impl Into<String>,
        value: Option<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidProperty {
            target: target.into(),
            value,
            message: message.into(),
        }
    }

    #[inline]
    pub fn invalid_character(target: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidCharacter {
            target: target.into(),
            value: value.into(),
        }
    }

    #[inline]
    pub fn conflict(
        kind: ConflictKind,
        target: impl Into<String>,
        value: Option<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Conflict {
            kind,
            target: target.into(),
            value,
            message: message.into(),
        }
    }

    /// Field the error points at, if any
    #[must_use]
    pub fn target(&self) -> Option<&str> {
        match self {
            Self::MissingProperty { target, .. }
            | Self::InvalidProperty { target, .. }
            | Self::InvalidCharacter { target, .. }
            | Self::Conflict { target, .. } => Some(target),
            _ => None,
        }
    }

    #[must_use]
    pub fn conflict_kind(&self) -> Option<ConflictKind> {
        match self {
            Self::Conflict { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Field-level validation failures
    #[inline]
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::MissingProperty { .. } | Self::InvalidProperty { .. } | Self::InvalidCharacter { .. }
        )
    }

    /// Conflicts, including stale tokens surfaced by the store
    #[inline]
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::ETagMismatch { .. })
    }

    /// Worth retrying after a re-read or back-off
    #[inline]
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store(e) => e.is_transient(),
            Self::Dependency { .. } => true,
            _ => false,
        }
    }
}
