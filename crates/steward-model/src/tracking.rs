//! Write actions, entity kinds and server-maintained tracking metadata

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::PrincipalId;

/// The mutation that produced a committed document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WriteAction {
    Create,
    Update,
    SoftDelete,
}

impl std::fmt::Display for WriteAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Create => "Create",
            Self::Update => "Update",
            Self::SoftDelete => "SoftDelete",
        };
        f.write_str(name)
    }
}

/// Writable entity kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    DeleteAgent,
    DataOwner,
    VariantDefinition,
    AssetGroup,
}

impl EntityKind {
    /// All writable kinds
    pub const ALL: [EntityKind; 4] = [
        Self::DeleteAgent,
        Self::DataOwner,
        Self::VariantDefinition,
        Self::AssetGroup,
    ];

    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DeleteAgent => "DeleteAgent",
            Self::DataOwner => "DataOwner",
            Self::VariantDefinition => "VariantDefinition",
            Self::AssetGroup => "AssetGroup",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit metadata stamped by the storage writer on every commit
///
/// Callers never supply this; it is read-side data only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingDetails {
    pub created_by: PrincipalId,
    pub created_on: DateTime<Utc>,
    pub updated_by: PrincipalId,
    pub updated_on: DateTime<Utc>,
    /// Monotonic, starts at 1 on create
    pub version: u64,
}

impl TrackingDetails {
    /// Tracking for a first write
    #[must_use]
    pub fn created(by: PrincipalId, at: DateTime<Utc>) -> Self {
        Self {
            created_by: by.clone(),
            created_on: at,
            updated_by: by,
            updated_on: at,
            version: 1,
        }
    }

    /// Tracking for a subsequent write, preserving creation fields
    #[must_use]
    pub fn next(&self, by: PrincipalId, at: DateTime<Utc>) -> Self {
        Self {
            created_by: self.created_by.clone(),
            created_on: self.created_on,
            updated_by: by,
            updated_on: at,
            version: self.version + 1,
        }
    }
}
