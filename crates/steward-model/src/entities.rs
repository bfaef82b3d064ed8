//! Writable entity kinds
//!
//! Every kind embeds an [`EntityHeader`] carrying the id, the concurrency
//! token, the soft-delete flag and server tracking. The [`Entity`] trait
//! gives the write pipeline uniform access to those fields.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::connection::{ConnectionDetail, ConnectionDetails};
use crate::document::EntityDocument;
use crate::ids::{ETag, EntityId};
use crate::tracking::{EntityKind, TrackingDetails};

/// Fields shared by all entity kinds
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityHeader {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EntityId>,
    #[serde(default, rename = "eTag", skip_serializing_if = "Option::is_none")]
    pub e_tag: Option<ETag>,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking_details: Option<TrackingDetails>,
}

/// Common behaviour of writable entities
pub trait Entity:
    Clone + std::fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const KIND: EntityKind;

    fn header(&self) -> &EntityHeader;

    fn header_mut(&mut self) -> &mut EntityHeader;

    /// Display name, for kinds that are named
    fn name(&self) -> Option<&str> {
        None
    }

    /// Free-text description, for kinds that are named
    fn description(&self) -> Option<&str> {
        None
    }

    fn into_document(self) -> EntityDocument;

    /// Recover the concrete kind, handing the document back on mismatch
    fn try_from_document(document: EntityDocument) -> Result<Self, EntityDocument>;

    /// Convenience accessor for the assigned id
    fn id(&self) -> Option<EntityId> {
        self.header().id
    }
}

macro_rules! impl_entity {
    ($ty:ident, named) => {
        impl_entity!(@base $ty,
            fn name(&self) -> Option<&str> {
                Some(&self.name)
            }

            fn description(&self) -> Option<&str> {
                Some(&self.description)
            }
        );
    };
    ($ty:ident, unnamed) => {
        impl_entity!(@base $ty,);
    };
    (@base $ty:ident, $($extra:tt)*) => {
        impl Entity for $ty {
            const KIND: EntityKind = EntityKind::$ty;

            fn header(&self) -> &EntityHeader {
                &self.header
            }

            fn header_mut(&mut self) -> &mut EntityHeader {
                &mut self.header
            }

            $($extra)*

            fn into_document(self) -> EntityDocument {
                EntityDocument::$ty(self)
            }

            fn try_from_document(document: EntityDocument) -> Result<Self, EntityDocument> {
                match document {
                    EntityDocument::$ty(entity) => Ok(entity),
                    other => Err(other),
                }
            }
        }
    };
}

/// Incident-management connector registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Icm {
    pub connector_id: Uuid,
}

/// Team that owns agents and asset groups
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataOwner {
    #[serde(flatten)]
    pub header: EntityHeader,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Security groups whose members may write this owner's entities
    #[serde(default)]
    pub write_security_groups: Vec<Uuid>,
    #[serde(default)]
    pub alert_contacts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icm: Option<Icm>,
}

impl DataOwner {
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            header: EntityHeader::default(),
            name: name.into(),
            description: description.into(),
            write_security_groups: Vec::new(),
            alert_contacts: Vec::new(),
            icm: None,
        }
    }

    #[must_use]
    pub fn with_write_security_group(mut self, group: Uuid) -> Self {
        self.write_security_groups.push(group);
        self
    }

    #[must_use]
    pub fn with_icm(mut self, connector_id: Uuid) -> Self {
        self.icm = Some(Icm { connector_id });
        self
    }
}

impl_entity!(DataOwner, named);

/// Data agent that executes delete commands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteAgent {
    #[serde(flatten)]
    pub header: EntityHeader,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<EntityId>,
    /// Expanded owner; read-side only, must never be written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<Box<DataOwner>>,
    #[serde(default)]
    pub connection_details: ConnectionDetails,
    /// In-flight protocol migration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub migrating_connection_details: Option<ConnectionDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icm: Option<Icm>,
    /// Stamped the first time Prod becomes ProdReady
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_prod_date: Option<DateTime<Utc>>,
}

impl DeleteAgent {
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            header: EntityHeader::default(),
            name: name.into(),
            description: description.into(),
            owner_id: None,
            owner: None,
            connection_details: ConnectionDetails::new(),
            migrating_connection_details: None,
            icm: None,
            in_prod_date: None,
        }
    }

    #[must_use]
    pub fn with_owner_id(mut self, owner_id: EntityId) -> Self {
        self.owner_id = Some(owner_id);
        self
    }

    /// Add a connection keyed by its own release state
    #[must_use]
    pub fn with_connection(mut self, detail: ConnectionDetail) -> Self {
        self.connection_details.insert(detail.release_state, detail);
        self
    }

    #[must_use]
    pub fn with_migrating_connection(mut self, detail: ConnectionDetail) -> Self {
        self.migrating_connection_details
            .get_or_insert_with(ConnectionDetails::new)
            .insert(detail.release_state, detail);
        self
    }

    #[must_use]
    pub fn with_icm(mut self, connector_id: Uuid) -> Self {
        self.icm = Some(Icm { connector_id });
        self
    }
}

impl_entity!(DeleteAgent, named);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VariantState {
    #[default]
    Active,
    Closed,
}

impl std::fmt::Display for VariantState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => f.write_str("Active"),
            Self::Closed => f.write_str("Closed"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VariantReason {
    #[default]
    None,
    Expired,
    Intentional,
}

impl std::fmt::Display for VariantReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Expired => f.write_str("Expired"),
            Self::Intentional => f.write_str("Intentional"),
        }
    }
}

/// Exception definition that asset groups may reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantDefinition {
    #[serde(flatten)]
    pub header: EntityHeader,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<Box<DataOwner>>,
    #[serde(default)]
    pub state: VariantState,
    #[serde(default)]
    pub reason: VariantReason,
}

impl VariantDefinition {
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            header: EntityHeader::default(),
            name: name.into(),
            description: description.into(),
            owner_id: None,
            owner: None,
            state: VariantState::Active,
            reason: VariantReason::None,
        }
    }

    #[must_use]
    pub fn with_owner_id(mut self, owner_id: EntityId) -> Self {
        self.owner_id = Some(owner_id);
        self
    }

    /// `Active` must pair with `None`, and `Closed` with a real reason
    #[inline]
    #[must_use]
    pub fn state_is_consistent(&self) -> bool {
        (self.state == VariantState::Active) == (self.reason == VariantReason::None)
    }
}

impl_entity!(VariantDefinition, named);

/// Back-reference from an asset group to a variant definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetGroupVariant {
    pub variant_id: EntityId,
    #[serde(default)]
    pub disable_signal_filtering: bool,
}

impl AssetGroupVariant {
    #[inline]
    #[must_use]
    pub fn new(variant_id: EntityId) -> Self {
        Self {
            variant_id,
            disable_signal_filtering: false,
        }
    }
}

/// Collection of data assets identified by a qualifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetGroup {
    #[serde(flatten)]
    pub header: EntityHeader,
    #[serde(default)]
    pub qualifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_agent_id: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<Box<DataOwner>>,
    #[serde(default)]
    pub variants: Vec<AssetGroupVariant>,
}

impl AssetGroup {
    #[must_use]
    pub fn new(qualifier: impl Into<String>) -> Self {
        Self {
            header: EntityHeader::default(),
            qualifier: qualifier.into(),
            owner_id: None,
            delete_agent_id: None,
            owner: None,
            variants: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_owner_id(mut self, owner_id: EntityId) -> Self {
        self.owner_id = Some(owner_id);
        self
    }

    #[must_use]
    pub fn with_delete_agent_id(mut self, agent_id: EntityId) -> Self {
        self.delete_agent_id = Some(agent_id);
        self
    }

    #[must_use]
    pub fn references_variant(&self, variant_id: EntityId) -> bool {
        self.variants.iter().any(|v| v.variant_id == variant_id)
    }

    /// Drop every reference to `variant_id`, returning how many were removed
    pub fn remove_variant(&mut self, variant_id: EntityId) -> usize {
        let before = self.variants.len();
        self.variants.retain(|v| v.variant_id != variant_id);
        before - self.variants.len()
    }
}

impl_entity!(AssetGroup, unnamed);
