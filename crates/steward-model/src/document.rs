//! Persisted document shapes

use serde::{Deserialize, Serialize};

use crate::entities::{AssetGroup, DataOwner, DeleteAgent, Entity, EntityHeader, VariantDefinition};
use crate::ids::{CorrelationId, ETag, EntityId};
use crate::tracking::{EntityKind, WriteAction};

/// Any writable entity, tagged by kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "entityType")]
pub enum EntityDocument {
    DeleteAgent(DeleteAgent),
    DataOwner(DataOwner),
    VariantDefinition(VariantDefinition),
    AssetGroup(AssetGroup),
}

impl EntityDocument {
    #[must_use]
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::DeleteAgent(_) => EntityKind::DeleteAgent,
            Self::DataOwner(_) => EntityKind::DataOwner,
            Self::VariantDefinition(_) => EntityKind::VariantDefinition,
            Self::AssetGroup(_) => EntityKind::AssetGroup,
        }
    }

    #[must_use]
    pub fn header(&self) -> &EntityHeader {
        match self {
            Self::DeleteAgent(e) => e.header(),
            Self::DataOwner(e) => e.header(),
            Self::VariantDefinition(e) => e.header(),
            Self::AssetGroup(e) => e.header(),
        }
    }

    pub fn header_mut(&mut self) -> &mut EntityHeader {
        match self {
            Self::DeleteAgent(e) => e.header_mut(),
            Self::DataOwner(e) => e.header_mut(),
            Self::VariantDefinition(e) => e.header_mut(),
            Self::AssetGroup(e) => e.header_mut(),
        }
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> Option<EntityId> {
        self.header().id
    }

    #[inline]
    #[must_use]
    pub fn e_tag(&self) -> Option<&ETag> {
        self.header().e_tag.as_ref()
    }

    /// The history action this document represents when written as-is
    ///
    /// No token means the document has never been stored.
    #[must_use]
    pub fn inferred_action(&self) -> WriteAction {
        let header = self.header();
        if header.e_tag.is_none() {
            WriteAction::Create
        } else if header.is_deleted {
            WriteAction::SoftDelete
        } else {
            WriteAction::Update
        }
    }

    /// Downcast into a concrete kind
    #[must_use]
    pub fn into_entity<T: Entity>(self) -> Option<T> {
        T::try_from_document(self).ok()
    }
}

/// Immutable audit record of one committed mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryItem {
    pub id: EntityId,
    pub entity: EntityDocument,
    pub write_action: WriteAction,
    pub transaction_id: CorrelationId,
}

impl HistoryItem {
    #[must_use]
    pub fn new(entity: EntityDocument, write_action: WriteAction, transaction_id: CorrelationId) -> Self {
        Self {
            id: EntityId::new(),
            entity,
            write_action,
            transaction_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inferred_action_follows_token_and_flag() {
        let mut doc = DataOwner::new("Owner", "Owner description").into_document();
        assert_eq!(doc.inferred_action(), WriteAction::Create);

        doc.header_mut().e_tag = Some(ETag::new("\"a\""));
        assert_eq!(doc.inferred_action(), WriteAction::Update);

        doc.header_mut().is_deleted = true;
        assert_eq!(doc.inferred_action(), WriteAction::SoftDelete);
    }

    #[test]
    fn documents_carry_a_kind_tag() {
        let doc = AssetGroup::new("AssetType=AzureBlob").into_document();
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["entityType"], "AssetGroup");

        let back: EntityDocument = serde_json::from_value(json).unwrap();
        assert_eq!(back.kind(), EntityKind::AssetGroup);
        assert!(back.into_entity::<DataOwner>().is_none());
    }
}
