//! Variant definition rules
//!
//! Variants are authorized against the fixed variant editor groups rather
//! than owner groups. A forced delete unlinks every referencing asset group
//! in the same commit as the soft delete.

use async_trait::async_trait;
use steward_model::{
    ConflictKind, Entity, EntityDocument, VariantDefinition, VariantReason, VariantState,
    WriteAction, WriteError, WriteResult,
};

use super::{embedded_owner_not_set, reference_should_exist};
use crate::authorization::{AuthorizationRole, OwnerResolution};
use crate::readers::{EntityReader, Readers};
use crate::writer::{base_delete_checks, DeleteOptions, EntityPolicy, WriteContext, WriterServices};

#[derive(Clone)]
pub struct VariantDefinitionPolicy {
    readers: Readers,
}

impl VariantDefinitionPolicy {
    #[must_use]
    pub fn new(services: &WriterServices) -> Self {
        Self {
            readers: services.readers.clone(),
        }
    }
}

impl std::fmt::Debug for VariantDefinitionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VariantDefinitionPolicy").finish_non_exhaustive()
    }
}

fn invalid_state(target: &str, variant: &VariantDefinition, message: &str) -> WriteError {
    WriteError::conflict(
        ConflictKind::InvalidState,
        target,
        Some(format!("{}/{}", variant.state, variant.reason)),
        message,
    )
}

#[async_trait]
impl EntityPolicy for VariantDefinitionPolicy {
    type Entity = VariantDefinition;

    fn reader(&self) -> &dyn EntityReader<VariantDefinition> {
        self.readers.variants.as_ref()
    }

    fn role(&self, _action: WriteAction) -> AuthorizationRole {
        AuthorizationRole::VariantEditor
    }

    async fn data_owners(
        &self,
        _action: WriteAction,
        _entity: &VariantDefinition,
        _existing: Option<&VariantDefinition>,
    ) -> WriteResult<OwnerResolution> {
        Ok(OwnerResolution::Bypass)
    }

    fn validate_properties(
        &self,
        action: WriteAction,
        incoming: &mut VariantDefinition,
    ) -> WriteResult<()> {
        embedded_owner_not_set(incoming.owner.as_deref())?;

        if action == WriteAction::Create {
            if incoming.state != VariantState::Active {
                return Err(invalid_state("state", incoming, "a new variant must be Active"));
            }
            incoming.reason = VariantReason::None;
        } else if !incoming.state_is_consistent() {
            return Err(invalid_state(
                "reason",
                incoming,
                "Active pairs with no reason and Closed with a reason",
            ));
        }
        Ok(())
    }

    async fn validate_consistency(
        &self,
        _ctx: &WriteContext,
        _action: WriteAction,
        incoming: &mut VariantDefinition,
        existing: Option<&VariantDefinition>,
    ) -> WriteResult<()> {
        let owner_changed = existing.map_or(true, |e| e.owner_id != incoming.owner_id);
        if let Some(owner_id) = incoming.owner_id.filter(|_| owner_changed) {
            reference_should_exist(self.readers.owners.as_ref(), owner_id, "ownerId").await?;
        }
        Ok(())
    }

    fn merge(&self, incoming: VariantDefinition, mut existing: VariantDefinition) -> VariantDefinition {
        existing.name = incoming.name;
        existing.description = incoming.description;
        existing.owner_id = incoming.owner_id;
        existing.state = incoming.state;
        existing.reason = incoming.reason;
        existing
    }

    async fn validate_delete(
        &self,
        existing: &VariantDefinition,
        options: DeleteOptions,
    ) -> WriteResult<()> {
        if existing.state != VariantState::Closed {
            return Err(invalid_state("state", existing, "only a Closed variant can be deleted"));
        }
        if options.force {
            return Ok(());
        }
        base_delete_checks(self.reader(), existing, options).await
    }

    async fn delete_side_effects(
        &self,
        existing: &VariantDefinition,
        options: DeleteOptions,
    ) -> WriteResult<Vec<EntityDocument>> {
        let Some(variant_id) = existing.id().filter(|_| options.force) else {
            return Ok(Vec::new());
        };

        let groups = self
            .readers
            .variant_links
            .get_linked_asset_groups(variant_id)
            .await?;
        tracing::debug!(%variant_id, groups = groups.len(), "unlinking asset groups");

        Ok(groups
            .into_iter()
            .map(|mut group| {
                group.remove_variant(variant_id);
                group.into_document()
            })
            .collect())
    }
}
