//! Asset group rules

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use steward_model::{
    AssetGroup, AssetGroupVariant, ConflictKind, EntityId, WriteAction, WriteError, WriteResult,
};
use steward_validation::rules::property_should_not_be_set;

use super::{embedded_owner_not_set, read_owners, reference_should_exist};
use crate::authorization::{AuthorizationGate, OwnerResolution};
use crate::readers::{EntityFilter, EntityReader, Expand, Readers};
use crate::writer::{EntityPolicy, WriteContext, WriterServices};

pub struct AssetGroupPolicy {
    readers: Readers,
    authorization: Arc<AuthorizationGate>,
}

impl AssetGroupPolicy {
    #[must_use]
    pub fn new(services: &WriterServices) -> Self {
        Self {
            readers: services.readers.clone(),
            authorization: services.authorization.clone(),
        }
    }

    async fn qualifier_should_be_unique(&self, incoming: &AssetGroup) -> WriteResult<()> {
        let taken = self
            .readers
            .asset_groups
            .read_by_filters(&EntityFilter::by_qualifier(&incoming.qualifier), Expand::None)
            .await?
            .iter()
            .any(|group| group.header.id != incoming.header.id);
        if taken {
            return Err(WriteError::conflict(
                ConflictKind::AlreadyExists,
                "qualifier",
                Some(incoming.qualifier.clone()),
                "an asset group with this qualifier already exists",
            ));
        }
        Ok(())
    }

    /// The group's own owner, else the owner of its delete agent
    async fn owner_of(&self, group: &AssetGroup) -> WriteResult<Option<EntityId>> {
        if group.owner_id.is_some() {
            return Ok(group.owner_id);
        }
        let Some(agent_id) = group.delete_agent_id else {
            return Ok(None);
        };
        let agent = self.readers.agents.read_by_id(agent_id, Expand::None).await?;
        Ok(agent.and_then(|agent| agent.owner_id))
    }

    async fn validate_variant_changes(
        &self,
        ctx: &WriteContext,
        incoming: &AssetGroup,
        existing: &AssetGroup,
    ) -> WriteResult<()> {
        if !self.authorization.is_service_admin(&ctx.principal).await? {
            if !incoming.qualifier.eq_ignore_ascii_case(&existing.qualifier) {
                return Err(WriteError::conflict(
                    ConflictKind::Immutable,
                    "qualifier",
                    Some(incoming.qualifier.clone()),
                    "asset qualifiers are immutable",
                ));
            }
            if !same_variants(&incoming.variants, &existing.variants) {
                return Err(WriteError::conflict(
                    ConflictKind::Immutable,
                    "variants",
                    None,
                    "variants can only be changed by a service admin",
                ));
            }
            return Ok(());
        }

        for variant in &incoming.variants {
            if !existing.references_variant(variant.variant_id) {
                reference_should_exist(self.readers.variants.as_ref(), variant.variant_id, "variants")
                    .await?;
            }
        }
        if !incoming.qualifier.eq_ignore_ascii_case(&existing.qualifier) {
            self.qualifier_should_be_unique(incoming).await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for AssetGroupPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetGroupPolicy").finish_non_exhaustive()
    }
}

/// Same entries regardless of order
fn same_variants(a: &[AssetGroupVariant], b: &[AssetGroupVariant]) -> bool {
    a.len() == b.len() && a.iter().all(|v| b.contains(v))
}

fn reference_changed(incoming: Option<EntityId>, existing: Option<&Option<EntityId>>) -> Option<EntityId> {
    match existing {
        Some(before) if *before == incoming => None,
        _ => incoming,
    }
}

#[async_trait]
impl EntityPolicy for AssetGroupPolicy {
    type Entity = AssetGroup;

    fn reader(&self) -> &dyn EntityReader<AssetGroup> {
        self.readers.asset_groups.as_ref()
    }

    async fn data_owners(
        &self,
        _action: WriteAction,
        entity: &AssetGroup,
        existing: Option<&AssetGroup>,
    ) -> WriteResult<OwnerResolution> {
        let stored_owner = match existing {
            Some(existing) => self.owner_of(existing).await?,
            None => None,
        };
        let ids = [stored_owner, self.owner_of(entity).await?];
        let owners = read_owners(self.readers.owners.as_ref(), ids).await?;
        Ok(OwnerResolution::from_found(owners))
    }

    fn validate_properties(&self, action: WriteAction, incoming: &mut AssetGroup) -> WriteResult<()> {
        if incoming.owner_id.is_none() && incoming.delete_agent_id.is_none() {
            return Err(WriteError::missing(
                "ownerId,deleteAgentId",
                "owner or delete agent must be set",
            ));
        }
        if incoming.qualifier.trim().is_empty() {
            return Err(WriteError::missing("qualifier", "qualifier is required"));
        }
        embedded_owner_not_set(incoming.owner.as_deref())?;

        match action {
            WriteAction::Create => {
                let variants = (!incoming.variants.is_empty()).then_some(incoming.variants.len());
                property_should_not_be_set(variants, "variants")?;
            }
            _ => {
                let mut seen = HashSet::new();
                if let Some(duplicate) = incoming
                    .variants
                    .iter()
                    .find(|v| !seen.insert(v.variant_id))
                {
                    return Err(WriteError::invalid(
                        "variants",
                        Some(duplicate.variant_id.to_string()),
                        "variant ids must be unique",
                    ));
                }
            }
        }
        Ok(())
    }

    async fn validate_consistency(
        &self,
        ctx: &WriteContext,
        _action: WriteAction,
        incoming: &mut AssetGroup,
        existing: Option<&AssetGroup>,
    ) -> WriteResult<()> {
        if let Some(owner_id) = reference_changed(incoming.owner_id, existing.map(|e| &e.owner_id)) {
            reference_should_exist(self.readers.owners.as_ref(), owner_id, "ownerId").await?;
        }
        if let Some(agent_id) =
            reference_changed(incoming.delete_agent_id, existing.map(|e| &e.delete_agent_id))
        {
            reference_should_exist(self.readers.agents.as_ref(), agent_id, "deleteAgentId").await?;
        }

        match existing {
            None => self.qualifier_should_be_unique(incoming).await,
            Some(existing) => self.validate_variant_changes(ctx, incoming, existing).await,
        }
    }

    fn merge(&self, incoming: AssetGroup, mut existing: AssetGroup) -> AssetGroup {
        existing.qualifier = incoming.qualifier;
        existing.owner_id = incoming.owner_id;
        existing.delete_agent_id = incoming.delete_agent_id;
        existing.variants = incoming.variants;
        existing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_order_is_ignored() {
        let (a, b) = (EntityId::new(), EntityId::new());
        let left = vec![AssetGroupVariant::new(a), AssetGroupVariant::new(b)];
        let right = vec![AssetGroupVariant::new(b), AssetGroupVariant::new(a)];
        assert!(same_variants(&left, &right));
        assert!(!same_variants(&left, &right[..1]));
    }

    #[test]
    fn unchanged_references_are_not_rechecked() {
        let id = EntityId::new();
        assert_eq!(reference_changed(Some(id), None), Some(id));
        assert_eq!(reference_changed(Some(id), Some(&Some(id))), None);
        assert_eq!(reference_changed(None, Some(&Some(id))), None);
    }
}
