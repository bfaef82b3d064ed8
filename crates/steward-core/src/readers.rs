//! Read-side collaborators
//!
//! Writers only need point reads, filtered scans and a few relationship
//! queries. [`MemoryReadModel`] answers all of them from an
//! [`InMemoryDocumentStore`] so the pipeline can run without a query service.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashSet;
use steward_model::{
    AssetGroup, DataOwner, DeleteAgent, Entity, EntityDocument, EntityId, VariantDefinition,
    WriteError, WriteResult,
};
use steward_store::{DocumentKind, InMemoryDocumentStore};

/// How much of a stored entity a read returns
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Expand {
    /// Caller-facing shape; tracking details omitted
    #[default]
    None,
    /// Everything a writer needs, tracking details included
    WriteProperties,
}

/// Criteria for [`EntityReader::read_by_filters`]; unset fields match anything
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityFilter {
    /// Exact, case-sensitive name
    pub name: Option<String>,
    /// Asset group qualifier, compared ignoring case
    pub qualifier: Option<String>,
    pub owner_id: Option<EntityId>,
    pub include_deleted: bool,
}

impl EntityFilter {
    #[must_use]
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn by_qualifier(qualifier: impl Into<String>) -> Self {
        Self {
            qualifier: Some(qualifier.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn matches(&self, document: &EntityDocument) -> bool {
        if document.header().is_deleted && !self.include_deleted {
            return false;
        }
        if let Some(name) = &self.name {
            let actual = match document {
                EntityDocument::DeleteAgent(e) => Some(e.name.as_str()),
                EntityDocument::DataOwner(e) => Some(e.name.as_str()),
                EntityDocument::VariantDefinition(e) => Some(e.name.as_str()),
                EntityDocument::AssetGroup(_) => None,
            };
            if actual != Some(name.as_str()) {
                return false;
            }
        }
        if let Some(qualifier) = &self.qualifier {
            match document {
                EntityDocument::AssetGroup(g) if g.qualifier.eq_ignore_ascii_case(qualifier) => {}
                _ => return false,
            }
        }
        if let Some(owner_id) = self.owner_id {
            if owner_of(document) != Some(owner_id) {
                return false;
            }
        }
        true
    }
}

fn owner_of(document: &EntityDocument) -> Option<EntityId> {
    match document {
        EntityDocument::DeleteAgent(e) => e.owner_id,
        EntityDocument::VariantDefinition(e) => e.owner_id,
        EntityDocument::AssetGroup(e) => e.owner_id,
        EntityDocument::DataOwner(_) => None,
    }
}

/// Whether `document` holds a reference to entity `id`
#[must_use]
pub fn references(document: &EntityDocument, id: EntityId) -> bool {
    if owner_of(document) == Some(id) {
        return true;
    }
    match document {
        EntityDocument::AssetGroup(g) => g.delete_agent_id == Some(id) || g.references_variant(id),
        _ => false,
    }
}

/// Read access to one entity kind
#[async_trait]
pub trait EntityReader<T: Entity>: Send + Sync {
    /// Soft-deleted entities are returned; callers decide what that means
    async fn read_by_id(&self, id: EntityId, expand: Expand) -> WriteResult<Option<T>>;

    async fn read_by_filters(&self, filter: &EntityFilter, expand: Expand) -> WriteResult<Vec<T>>;

    /// Any non-deleted entity references this one
    async fn is_linked_to_any_other_entities(&self, id: EntityId) -> WriteResult<bool>;

    /// Delete commands still in flight for this entity
    async fn has_pending_commands(&self, _id: EntityId) -> WriteResult<bool> {
        Ok(false)
    }
}

/// Asset groups referencing a variant definition
#[async_trait]
pub trait VariantLinks: Send + Sync {
    /// Non-deleted linking groups, with tokens and tracking for rewriting
    async fn get_linked_asset_groups(&self, variant_id: EntityId) -> WriteResult<Vec<AssetGroup>>;
}

/// Every reader a writer set needs
#[derive(Clone)]
pub struct Readers {
    pub owners: Arc<dyn EntityReader<DataOwner>>,
    pub agents: Arc<dyn EntityReader<DeleteAgent>>,
    pub variants: Arc<dyn EntityReader<VariantDefinition>>,
    pub asset_groups: Arc<dyn EntityReader<AssetGroup>>,
    pub variant_links: Arc<dyn VariantLinks>,
}

impl Readers {
    /// All readers served by one in-memory model
    #[must_use]
    pub fn in_memory(model: &Arc<MemoryReadModel>) -> Self {
        Self {
            owners: model.clone(),
            agents: model.clone(),
            variants: model.clone(),
            asset_groups: model.clone(),
            variant_links: model.clone(),
        }
    }
}

/// Read model over an [`InMemoryDocumentStore`]
#[derive(Debug)]
pub struct MemoryReadModel {
    store: Arc<InMemoryDocumentStore>,
    pending_commands: DashSet<EntityId>,
}

impl MemoryReadModel {
    #[must_use]
    pub fn new(store: Arc<InMemoryDocumentStore>) -> Self {
        Self {
            store,
            pending_commands: DashSet::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn store(&self) -> &Arc<InMemoryDocumentStore> {
        &self.store
    }

    /// Record that agent `id` has commands in flight
    pub fn mark_pending_commands(&self, id: EntityId) {
        self.pending_commands.insert(id);
    }

    pub fn clear_pending_commands(&self, id: EntityId) {
        self.pending_commands.remove(&id);
    }

    fn entities(&self) -> WriteResult<Vec<EntityDocument>> {
        self.store
            .documents(DocumentKind::Entity)
            .iter()
            .map(|stored| stored.to_entity().map_err(WriteError::from))
            .collect()
    }

    fn shape<T: Entity>(document: EntityDocument, expand: Expand) -> Option<T> {
        let mut entity = T::try_from_document(document).ok()?;
        if expand == Expand::None {
            entity.header_mut().tracking_details = None;
        }
        Some(entity)
    }
}

#[async_trait]
impl<T: Entity> EntityReader<T> for MemoryReadModel {
    async fn read_by_id(&self, id: EntityId, expand: Expand) -> WriteResult<Option<T>> {
        let Some(stored) = self.store.get(&id.to_string()) else {
            return Ok(None);
        };
        if stored.kind != DocumentKind::Entity {
            return Ok(None);
        }
        Ok(Self::shape(stored.to_entity()?, expand))
    }

    async fn read_by_filters(&self, filter: &EntityFilter, expand: Expand) -> WriteResult<Vec<T>> {
        Ok(self
            .entities()?
            .into_iter()
            .filter(|d| d.kind() == T::KIND && filter.matches(d))
            .filter_map(|d| Self::shape(d, expand))
            .collect())
    }

    async fn is_linked_to_any_other_entities(&self, id: EntityId) -> WriteResult<bool> {
        Ok(self
            .entities()?
            .iter()
            .any(|d| !d.header().is_deleted && d.id() != Some(id) && references(d, id)))
    }

    async fn has_pending_commands(&self, id: EntityId) -> WriteResult<bool> {
        Ok(self.pending_commands.contains(&id))
    }
}

#[async_trait]
impl VariantLinks for MemoryReadModel {
    async fn get_linked_asset_groups(&self, variant_id: EntityId) -> WriteResult<Vec<AssetGroup>> {
        Ok(self
            .entities()?
            .into_iter()
            .filter_map(|d| AssetGroup::try_from_document(d).ok())
            .filter(|g| !g.header.is_deleted && g.references_variant(variant_id))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use steward_model::{AssetGroupVariant, PrincipalId};
    use steward_store::{CommitBatch, StorageWriter, TransactionalStorageWriter};

    async fn seed(store: &Arc<InMemoryDocumentStore>, documents: Vec<EntityDocument>) {
        let writer = TransactionalStorageWriter::new(store.clone());
        let batch = documents
            .into_iter()
            .fold(CommitBatch::new(PrincipalId::new("seed")), CommitBatch::upsert);
        writer.commit(batch).await.unwrap();
    }

    fn with_id<T: Entity>(mut entity: T) -> T {
        entity.header_mut().id = Some(EntityId::new());
        entity
    }

    #[tokio::test]
    async fn filters_by_exact_name_and_skips_deleted() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let live = with_id(DataOwner::new("Contoso", "live"));
        let mut gone = with_id(DataOwner::new("Contoso", "gone"));
        gone.header.is_deleted = true;
        let other = with_id(DataOwner::new("contoso", "different case"));
        seed(
            &store,
            vec![live.clone().into_document(), gone.into_document(), other.into_document()],
        )
        .await;

        let model = MemoryReadModel::new(store);
        let found: Vec<DataOwner> = model
            .read_by_filters(&EntityFilter::by_name("Contoso"), Expand::None)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id(), live.id());
        assert!(found[0].header.tracking_details.is_none());
        assert!(found[0].header.e_tag.is_some());
    }

    #[tokio::test]
    async fn read_by_id_checks_kind_and_expansion() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let owner = with_id(DataOwner::new("Owner", "Owner description"));
        let id = owner.id().unwrap();
        seed(&store, vec![owner.into_document()]).await;
        let model = MemoryReadModel::new(store);

        let full: Option<DataOwner> = model.read_by_id(id, Expand::WriteProperties).await.unwrap();
        assert!(full.unwrap().header.tracking_details.is_some());

        let wrong_kind: Option<DeleteAgent> = model.read_by_id(id, Expand::None).await.unwrap();
        assert!(wrong_kind.is_none());
    }

    #[tokio::test]
    async fn links_follow_owner_agent_and_variant_references() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let owner = with_id(DataOwner::new("Owner", "Owner description"));
        let owner_id = owner.id().unwrap();
        let variant = with_id(VariantDefinition::new("Variant", "Variant description"));
        let variant_id = variant.id().unwrap();
        let mut group = with_id(AssetGroup::new("AssetType=AzureBlob;AccountName=a"))
            .with_owner_id(owner_id);
        group.variants.push(AssetGroupVariant::new(variant_id));
        seed(
            &store,
            vec![owner.into_document(), variant.into_document(), group.into_document()],
        )
        .await;
        let model = MemoryReadModel::new(store);

        assert!(EntityReader::<DataOwner>::is_linked_to_any_other_entities(&model, owner_id)
            .await
            .unwrap());
        let linked = model.get_linked_asset_groups(variant_id).await.unwrap();
        assert_eq!(linked.len(), 1);
        assert!(linked[0].header.tracking_details.is_some());
        assert!(linked[0].header.e_tag.is_some());
    }

    #[tokio::test]
    async fn pending_commands_are_tracked_per_agent() {
        let model = MemoryReadModel::new(Arc::new(InMemoryDocumentStore::new()));
        let agent = EntityId::new();
        model.mark_pending_commands(agent);
        assert!(EntityReader::<DeleteAgent>::has_pending_commands(&model, agent)
            .await
            .unwrap());
        model.clear_pending_commands(agent);
        assert!(!EntityReader::<DeleteAgent>::has_pending_commands(&model, agent)
            .await
            .unwrap());
    }
}
