//! Generic entity write orchestrator
//!
//! [`EntityWriter`] owns the sequencing shared by every kind; an
//! [`EntityPolicy`] supplies the kind-specific rules.
//!
//! | operation | sequence |
//! |-----------|----------|
//! | create | authorize, validate properties, validate consistency, assign id, commit |
//! | update | load, token check, authorize, validate, merge onto stored, commit |
//! | delete | load, token check, authorize, delete guards, soft-delete plus side effects, commit |
//!
//! Every failure before the commit leaves the store untouched.

use std::sync::Arc;

use async_trait::async_trait;
use steward_model::{
    ConflictKind, ETag, Entity, EntityDocument, EntityId, PrincipalId, WriteAction,
    WriteError, WriteResult,
};
use steward_store::{Clock, CommitBatch, StorageWriter};
use steward_validation::rules::property_required;
use steward_validation::EntityRuleValidator;
use tracing::Instrument;

use crate::authorization::{AuthorizationGate, AuthorizationRole, OwnerResolution};
use crate::config::WriterConfig;
use crate::incident::{self, IncidentEvent, IncidentNotifier};
use crate::pipeline::{StageTracker, WriteStage};
use crate::policies::{AssetGroupPolicy, DataOwnerPolicy, DeleteAgentPolicy, VariantDefinitionPolicy};
use crate::readers::{EntityFilter, EntityReader, Expand, Readers};

/// Caller identity for one write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteContext {
    pub principal: PrincipalId,
}

impl WriteContext {
    #[inline]
    #[must_use]
    pub fn new(principal: PrincipalId) -> Self {
        Self { principal }
    }
}

/// Flags accepted by delete
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    /// Delete even though commands are still in flight
    pub override_pending_commands: bool,
    /// Skip dependency checks and unlink dependents in the same commit
    pub force: bool,
}

impl DeleteOptions {
    #[must_use]
    pub fn forced() -> Self {
        Self {
            override_pending_commands: false,
            force: true,
        }
    }
}

/// Collaborators shared by every writer
#[derive(Clone)]
pub struct WriterServices {
    pub readers: Readers,
    pub authorization: Arc<AuthorizationGate>,
    pub storage: Arc<dyn StorageWriter>,
    pub notifier: Arc<dyn IncidentNotifier>,
    pub clock: Arc<dyn Clock>,
}

/// Kind-specific rules plugged into [`EntityWriter`]
#[async_trait]
pub trait EntityPolicy: Send + Sync + 'static {
    type Entity: Entity;

    fn reader(&self) -> &dyn EntityReader<Self::Entity>;

    fn role(&self, _action: WriteAction) -> AuthorizationRole {
        AuthorizationRole::ServiceEditor
    }

    /// Owners whose write groups gate the write
    ///
    /// `existing` is the stored entity for updates and deletes; for deletes
    /// `entity` is the stored entity too.
    async fn data_owners(
        &self,
        action: WriteAction,
        entity: &Self::Entity,
        existing: Option<&Self::Entity>,
    ) -> WriteResult<OwnerResolution>;

    /// Store-independent checks; may normalize the incoming entity
    fn validate_properties(&self, action: WriteAction, incoming: &mut Self::Entity) -> WriteResult<()>;

    /// Checks against stored state; may fill server-owned fields
    async fn validate_consistency(
        &self,
        ctx: &WriteContext,
        action: WriteAction,
        incoming: &mut Self::Entity,
        existing: Option<&Self::Entity>,
    ) -> WriteResult<()>;

    /// Copy caller-mutable fields onto the stored entity
    fn merge(&self, incoming: Self::Entity, existing: Self::Entity) -> Self::Entity;

    /// Guards run before a soft delete
    async fn validate_delete(
        &self,
        existing: &Self::Entity,
        options: DeleteOptions,
    ) -> WriteResult<()> {
        base_delete_checks(self.reader(), existing, options).await
    }

    /// Dependent documents rewritten in the same commit as a soft delete
    async fn delete_side_effects(
        &self,
        _existing: &Self::Entity,
        _options: DeleteOptions,
    ) -> WriteResult<Vec<EntityDocument>> {
        Ok(Vec::new())
    }

    /// Notification for a committed write, if any
    fn incident_event(
        &self,
        _action: WriteAction,
        _committed: &Self::Entity,
        _prior: Option<&Self::Entity>,
        _options: DeleteOptions,
    ) -> Option<IncidentEvent> {
        None
    }
}

/// Linked entities block a delete; so do pending commands unless overridden
pub async fn base_delete_checks<T: Entity>(
    reader: &dyn EntityReader<T>,
    existing: &T,
    options: DeleteOptions,
) -> WriteResult<()> {
    let id = stored_id(existing)?;
    if reader.is_linked_to_any_other_entities(id).await? {
        return Err(WriteError::conflict(
            ConflictKind::PendingDependency,
            "id",
            Some(id.to_string()),
            "a dependent entity was found",
        ));
    }
    if !options.override_pending_commands && reader.has_pending_commands(id).await? {
        return Err(WriteError::conflict(
            ConflictKind::PendingCommands,
            "id",
            Some(id.to_string()),
            "pending commands were found",
        ));
    }
    Ok(())
}

/// Owners resolved for authorization must carry write groups
fn owners_have_write_groups(owners: &OwnerResolution) -> WriteResult<()> {
    if owners
        .owners()
        .iter()
        .any(|owner| owner.write_security_groups.is_empty())
    {
        return Err(WriteError::conflict(
            ConflictKind::DoesNotExist,
            "dataOwner.writeSecurityGroups",
            None,
            "linked data owner must have a write security group",
        ));
    }
    Ok(())
}

fn stored_id<T: Entity>(entity: &T) -> WriteResult<EntityId> {
    entity
        .id()
        .ok_or_else(|| WriteError::Internal(format!("stored {} without an id", T::KIND)))
}

/// Create, update and soft-delete for one entity kind
pub struct EntityWriter<P: EntityPolicy> {
    policy: P,
    services: WriterServices,
    rules: EntityRuleValidator,
}

impl<P: EntityPolicy> std::fmt::Debug for EntityWriter<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityWriter")
            .field("kind", &P::Entity::KIND)
            .finish_non_exhaustive()
    }
}

impl<P: EntityPolicy> EntityWriter<P> {
    #[must_use]
    pub fn new(policy: P, services: WriterServices) -> Self {
        Self {
            policy,
            services,
            rules: EntityRuleValidator::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn policy(&self) -> &P {
        &self.policy
    }

    /// Create a new entity; the id is assigned here
    pub async fn create(&self, ctx: &WriteContext, entity: P::Entity) -> WriteResult<P::Entity> {
        let span = write_span::<P::Entity>(WriteAction::Create, None);
        let mut stage = StageTracker::new(P::Entity::KIND, WriteAction::Create);
        let result = self
            .create_inner(ctx, entity, &mut stage)
            .instrument(span)
            .await;
        finish(result, &mut stage)
    }

    /// Apply the caller's changes to the stored entity
    pub async fn update(&self, ctx: &WriteContext, entity: P::Entity) -> WriteResult<P::Entity> {
        let span = write_span::<P::Entity>(WriteAction::Update, entity.id());
        let mut stage = StageTracker::new(P::Entity::KIND, WriteAction::Update);
        let result = self
            .update_inner(ctx, entity, &mut stage)
            .instrument(span)
            .await;
        finish(result, &mut stage)
    }

    /// Soft-delete the stored entity
    pub async fn delete(
        &self,
        ctx: &WriteContext,
        id: EntityId,
        etag: &ETag,
        options: DeleteOptions,
    ) -> WriteResult<()> {
        let span = write_span::<P::Entity>(WriteAction::SoftDelete, Some(id));
        let mut stage = StageTracker::new(P::Entity::KIND, WriteAction::SoftDelete);
        let result = self
            .delete_inner(ctx, id, etag, options, &mut stage)
            .instrument(span)
            .await;
        finish(result, &mut stage)
    }

    async fn create_inner(
        &self,
        ctx: &WriteContext,
        mut entity: P::Entity,
        stage: &mut StageTracker,
    ) -> WriteResult<P::Entity> {
        let action = WriteAction::Create;

        let owners = self.policy.data_owners(action, &entity, None).await?;
        self.authorize(ctx, action, &owners).await?;
        stage.advance(WriteStage::Authorized)?;

        self.validate(ctx, action, &mut entity, None, &owners).await?;
        stage.advance(WriteStage::Validated)?;

        let id = EntityId::new();
        entity.header_mut().id = Some(id);
        tracing::Span::current().record("id", tracing::field::display(id));

        let committed = self.commit(ctx, entity.into_document(), Vec::new()).await?;
        stage.advance(WriteStage::Persisted)?;

        self.notify(action, &committed, None, DeleteOptions::default())
            .await;
        Ok(without_tracking(committed))
    }

    async fn update_inner(
        &self,
        ctx: &WriteContext,
        mut incoming: P::Entity,
        stage: &mut StageTracker,
    ) -> WriteResult<P::Entity> {
        let action = WriteAction::Update;

        let id = property_required(incoming.id(), "id")?;
        let existing = self.load(id, incoming.header().e_tag.as_ref()).await?;

        let owners = self
            .policy
            .data_owners(action, &incoming, Some(&existing))
            .await?;
        self.authorize(ctx, action, &owners).await?;
        stage.advance(WriteStage::Authorized)?;

        self.validate(ctx, action, &mut incoming, Some(&existing), &owners)
            .await?;
        stage.advance(WriteStage::Validated)?;

        let prior = existing.clone();
        let merged = self.policy.merge(incoming, existing);
        let committed = self.commit(ctx, merged.into_document(), Vec::new()).await?;
        stage.advance(WriteStage::Persisted)?;

        self.notify(action, &committed, Some(&prior), DeleteOptions::default())
            .await;
        Ok(without_tracking(committed))
    }

    async fn delete_inner(
        &self,
        ctx: &WriteContext,
        id: EntityId,
        etag: &ETag,
        options: DeleteOptions,
        stage: &mut StageTracker,
    ) -> WriteResult<()> {
        let action = WriteAction::SoftDelete;

        let mut existing = self.load(id, Some(etag)).await?;

        let owners = self
            .policy
            .data_owners(action, &existing, Some(&existing))
            .await?;
        self.authorize(ctx, action, &owners).await?;
        stage.advance(WriteStage::Authorized)?;

        self.policy.validate_delete(&existing, options).await?;
        let side_effects = self.policy.delete_side_effects(&existing, options).await?;
        stage.advance(WriteStage::Validated)?;

        existing.header_mut().is_deleted = true;
        let committed = self
            .commit(ctx, existing.into_document(), side_effects)
            .await?;
        stage.advance(WriteStage::Persisted)?;

        self.notify(action, &committed, None, options).await;
        Ok(())
    }

    /// Stored entity for `id`, checked against the caller's token
    async fn load(&self, id: EntityId, etag: Option<&ETag>) -> WriteResult<P::Entity> {
        let existing = self
            .policy
            .reader()
            .read_by_id(id, Expand::WriteProperties)
            .await?
            .ok_or(WriteError::NotFound {
                id,
                kind: P::Entity::KIND,
            })?;

        if let Some(etag) = etag {
            let current = existing.header().e_tag.as_ref();
            if !current.is_some_and(|current| current.matches(etag)) {
                return Err(WriteError::ETagMismatch {
                    etag: Some(etag.clone()),
                });
            }
        }

        if existing.header().is_deleted {
            return Err(WriteError::conflict(
                ConflictKind::InvalidState,
                "isDeleted",
                Some(id.to_string()),
                format!("{} is deleted", P::Entity::KIND),
            ));
        }
        Ok(existing)
    }

    async fn authorize(
        &self,
        ctx: &WriteContext,
        action: WriteAction,
        owners: &OwnerResolution,
    ) -> WriteResult<()> {
        self.services
            .authorization
            .authorize(&ctx.principal, self.policy.role(action), owners)
            .await
    }

    async fn validate(
        &self,
        ctx: &WriteContext,
        action: WriteAction,
        incoming: &mut P::Entity,
        existing: Option<&P::Entity>,
        owners: &OwnerResolution,
    ) -> WriteResult<()> {
        if incoming.header().is_deleted {
            return Err(WriteError::invalid(
                "isDeleted",
                Some("true".into()),
                "isDeleted is set by delete only",
            ));
        }
        self.rules.validate(action, incoming)?;
        self.policy.validate_properties(action, incoming)?;

        owners_have_write_groups(owners)?;
        self.name_should_be_unique(incoming, existing).await?;
        self.policy
            .validate_consistency(ctx, action, incoming, existing)
            .await
    }

    /// Skipped for unnamed kinds and for unchanged names
    async fn name_should_be_unique(
        &self,
        incoming: &P::Entity,
        existing: Option<&P::Entity>,
    ) -> WriteResult<()> {
        let Some(name) = incoming.name() else {
            return Ok(());
        };
        if existing.is_some_and(|existing| existing.name() == Some(name)) {
            return Ok(());
        }

        let matches = self
            .policy
            .reader()
            .read_by_filters(&EntityFilter::by_name(name), Expand::None)
            .await?;
        if matches.iter().any(|m| m.id() != incoming.id()) {
            return Err(WriteError::conflict(
                ConflictKind::AlreadyExists,
                "name",
                Some(name.to_string()),
                format!("a {} with this name already exists", P::Entity::KIND),
            ));
        }
        Ok(())
    }

    /// Commit `primary` plus `dependents`, returning the committed primary
    async fn commit(
        &self,
        ctx: &WriteContext,
        primary: EntityDocument,
        dependents: Vec<EntityDocument>,
    ) -> WriteResult<P::Entity> {
        let batch = dependents
            .into_iter()
            .fold(CommitBatch::new(ctx.principal.clone()).upsert(primary), CommitBatch::upsert);
        let result = self.services.storage.commit(batch).await?;
        tracing::debug!(
            transaction_id = %result.diagnostics.transaction_id,
            documents = result.entities.len(),
            "entity committed"
        );

        result
            .entities
            .into_iter()
            .next()
            .and_then(|document| P::Entity::try_from_document(document).ok())
            .ok_or_else(|| WriteError::Internal("commit returned no primary entity".into()))
    }

    async fn notify(
        &self,
        action: WriteAction,
        committed: &P::Entity,
        prior: Option<&P::Entity>,
        options: DeleteOptions,
    ) {
        if let Some(event) = self.policy.incident_event(action, committed, prior, options) {
            incident::deliver(self.services.notifier.as_ref(), event).await;
        }
    }
}

fn write_span<T: Entity>(action: WriteAction, id: Option<EntityId>) -> tracing::Span {
    let span = tracing::info_span!(
        "entity_write",
        kind = %T::KIND,
        action = %action,
        id = tracing::field::Empty,
    );
    if let Some(id) = id {
        span.record("id", tracing::field::display(id));
    }
    span
}

fn finish<T>(result: WriteResult<T>, stage: &mut StageTracker) -> WriteResult<T> {
    if let Err(error) = &result {
        stage.reject(error);
    }
    result
}

/// Tracking details are read-side data and never returned by writes
fn without_tracking<T: Entity>(mut entity: T) -> T {
    entity.header_mut().tracking_details = None;
    entity
}

pub type DeleteAgentWriter = EntityWriter<DeleteAgentPolicy>;
pub type DataOwnerWriter = EntityWriter<DataOwnerPolicy>;
pub type VariantDefinitionWriter = EntityWriter<VariantDefinitionPolicy>;
pub type AssetGroupWriter = EntityWriter<AssetGroupPolicy>;

/// One writer per entity kind over shared services
#[derive(Debug)]
pub struct Writers {
    pub agents: DeleteAgentWriter,
    pub owners: DataOwnerWriter,
    pub variants: VariantDefinitionWriter,
    pub asset_groups: AssetGroupWriter,
}

impl Writers {
    #[must_use]
    pub fn new(config: &WriterConfig, services: WriterServices) -> Self {
        Self {
            agents: EntityWriter::new(DeleteAgentPolicy::new(config, &services), services.clone()),
            owners: EntityWriter::new(DataOwnerPolicy::new(&services), services.clone()),
            variants: EntityWriter::new(VariantDefinitionPolicy::new(&services), services.clone()),
            asset_groups: EntityWriter::new(AssetGroupPolicy::new(&services), services),
        }
    }
}
