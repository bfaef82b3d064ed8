//! Testing utilities for the steward workspace
//!
//! Fixtures for every entity kind, a recording incident notifier, and a
//! [`TestEnvironment`] wiring the writers over the in-memory store.

#![allow(missing_docs)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use steward_core::incident::{IncidentEvent, IncidentNotifier};
use steward_core::{
    AuthorizationGate, Expand, EntityReader, MemoryReadModel, Readers, StaticGroupDirectory,
    WriteContext, WriterConfig, WriterServices, Writers,
};
use steward_model::{
    AgentReadiness, AssetGroup, ConnectionDetail, DataOwner, DeleteAgent, Entity, EntityId,
    PrincipalId, ProtocolId, ReleaseState, VariantDefinition, WriteError, WriteResult,
};
use steward_store::{
    Clock, CommitBatch, DocumentKind, FixedClock, InMemoryDocumentStore, StorageWriter,
    TransactionalStorageWriter,
};
use uuid::Uuid;

pub const EDITOR_GROUP: Uuid = Uuid::from_u128(0x0e0e_0000_0000_4000_8000_0000_0000_0001);
pub const OTHER_GROUP: Uuid = Uuid::from_u128(0x0e0e_0000_0000_4000_8000_0000_0000_0002);
pub const ADMIN_GROUP: Uuid = Uuid::from_u128(0x0a0a_0000_0000_4000_8000_0000_0000_0001);
pub const VARIANT_EDITOR_GROUP: Uuid = Uuid::from_u128(0x0b0b_0000_0000_4000_8000_0000_0000_0001);

/// Member of [`EDITOR_GROUP`]
pub fn editor() -> PrincipalId {
    PrincipalId::new("editor@contoso.com")
}

/// Member of [`ADMIN_GROUP`]
pub fn admin() -> PrincipalId {
    PrincipalId::new("admin@contoso.com")
}

/// Member of [`VARIANT_EDITOR_GROUP`]
pub fn variant_editor() -> PrincipalId {
    PrincipalId::new("variants@contoso.com")
}

/// Member of no group
pub fn outsider() -> PrincipalId {
    PrincipalId::new("outsider@fabrikam.com")
}

pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
}

pub fn owner() -> DataOwner {
    owner_with_groups(&[EDITOR_GROUP])
}

pub fn owner_with_groups(groups: &[Uuid]) -> DataOwner {
    let mut owner = DataOwner::new("Contoso Storage", "Owns the storage agents");
    owner.write_security_groups = groups.to_vec();
    owner.alert_contacts = vec!["storage-oncall@contoso.com".to_string()];
    owner
}

pub fn v1_detail(state: ReleaseState) -> ConnectionDetail {
    ConnectionDetail::new(state)
        .with_protocol(ProtocolId::CommandFeedV1)
        .with_aad_app(Uuid::new_v4())
        .with_readiness(AgentReadiness::TestInProd)
}

pub fn v2_detail(state: ReleaseState) -> ConnectionDetail {
    ConnectionDetail::new(state)
        .with_protocol(ProtocolId::CommandFeedV2)
        .with_aad_apps(vec![Uuid::new_v4()])
        .with_readiness(AgentReadiness::TestInProd)
}

/// V1 agent with PreProd and Prod connections
pub fn v1_agent(owner_id: EntityId) -> DeleteAgent {
    DeleteAgent::new("Blob Delete Agent", "Deletes blobs for the storage team")
        .with_owner_id(owner_id)
        .with_connection(v1_detail(ReleaseState::PreProd))
        .with_connection(v1_detail(ReleaseState::Prod))
}

/// V1 agent with only a PreProd connection
pub fn preprod_agent(owner_id: EntityId) -> DeleteAgent {
    DeleteAgent::new("Blob Delete Agent", "Deletes blobs for the storage team")
        .with_owner_id(owner_id)
        .with_connection(v1_detail(ReleaseState::PreProd))
}

pub fn variant() -> VariantDefinition {
    VariantDefinition::new("Legal Hold", "Data retained for litigation")
}

pub fn asset_group(owner_id: EntityId) -> AssetGroup {
    AssetGroup::new("AssetType=AzureBlob;AccountName=storage1").with_owner_id(owner_id)
}

/// Strip server-owned read data so a stored entity can be sent back as an update
pub fn for_update<T: Entity>(mut entity: T) -> T {
    entity.header_mut().tracking_details = None;
    entity
}

/// Incident notifier that records every event it receives
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<IncidentEvent>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<IncidentEvent> {
        self.events.lock().clone()
    }

    /// Make every later notification fail after being recorded
    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl IncidentNotifier for RecordingNotifier {
    async fn notify(&self, event: IncidentEvent) -> WriteResult<()> {
        self.events.lock().push(event);
        if self.failing.load(Ordering::SeqCst) {
            return Err(WriteError::Dependency {
                service: "incident connector",
                message: "connector rejected the event".into(),
            });
        }
        Ok(())
    }
}

/// Writers over an in-memory store with fixed principals and groups
pub struct TestEnvironment {
    pub store: Arc<InMemoryDocumentStore>,
    pub clock: Arc<FixedClock>,
    pub directory: Arc<StaticGroupDirectory>,
    pub model: Arc<MemoryReadModel>,
    pub notifier: Arc<RecordingNotifier>,
    pub config: WriterConfig,
    pub writers: Writers,
    seeder: TransactionalStorageWriter<InMemoryDocumentStore>,
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

impl TestEnvironment {
    pub fn new() -> Self {
        Self::with_config(
            WriterConfig::default()
                .with_service_admin_group(ADMIN_GROUP)
                .with_variant_editor_group(VARIANT_EDITOR_GROUP),
        )
    }

    pub fn with_config(config: WriterConfig) -> Self {
        let store = Arc::new(InMemoryDocumentStore::new());
        let clock = Arc::new(FixedClock::new(epoch()));

        let directory = Arc::new(StaticGroupDirectory::new());
        directory.grant(editor(), EDITOR_GROUP);
        directory.grant(admin(), ADMIN_GROUP);
        directory.grant(variant_editor(), VARIANT_EDITOR_GROUP);

        let model = Arc::new(MemoryReadModel::new(store.clone()));
        let notifier = Arc::new(RecordingNotifier::default());

        let services = WriterServices {
            readers: Readers::in_memory(&model),
            authorization: Arc::new(AuthorizationGate::from_config(directory.clone(), &config)),
            storage: Arc::new(TransactionalStorageWriter::with_clock(store.clone(), clock.clone())),
            notifier: notifier.clone(),
            clock: clock.clone(),
        };
        let writers = Writers::new(&config, services);
        let seeder = TransactionalStorageWriter::with_clock(store.clone(), clock.clone());

        Self {
            store,
            clock,
            directory,
            model,
            notifier,
            config,
            writers,
            seeder,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn ctx(&self, principal: PrincipalId) -> WriteContext {
        WriteContext::new(principal)
    }

    /// Commit `entity` directly, bypassing every writer check
    pub async fn seed<T: Entity>(&self, mut entity: T) -> T {
        if entity.id().is_none() {
            entity.header_mut().id = Some(EntityId::new());
        }
        let result = self
            .seeder
            .commit(CommitBatch::new(PrincipalId::new("seed")).upsert(entity.into_document()))
            .await
            .unwrap();
        result.entities[0].clone().into_entity().unwrap()
    }

    /// Current stored state, tracking included
    pub async fn stored<T: Entity>(&self, id: EntityId) -> T {
        EntityReader::<T>::read_by_id(self.model.as_ref(), id, Expand::WriteProperties)
            .await
            .unwrap()
            .unwrap()
    }

    pub fn history_len(&self) -> usize {
        self.store.documents(DocumentKind::History).len()
    }

    pub async fn seed_owner(&self) -> DataOwner {
        self.seed(owner()).await
    }
}
