//! Transactional storage writer
//!
//! One [`StorageWriter::commit`] call is one atomic unit: the entity writes,
//! one history item per entity write, and any physical deletes either all
//! land or none do. There is no transaction across calls.

use std::sync::Arc;

use async_trait::async_trait;
use steward_model::{
    CorrelationId, EntityDocument, EntityId, HistoryItem, PrincipalId, StoreError,
    TrackingDetails, WriteAction, WriteError, WriteResult,
};

use crate::clock::{Clock, SystemClock};
use crate::substrate::{BatchOperation, DocumentKind, DocumentStore, Precondition};

/// Mutations to commit together
#[derive(Debug, Clone)]
pub struct CommitBatch {
    /// Written in order; a document without a token is a create
    pub upserts: Vec<EntityDocument>,
    /// Physically removed; never history items
    pub deletes: Vec<EntityId>,
    /// Recorded in tracking details
    pub actor: PrincipalId,
}

impl CommitBatch {
    #[must_use]
    pub fn new(actor: PrincipalId) -> Self {
        Self {
            upserts: Vec::new(),
            deletes: Vec::new(),
            actor,
        }
    }

    #[must_use]
    pub fn upsert(mut self, document: EntityDocument) -> Self {
        self.upserts.push(document);
        self
    }

    #[must_use]
    pub fn delete(mut self, id: EntityId) -> Self {
        self.deletes.push(id);
        self
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.deletes.is_empty()
    }
}

/// Batch-level metadata kept for observability only
#[derive(Debug, Clone, PartialEq)]
pub struct CommitDiagnostics {
    pub transaction_id: CorrelationId,
    pub activity_id: String,
    pub request_charge: f64,
}

/// Committed documents with their server-assigned tokens and tracking
#[derive(Debug, Clone)]
pub struct CommitResult {
    pub entities: Vec<EntityDocument>,
    pub history: Vec<HistoryItem>,
    pub diagnostics: CommitDiagnostics,
}

/// Atomic commit of entity mutations plus their history
#[async_trait]
pub trait StorageWriter: Send + Sync {
    async fn commit(&self, batch: CommitBatch) -> WriteResult<CommitResult>;
}

/// [`StorageWriter`] over any [`DocumentStore`]
#[derive(Debug)]
pub struct TransactionalStorageWriter<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S: DocumentStore> TransactionalStorageWriter<S> {
    #[must_use]
    pub fn new(store: Arc<S>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    #[inline]
    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Stamp tracking and build the store operations for one entity
    fn prepare(
        &self,
        mut document: EntityDocument,
        actor: &PrincipalId,
        transaction_id: CorrelationId,
    ) -> WriteResult<(EntityDocument, HistoryItem, [BatchOperation; 2])> {
        let id = document
            .id()
            .ok_or_else(|| WriteError::Internal("cannot commit a document without an id".into()))?;
        let action = document.inferred_action();
        let now = self.clock.now();

        let header = document.header_mut();
        let tracking = match (header.tracking_details.as_ref(), action) {
            (Some(prior), WriteAction::Update | WriteAction::SoftDelete) => {
                prior.next(actor.clone(), now)
            }
            _ => TrackingDetails::created(actor.clone(), now),
        };
        header.tracking_details = Some(tracking);
        let supplied = header.e_tag.take();

        let history = HistoryItem::new(document.clone(), action, transaction_id);

        let operations = [
            BatchOperation::Write {
                id: id.to_string(),
                kind: DocumentKind::Entity,
                body: serde_json::to_value(&document).map_err(StoreError::from)?,
                precondition: Precondition::from_etag(supplied.clone()),
            },
            BatchOperation::Write {
                id: history.id.to_string(),
                kind: DocumentKind::History,
                body: serde_json::to_value(&history).map_err(StoreError::from)?,
                precondition: Precondition::MustNotExist,
            },
        ];

        // keep the caller's token until the store hands out a new one
        document.header_mut().e_tag = supplied;
        Ok((document, history, operations))
    }
}

#[async_trait]
impl<S: DocumentStore + 'static> StorageWriter for TransactionalStorageWriter<S> {
    async fn commit(&self, batch: CommitBatch) -> WriteResult<CommitResult> {
        let transaction_id = CorrelationId::new();
        if batch.is_empty() {
            return Ok(CommitResult {
                entities: Vec::new(),
                history: Vec::new(),
                diagnostics: CommitDiagnostics {
                    transaction_id,
                    activity_id: String::new(),
                    request_charge: 0.0,
                },
            });
        }

        let mut entities = Vec::with_capacity(batch.upserts.len());
        let mut history = Vec::with_capacity(batch.upserts.len());
        let mut operations = Vec::with_capacity(batch.upserts.len() * 2 + batch.deletes.len());

        for document in batch.upserts {
            let (document, item, ops) = self.prepare(document, &batch.actor, transaction_id)?;
            entities.push(document);
            history.push(item);
            operations.extend(ops);
        }
        for id in &batch.deletes {
            operations.push(BatchOperation::Delete {
                id: id.to_string(),
                if_match: None,
            });
        }

        let response = match self.store.execute_batch(operations).await {
            Ok(response) => response,
            Err(StoreError::PreconditionFailed { id }) => {
                let supplied = entities
                    .iter()
                    .find(|d| d.id().is_some_and(|e| e.to_string() == id))
                    .and_then(|d| d.e_tag().cloned());
                tracing::warn!(%transaction_id, document = %id, "commit rejected: concurrency token mismatch");
                return Err(WriteError::ETagMismatch { etag: supplied });
            }
            Err(e) => {
                tracing::warn!(%transaction_id, error = %e, "commit failed");
                return Err(WriteError::Store(e));
            }
        };

        // each entity write is followed by its history item
        for (document, result) in entities
            .iter_mut()
            .zip(response.results.iter().step_by(2))
        {
            if let Some(etag) = &result.etag {
                document.header_mut().e_tag = Some(etag.clone());
            }
        }

        tracing::info!(
            %transaction_id,
            activity_id = %response.activity_id,
            request_charge = response.request_charge,
            entities = entities.len(),
            deletes = batch.deletes.len(),
            "commit succeeded"
        );

        Ok(CommitResult {
            entities,
            history,
            diagnostics: CommitDiagnostics {
                transaction_id,
                activity_id: response.activity_id,
                request_charge: response.request_charge,
            },
        })
    }
}
