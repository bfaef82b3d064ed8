//! In-memory document store
//!
//! A single write lock spans the whole batch: every precondition is checked
//! first, and nothing is applied unless all of them hold.

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use steward_model::{ETag, StoreError};
use ulid::Ulid;

use crate::substrate::{
    BatchOperation, BatchResponse, DocumentKind, DocumentStore, OperationResult, Precondition,
    StoredDocument,
};

/// Charge per operation, plus a size component per KiB written
const BASE_WRITE_CHARGE: f64 = 5.0;
const CHARGE_PER_KIB: f64 = 1.0;

/// Thread-safe in-process [`DocumentStore`]
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    documents: RwLock<IndexMap<String, StoredDocument>>,
    injected_failure: Mutex<Option<String>>,
}

impl InMemoryDocumentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every document of `kind`, in insertion order
    #[must_use]
    pub fn documents(&self, kind: DocumentKind) -> Vec<StoredDocument> {
        self.documents
            .read()
            .values()
            .filter(|d| d.kind == kind)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<StoredDocument> {
        self.documents.read().get(id).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }

    /// Reissue a document's token, as a concurrent writer would
    pub fn touch(&self, id: &str) -> Option<ETag> {
        let mut documents = self.documents.write();
        let document = documents.get_mut(id)?;
        document.etag = ETag::generate();
        Some(document.etag.clone())
    }

    /// Fail the next batch with [`StoreError::Unavailable`]
    pub fn fail_next_batch(&self, message: impl Into<String>) {
        *self.injected_failure.lock() = Some(message.into());
    }

    fn check(
        documents: &IndexMap<String, StoredDocument>,
        operation: &BatchOperation,
    ) -> Result<(), StoreError> {
        match operation {
            BatchOperation::Write {
                id, precondition, ..
            } => {
                let current = documents.get(id);
                let ok = match (precondition, current) {
                    (Precondition::MustNotExist, None) => true,
                    (Precondition::IfMatch(expected), Some(doc)) => doc.etag.matches(expected),
                    _ => false,
                };
                if ok {
                    Ok(())
                } else {
                    Err(StoreError::PreconditionFailed { id: id.clone() })
                }
            }
            BatchOperation::Delete { id, if_match } => match (documents.get(id), if_match) {
                (None, _) => Err(StoreError::DocumentNotFound { id: id.clone() }),
                (Some(doc), Some(expected)) if !doc.etag.matches(expected) => {
                    Err(StoreError::PreconditionFailed { id: id.clone() })
                }
                _ => Ok(()),
            },
        }
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn execute_batch(
        &self,
        operations: Vec<BatchOperation>,
    ) -> Result<BatchResponse, StoreError> {
        if let Some(message) = self.injected_failure.lock().take() {
            return Err(StoreError::Unavailable(message));
        }

        let mut documents = self.documents.write();

        for operation in &operations {
            Self::check(&documents, operation)?;
        }

        let mut results = Vec::with_capacity(operations.len());
        let mut request_charge = 0.0;
        for operation in operations {
            match operation {
                BatchOperation::Write { id, kind, body, .. } => {
                    let etag = ETag::generate();
                    #[allow(clippy::cast_precision_loss)]
                    let kib = body.to_string().len() as f64 / 1024.0;
                    request_charge += BASE_WRITE_CHARGE + kib * CHARGE_PER_KIB;
                    documents.insert(
                        id.clone(),
                        StoredDocument {
                            id: id.clone(),
                            kind,
                            etag: etag.clone(),
                            body,
                        },
                    );
                    results.push(OperationResult {
                        id,
                        etag: Some(etag),
                    });
                }
                BatchOperation::Delete { id, .. } => {
                    request_charge += BASE_WRITE_CHARGE;
                    documents.shift_remove(&id);
                    results.push(OperationResult { id, etag: None });
                }
            }
        }

        Ok(BatchResponse {
            results,
            activity_id: Ulid::new().to_string(),
            request_charge,
        })
    }

    async fn read(&self, id: &str) -> Result<Option<StoredDocument>, StoreError> {
        Ok(self.get(id))
    }
}
