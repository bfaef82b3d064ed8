//! Document store substrate contract
//!
//! The substrate only has to execute a list of operations atomically and
//! honour per-document concurrency tokens. Its wire protocol and schema are
//! its own business.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use steward_model::{ETag, EntityDocument, StoreError};

/// What a stored document holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    Entity,
    History,
}

/// Condition a write must satisfy against the store's current state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    /// Create only; fail if the id is taken
    MustNotExist,
    /// Replace only if the current token matches
    IfMatch(ETag),
}

impl Precondition {
    /// Token present means replace, absent means create
    #[inline]
    #[must_use]
    pub fn from_etag(etag: Option<ETag>) -> Self {
        match etag {
            Some(etag) => Self::IfMatch(etag),
            None => Self::MustNotExist,
        }
    }
}

/// One operation inside an atomic batch
#[derive(Debug, Clone)]
pub enum BatchOperation {
    Write {
        id: String,
        kind: DocumentKind,
        body: Value,
        precondition: Precondition,
    },
    Delete {
        id: String,
        if_match: Option<ETag>,
    },
}

impl BatchOperation {
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Write { id, .. } | Self::Delete { id, .. } => id,
        }
    }
}

/// Per-operation outcome, in request order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationResult {
    pub id: String,
    /// New token for writes, `None` for deletes
    pub etag: Option<ETag>,
}

/// Outcome of a committed batch
#[derive(Debug, Clone)]
pub struct BatchResponse {
    pub results: Vec<OperationResult>,
    /// Store-side correlation id, diagnostics only
    pub activity_id: String,
    /// Cost figure reported by the store, diagnostics only
    pub request_charge: f64,
}

/// A document as currently held by the store
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: String,
    pub kind: DocumentKind,
    pub etag: ETag,
    pub body: Value,
}

impl StoredDocument {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        Ok(serde_json::from_value(self.body.clone())?)
    }

    /// Decode an entity document, stamping the store's current token
    pub fn to_entity(&self) -> Result<EntityDocument, StoreError> {
        let mut document: EntityDocument = self.decode()?;
        document.header_mut().e_tag = Some(self.etag.clone());
        Ok(document)
    }
}

/// Atomic batch executor
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Apply every operation or none of them
    async fn execute_batch(
        &self,
        operations: Vec<BatchOperation>,
    ) -> Result<BatchResponse, StoreError>;

    async fn read(&self, id: &str) -> Result<Option<StoredDocument>, StoreError>;
}
