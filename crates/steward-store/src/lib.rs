//! Steward storage
//!
//! The [`TransactionalStorageWriter`] turns entity mutations into one atomic
//! batch against a [`DocumentStore`]:
//! - every upserted entity gets fresh tracking details and a history item
//! - every document is guarded by its concurrency token
//! - a failed precondition anywhere aborts the whole batch
//!
//! [`InMemoryDocumentStore`] is a complete substrate with per-document
//! tokens and all-or-nothing batches, used by tests and the CLI.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod clock;
pub mod memory;
pub mod substrate;
pub mod writer;

pub use clock::{Clock, FixedClock, SystemClock};
pub use memory::InMemoryDocumentStore;
pub use steward_model::StoreError;
pub use substrate::{
    BatchOperation, BatchResponse, DocumentKind, DocumentStore, OperationResult, Precondition,
    StoredDocument,
};
pub use writer::{
    CommitBatch, CommitDiagnostics, CommitResult, StorageWriter, TransactionalStorageWriter,
};
