//! Backend contracts.
//!
//! A [`StorageBackend`] is one open database (git document store or SQLite
//! relational store). Repositories never talk to it directly; they hold a
//! [`CollectionStore`] for their own collection/table and exchange wire
//! documents with it.
//!
//! ```text
//!  StorageEngine ──▶ StorageBackend ──open_collection──▶ CollectionStore
//!                        │                                   │
//!                 ping / transaction              upsert / find / bulk_write
//! ```

pub mod document;
pub mod relational;

use std::sync::Arc;

use crate::config::StorageType;
use crate::error::StorageResult;
use crate::mapping::Document;
use crate::query::{Filter, Query};

/// A unit of work run inside [`StorageBackend::transaction`].
pub type TransactionWork<'a> = Box<dyn FnOnce() -> StorageResult<()> + 'a>;

/// One open backend.
pub trait StorageBackend: Send + Sync {
    fn storage_type(&self) -> StorageType;

    /// Open (creating if needed) the collection backing a repository name.
    ///
    /// The configured collection/table prefix is applied here.
    fn open_collection(&self, name: &str) -> StorageResult<Arc<dyn CollectionStore>>;

    /// cheap liveness check
    fn ping(&self) -> StorageResult<()>;

    fn supports_transactions(&self) -> bool;

    /// Run `work` as one transaction, or directly when the backend has none.
    fn transaction(&self, work: TransactionWork<'_>) -> StorageResult<()>;

    /// whether repositories of this backend can be queried together
    fn supports_fan_out(&self) -> bool {
        true
    }

    /// short human description for health reports
    fn describe(&self) -> String;

    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// whether an upsert created or replaced a document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Inserted,
    Updated,
}

/// one queued write of a bulk call
#[derive(Debug, Clone, PartialEq)]
pub enum WriteModel {
    /// fails the bulk write if the key exists
    Insert { key: String, document: Document },
    /// replaces an existing document; a missing key is skipped
    Replace { key: String, document: Document },
    /// a missing key is skipped
    Delete { key: String },
}

/// counts reported by a bulk write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BulkWriteResult {
    pub inserted: u64,
    pub modified: u64,
    pub deleted: u64,
}

/// Document access to one collection (document store) or table (relational).
///
/// Keys are the canonical string form of entity identifiers; documents are
/// wire documents carrying the key again as `_id`.
pub trait CollectionStore: Send + Sync {
    /// physical name, prefix included
    fn name(&self) -> &str;

    fn upsert(&self, key: &str, document: Document) -> StorageResult<WriteOutcome>;

    fn find_by_key(&self, key: &str) -> StorageResult<Option<Document>>;

    fn find(&self, query: &Query) -> StorageResult<Vec<Document>>;

    fn count(&self, filter: &Filter) -> StorageResult<u64>;

    fn exists(&self, key: &str) -> StorageResult<bool>;

    /// returns whether a document was removed
    fn delete(&self, key: &str) -> StorageResult<bool>;

    fn delete_all(&self) -> StorageResult<u64>;

    /// Apply all writes atomically.
    fn bulk_write(&self, writes: Vec<WriteModel>) -> StorageResult<BulkWriteResult>;

    /// create a secondary index on a document field, where supported
    fn ensure_index(&self, _field: &str) -> StorageResult<()> {
        Ok(())
    }
}
