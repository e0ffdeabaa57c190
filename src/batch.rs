//! Batched writes against one repository.
//!
//! Intents are mapped and queued up front; queuing problems (an update
//! without identifier, an entity that fails to map) are collected into the
//! result instead of failing the batch. [`BatchOperation::execute`] submits
//! everything queued as one bulk write.

use serde::Serialize;
use serde_json::json;
use tracing::debug;

use crate::backend::WriteModel;
use crate::entity::{Entity, EntityId};
use crate::error::StorageResult;
use crate::observer::StorageEventType;
use crate::repository::{run_blocking, Repository};

/// counts and queuing errors of one executed batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchOperationResult {
    pub inserted: u64,
    pub updated: u64,
    pub deleted: u64,
    pub errors: Vec<String>,
}

impl BatchOperationResult {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// total number of applied writes
    pub fn total(&self) -> u64 {
        self.inserted + self.updated + self.deleted
    }
}

pub struct BatchOperation<T: Entity> {
    repository: Repository<T>,
    writes: Vec<WriteModel>,
    errors: Vec<String>,
}

impl<T: Entity> BatchOperation<T> {
    pub(crate) fn new(repository: Repository<T>) -> Self {
        Self {
            repository,
            writes: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Queue an insert; an identifier is generated when missing.
    pub fn insert(mut self, mut entity: T) -> Self {
        let queued = Repository::ensure_id(&mut entity).and_then(|id| {
            let key = id.to_key();
            let document = self.repository.to_document(&entity, &key)?;
            Ok(WriteModel::Insert { key, document })
        });
        match queued {
            Ok(write) => self.writes.push(write),
            Err(e) => self.errors.push(format!("Insert failed: {e}")),
        }
        self
    }

    /// Queue a replacement of an already stored entity.
    pub fn update(mut self, entity: T) -> Self {
        let Some(id) = entity.id() else {
            self.errors.push("Update failed: entity has no ID".to_string());
            return self;
        };
        let key = id.to_key();
        match self.repository.to_document(&entity, &key) {
            Ok(document) => self.writes.push(WriteModel::Replace { key, document }),
            Err(e) => self.errors.push(format!("Update failed: {e}")),
        }
        self
    }

    pub fn delete(mut self, entity: &T) -> Self {
        match entity.id() {
            Some(id) => self.writes.push(WriteModel::Delete { key: id.to_key() }),
            None => self.errors.push("Delete failed: entity has no ID".to_string()),
        }
        self
    }

    /// number of queued writes
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Submit every queued write as one bulk call.
    ///
    /// With nothing queued the backend is not touched and the result only
    /// carries the queuing errors. A failed bulk call is one error; how much
    /// of it was applied is up to the backend.
    pub fn execute(self) -> StorageResult<BatchOperationResult> {
        let BatchOperation {
            repository,
            writes,
            errors,
        } = self;
        if writes.is_empty() {
            return Ok(BatchOperationResult {
                errors,
                ..Default::default()
            });
        }

        let queued = writes.len();
        let counts = repository.timed("batch", || repository.store().bulk_write(writes))?;
        debug!(
            collection = repository.collection_name(),
            queued,
            inserted = counts.inserted,
            modified = counts.modified,
            deleted = counts.deleted,
            "batch applied"
        );
        repository.notify(
            StorageEventType::BatchOperation,
            json!({
                "inserted": counts.inserted,
                "updated": counts.modified,
                "deleted": counts.deleted,
            }),
        );

        Ok(BatchOperationResult {
            inserted: counts.inserted,
            updated: counts.modified,
            deleted: counts.deleted,
            errors,
        })
    }

    pub async fn execute_async(self) -> StorageResult<BatchOperationResult> {
        run_blocking(move || self.execute()).await
    }
}
