//! Repositories: CRUD and query entry points for one entity type.
//!
//! A [`Repository`] pairs a [`CollectionStore`] with the mapper, observers and
//! metrics of its engine. Every call is timed and reported under an operation
//! name; failures are recorded as errors and wrapped with that name. Writes
//! notify observers once they succeeded.
//!
//! Each call has an `_async` form that runs the same work on the tokio
//! blocking pool.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::debug;

use crate::backend::{CollectionStore, WriteOutcome};
use crate::batch::BatchOperation;
use crate::entity::{Entity, EntityId};
use crate::error::{StorageError, StorageResult};
use crate::mapping::{Document, DocumentMapper, WIRE_ID_FIELD};
use crate::metrics::{OpTimer, StorageMetrics};
use crate::observer::{ObserverRegistry, StorageEvent, StorageEventType};
use crate::query::{Filter, Query, QueryBuilder};

/// Run blocking storage work on the tokio blocking pool.
///
/// A panicked or cancelled task resolves to [`StorageError::Async`].
pub(crate) async fn run_blocking<R, F>(work: F) -> StorageResult<R>
where
    R: Send + 'static,
    F: FnOnce() -> StorageResult<R> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| StorageError::Async(e.to_string()))?
}

/// what every repository of one engine shares
#[derive(Clone)]
pub(crate) struct StorageContext {
    pub(crate) mapper: Arc<DocumentMapper>,
    pub(crate) observers: ObserverRegistry,
    pub(crate) metrics: Arc<dyn StorageMetrics>,
}

struct RepositoryInner {
    name: String,
    entity_type: String,
    store: Arc<dyn CollectionStore>,
    context: StorageContext,
}

/// Typed access to one collection or table.
///
/// Cheap to clone; clones share the same collection.
pub struct Repository<T: Entity> {
    inner: Arc<RepositoryInner>,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> Clone for Repository<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            _entity: PhantomData,
        }
    }
}

impl<T: Entity> fmt::Debug for Repository<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("name", &self.inner.name)
            .field("collection", &self.inner.store.name())
            .field("entity", &self.inner.entity_type)
            .finish()
    }
}

impl<T: Entity> Repository<T> {
    pub(crate) fn new(name: impl Into<String>, store: Arc<dyn CollectionStore>, context: StorageContext) -> Self {
        let name = name.into();
        let entity_type = T::descriptor().type_name();
        debug!(repository = %name, collection = store.name(), entity = %entity_type, "repository created");
        Self {
            inner: Arc::new(RepositoryInner {
                name,
                entity_type,
                store,
                context,
            }),
            _entity: PhantomData,
        }
    }

    /// the name this repository was registered under
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// physical collection or table name
    pub fn collection_name(&self) -> &str {
        self.inner.store.name()
    }

    pub fn entity_type(&self) -> &str {
        &self.inner.entity_type
    }

    pub fn metrics(&self) -> &Arc<dyn StorageMetrics> {
        &self.inner.context.metrics
    }

    pub(crate) fn store(&self) -> &Arc<dyn CollectionStore> {
        &self.inner.store
    }

    pub(crate) fn mapper(&self) -> &DocumentMapper {
        &self.inner.context.mapper
    }

    pub(crate) fn notify(&self, event_type: StorageEventType, payload: Value) {
        let event = StorageEvent::new(event_type, self.inner.entity_type.clone(), payload);
        self.inner.context.observers.notify(&event);
    }

    /// Time `work`, report it under `operation` and wrap its failure.
    pub(crate) fn timed<R>(&self, operation: &'static str, work: impl FnOnce() -> StorageResult<R>) -> StorageResult<R> {
        let timer = OpTimer::start();
        let metrics = &self.inner.context.metrics;
        match work() {
            Ok(value) => {
                metrics.record_operation(operation, timer.elapsed());
                Ok(value)
            }
            Err(e) => {
                metrics.record_error(operation);
                Err(StorageError::operation(operation, e))
            }
        }
    }

    /// the entity's identifier, generated and assigned when missing
    pub(crate) fn ensure_id(entity: &mut T) -> StorageResult<T::Id> {
        if let Some(id) = entity.id() {
            return Ok(id);
        }
        let id = T::Id::generate().ok_or(StorageError::MissingIdentifier(std::any::type_name::<T>()))?;
        entity.set_id(id.clone());
        Ok(id)
    }

    /// map an entity for storage under `key`
    pub(crate) fn to_document(&self, entity: &T, key: &str) -> StorageResult<Document> {
        let mut document = self.mapper().to_document(entity)?;
        document
            .entry(WIRE_ID_FIELD)
            .or_insert_with(|| Value::String(key.to_string()));
        Ok(document)
    }

    pub(crate) fn from_documents(&self, documents: Vec<Document>) -> StorageResult<Vec<T>> {
        documents
            .into_iter()
            .map(|document| Ok(self.mapper().from_document(document)?))
            .collect()
    }

    // ==================== Writes ====================

    /// Insert or replace `entity`, generating its identifier when missing.
    ///
    /// Returns the entity with its identifier set.
    pub fn save(&self, entity: T) -> StorageResult<T> {
        let (entity, outcome, document) = self.timed("save", || {
            let mut entity = entity;
            let key = Self::ensure_id(&mut entity)?.to_key();
            let document = self.to_document(&entity, &key)?;
            let outcome = self.inner.store.upsert(&key, document.clone())?;
            Ok((entity, outcome, document))
        })?;

        let event_type = match outcome {
            WriteOutcome::Inserted => StorageEventType::EntitySaved,
            WriteOutcome::Updated => StorageEventType::EntityUpdated,
        };
        self.notify(event_type, Value::Object(document));
        Ok(entity)
    }

    pub fn save_all(&self, entities: Vec<T>) -> StorageResult<Vec<T>> {
        entities.into_iter().map(|entity| self.save(entity)).collect()
    }

    /// Delete by identifier. Deleting a missing identifier succeeds.
    ///
    /// Returns whether a stored entity was removed.
    pub fn delete_by_id(&self, id: &T::Id) -> StorageResult<bool> {
        let key = id.to_key();
        let removed = self.timed("deleteById", || self.inner.store.delete(&key))?;
        self.notify(StorageEventType::EntityDeleted, json!({ WIRE_ID_FIELD: key }));
        Ok(removed)
    }

    /// delete `entity`; an entity without identifier was never stored
    pub fn delete(&self, entity: &T) -> StorageResult<bool> {
        match entity.id() {
            Some(id) => self.delete_by_id(&id),
            None => Ok(false),
        }
    }

    /// delete every given entity, returning how many were stored
    pub fn delete_all(&self, entities: &[T]) -> StorageResult<u64> {
        let mut removed = 0;
        for entity in entities {
            if self.delete(entity)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Remove everything in the collection.
    ///
    /// Observers get one batch event with the number of removed entities.
    pub fn clear(&self) -> StorageResult<u64> {
        let removed = self.timed("clear", || self.inner.store.delete_all())?;
        self.notify(
            StorageEventType::BatchOperation,
            json!({"inserted": 0, "updated": 0, "deleted": removed}),
        );
        Ok(removed)
    }

    // ==================== Reads ====================

    pub fn find_by_id(&self, id: &T::Id) -> StorageResult<Option<T>> {
        let key = id.to_key();
        self.timed("findById", || match self.inner.store.find_by_key(&key)? {
            Some(document) => Ok(Some(self.mapper().from_document(document)?)),
            None => Ok(None),
        })
    }

    pub fn find_all(&self) -> StorageResult<Vec<T>> {
        self.timed("findAll", || {
            let documents = self.inner.store.find(&Query::all())?;
            self.from_documents(documents)
        })
    }

    pub fn exists_by_id(&self, id: &T::Id) -> StorageResult<bool> {
        let key = id.to_key();
        self.timed("exists", || self.inner.store.exists(&key))
    }

    pub fn count(&self) -> StorageResult<u64> {
        self.timed("count", || self.inner.store.count(&Filter::new()))
    }

    /// Create a secondary index on `field` where the backend supports one.
    pub fn ensure_index(&self, field: &str) -> StorageResult<()> {
        let field = DocumentMapper::wire_name(field);
        self.timed("ensureIndex", || self.inner.store.ensure_index(field))
    }

    /// a fresh query over this repository
    pub fn query(&self) -> QueryBuilder<T> {
        QueryBuilder::new(self.clone())
    }

    /// a fresh batch of writes against this repository
    pub fn batch(&self) -> BatchOperation<T> {
        BatchOperation::new(self.clone())
    }

    // ==================== Async ====================

    pub async fn save_async(&self, entity: T) -> StorageResult<T> {
        let repo = self.clone();
        run_blocking(move || repo.save(entity)).await
    }

    pub async fn save_all_async(&self, entities: Vec<T>) -> StorageResult<Vec<T>> {
        let repo = self.clone();
        run_blocking(move || repo.save_all(entities)).await
    }

    pub async fn find_by_id_async(&self, id: T::Id) -> StorageResult<Option<T>> {
        let repo = self.clone();
        run_blocking(move || repo.find_by_id(&id)).await
    }

    pub async fn find_all_async(&self) -> StorageResult<Vec<T>> {
        let repo = self.clone();
        run_blocking(move || repo.find_all()).await
    }

    pub async fn exists_by_id_async(&self, id: T::Id) -> StorageResult<bool> {
        let repo = self.clone();
        run_blocking(move || repo.exists_by_id(&id)).await
    }

    pub async fn count_async(&self) -> StorageResult<u64> {
        let repo = self.clone();
        run_blocking(move || repo.count()).await
    }

    pub async fn delete_by_id_async(&self, id: T::Id) -> StorageResult<bool> {
        let repo = self.clone();
        run_blocking(move || repo.delete_by_id(&id)).await
    }

    pub async fn delete_async(&self, entity: T) -> StorageResult<bool> {
        let repo = self.clone();
        run_blocking(move || repo.delete(&entity)).await
    }

    pub async fn delete_all_async(&self, entities: Vec<T>) -> StorageResult<u64> {
        let repo = self.clone();
        run_blocking(move || repo.delete_all(&entities)).await
    }
}
