//! Cardinal storage: a pluggable persistence layer for typed entities.
//!
//! A [`StorageEngine`](engine::StorageEngine) hides which backend is in use:
//! a git-backed document store (every write is a commit) or a SQLite
//! relational store (one JSON table per repository). Entities are mapped to
//! wire documents without reflection, through the [`Field`](mapping::Field)
//! and [`Mappable`](mapping::Mappable) contracts and an ordered registry of
//! type adapters.
//!
//! # Example
//!
//! ```no_run
//! use cardinal_storage::factory::StorageEngines;
//! use cardinal_storage::punishment::Punishment;
//! use cardinal_storage::query::SortOrder;
//!
//! let engine = StorageEngines::document_store("/var/lib/cardinal", "cardinal").unwrap();
//! let punishments = engine.repository::<Punishment>("punishments").unwrap();
//! let recent = punishments
//!     .query()
//!     .field("type").eq("BAN")
//!     .sort_by("issuedAt", SortOrder::Desc)
//!     .limit(10)
//!     .execute()
//!     .unwrap();
//! ```

pub mod backend;
pub mod batch;
pub mod config;
pub mod engine;
pub mod entity;
pub mod error;
pub mod factory;
pub mod logging;
pub mod mapping;
pub mod metrics;
pub mod observer;
pub mod pool;
pub mod punishment;
pub mod query;
pub mod repository;

#[cfg(test)]
mod testing;

pub use batch::{BatchOperation, BatchOperationResult};
pub use engine::{HealthStatus, RepositoryInfo, StorageEngine};
pub use entity::{Entity, EntityId, ObjectId};
pub use error::{StorageError, StorageResult};
pub use factory::{DefaultStorageEngineFactory, StorageEngineFactory, StorageEngines};
pub use observer::{StorageEvent, StorageEventType, StorageObserver};
pub use repository::Repository;
