//! Storage error types
//!
//! Every layer has its own `thiserror` enum; this is the one callers see.
//! Lower-layer errors convert in with `?`, and per-operation failures are
//! wrapped with the name of the operation that failed.

use std::time::Duration;

use thiserror::Error;

use crate::backend::document::DocumentStoreError;
use crate::config::{ConfigError, StorageType};
use crate::mapping::MappingError;

/// the main error type for storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// invalid or incomplete configuration
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// entity <-> document conversion failed
    #[error("mapping error: {0}")]
    Mapping(#[from] MappingError),

    /// error from the git-backed document store
    #[error("document store error: {0}")]
    Document(#[from] DocumentStoreError),

    /// error from the relational store
    #[error("sql error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// the backend could not be reached or opened
    #[error("cannot connect to {storage} backend: {source}")]
    Connection {
        storage: StorageType,
        #[source]
        source: Box<StorageError>,
    },

    /// no pooled connection became free in time
    #[error("timed out after {waited:?} waiting for a pooled connection")]
    PoolTimeout { waited: Duration },

    /// the engine or its connection pool was closed
    #[error("storage engine is closed")]
    Closed,

    /// the unit of work of a transaction failed
    #[error("transaction failed: {0}")]
    Transaction(#[source] Box<StorageError>),

    /// a repository or query operation failed
    #[error("{operation} failed: {source}")]
    Operation {
        operation: &'static str,
        #[source]
        source: Box<StorageError>,
    },

    /// a repository name is already bound to another entity type
    #[error("repository '{name}' holds {existing}, not {requested}")]
    RepositoryTypeMismatch {
        name: String,
        existing: &'static str,
        requested: &'static str,
    },

    /// the entity has no identifier and its identifier type cannot generate one
    #[error("entity {0} has no identifier and none can be generated")]
    MissingIdentifier(&'static str),

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// malformed filter, sort or paging request
    #[error("invalid query: {0}")]
    Query(String),

    /// a multi-repository sort field has no total order
    #[error("field '{field}' is not sortable: {reason}")]
    FieldNotSortable { field: String, reason: String },

    /// an asynchronous task panicked or was cancelled
    #[error("asynchronous task failed: {0}")]
    Async(String),

    /// error raised by caller code, e.g. inside a transaction
    #[error("{0}")]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl StorageError {
    /// wrap an arbitrary caller error
    pub fn other(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        StorageError::Other(error.into())
    }

    pub(crate) fn operation(operation: &'static str, source: StorageError) -> Self {
        StorageError::Operation {
            operation,
            source: Box::new(source),
        }
    }

    pub(crate) fn connection(storage: StorageType, source: impl Into<StorageError>) -> Self {
        StorageError::Connection {
            storage,
            source: Box::new(source.into()),
        }
    }

    /// the innermost error, looking through operation and transaction context
    pub fn root(&self) -> &StorageError {
        match self {
            StorageError::Operation { source, .. } | StorageError::Transaction(source) => source.root(),
            other => other,
        }
    }

    /// check if this error indicates the resource doesn't exist
    pub fn is_not_found(&self) -> bool {
        match self.root() {
            StorageError::Document(e) => e.is_not_found(),
            StorageError::Sql(rusqlite::Error::QueryReturnedNoRows) => true,
            _ => false,
        }
    }

    /// check if this error is a conflict (duplicate key, concurrent update)
    pub fn is_conflict(&self) -> bool {
        match self.root() {
            StorageError::Document(e) => e.is_conflict(),
            StorageError::Sql(rusqlite::Error::SqliteFailure(e, _)) => {
                e.code == rusqlite::ErrorCode::ConstraintViolation
            }
            _ => false,
        }
    }

    /// check if this error is recoverable by retry
    pub fn is_retriable(&self) -> bool {
        match self.root() {
            StorageError::Document(e) => e.is_retriable(),
            StorageError::Sql(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            StorageError::PoolTimeout { .. } => true,
            _ => false,
        }
    }

    pub fn is_mapping(&self) -> bool {
        matches!(self.root(), StorageError::Mapping(_))
    }

    /// check if the backend itself is unavailable
    pub fn is_connection(&self) -> bool {
        matches!(
            self.root(),
            StorageError::Connection { .. } | StorageError::PoolTimeout { .. } | StorageError::Closed
        )
    }
}

/// result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::document::{CollectionName, DocumentKey};

    #[test]
    fn test_classifiers_look_through_context() {
        let duplicate = DocumentStoreError::DocumentAlreadyExists {
            collection: CollectionName::new("players").unwrap(),
            key: DocumentKey::new("abc").unwrap(),
        };
        let err = StorageError::operation("batch", StorageError::Transaction(Box::new(duplicate.into())));
        assert!(err.is_conflict());
        assert!(!err.is_not_found());
        assert!(matches!(err.root(), StorageError::Document(_)));
    }

    #[test]
    fn test_mapping_and_connection_errors() {
        let err = StorageError::operation("save", MappingError::CycleDetected { type_name: "Node" }.into());
        assert!(err.is_mapping());
        assert!(!err.is_connection());

        let err = StorageError::PoolTimeout {
            waited: Duration::from_millis(10),
        };
        assert!(err.is_connection());
        assert!(err.is_retriable());
    }

    #[test]
    fn test_operation_message_names_operation() {
        let err = StorageError::operation("findById", StorageError::Closed);
        assert_eq!(err.to_string(), "findById failed: storage engine is closed");
    }
}
