//! document store error types

use std::path::PathBuf;

use thiserror::Error;

use crate::backend::document::types::{CollectionName, DocumentKey, InvalidNameError};

#[derive(Debug, Error)]
pub enum DocumentStoreError {
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    #[error("collection not found: {0}")]
    CollectionNotFound(CollectionName),

    /// an insert in a bulk write hit an existing key
    #[error("document already exists: collection={collection}, key={key}")]
    DocumentAlreadyExists { collection: CollectionName, key: DocumentKey },

    #[error("invalid name: {0}")]
    InvalidName(#[from] InvalidNameError),

    #[error("unsupported store location: {0}")]
    InvalidLocation(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// the repository has no `main` to read from or write to
    #[error("document store has no main branch")]
    MissingMain,

    /// a blob does not belong where it was found
    #[error("corrupted data at {path}: {reason}")]
    CorruptedData { path: PathBuf, reason: String },

    /// a collection path holds something other than a directory
    #[error("unexpected entry at {path}: expected {expected}, found {found}")]
    UnexpectedEntryType {
        path: PathBuf,
        expected: &'static str,
        found: String,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// `main` moved between reading the head and advancing it
    #[error("concurrent modification: main was advanced by another writer")]
    ConcurrentModification,
}

impl DocumentStoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, DocumentStoreError::CollectionNotFound(_) | DocumentStoreError::MissingMain)
    }

    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            DocumentStoreError::DocumentAlreadyExists { .. } | DocumentStoreError::ConcurrentModification
        )
    }

    /// another writer won the race; the same write may succeed on a fresh head
    pub fn is_retriable(&self) -> bool {
        matches!(self, DocumentStoreError::ConcurrentModification)
    }
}

pub type DocumentStoreResult<T> = Result<T, DocumentStoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let missing = DocumentStoreError::CollectionNotFound(CollectionName::new("players").unwrap());
        assert!(missing.is_not_found());
        assert!(!missing.is_conflict());

        let duplicate = DocumentStoreError::DocumentAlreadyExists {
            collection: CollectionName::new("players").unwrap(),
            key: DocumentKey::new("123").unwrap(),
        };
        assert!(duplicate.is_conflict());
        assert!(!duplicate.is_retriable());

        assert!(DocumentStoreError::ConcurrentModification.is_retriable());
        assert!(DocumentStoreError::MissingMain.is_not_found());
    }
}
