//! Blob operations for document storage.
//!
//! Each document is stored as its own JSON blob. The wire document is
//! written as-is with a `_meta` block next to it, used for version tracking
//! and to detect blobs that ended up under the wrong key:
//!
//! ```text
//! {
//!   "_meta": {
//!     "key": "01J9Z...",
//!     "version": 2,
//!     "created_at": "2024-05-01T10:00:00+00:00",
//!     "updated_at": "2024-05-02T08:30:00+00:00"
//!   },
//!   "_id": "01J9Z...",
//!   "name": "alice"
//! }
//! ```

use git2::Repository;
use serde::{Deserialize, Serialize};

use crate::backend::document::error::{DocumentStoreError, DocumentStoreResult};
use crate::backend::document::types::{BlobId, DocumentKey};
use crate::mapping::Document;

/// wire field holding the metadata block
pub const META_FIELD: &str = "_meta";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct DocumentMeta {
    key: String,
    version: u64,
    created_at: String,
    updated_at: String,
}

/// a stored document with its metadata
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub key: DocumentKey,
    pub version: u64,
    pub created_at: String,
    pub updated_at: String,
    pub body: Document,
}

impl StoredDocument {
    /// a first version stamped with the current time
    pub fn new(key: DocumentKey, body: Document) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            key,
            version: 1,
            created_at: now.clone(),
            updated_at: now,
            body,
        }
    }

    /// the next version of this document with a new body
    pub fn replaced(self, body: Document) -> Self {
        Self {
            key: self.key,
            version: self.version + 1,
            created_at: self.created_at,
            updated_at: chrono::Utc::now().to_rfc3339(),
            body,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct DocumentJson {
    #[serde(rename = "_meta")]
    meta: DocumentMeta,
    #[serde(flatten)]
    body: Document,
}

/// serialize a document to JSON bytes
pub fn serialize_document(document: &StoredDocument) -> DocumentStoreResult<Vec<u8>> {
    let mut body = document.body.clone();
    body.remove(META_FIELD);
    let json = DocumentJson {
        meta: DocumentMeta {
            key: document.key.as_str().to_string(),
            version: document.version,
            created_at: document.created_at.clone(),
            updated_at: document.updated_at.clone(),
        },
        body,
    };
    Ok(serde_json::to_vec_pretty(&json)?)
}

/// Deserialize a document from JSON bytes.
///
/// The key recorded in the blob must match the key it was found under.
pub fn deserialize_document(bytes: &[u8], expected_key: &DocumentKey) -> DocumentStoreResult<StoredDocument> {
    let json: DocumentJson = serde_json::from_slice(bytes)?;

    if json.meta.key != expected_key.as_str() {
        return Err(DocumentStoreError::CorruptedData {
            path: expected_key.file_name().into(),
            reason: format!(
                "key mismatch: file name suggests '{}' but content has '{}'",
                expected_key, json.meta.key
            ),
        });
    }

    Ok(StoredDocument {
        key: expected_key.clone(),
        version: json.meta.version,
        created_at: json.meta.created_at,
        updated_at: json.meta.updated_at,
        body: json.body,
    })
}

/// write a document as a blob, returning its id
pub fn write_blob(repo: &Repository, document: &StoredDocument) -> DocumentStoreResult<BlobId> {
    let bytes = serialize_document(document)?;
    Ok(BlobId::new(repo.blob(&bytes)?))
}

/// read a stored document back from its blob
pub fn read_document(repo: &Repository, blob_id: BlobId, key: &DocumentKey) -> DocumentStoreResult<StoredDocument> {
    let blob = repo.find_blob(blob_id.raw())?;
    deserialize_document(blob.content(), key)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn body(value: serde_json::Value) -> Document {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_serialization_format() {
        let key = DocumentKey::new("abc").unwrap();
        let stored = StoredDocument::new(key, body(json!({"_id": "abc", "name": "alice"})));
        let bytes = serialize_document(&stored).unwrap();

        let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed["_meta"]["key"], json!("abc"));
        assert_eq!(parsed["_meta"]["version"], json!(1));
        assert_eq!(parsed["name"], json!("alice"));
    }

    #[test]
    fn test_meta_not_leaked_into_body() {
        let key = DocumentKey::new("abc").unwrap();
        let stored = StoredDocument::new(key.clone(), body(json!({"_id": "abc", "level": 3})));
        let restored = deserialize_document(&serialize_document(&stored).unwrap(), &key).unwrap();

        assert_eq!(restored.body, stored.body);
        assert!(!restored.body.contains_key(META_FIELD));
    }

    #[test]
    fn test_version_increment() {
        let key = DocumentKey::new("abc").unwrap();
        let stored = StoredDocument::new(key, Document::new());
        let created = stored.created_at.clone();

        let next = stored.replaced(body(json!({"x": 1})));
        assert_eq!(next.version, 2);
        assert_eq!(next.created_at, created);
    }

    #[test]
    fn test_key_mismatch_detection() {
        let key = DocumentKey::new("correct").unwrap();
        let wrong = DocumentKey::new("wrong").unwrap();
        let bytes = serialize_document(&StoredDocument::new(key, Document::new())).unwrap();

        let result = deserialize_document(&bytes, &wrong);
        assert!(matches!(result, Err(DocumentStoreError::CorruptedData { .. })));
    }
}
