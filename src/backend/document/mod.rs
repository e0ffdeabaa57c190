//! git-backed document store
//!
//! each database is a git repository. Collections are top-level trees and
//! documents are JSON blobs inside them; every write is a commit on `main`.
//! Nothing above this module touches git2 directly.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              DocumentBackend / GitCollection                │
//! │     (StorageBackend + CollectionStore, handle pool)         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!        ┌─────────────────────┼─────────────────────┐
//!        │                     │                     │
//!        ▼                     ▼                     ▼
//!  ┌─────────────┐       ┌─────────────┐       ┌─────────────┐
//!  │    tree     │       │    blob     │       │    refs     │
//!  │(collections)│       │ (documents) │       │   (main)    │
//!  └─────────────┘       └─────────────┘       └─────────────┘
//!         │                     │                     │
//!         └─────────────────────┼─────────────────────┘
//!                               │
//!                               ▼
//!                        ┌─────────────┐
//!                        │   commit    │
//!                        │  (history)  │
//!                        └─────────────┘
//! ```
//!
//! On disk:
//!
//! ```text
//! <root>/<database>/            git repository
//!   players/                    collection (with prefix applied)
//!     01J9ZC3K8M....json        one document per blob
//! ```

mod blob;
mod commit;
mod error;
mod refs;
mod store;
mod tree;
mod types;

pub use blob::{StoredDocument, META_FIELD};
pub use commit::{Change, HistoryEntry};
pub use error::{DocumentStoreError, DocumentStoreResult};
pub use store::{parse_location, DocumentBackend, GitCollection};
pub use types::{CollectionName, CommitId, Committer, DocumentKey, InvalidNameError};
