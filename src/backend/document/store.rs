//! The git-backed document store.
//!
//! A pool of `git2::Repository` handles is shared by every collection of one
//! store. Reads resolve `main` and work on that snapshot without locking.
//! Writes take the store write lock, edit the tree of the current head,
//! commit on top of it and advance `main` with a compare-and-swap, so an
//! outside writer moving the branch makes the write fail instead of being
//! overwritten.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use git2::{Repository, RepositoryInitOptions};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::backend::document::blob::{read_document, write_blob, StoredDocument};
use crate::backend::document::commit::{commit_tree, history, snapshot, Change, HistoryEntry};
use crate::backend::document::error::{DocumentStoreError, DocumentStoreResult};
use crate::backend::document::refs::{MainBranch, MAIN};
use crate::backend::document::tree::{TreeHandle, TreeMutator};
use crate::backend::document::types::{CollectionName, Committer, DocumentKey};
use crate::backend::{
    BulkWriteResult, CollectionStore, StorageBackend, TransactionWork, WriteModel, WriteOutcome,
};
use crate::config::{MongoConfig, StorageType};
use crate::error::{StorageError, StorageResult};
use crate::mapping::Document;
use crate::pool::{ConnectionManager, ConnectionPool, PoolSettings};
use crate::query::{Filter, Query};

// ==================== Location ====================

/// Resolve a store uri to the root directory holding its databases.
///
/// Accepts `git://<dir>`, `file://<dir>` or a bare path.
pub fn parse_location(uri: &str) -> DocumentStoreResult<PathBuf> {
    let uri = uri.trim();
    let path = if let Some(rest) = uri.strip_prefix("git://") {
        rest
    } else if let Some(rest) = uri.strip_prefix("file://") {
        rest
    } else if uri.contains("://") {
        return Err(DocumentStoreError::InvalidLocation(uri.to_string()));
    } else {
        uri
    };

    if path.is_empty() {
        return Err(DocumentStoreError::InvalidLocation(uri.to_string()));
    }
    Ok(PathBuf::from(path))
}

fn database_path(root: &Path, database: &str) -> DocumentStoreResult<PathBuf> {
    let database = database.trim();
    if database.is_empty() || database == "." || database == ".." || database.contains(['/', '\\']) {
        return Err(DocumentStoreError::InvalidLocation(format!("database '{}'", database)));
    }
    Ok(root.join(database))
}

/// open the repository at `path`, initialising it with `main` when missing
fn open_or_init(path: &Path, committer: &Committer) -> DocumentStoreResult<()> {
    let repo = match Repository::open(path) {
        Ok(repo) => repo,
        Err(e) if e.code() == git2::ErrorCode::NotFound => {
            std::fs::create_dir_all(path)?;
            let mut opts = RepositoryInitOptions::new();
            opts.initial_head(MAIN);
            info!(path = %path.display(), "initialising document store");
            Repository::init_opts(path, &opts)?
        }
        Err(e) => return Err(e.into()),
    };

    MainBranch::ensure(&repo, committer)?;
    Ok(())
}

// ==================== Handle Pool ====================

/// opens handles on one repository for the pool
pub struct RepositoryManager {
    path: PathBuf,
}

impl ConnectionManager for RepositoryManager {
    type Connection = Repository;

    fn connect(&self) -> StorageResult<Repository> {
        Repository::open(&self.path).map_err(|e| DocumentStoreError::from(e).into())
    }
}

// ==================== Store ====================

struct StoreInner {
    path: PathBuf,
    prefix: String,
    committer: Committer,
    pool: ConnectionPool<RepositoryManager>,
    /// serialises writers of this process
    write_lock: Mutex<()>,
}

impl StoreInner {
    /// run `read` against the tree of the current `main`
    fn read<T, F>(&self, read: F) -> StorageResult<T>
    where
        F: for<'r> FnOnce(&'r Repository, &TreeHandle<'r>) -> DocumentStoreResult<T>,
    {
        let conn = self.pool.get()?;
        let repo: &Repository = &conn;
        let tree = snapshot(repo, MainBranch::require(repo)?)?;
        Ok(read(repo, &tree)?)
    }

    /// Apply `change` to the tree of `main` and commit the result.
    ///
    /// `edit` returns its value with the [`Change`] it made. Nothing is
    /// committed when the tree was left untouched.
    fn write<T, F>(&self, edit: F) -> StorageResult<T>
    where
        F: for<'r> FnOnce(&'r Repository, &TreeHandle<'r>, &mut TreeMutator<'r>) -> DocumentStoreResult<(T, Change)>,
    {
        let _guard = self.write_lock.lock();
        let conn = self.pool.get()?;
        let repo: &Repository = &conn;

        let head = MainBranch::require(repo)?;
        let tree = snapshot(repo, head)?;
        let mut mutator = TreeMutator::from_tree(repo, &tree)?;

        let (value, change) = edit(repo, &tree, &mut mutator)?;
        if !mutator.is_dirty() {
            return Ok(value);
        }

        let next = commit_tree(repo, mutator.write()?, Some(head), &change, &self.committer)?;
        MainBranch::advance(repo, head, next)?;
        debug!(commit = %next.short(), %change, "committed");
        Ok(value)
    }
}

/// A document store kept as commits in a git repository.
pub struct DocumentBackend {
    inner: Arc<StoreInner>,
}

impl DocumentBackend {
    /// Open the store named by `config`, creating the repository on first use.
    pub fn open(config: &MongoConfig) -> StorageResult<Self> {
        Self::open_as(config, Committer::default())
    }

    /// Like [`open`](Self::open), recording `committer` on every commit.
    pub fn open_as(config: &MongoConfig, committer: Committer) -> StorageResult<Self> {
        let connect = || -> StorageResult<Self> {
            config.validate()?;
            let root = parse_location(&config.uri)?;
            let path = database_path(&root, &config.database)?;
            open_or_init(&path, &committer)?;

            let settings = PoolSettings::new(config.max_pool_size)
                .min_idle(config.min_pool_size)
                .connection_timeout(config.connection_timeout());
            let pool = ConnectionPool::new(RepositoryManager { path: path.clone() }, settings)?;

            info!(path = %path.display(), "opened document store");
            Ok(Self {
                inner: Arc::new(StoreInner {
                    path,
                    prefix: config.collection_prefix.clone(),
                    committer,
                    pool,
                    write_lock: Mutex::new(()),
                }),
            })
        };
        connect().map_err(|e| StorageError::connection(StorageType::Mongo, e))
    }

    /// path of the underlying repository
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Commits on `main`, newest first.
    pub fn history(&self, limit: Option<usize>) -> StorageResult<Vec<HistoryEntry>> {
        let conn = self.inner.pool.get()?;
        let head = MainBranch::require(&conn)?;
        Ok(history(&conn, head, limit)?)
    }
}

impl StorageBackend for DocumentBackend {
    fn storage_type(&self) -> StorageType {
        StorageType::Mongo
    }

    fn open_collection(&self, name: &str) -> StorageResult<Arc<dyn CollectionStore>> {
        let collection =
            CollectionName::new(format!("{}{}", self.inner.prefix, name)).map_err(DocumentStoreError::from)?;

        let created = self.inner.write(|_, _, mutator| {
            let created = mutator.create_collection(&collection)?;
            let change = Change::CreateCollection {
                collection: collection.to_string(),
            };
            Ok((created, change))
        })?;
        if created {
            debug!(collection = %collection, "created collection");
        }

        Ok(Arc::new(GitCollection {
            store: Arc::clone(&self.inner),
            name: collection,
        }))
    }

    fn ping(&self) -> StorageResult<()> {
        let conn = self.inner.pool.get()?;
        MainBranch::require(&conn)?;
        Ok(())
    }

    fn supports_transactions(&self) -> bool {
        false
    }

    fn transaction(&self, work: TransactionWork<'_>) -> StorageResult<()> {
        debug!("document store has no multi-document transactions, running work directly");
        work()
    }

    fn describe(&self) -> String {
        format!("git document store at {}", self.inner.path.display())
    }

    fn close(&self) {
        if !self.inner.pool.is_closed() {
            self.inner.pool.close();
            info!(path = %self.inner.path.display(), "closed document store");
        }
    }

    fn is_closed(&self) -> bool {
        self.inner.pool.is_closed()
    }
}

// ==================== Collections ====================

/// one collection of a [`DocumentBackend`]
pub struct GitCollection {
    store: Arc<StoreInner>,
    name: CollectionName,
}

fn document_key(key: &str) -> DocumentStoreResult<DocumentKey> {
    Ok(DocumentKey::new(key)?)
}

impl GitCollection {
    fn all_documents(&self) -> StorageResult<Vec<Document>> {
        self.store.read(|repo, tree| {
            tree.list_documents(repo, &self.name)?
                .into_iter()
                .map(|(key, blob)| read_document(repo, blob, &key).map(|stored| stored.body))
                .collect()
        })
    }
}

impl CollectionStore for GitCollection {
    fn name(&self) -> &str {
        self.name.as_str()
    }

    fn upsert(&self, key: &str, document: Document) -> StorageResult<WriteOutcome> {
        let key = document_key(key)?;
        let collection = &self.name;

        self.store.write(|repo, tree, mutator| {
            let (stored, outcome) = match tree.document_blob_id(repo, collection, &key)? {
                Some(blob) => (read_document(repo, blob, &key)?.replaced(document), WriteOutcome::Updated),
                None => (StoredDocument::new(key.clone(), document), WriteOutcome::Inserted),
            };
            let blob = write_blob(repo, &stored)?;
            mutator.upsert_document(collection, &key, blob)?;

            let (collection, key) = (collection.to_string(), key.to_string());
            let change = match outcome {
                WriteOutcome::Inserted => Change::Insert { collection, key },
                WriteOutcome::Updated => Change::Update { collection, key },
            };
            Ok((outcome, change))
        })
    }

    fn find_by_key(&self, key: &str) -> StorageResult<Option<Document>> {
        let key = document_key(key)?;
        self.store.read(|repo, tree| match tree.document_blob_id(repo, &self.name, &key)? {
            Some(blob) => Ok(Some(read_document(repo, blob, &key)?.body)),
            None => Ok(None),
        })
    }

    fn find(&self, query: &Query) -> StorageResult<Vec<Document>> {
        Ok(query.apply(self.all_documents()?))
    }

    fn count(&self, filter: &Filter) -> StorageResult<u64> {
        let documents = self.all_documents()?;
        Ok(documents.iter().filter(|doc| filter.matches(doc)).count() as u64)
    }

    fn exists(&self, key: &str) -> StorageResult<bool> {
        let key = document_key(key)?;
        self.store.read(|repo, tree| tree.document_exists(repo, &self.name, &key))
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        let key = document_key(key)?;
        let collection = &self.name;
        self.store.write(|_, _, mutator| {
            let removed = mutator.delete_document(collection, &key)?;
            let change = Change::Delete {
                collection: collection.to_string(),
                key: key.to_string(),
            };
            Ok((removed, change))
        })
    }

    fn delete_all(&self) -> StorageResult<u64> {
        let collection = &self.name;
        self.store.write(|_, _, mutator| {
            let removed = mutator.clear_collection(collection)?;
            let change = Change::Clear {
                collection: collection.to_string(),
            };
            Ok((removed as u64, change))
        })
    }

    /// All writes land in one commit; a duplicate insert aborts the whole call.
    fn bulk_write(&self, writes: Vec<WriteModel>) -> StorageResult<BulkWriteResult> {
        let collection = &self.name;
        let writes = writes
            .into_iter()
            .map(|write| {
                let key = match &write {
                    WriteModel::Insert { key, .. } | WriteModel::Replace { key, .. } | WriteModel::Delete { key } => {
                        document_key(key)?
                    }
                };
                Ok((key, write))
            })
            .collect::<DocumentStoreResult<Vec<_>>>()?;
        let total = writes.len();

        self.store.write(|repo, tree, mutator| {
            let mut result = BulkWriteResult::default();
            // documents written or removed earlier in this call
            let mut staged: HashMap<DocumentKey, Option<StoredDocument>> = HashMap::new();

            for (key, write) in writes {
                let current = match staged.get(&key) {
                    Some(entry) => entry.clone(),
                    None => match tree.document_blob_id(repo, collection, &key)? {
                        Some(blob) => Some(read_document(repo, blob, &key)?),
                        None => None,
                    },
                };

                match write {
                    WriteModel::Insert { document, .. } => {
                        if current.is_some() {
                            return Err(DocumentStoreError::DocumentAlreadyExists {
                                collection: collection.clone(),
                                key,
                            });
                        }
                        let stored = StoredDocument::new(key.clone(), document);
                        mutator.upsert_document(collection, &key, write_blob(repo, &stored)?)?;
                        staged.insert(key, Some(stored));
                        result.inserted += 1;
                    }
                    WriteModel::Replace { document, .. } => {
                        if let Some(existing) = current {
                            let stored = existing.replaced(document);
                            mutator.upsert_document(collection, &key, write_blob(repo, &stored)?)?;
                            staged.insert(key, Some(stored));
                            result.modified += 1;
                        }
                    }
                    WriteModel::Delete { .. } => {
                        if current.is_some() {
                            mutator.delete_document(collection, &key)?;
                            staged.insert(key, None);
                            result.deleted += 1;
                        }
                    }
                }
            }

            let change = Change::Bulk {
                collection: collection.to_string(),
                writes: total,
            };
            Ok((result, change))
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};
    use tempfile::TempDir;

    use super::*;
    use crate::query::{Condition, Logic, Operator, Sort, SortOrder};

    fn setup() -> (TempDir, DocumentBackend) {
        let dir = TempDir::new().unwrap();
        let config = MongoConfig::new(dir.path().to_string_lossy(), "cardinal")
            .unwrap()
            .min_pool_size(1)
            .max_pool_size(4);
        let backend = DocumentBackend::open(&config).unwrap();
        (dir, backend)
    }

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    fn player(id: &str, level: i64) -> Document {
        doc(json!({"_id": id, "name": format!("p-{}", id), "level": level}))
    }

    #[test]
    fn test_parse_location() {
        assert_eq!(parse_location("git:///var/data").unwrap(), PathBuf::from("/var/data"));
        assert_eq!(parse_location("file://./data").unwrap(), PathBuf::from("./data"));
        assert_eq!(parse_location(" ./data ").unwrap(), PathBuf::from("./data"));
        assert!(parse_location("mongodb://localhost:27017").is_err());
        assert!(parse_location("git://").is_err());
    }

    #[test]
    fn test_open_initialises_main() {
        let (_dir, backend) = setup();
        backend.ping().unwrap();
        assert!(backend.path().ends_with("cardinal"));

        let history = backend.history(None).unwrap();
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_reopen_keeps_documents() {
        let dir = TempDir::new().unwrap();
        let config = MongoConfig::new(dir.path().to_string_lossy(), "cardinal")
            .unwrap()
            .min_pool_size(1);

        {
            let backend = DocumentBackend::open(&config).unwrap();
            let players = backend.open_collection("players").unwrap();
            players.upsert("a", player("a", 1)).unwrap();
            backend.close();
        }

        let backend = DocumentBackend::open(&config).unwrap();
        let players = backend.open_collection("players").unwrap();
        assert_eq!(players.find_by_key("a").unwrap(), Some(player("a", 1)));
    }

    #[test]
    fn test_bad_uri_is_connection_error() {
        let config = MongoConfig::new("mongodb://localhost:27017", "cardinal").unwrap();
        let err = DocumentBackend::open(&config).err().unwrap();
        assert!(err.is_connection());
    }

    #[test]
    fn test_collection_prefix() {
        let dir = TempDir::new().unwrap();
        let config = MongoConfig::new(dir.path().to_string_lossy(), "cardinal")
            .unwrap()
            .min_pool_size(1)
            .collection_prefix("cardinal_");
        let backend = DocumentBackend::open(&config).unwrap();
        assert_eq!(backend.open_collection("players").unwrap().name(), "cardinal_players");
    }

    #[test]
    fn test_upsert_find_delete() {
        let (_dir, backend) = setup();
        let players = backend.open_collection("players").unwrap();

        assert_eq!(players.upsert("a", player("a", 1)).unwrap(), WriteOutcome::Inserted);
        assert_eq!(players.upsert("a", player("a", 2)).unwrap(), WriteOutcome::Updated);
        assert_eq!(players.find_by_key("a").unwrap(), Some(player("a", 2)));
        assert!(players.exists("a").unwrap());

        assert!(players.delete("a").unwrap());
        assert!(!players.delete("a").unwrap());
        assert_eq!(players.find_by_key("a").unwrap(), None);
    }

    #[test]
    fn test_find_with_query() {
        let (_dir, backend) = setup();
        let players = backend.open_collection("players").unwrap();
        for (id, level) in [("a", 5), ("b", 1), ("c", 9), ("d", 3)] {
            players.upsert(id, player(id, level)).unwrap();
        }

        let mut query = Query::all();
        query.filter.push(
            Logic::And,
            Condition {
                field: "level".into(),
                op: Operator::Gt,
                operand: json!(1),
            },
        );
        query.sort = Some(Sort {
            field: "level".into(),
            order: SortOrder::Desc,
        });
        query.limit = Some(2);

        let levels: Vec<_> = players
            .find(&query)
            .unwrap()
            .iter()
            .map(|d| d["level"].as_i64().unwrap())
            .collect();
        assert_eq!(levels, vec![9, 5]);
        assert_eq!(players.count(&query.filter).unwrap(), 3);
        assert_eq!(players.count(&Filter::new()).unwrap(), 4);
    }

    #[test]
    fn test_bulk_write_is_one_commit() {
        let (_dir, backend) = setup();
        let players = backend.open_collection("players").unwrap();
        players.upsert("a", player("a", 1)).unwrap();
        let before = backend.history(None).unwrap().len();

        let result = players
            .bulk_write(vec![
                WriteModel::Insert {
                    key: "b".into(),
                    document: player("b", 2),
                },
                WriteModel::Replace {
                    key: "a".into(),
                    document: player("a", 7),
                },
                WriteModel::Replace {
                    key: "zz".into(),
                    document: player("zz", 0),
                },
                WriteModel::Delete { key: "b".into() },
            ])
            .unwrap();

        assert_eq!(
            result,
            BulkWriteResult {
                inserted: 1,
                modified: 1,
                deleted: 1
            }
        );
        assert_eq!(backend.history(None).unwrap().len(), before + 1);
        assert_eq!(players.find_by_key("a").unwrap(), Some(player("a", 7)));
        assert!(!players.exists("b").unwrap());
        assert!(!players.exists("zz").unwrap());
    }

    #[test]
    fn test_bulk_duplicate_insert_writes_nothing() {
        let (_dir, backend) = setup();
        let players = backend.open_collection("players").unwrap();
        players.upsert("a", player("a", 1)).unwrap();

        let err = players
            .bulk_write(vec![
                WriteModel::Insert {
                    key: "b".into(),
                    document: player("b", 2),
                },
                WriteModel::Insert {
                    key: "a".into(),
                    document: player("a", 3),
                },
            ])
            .unwrap_err();

        assert!(err.is_conflict());
        assert!(!players.exists("b").unwrap());
    }

    #[test]
    fn test_delete_all() {
        let (_dir, backend) = setup();
        let players = backend.open_collection("players").unwrap();
        players.upsert("a", player("a", 1)).unwrap();
        players.upsert("b", player("b", 2)).unwrap();

        assert_eq!(players.delete_all().unwrap(), 2);
        assert_eq!(players.delete_all().unwrap(), 0);
        assert_eq!(players.count(&Filter::new()).unwrap(), 0);
    }

    #[test]
    fn test_keys_outside_file_name_charset() {
        let (_dir, backend) = setup();
        let players = backend.open_collection("players").unwrap();

        for key in ["red.team", "a/b", "ana@example.com", "..", "with space"] {
            assert_eq!(players.upsert(key, player(key, 1)).unwrap(), WriteOutcome::Inserted);
            assert_eq!(players.find_by_key(key).unwrap().unwrap()["_id"], key);
            assert!(players.exists(key).unwrap());
        }
        assert_eq!(players.count(&Filter::new()).unwrap(), 5);

        // listing decodes file names back to the stored documents
        let ids: Vec<Value> = players
            .find(&Query::all())
            .unwrap()
            .into_iter()
            .map(|d| d["_id"].clone())
            .collect();
        assert!(ids.contains(&json!("a/b")));

        assert!(players.delete("red.team").unwrap());
        assert!(!players.exists("red.team").unwrap());
    }

    #[test]
    fn test_absent_unusual_key_is_not_an_error() {
        let (_dir, backend) = setup();
        let players = backend.open_collection("players").unwrap();

        assert_eq!(players.find_by_key("no such@id").unwrap(), None);
        assert!(!players.exists("no such@id").unwrap());
        assert!(!players.delete("no such@id").unwrap());

        let err = players.upsert("", player("", 1)).unwrap_err();
        assert!(matches!(err, StorageError::Document(DocumentStoreError::InvalidName(_))));
    }

    #[test]
    fn test_closed_store() {
        let (_dir, backend) = setup();
        let players = backend.open_collection("players").unwrap();
        backend.close();
        backend.close();

        assert!(backend.is_closed());
        assert!(matches!(players.find_by_key("a"), Err(StorageError::Closed)));
        assert!(backend.ping().is_err());
    }

    #[test]
    fn test_transaction_runs_directly() {
        let (_dir, backend) = setup();
        assert!(!backend.supports_transactions());

        let players = backend.open_collection("players").unwrap();
        backend
            .transaction(Box::new(|| {
                players.upsert("a", player("a", 1))?;
                Ok(())
            }))
            .unwrap();
        assert!(players.exists("a").unwrap());
    }
}
