//! SQLite-backed relational store.
//!
//! Connections come from a [`ConnectionPool`]. A transaction checks one out,
//! issues `BEGIN IMMEDIATE` and binds it to the calling thread; until the
//! transaction ends every table call made on that thread runs on the bound
//! connection, so repositories join the transaction without knowing about it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Transaction, TransactionBehavior};
use tracing::{debug, info, warn};

use crate::backend::relational::manager::{parse_url, SqliteManager, SqliteTarget};
use crate::backend::relational::schema::{create_field_index, create_table, table_name};
use crate::backend::relational::sql::{self, quote_ident};
use crate::backend::{
    BulkWriteResult, CollectionStore, StorageBackend, TransactionWork, WriteModel, WriteOutcome,
};
use crate::config::{MySqlConfig, StorageType};
use crate::error::{StorageError, StorageResult};
use crate::mapping::Document;
use crate::pool::{ConnectionPool, PoolSettings, PooledConnection};
use crate::query::{Filter, Query};

type SharedConnection = Arc<Mutex<PooledConnection<SqliteManager>>>;

struct SqlInner {
    target: SqliteTarget,
    prefix: String,
    pool: ConnectionPool<SqliteManager>,
    /// tables known to exist
    tables: Mutex<HashSet<String>>,
    /// connections of open transactions, by owning thread
    bound: Mutex<HashMap<ThreadId, SharedConnection>>,
    /// tables created inside an open transaction; they exist only once it commits
    pending: Mutex<HashMap<ThreadId, Vec<String>>>,
}

impl SqlInner {
    /// run `f` on the connection bound to this thread, or a pooled one
    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> StorageResult<T>) -> StorageResult<T> {
        let bound = self.bound.lock().get(&thread::current().id()).cloned();
        match bound {
            Some(conn) => {
                let conn = conn.lock();
                f(&conn)
            }
            None => {
                let conn = self.pool.get()?;
                f(&conn)
            }
        }
    }

    fn ensure_table(&self, table: &str) -> StorageResult<()> {
        if self.tables.lock().contains(table) {
            return Ok(());
        }
        let thread = thread::current().id();
        if self.pending.lock().get(&thread).is_some_and(|created| created.iter().any(|t| t == table)) {
            return Ok(());
        }
        let in_transaction = self.bound.lock().contains_key(&thread);
        self.with_conn(|conn| create_table(conn, table))?;
        if in_transaction {
            self.pending.lock().entry(thread).or_default().push(table.to_string());
        } else if self.tables.lock().insert(table.to_string()) {
            debug!(table, "table ready");
        }
        Ok(())
    }
}

/// Ends the transaction of one thread: unbinds the connection and rolls back
/// whatever is still open on it.
struct Binding<'a> {
    inner: &'a SqlInner,
    thread: ThreadId,
    conn: SharedConnection,
}

impl Drop for Binding<'_> {
    fn drop(&mut self) {
        self.inner.bound.lock().remove(&self.thread);
        self.inner.pending.lock().remove(&self.thread);
        let conn = self.conn.lock();
        if !conn.is_autocommit() {
            if let Err(e) = conn.execute_batch("ROLLBACK") {
                warn!(error = %e, "rollback failed");
            }
        }
    }
}

/// A relational store kept in SQLite, one table per repository.
pub struct SqlBackend {
    inner: Arc<SqlInner>,
}

impl SqlBackend {
    pub fn open(config: &MySqlConfig) -> StorageResult<Self> {
        let connect = || -> StorageResult<Self> {
            config.validate()?;
            let target = parse_url(&config.url)?;

            // every in-memory connection is its own database
            let max_size = match target {
                SqliteTarget::Memory => 1,
                SqliteTarget::File(_) => config.pool_size,
            };
            let settings = PoolSettings::new(max_size)
                .min_idle(1)
                .connection_timeout(config.connection_timeout())
                .max_lifetime(config.max_lifetime());
            let manager = SqliteManager::new(target.clone(), config.connection_timeout());
            let pool = ConnectionPool::new(manager, settings)?;

            info!(location = %target, pool_size = max_size, user = %config.username, "opened relational store");
            Ok(Self {
                inner: Arc::new(SqlInner {
                    target,
                    prefix: config.table_prefix.clone(),
                    pool,
                    tables: Mutex::new(HashSet::new()),
                    bound: Mutex::new(HashMap::new()),
                    pending: Mutex::new(HashMap::new()),
                }),
            })
        };
        connect().map_err(|e| match e {
            e @ StorageError::Connection { .. } => e,
            e => StorageError::connection(StorageType::MySql, e),
        })
    }

    /// whether the calling thread is inside a transaction
    pub fn in_transaction(&self) -> bool {
        self.inner.bound.lock().contains_key(&thread::current().id())
    }
}

impl StorageBackend for SqlBackend {
    fn storage_type(&self) -> StorageType {
        StorageType::MySql
    }

    fn open_collection(&self, name: &str) -> StorageResult<Arc<dyn CollectionStore>> {
        let table = table_name(&self.inner.prefix, name)?;
        self.inner.ensure_table(&table)?;
        Ok(Arc::new(SqlTable {
            store: Arc::clone(&self.inner),
            table,
        }))
    }

    fn ping(&self) -> StorageResult<()> {
        self.inner.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })
    }

    fn supports_transactions(&self) -> bool {
        true
    }

    fn transaction(&self, work: TransactionWork<'_>) -> StorageResult<()> {
        let thread = thread::current().id();
        if self.in_transaction() {
            debug!("joining enclosing transaction");
            return work();
        }

        let conn: SharedConnection = Arc::new(Mutex::new(self.inner.pool.get()?));
        conn.lock().execute_batch("BEGIN IMMEDIATE")?;
        self.inner.bound.lock().insert(thread, Arc::clone(&conn));
        let binding = Binding {
            inner: &self.inner,
            thread,
            conn,
        };
        debug!("transaction started");

        let outcome = work();
        let end = if outcome.is_ok() { "COMMIT" } else { "ROLLBACK" };
        let finished = binding.conn.lock().execute_batch(end);
        let created = self.inner.pending.lock().remove(&thread).unwrap_or_default();
        drop(binding);

        match (outcome, finished) {
            (Ok(()), Ok(())) => {
                self.inner.tables.lock().extend(created);
                debug!("transaction committed");
                Ok(())
            }
            (Ok(()), Err(e)) => Err(e.into()),
            (Err(e), _) => {
                debug!(error = %e, "transaction rolled back");
                Err(e)
            }
        }
    }

    fn describe(&self) -> String {
        format!("sqlite relational store at {}", self.inner.target)
    }

    fn close(&self) {
        if !self.inner.pool.is_closed() {
            self.inner.pool.close();
            info!(location = %self.inner.target, "closed relational store");
        }
    }

    fn is_closed(&self) -> bool {
        self.inner.pool.is_closed()
    }
}

// ==================== Tables ====================

/// one table of a [`SqlBackend`]
pub struct SqlTable {
    store: Arc<SqlInner>,
    table: String,
}

fn parse_document(data: &str) -> StorageResult<Document> {
    Ok(serde_json::from_str(data)?)
}

impl SqlTable {
    fn quoted(&self) -> String {
        quote_ident(&self.table)
    }

    /// Run `f` once the table is known to exist. A table created by a
    /// transaction that rolled back is created again here.
    fn with_table<T>(&self, f: impl FnOnce(&Connection) -> StorageResult<T>) -> StorageResult<T> {
        self.store.ensure_table(&self.table)?;
        self.store.with_conn(f)
    }
}

impl CollectionStore for SqlTable {
    fn name(&self) -> &str {
        &self.table
    }

    fn upsert(&self, key: &str, document: Document) -> StorageResult<WriteOutcome> {
        let data = serde_json::to_string(&document)?;
        let now = Utc::now().to_rfc3339();
        let table = self.quoted();

        self.with_table(|conn| {
            let existed = conn
                .query_row(&format!("SELECT 1 FROM {} WHERE id = ?1", table), [key], |_| Ok(()))
                .optional()?
                .is_some();
            conn.execute(
                &format!(
                    "INSERT INTO {} (id, data, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)
                     ON CONFLICT(id) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
                    table
                ),
                params![key, data, now],
            )?;
            Ok(if existed {
                WriteOutcome::Updated
            } else {
                WriteOutcome::Inserted
            })
        })
    }

    fn find_by_key(&self, key: &str) -> StorageResult<Option<Document>> {
        let sql = format!("SELECT data FROM {} WHERE id = ?1", self.quoted());
        let data = self.with_table(|conn| {
            Ok(conn.query_row(&sql, [key], |row| row.get::<_, String>(0)).optional()?)
        })?;
        data.as_deref().map(parse_document).transpose()
    }

    fn find(&self, query: &Query) -> StorageResult<Vec<Document>> {
        let statement = sql::select(&self.table, query)?;
        let rows = self.with_table(|conn| {
            let mut stmt = conn.prepare(&statement.sql)?;
            let rows = stmt
                .query_map(params_from_iter(statement.params.iter()), |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;
        rows.iter().map(|data| parse_document(data)).collect()
    }

    fn count(&self, filter: &Filter) -> StorageResult<u64> {
        let statement = sql::count(&self.table, filter)?;
        let count = self.with_table(|conn| {
            Ok(conn.query_row(&statement.sql, params_from_iter(statement.params.iter()), |row| {
                row.get::<_, i64>(0)
            })?)
        })?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    fn exists(&self, key: &str) -> StorageResult<bool> {
        let sql = format!("SELECT 1 FROM {} WHERE id = ?1", self.quoted());
        self.with_table(|conn| Ok(conn.query_row(&sql, [key], |_| Ok(())).optional()?.is_some()))
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        let sql = format!("DELETE FROM {} WHERE id = ?1", self.quoted());
        self.with_table(|conn| Ok(conn.execute(&sql, [key])? > 0))
    }

    fn delete_all(&self) -> StorageResult<u64> {
        let sql = format!("DELETE FROM {}", self.quoted());
        self.with_table(|conn| Ok(conn.execute(&sql, [])? as u64))
    }

    /// Runs in its own transaction, or inside the one bound to this thread.
    fn bulk_write(&self, writes: Vec<WriteModel>) -> StorageResult<BulkWriteResult> {
        let table = self.quoted();
        let now = Utc::now().to_rfc3339();
        let insert = format!(
            "INSERT INTO {} (id, data, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
            table
        );
        let replace = format!("UPDATE {} SET data = ?2, updated_at = ?3 WHERE id = ?1", table);
        let delete = format!("DELETE FROM {} WHERE id = ?1", table);

        self.with_table(|conn| {
            let tx = if conn.is_autocommit() {
                Some(Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?)
            } else {
                None
            };

            let mut result = BulkWriteResult::default();
            for write in writes {
                match write {
                    WriteModel::Insert { key, document } => {
                        let data = serde_json::to_string(&document)?;
                        conn.execute(&insert, params![key, data, now])?;
                        result.inserted += 1;
                    }
                    WriteModel::Replace { key, document } => {
                        let data = serde_json::to_string(&document)?;
                        result.modified += conn.execute(&replace, params![key, data, now])? as u64;
                    }
                    WriteModel::Delete { key } => {
                        result.deleted += conn.execute(&delete, [key])? as u64;
                    }
                }
            }

            if let Some(tx) = tx {
                tx.commit()?;
            }
            Ok(result)
        })
    }

    fn ensure_index(&self, field: &str) -> StorageResult<()> {
        let index = self.with_table(|conn| create_field_index(conn, &self.table, field))?;
        debug!(table = %self.table, index, "index ready");
        Ok(())
    }
}
