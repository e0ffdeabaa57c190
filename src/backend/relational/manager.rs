//! Connection URLs and the pooled SQLite connection manager.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use rusqlite::Connection;

use crate::config::StorageType;
use crate::error::{StorageError, StorageResult};
use crate::pool::ConnectionManager;

/// where a relational store lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqliteTarget {
    File(PathBuf),
    /// private to its single connection
    Memory,
}

impl fmt::Display for SqliteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqliteTarget::File(path) => write!(f, "{}", path.display()),
            SqliteTarget::Memory => f.write_str(":memory:"),
        }
    }
}

/// Parse a connection URL.
///
/// Accepts `sqlite://<path>`, `sqlite:<path>`, `jdbc:sqlite:<path>`, a bare
/// path, and `:memory:` in any of those forms.
pub fn parse_url(url: &str) -> StorageResult<SqliteTarget> {
    let url = url.trim();
    let rest = url.strip_prefix("jdbc:").unwrap_or(url);

    let path = if let Some(path) = rest.strip_prefix("sqlite://") {
        path
    } else if let Some(path) = rest.strip_prefix("sqlite:") {
        path
    } else if rest.contains("://") || url.starts_with("jdbc:") {
        return Err(unsupported_url(url));
    } else {
        rest
    };

    match path {
        "" => Err(unsupported_url(url)),
        ":memory:" => Ok(SqliteTarget::Memory),
        path => Ok(SqliteTarget::File(PathBuf::from(path))),
    }
}

fn unsupported_url(url: &str) -> StorageError {
    StorageError::connection(
        StorageType::MySql,
        StorageError::Unsupported(format!("connection url '{}'", url)),
    )
}

/// Opens SQLite connections for the pool.
pub struct SqliteManager {
    target: SqliteTarget,
    busy_timeout: Duration,
}

impl SqliteManager {
    pub fn new(target: SqliteTarget, busy_timeout: Duration) -> Self {
        Self { target, busy_timeout }
    }

    pub fn target(&self) -> &SqliteTarget {
        &self.target
    }
}

impl ConnectionManager for SqliteManager {
    type Connection = Connection;

    fn connect(&self) -> StorageResult<Connection> {
        let conn = match &self.target {
            SqliteTarget::File(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent).map_err(StorageError::other)?;
                }
                let conn = Connection::open(path)?;
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
                conn
            }
            SqliteTarget::Memory => Connection::open_in_memory()?,
        };
        conn.busy_timeout(self.busy_timeout)?;
        Ok(conn)
    }

    /// a connection handed back inside an open transaction is not reused
    fn is_valid(&self, conn: &mut Connection) -> bool {
        conn.is_autocommit()
    }
}
