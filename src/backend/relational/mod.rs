//! relational store over SQLite
//!
//! each repository owns a table of `(id, data, created_at, updated_at)` rows
//! where `data` is the wire document as JSON text. Filters and sorts are
//! compiled to SQL over `json_extract`, so they run inside SQLite instead of
//! in memory.
//!
//! ```text
//!  SqlBackend ── ConnectionPool<SqliteManager> ── rusqlite::Connection
//!      │                                              ▲
//!      └── SqlTable ── sql::select / sql::count ──────┘
//! ```

mod manager;
mod schema;
mod sql;
mod store;

pub use manager::{parse_url, SqliteManager, SqliteTarget};
pub use schema::table_name;
pub use sql::{json_path, Statement};
pub use store::{SqlBackend, SqlTable};
