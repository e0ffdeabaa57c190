//! Table layout of the relational store.
//!
//! One table per repository:
//!
//! ```text
//! CREATE TABLE "<prefix><name>" (
//!     id         TEXT PRIMARY KEY,
//!     data       TEXT NOT NULL CHECK (json_valid(data)),
//!     created_at TEXT NOT NULL,
//!     updated_at TEXT NOT NULL
//! )
//! ```

use rusqlite::Connection;

use crate::backend::relational::sql::{json_path, quote_ident};
use crate::error::{StorageError, StorageResult};

pub const MAX_TABLE_NAME_LEN: usize = 64;

/// Validate `<prefix><name>` as a table name.
pub fn table_name(prefix: &str, name: &str) -> StorageResult<String> {
    let table = format!("{}{}", prefix, name);
    let valid = !table.is_empty()
        && table.len() <= MAX_TABLE_NAME_LEN
        && table.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
        && table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid {
        Ok(table)
    } else {
        Err(StorageError::Unsupported(format!("'{}' is not a valid table name", table)))
    }
}

pub fn create_table(conn: &Connection, table: &str) -> StorageResult<()> {
    let quoted = quote_ident(table);
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {t} (
             id TEXT PRIMARY KEY,
             data TEXT NOT NULL CHECK (json_valid(data)),
             created_at TEXT NOT NULL,
             updated_at TEXT NOT NULL
         );
         CREATE INDEX IF NOT EXISTS {created} ON {t} (created_at);
         CREATE INDEX IF NOT EXISTS {updated} ON {t} (updated_at);",
        t = quoted,
        created = quote_ident(&format!("{}_created_at", table)),
        updated = quote_ident(&format!("{}_updated_at", table)),
    ))?;
    Ok(())
}

/// expression index on one document field
pub fn create_field_index(conn: &Connection, table: &str, field: &str) -> StorageResult<String> {
    let path = json_path(field)?;
    let suffix: String = field
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    let index = format!("{}_idx_{}", table, suffix);

    conn.execute_batch(&format!(
        "CREATE INDEX IF NOT EXISTS {} ON {} (json_extract(data, {}));",
        quote_ident(&index),
        quote_ident(table),
        path
    ))?;
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_names(conn: &Connection, table: &str) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'index' AND tbl_name = ?1 AND name NOT LIKE 'sqlite_%' ORDER BY name")
            .unwrap();
        stmt.query_map([table], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap()
    }

    #[test]
    fn test_table_name() {
        assert_eq!(table_name("cardinal_", "players").unwrap(), "cardinal_players");
        assert!(table_name("", "1players").is_err());
        assert!(table_name("cardinal_", "players; DROP").is_err());
        assert!(table_name("", "").is_err());
    }

    #[test]
    fn test_create_table_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        create_table(&conn, "players").unwrap();
        create_table(&conn, "players").unwrap();

        assert_eq!(index_names(&conn, "players"), vec!["players_created_at", "players_updated_at"]);
    }

    #[test]
    fn test_data_must_be_json() {
        let conn = Connection::open_in_memory().unwrap();
        create_table(&conn, "players").unwrap();

        let result = conn.execute(
            "INSERT INTO players (id, data, created_at, updated_at) VALUES ('a', 'not json', '', '')",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_field_index() {
        let conn = Connection::open_in_memory().unwrap();
        create_table(&conn, "players").unwrap();

        let index = create_field_index(&conn, "players", "address.city").unwrap();
        assert_eq!(index, "players_idx_address_city");
        assert!(index_names(&conn, "players").contains(&index));
    }
}
