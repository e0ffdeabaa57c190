//! Building engines from configuration.

use std::path::Path;

use serde_json::Value;
use tracing::{error, info};

use crate::backend::document::DocumentBackend;
use crate::backend::relational::SqlBackend;
use crate::backend::StorageBackend;
use crate::config::{ConfigError, MongoConfig, MySqlConfig, StorageConfig, StorageType};
use crate::engine::StorageEngine;
use crate::error::StorageResult;

/// prefix used by the convenience constructors
pub const DEFAULT_PREFIX: &str = "cardinal_";

/// Creates storage engines from configuration.
pub trait StorageEngineFactory {
    fn create(&self, config: &StorageConfig) -> StorageResult<StorageEngine>;

    /// Build from a raw configuration document (`{"storage": {...}}`).
    fn create_from_document(&self, document: &Value) -> StorageResult<StorageEngine> {
        let config = StorageConfig::from_document(document).inspect_err(log_config_error)?;
        self.create(&config)
    }
}

fn log_config_error(e: &ConfigError) {
    error!(error = %e, "invalid storage configuration");
}

/// Opens the backend selected by `storage.type`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultStorageEngineFactory;

impl StorageEngineFactory for DefaultStorageEngineFactory {
    fn create(&self, config: &StorageConfig) -> StorageResult<StorageEngine> {
        config.validate().inspect_err(log_config_error)?;
        let backend: Box<dyn StorageBackend> = match config.storage_type {
            StorageType::Mongo => {
                let mongo = config.mongo.as_ref().ok_or(ConfigError::MissingSection(StorageType::Mongo))?;
                info!(uri = %mongo.uri, database = %mongo.database, "opening document store");
                Box::new(DocumentBackend::open(mongo)?)
            }
            StorageType::MySql => {
                let mysql = config.mysql.as_ref().ok_or(ConfigError::MissingSection(StorageType::MySql))?;
                info!(url = %mysql.url, "opening relational store");
                Box::new(SqlBackend::open(mysql)?)
            }
        };
        Ok(StorageEngine::new(backend))
    }
}

/// Shorthands over [`DefaultStorageEngineFactory`].
pub struct StorageEngines;

impl StorageEngines {
    pub fn create(config: &StorageConfig) -> StorageResult<StorageEngine> {
        DefaultStorageEngineFactory.create(config)
    }

    pub fn from_document(document: &Value) -> StorageResult<StorageEngine> {
        DefaultStorageEngineFactory.create_from_document(document)
    }

    /// read a JSON configuration file and build its engine
    pub fn from_file(path: impl AsRef<Path>) -> StorageResult<StorageEngine> {
        let config = StorageConfig::from_file(path).inspect_err(log_config_error)?;
        Self::create(&config)
    }

    /// a document store engine with default pool settings and the `cardinal_` prefix
    pub fn document_store(uri: &str, database: &str) -> StorageResult<StorageEngine> {
        let config = MongoConfig::new(uri, database)?.collection_prefix(DEFAULT_PREFIX);
        Self::create(&StorageConfig::mongo(config))
    }

    /// a relational engine with default pool settings and the `cardinal_` prefix
    pub fn relational(url: &str, username: &str, password: &str) -> StorageResult<StorageEngine> {
        let config = MySqlConfig::new(url, username, password)?.table_prefix(DEFAULT_PREFIX);
        Self::create(&StorageConfig::mysql(config))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::error::StorageError;
    use crate::repository::Repository;
    use crate::testing::Player;

    #[test]
    fn test_document_store_shorthand() {
        let dir = TempDir::new().unwrap();
        let engine = StorageEngines::document_store(&dir.path().to_string_lossy(), "cardinal").unwrap();
        assert_eq!(engine.storage_type(), StorageType::Mongo);

        let players: Repository<Player> = engine.repository("players").unwrap();
        assert_eq!(players.collection_name(), "cardinal_players");
        assert!(engine.health_status().healthy);
    }

    #[test]
    fn test_relational_shorthand() {
        let dir = TempDir::new().unwrap();
        let url = format!("sqlite://{}", dir.path().join("cardinal.db").display());
        let engine = StorageEngines::relational(&url, "cardinal", "secret").unwrap();
        assert_eq!(engine.storage_type(), StorageType::MySql);

        let players: Repository<Player> = engine.repository("players").unwrap();
        assert_eq!(players.collection_name(), "cardinal_players");
    }

    #[test]
    fn test_from_document_selects_backend() {
        let dir = TempDir::new().unwrap();
        let document = json!({
            "storage": {
                "type": "mysql",
                "mysql": {
                    "url": format!("sqlite:{}", dir.path().join("db.sqlite").display()),
                    "username": "cardinal",
                    "table-prefix": "t_"
                }
            }
        });
        let engine = StorageEngines::from_document(&document).unwrap();
        let players: Repository<Player> = engine.repository("players").unwrap();
        assert_eq!(players.collection_name(), "t_players");
    }

    #[test]
    fn test_unknown_type_is_config_error() {
        let document = json!({"storage": {"type": "REDIS"}});
        let err = StorageEngines::from_document(&document).unwrap_err();
        assert!(matches!(err, StorageError::Config(ConfigError::UnknownStorageType(_))));
    }

    #[test]
    fn test_unreachable_backend_is_connection_error() {
        let err = StorageEngines::relational("postgres://db:5432/cardinal", "cardinal", "").unwrap_err();
        assert!(err.is_connection());
    }

    #[test]
    fn test_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("storage.json");
        let document = json!({
            "storage": {
                "type": "MONGO",
                "mongo": {"uri": format!("file://{}", dir.path().join("data").display()), "database": "main"}
            }
        });
        std::fs::write(&path, document.to_string()).unwrap();

        let engine = StorageEngines::from_file(&path).unwrap();
        assert_eq!(engine.storage_type(), StorageType::Mongo);

        let err = StorageEngines::from_file(dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, StorageError::Config(ConfigError::Io { .. })));
    }
}
