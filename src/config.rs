//! Storage configuration.
//!
//! Configuration comes either from typed constructors or from a JSON
//! document shaped like:
//!
//! ```json
//! {
//!   "storage": {
//!     "type": "MONGO",
//!     "mongo": { "uri": "git:///var/lib/cardinal", "database": "cardinal", "collectionPrefix": "cardinal_" },
//!     "mysql": { "url": "sqlite:///var/lib/cardinal.db", "username": "cardinal", "table-prefix": "cardinal_" }
//!   }
//! }
//! ```
//!
//! Only the block for the selected backend is required.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// configuration errors; all of them are fatal at engine construction
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration key: {0}")]
    MissingField(&'static str),

    #[error("configuration key must not be blank: {0}")]
    Blank(&'static str),

    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },

    #[error("unknown storage type: {0} (expected MONGO or MYSQL)")]
    UnknownStorageType(String),

    /// the selected backend has no configuration block
    #[error("storage type {0} selected but its configuration block is missing")]
    MissingSection(StorageType),

    #[error("cannot read configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed configuration document: {0}")]
    Parse(#[from] serde_json::Error),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// which backend family an engine talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StorageType {
    /// document store
    #[serde(rename = "MONGO")]
    Mongo,
    /// relational store
    #[serde(rename = "MYSQL")]
    MySql,
}

impl StorageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageType::Mongo => "MONGO",
            StorageType::MySql => "MYSQL",
        }
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MONGO" => Ok(StorageType::Mongo),
            "MYSQL" => Ok(StorageType::MySql),
            _ => Err(ConfigError::UnknownStorageType(s.to_string())),
        }
    }
}

fn require(key: &'static str, value: &str) -> ConfigResult<()> {
    if value.trim().is_empty() {
        return Err(ConfigError::Blank(key));
    }
    Ok(())
}

fn positive(key: &'static str, value: u64) -> ConfigResult<()> {
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            key,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(())
}

// ==================== Document store ====================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MongoConfig {
    /// location of the store (`git://<dir>`, `file://<dir>` or a bare path)
    pub uri: String,
    pub database: String,
    pub collection_prefix: String,
    pub max_pool_size: u32,
    pub min_pool_size: u32,
    pub connection_timeout_ms: u64,
}

impl MongoConfig {
    pub const DEFAULT_MAX_POOL_SIZE: u32 = 20;
    pub const DEFAULT_MIN_POOL_SIZE: u32 = 5;
    pub const DEFAULT_CONNECTION_TIMEOUT_MS: u64 = 30_000;

    pub fn new(uri: impl Into<String>, database: impl Into<String>) -> ConfigResult<Self> {
        let config = Self {
            uri: uri.into(),
            database: database.into(),
            collection_prefix: String::new(),
            max_pool_size: Self::DEFAULT_MAX_POOL_SIZE,
            min_pool_size: Self::DEFAULT_MIN_POOL_SIZE,
            connection_timeout_ms: Self::DEFAULT_CONNECTION_TIMEOUT_MS,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn collection_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.collection_prefix = prefix.into();
        self
    }

    pub fn max_pool_size(mut self, size: u32) -> Self {
        self.max_pool_size = size;
        self
    }

    pub fn min_pool_size(mut self, size: u32) -> Self {
        self.min_pool_size = size;
        self
    }

    pub fn connection_timeout_ms(mut self, millis: u64) -> Self {
        self.connection_timeout_ms = millis;
        self
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        require("storage.mongo.uri", &self.uri)?;
        require("storage.mongo.database", &self.database)?;
        positive("storage.mongo.maxPoolSize", self.max_pool_size as u64)?;
        positive("storage.mongo.connectionTimeoutMs", self.connection_timeout_ms)?;
        if self.min_pool_size > self.max_pool_size {
            return Err(ConfigError::InvalidValue {
                key: "storage.mongo.minPoolSize",
                reason: format!("{} exceeds maxPoolSize {}", self.min_pool_size, self.max_pool_size),
            });
        }
        Ok(())
    }
}

// ==================== Relational store ====================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MySqlConfig {
    pub url: String,
    pub username: String,
    pub password: String,
    #[serde(rename = "table-prefix")]
    pub table_prefix: String,
    pub pool_size: u32,
    pub connection_timeout_ms: u64,
    #[serde(rename = "maxLifetime")]
    pub max_lifetime_ms: u64,
    pub auto_commit: bool,
}

impl MySqlConfig {
    pub const DEFAULT_TABLE_PREFIX: &'static str = "cardinal_";
    pub const DEFAULT_POOL_SIZE: u32 = 10;
    pub const DEFAULT_CONNECTION_TIMEOUT_MS: u64 = 30_000;
    pub const DEFAULT_MAX_LIFETIME_MS: u64 = 1_800_000;

    pub fn new(
        url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> ConfigResult<Self> {
        let config = Self {
            url: url.into(),
            username: username.into(),
            password: password.into(),
            table_prefix: Self::DEFAULT_TABLE_PREFIX.to_string(),
            pool_size: Self::DEFAULT_POOL_SIZE,
            connection_timeout_ms: Self::DEFAULT_CONNECTION_TIMEOUT_MS,
            max_lifetime_ms: Self::DEFAULT_MAX_LIFETIME_MS,
            auto_commit: false,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn table_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.table_prefix = prefix.into();
        self
    }

    pub fn pool_size(mut self, size: u32) -> Self {
        self.pool_size = size;
        self
    }

    pub fn connection_timeout_ms(mut self, millis: u64) -> Self {
        self.connection_timeout_ms = millis;
        self
    }

    pub fn max_lifetime_ms(mut self, millis: u64) -> Self {
        self.max_lifetime_ms = millis;
        self
    }

    pub fn auto_commit(mut self, value: bool) -> Self {
        self.auto_commit = value;
        self
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn max_lifetime(&self) -> Duration {
        Duration::from_millis(self.max_lifetime_ms)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        require("storage.mysql.url", &self.url)?;
        require("storage.mysql.username", &self.username)?;
        positive("storage.mysql.poolSize", self.pool_size as u64)?;
        positive("storage.mysql.connectionTimeoutMs", self.connection_timeout_ms)?;
        positive("storage.mysql.maxLifetime", self.max_lifetime_ms)?;
        Ok(())
    }
}

// ==================== Top level ====================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageConfig {
    #[serde(rename = "type")]
    pub storage_type: StorageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mongo: Option<MongoConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mysql: Option<MySqlConfig>,
}

impl StorageConfig {
    pub fn new(
        storage_type: StorageType,
        mongo: Option<MongoConfig>,
        mysql: Option<MySqlConfig>,
    ) -> ConfigResult<Self> {
        let config = Self {
            storage_type,
            mongo,
            mysql,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn mongo(config: MongoConfig) -> Self {
        Self {
            storage_type: StorageType::Mongo,
            mongo: Some(config),
            mysql: None,
        }
    }

    pub fn mysql(config: MySqlConfig) -> Self {
        Self {
            storage_type: StorageType::MySql,
            mongo: None,
            mysql: Some(config),
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        match self.storage_type {
            StorageType::Mongo => self
                .mongo
                .as_ref()
                .ok_or(ConfigError::MissingSection(StorageType::Mongo))?
                .validate(),
            StorageType::MySql => self
                .mysql
                .as_ref()
                .ok_or(ConfigError::MissingSection(StorageType::MySql))?
                .validate(),
        }
    }

    /// build from a raw configuration document
    pub fn from_document(document: &Value) -> ConfigResult<Self> {
        let raw: RawDocument = serde_json::from_value(document.clone())?;
        let storage = raw.storage.ok_or(ConfigError::MissingField("storage"))?;
        let storage_type: StorageType = storage
            .kind
            .as_deref()
            .ok_or(ConfigError::MissingField("storage.type"))?
            .parse()?;

        let mongo = match (storage.mongo, storage_type) {
            (Some(raw), _) => Some(raw.into_config()),
            (None, StorageType::Mongo) => return Err(ConfigError::MissingSection(storage_type)),
            (None, _) => None,
        };
        let mysql = match (storage.mysql, storage_type) {
            (Some(raw), _) => Some(raw.into_config()),
            (None, StorageType::MySql) => return Err(ConfigError::MissingSection(storage_type)),
            (None, _) => None,
        };

        Self::new(storage_type, mongo, mysql)
    }

    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let document: Value = serde_json::from_str(&text)?;
        Self::from_document(&document)
    }

    /// the configuration as a document, with the password masked
    pub fn redacted(&self) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Some(password) = value.pointer_mut("/mysql/password") {
            *password = Value::String("***".to_string());
        }
        serde_json::json!({ "storage": value })
    }
}

#[derive(Deserialize)]
struct RawDocument {
    storage: Option<RawStorage>,
}

#[derive(Deserialize)]
struct RawStorage {
    #[serde(rename = "type")]
    kind: Option<String>,
    mongo: Option<RawMongo>,
    mysql: Option<RawMySql>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMongo {
    uri: Option<String>,
    database: Option<String>,
    collection_prefix: Option<String>,
    max_pool_size: Option<u32>,
    min_pool_size: Option<u32>,
    connection_timeout_ms: Option<u64>,
}

impl RawMongo {
    fn into_config(self) -> MongoConfig {
        MongoConfig {
            uri: self.uri.unwrap_or_default(),
            database: self.database.unwrap_or_default(),
            collection_prefix: self.collection_prefix.unwrap_or_default(),
            max_pool_size: self.max_pool_size.unwrap_or(MongoConfig::DEFAULT_MAX_POOL_SIZE),
            min_pool_size: self.min_pool_size.unwrap_or(MongoConfig::DEFAULT_MIN_POOL_SIZE),
            connection_timeout_ms: self
                .connection_timeout_ms
                .unwrap_or(MongoConfig::DEFAULT_CONNECTION_TIMEOUT_MS),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMySql {
    url: Option<String>,
    username: Option<String>,
    password: Option<String>,
    #[serde(rename = "table-prefix")]
    table_prefix: Option<String>,
    pool_size: Option<u32>,
    connection_timeout_ms: Option<u64>,
    max_lifetime: Option<u64>,
    auto_commit: Option<bool>,
}

impl RawMySql {
    fn into_config(self) -> MySqlConfig {
        MySqlConfig {
            url: self.url.unwrap_or_default(),
            username: self.username.unwrap_or_default(),
            password: self.password.unwrap_or_default(),
            table_prefix: self
                .table_prefix
                .unwrap_or_else(|| MySqlConfig::DEFAULT_TABLE_PREFIX.to_string()),
            pool_size: self.pool_size.unwrap_or(MySqlConfig::DEFAULT_POOL_SIZE),
            connection_timeout_ms: self
                .connection_timeout_ms
                .unwrap_or(MySqlConfig::DEFAULT_CONNECTION_TIMEOUT_MS),
            max_lifetime_ms: self.max_lifetime.unwrap_or(MySqlConfig::DEFAULT_MAX_LIFETIME_MS),
            auto_commit: self.auto_commit.unwrap_or(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_mongo_defaults() {
        let doc = json!({"storage": {"type": "MONGO", "mongo": {"uri": "/tmp/x", "database": "db"}}});
        let config = StorageConfig::from_document(&doc).unwrap();
        let mongo = config.mongo.unwrap();
        assert_eq!(config.storage_type, StorageType::Mongo);
        assert_eq!(mongo.collection_prefix, "");
        assert_eq!(mongo.max_pool_size, 20);
        assert_eq!(mongo.min_pool_size, 5);
        assert_eq!(mongo.connection_timeout_ms, 30_000);
        assert!(config.mysql.is_none());
    }

    #[test]
    fn test_mysql_keys_and_defaults() {
        let doc = json!({"storage": {"type": "mysql", "mysql": {
            "url": "sqlite::memory:", "username": "root", "table-prefix": "t_", "poolSize": 3,
            "maxLifetime": 1000, "autoCommit": true
        }}});
        let mysql = StorageConfig::from_document(&doc).unwrap().mysql.unwrap();
        assert_eq!(mysql.table_prefix, "t_");
        assert_eq!(mysql.pool_size, 3);
        assert_eq!(mysql.password, "");
        assert_eq!(mysql.max_lifetime_ms, 1000);
        assert_eq!(mysql.connection_timeout_ms, 30_000);
        assert!(mysql.auto_commit);

        let doc = json!({"storage": {"type": "MYSQL", "mysql": {"url": "x.db", "username": "u"}}});
        let mysql = StorageConfig::from_document(&doc).unwrap().mysql.unwrap();
        assert_eq!(mysql.table_prefix, "cardinal_");
        assert!(!mysql.auto_commit);
    }

    #[test]
    fn test_unknown_storage_type() {
        let doc = json!({"storage": {"type": "REDIS"}});
        let err = StorageConfig::from_document(&doc).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownStorageType(ref t) if t == "REDIS"));
    }

    #[test]
    fn test_blank_required_fields() {
        assert!(matches!(MongoConfig::new("  ", "db"), Err(ConfigError::Blank("storage.mongo.uri"))));
        assert!(matches!(
            MySqlConfig::new("x.db", "", "pw"),
            Err(ConfigError::Blank("storage.mysql.username"))
        ));

        let doc = json!({"storage": {"type": "MONGO", "mongo": {"uri": "/tmp/x"}}});
        assert!(matches!(
            StorageConfig::from_document(&doc),
            Err(ConfigError::Blank("storage.mongo.database"))
        ));
    }

    #[test]
    fn test_selected_block_required() {
        let doc = json!({"storage": {"type": "MYSQL", "mongo": {"uri": "/tmp/x", "database": "db"}}});
        assert!(matches!(
            StorageConfig::from_document(&doc),
            Err(ConfigError::MissingSection(StorageType::MySql))
        ));
    }

    #[test]
    fn test_pool_bounds() {
        let err = MongoConfig::new("/tmp/x", "db").unwrap().min_pool_size(30).validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "storage.mongo.minPoolSize", .. }));
    }

    #[test]
    fn test_from_file_and_redaction() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("storage.json");
        std::fs::write(
            &path,
            r#"{"storage": {"type": "MYSQL", "mysql": {"url": "a.db", "username": "u", "password": "hunter2"}}}"#,
        )
        .unwrap();

        let config = StorageConfig::from_file(&path).unwrap();
        assert_eq!(config.mysql.as_ref().unwrap().password, "hunter2");

        let shown = config.redacted();
        assert_eq!(shown["storage"]["mysql"]["password"], json!("***"));
        assert_eq!(shown["storage"]["type"], json!("MYSQL"));

        let missing = StorageConfig::from_file(dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(missing, ConfigError::Io { .. }));
    }
}
