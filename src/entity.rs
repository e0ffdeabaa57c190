//! entity contract and identifiers.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use ulid::Ulid;
use uuid::Uuid;

use crate::mapping::{Field, MappingError};

/// A storable entity.
///
/// The identifier lives in the field named `id`, which the mapper stores as
/// `_id`. Entities saved without an identifier get one from
/// [`EntityId::generate`] when the identifier type supports it.
pub trait Entity: Field + Clone + Send + Sync + 'static {
    type Id: EntityId;

    fn id(&self) -> Option<Self::Id>;

    fn set_id(&mut self, id: Self::Id);
}

/// An identifier that can be turned into a storage key.
pub trait EntityId: Clone + fmt::Debug + Send + Sync + 'static {
    /// canonical key string used by the backends
    fn to_key(&self) -> String;

    /// a fresh identifier, for identifier types that can be generated
    fn generate() -> Option<Self> {
        None
    }
}

impl EntityId for String {
    fn to_key(&self) -> String {
        self.clone()
    }

    fn generate() -> Option<Self> {
        Some(ObjectId::new().to_string())
    }
}

impl EntityId for Uuid {
    fn to_key(&self) -> String {
        self.to_string()
    }

    fn generate() -> Option<Self> {
        Some(Uuid::new_v4())
    }
}

impl EntityId for i64 {
    fn to_key(&self) -> String {
        self.to_string()
    }
}

impl EntityId for i32 {
    fn to_key(&self) -> String {
        self.to_string()
    }
}

/// A generated document identifier.
///
/// Backed by a ULID, so identifiers sort by creation time and render as a
/// 26 character Crockford base32 string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(Ulid);

impl ObjectId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    /// creation time embedded in the identifier
    pub fn timestamp(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.0.timestamp_ms() as i64)
            .single()
            .unwrap_or_default()
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ObjectId {
    type Err = MappingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s)
            .map(ObjectId)
            .map_err(|_| MappingError::InvalidObjectId(s.to_string()))
    }
}

impl EntityId for ObjectId {
    fn to_key(&self) -> String {
        self.to_string()
    }

    fn generate() -> Option<Self> {
        Some(ObjectId::new())
    }
}

impl From<ObjectId> for Value {
    fn from(id: ObjectId) -> Self {
        Value::String(id.to_string())
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
