//! sample entities shared by the unit tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::entity::{Entity, ObjectId};
use crate::mapping::{FieldDescriptor, Mappable, MappingResult, Record};
use crate::object_field;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Address {
    pub street: String,
    pub city: String,
}

impl Mappable for Address {
    const TYPE_NAME: &'static str = "Address";

    fn fields() -> Vec<FieldDescriptor> {
        vec![
            FieldDescriptor::of::<String>("street"),
            FieldDescriptor::of::<String>("city"),
        ]
    }

    fn to_record(&self) -> Record {
        Record::new().with("street", &self.street).with("city", &self.city)
    }

    fn from_record(mut record: Record) -> MappingResult<Self> {
        Ok(Self {
            street: record.take("street")?,
            city: record.take("city")?,
        })
    }
}

object_field!(Address);

#[derive(Debug, Clone, PartialEq)]
pub struct Player {
    pub id: Option<ObjectId>,
    pub name: String,
    pub level: i32,
    pub score: f64,
    pub active: bool,
    pub tags: Vec<String>,
    pub stats: BTreeMap<String, i64>,
    pub address: Option<Address>,
    /// never persisted
    pub session: Option<String>,
}

impl Player {
    pub fn new(name: &str, level: i32) -> Self {
        Self {
            id: None,
            name: name.to_string(),
            level,
            score: 0.0,
            active: true,
            tags: Vec::new(),
            stats: BTreeMap::new(),
            address: None,
            session: None,
        }
    }

    pub fn scored(name: &str, level: i32, score: f64) -> Self {
        Self {
            score,
            ..Self::new(name, level)
        }
    }
}

impl Mappable for Player {
    const TYPE_NAME: &'static str = "Player";

    fn fields() -> Vec<FieldDescriptor> {
        vec![
            FieldDescriptor::of::<Option<ObjectId>>("id"),
            FieldDescriptor::of::<String>("name"),
            FieldDescriptor::of::<i32>("level"),
            FieldDescriptor::of::<f64>("score"),
            FieldDescriptor::of::<bool>("active"),
            FieldDescriptor::of::<Vec<String>>("tags"),
            FieldDescriptor::of::<BTreeMap<String, i64>>("stats"),
            FieldDescriptor::of::<Option<Address>>("address"),
            FieldDescriptor::of::<Option<String>>("session").excluded(),
        ]
    }

    fn to_record(&self) -> Record {
        Record::new()
            .with("id", &self.id)
            .with("name", &self.name)
            .with("level", &self.level)
            .with("score", &self.score)
            .with("active", &self.active)
            .with("tags", &self.tags)
            .with("stats", &self.stats)
            .with("address", &self.address)
            .with("session", &self.session)
    }

    fn from_record(mut record: Record) -> MappingResult<Self> {
        Ok(Self {
            id: record.take("id")?,
            name: record.take("name")?,
            level: record.take("level")?,
            score: record.take_or_default("score")?,
            active: record.take_or_default("active")?,
            tags: record.take_or_default("tags")?,
            stats: record.take_or_default("stats")?,
            address: record.take("address")?,
            session: record.take("session")?,
        })
    }
}

object_field!(Player);

impl Entity for Player {
    type Id = ObjectId;

    fn id(&self) -> Option<ObjectId> {
        self.id
    }

    fn set_id(&mut self, id: ObjectId) {
        self.id = Some(id);
    }
}

/// an entity keyed by a caller-chosen string
#[derive(Debug, Clone, PartialEq)]
pub struct Clan {
    pub id: Option<String>,
    pub tag: String,
    pub members: Vec<String>,
}

impl Clan {
    pub fn new(id: &str, tag: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            tag: tag.to_string(),
            members: Vec::new(),
        }
    }
}

impl Mappable for Clan {
    const TYPE_NAME: &'static str = "Clan";

    fn fields() -> Vec<FieldDescriptor> {
        vec![
            FieldDescriptor::of::<Option<String>>("id"),
            FieldDescriptor::of::<String>("tag"),
            FieldDescriptor::of::<Vec<String>>("members"),
        ]
    }

    fn to_record(&self) -> Record {
        Record::new()
            .with("id", &self.id)
            .with("tag", &self.tag)
            .with("members", &self.members)
    }

    fn from_record(mut record: Record) -> MappingResult<Self> {
        Ok(Self {
            id: record.take("id")?,
            tag: record.take("tag")?,
            members: record.take_or_default("members")?,
        })
    }
}

object_field!(Clan);

impl Entity for Clan {
    type Id = String;

    fn id(&self) -> Option<String> {
        self.id.clone()
    }

    fn set_id(&mut self, id: String) {
        self.id = Some(id);
    }
}

/// a linked node; `Arc<RwLock<_>>` links keep identity so cycles can be built
#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub next: Option<Arc<RwLock<Node>>>,
}

impl Node {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            next: None,
        }
    }
}

impl Mappable for Node {
    const TYPE_NAME: &'static str = "Node";

    fn fields() -> Vec<FieldDescriptor> {
        vec![
            FieldDescriptor::of::<String>("name"),
            FieldDescriptor::of::<Option<Arc<RwLock<Node>>>>("next"),
        ]
    }

    fn to_record(&self) -> Record {
        Record::new().with("name", &self.name).with("next", &self.next)
    }

    fn from_record(mut record: Record) -> MappingResult<Self> {
        Ok(Self {
            name: record.take("name")?,
            next: record.take("next")?,
        })
    }
}

object_field!(Node);

/// a chain of `n` nodes, `n0 -> n1 -> ... -> n{n-1}`
pub fn chain(n: usize) -> Node {
    let mut next = None;
    for i in (1..n).rev() {
        next = Some(Arc::new(RwLock::new(Node {
            name: format!("n{i}"),
            next,
        })));
    }
    Node {
        name: "n0".to_string(),
        next,
    }
}
