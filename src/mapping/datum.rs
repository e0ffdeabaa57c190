//! runtime values handed between entities and adapters.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::entity::ObjectId;
use crate::mapping::error::{MappingError, MappingResult};
use crate::mapping::field::{Field, Mappable, ObjectSchema};

/// A runtime value as seen by the mapper.
#[derive(Debug, Clone)]
pub enum Datum {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    ObjectId(ObjectId),
    List(Vec<Datum>),
    Map(BTreeMap<String, Datum>),
    Object(ObjectRef),
    Domain(DomainValue),
}

impl Datum {
    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }

    /// short kind name, for error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Datum::Null => "null",
            Datum::Bool(_) => "boolean",
            Datum::Int(_) => "integer",
            Datum::Float(_) => "float",
            Datum::Str(_) => "string",
            Datum::ObjectId(_) => "object id",
            Datum::List(_) => "list",
            Datum::Map(_) => "map",
            Datum::Object(_) => "object",
            Datum::Domain(_) => "domain value",
        }
    }

    pub(crate) fn mismatch(&self, expected: impl Into<String>) -> MappingError {
        MappingError::TypeMismatch {
            expected: expected.into(),
            found: self.kind(),
        }
    }
}

/// Something that can present itself as a struct record.
///
/// Implemented for owned values, shared `Arc<RwLock<T>>` nodes and records
/// read back from storage.
pub trait ObjectSource: Send + Sync {
    fn schema(&self) -> ObjectSchema;
    fn record(&self) -> Record;
}

struct Owned<T>(T);

impl<T: Mappable> ObjectSource for Owned<T> {
    fn schema(&self) -> ObjectSchema {
        ObjectSchema::of::<T>()
    }

    fn record(&self) -> Record {
        self.0.to_record()
    }
}

struct Shared<T>(Arc<RwLock<T>>);

impl<T: Mappable> ObjectSource for Shared<T> {
    fn schema(&self) -> ObjectSchema {
        ObjectSchema::of::<T>()
    }

    fn record(&self) -> Record {
        self.0.read().to_record()
    }
}

struct Detached {
    schema: ObjectSchema,
    record: Record,
}

impl ObjectSource for Detached {
    fn schema(&self) -> ObjectSchema {
        self.schema.clone()
    }

    fn record(&self) -> Record {
        self.record.clone()
    }
}

/// A reference to a nested object, with a stable identity used for cycle
/// detection.
///
/// Two refs share an identity only when they point at the same allocation:
/// cloning an owned value produces a new identity, while every ref built from
/// the same `Arc<RwLock<T>>` shares one.
#[derive(Clone)]
pub struct ObjectRef {
    identity: usize,
    source: Arc<dyn ObjectSource>,
}

impl ObjectRef {
    pub fn owned<T: Mappable>(value: T) -> Self {
        let source: Arc<dyn ObjectSource> = Arc::new(Owned(value));
        let identity = Arc::as_ptr(&source) as *const () as usize;
        Self { identity, source }
    }

    pub fn shared<T: Mappable>(cell: &Arc<RwLock<T>>) -> Self {
        Self {
            identity: Arc::as_ptr(cell) as *const () as usize,
            source: Arc::new(Shared(Arc::clone(cell))),
        }
    }

    pub(crate) fn detached(schema: ObjectSchema, record: Record) -> Self {
        let source: Arc<dyn ObjectSource> = Arc::new(Detached { schema, record });
        let identity = Arc::as_ptr(&source) as *const () as usize;
        Self { identity, source }
    }

    pub fn identity(&self) -> usize {
        self.identity
    }

    pub fn schema(&self) -> ObjectSchema {
        self.source.schema()
    }

    pub fn record(&self) -> Record {
        self.source.record()
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectRef")
            .field("type", &self.source.schema().name)
            .field("identity", &format_args!("{:#x}", self.identity))
            .finish()
    }
}

/// An opaque domain value carried through the mapper untouched; only the
/// adapter registered for `type_name` knows how to look inside.
#[derive(Clone)]
pub struct DomainValue {
    type_name: &'static str,
    value: Arc<dyn Any + Send + Sync>,
}

impl DomainValue {
    pub fn new<T: Any + Send + Sync>(type_name: &'static str, value: T) -> Self {
        Self {
            type_name,
            value: Arc::new(value),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }
}

impl fmt::Debug for DomainValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DomainValue({})", self.type_name)
    }
}

/// Field values of one struct, keyed by field name.
#[derive(Debug, Clone, Default)]
pub struct Record {
    values: BTreeMap<String, Datum>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// builder-style insert of a typed field value
    pub fn with<F: Field>(mut self, name: &str, value: &F) -> Self {
        self.values.insert(name.to_string(), value.to_datum());
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, datum: Datum) {
        self.values.insert(name.into(), datum);
    }

    pub fn get(&self, name: &str) -> Option<&Datum> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Remove and convert a field.
    ///
    /// A missing or null field is only acceptable for types that accept null
    /// (`Option<T>`); anything else is a `MissingField` error.
    pub fn take<F: Field>(&mut self, name: &str) -> MappingResult<F> {
        match self.values.remove(name) {
            Some(datum) if !datum.is_null() => F::from_datum(datum).map_err(|e| e.in_field(name)),
            _ => F::from_datum(Datum::Null).map_err(|_| MappingError::MissingField {
                field: name.to_string(),
                expected: F::descriptor().type_name(),
            }),
        }
    }

    /// like [`take`](Self::take) but missing or null falls back to `Default`
    pub fn take_or_default<F: Field + Default>(&mut self, name: &str) -> MappingResult<F> {
        match self.values.remove(name) {
            Some(datum) if !datum.is_null() => F::from_datum(datum).map_err(|e| e.in_field(name)),
            _ => Ok(F::default()),
        }
    }

    pub fn into_values(self) -> BTreeMap<String, Datum> {
        self.values
    }
}
