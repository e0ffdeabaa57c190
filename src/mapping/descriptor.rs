//! static type descriptions consulted by adapters.

use std::fmt;

use crate::mapping::field::{Mappable, ObjectSchema};

/// integer widths; reads narrow the stored number with an `as` conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntWidth {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
}

impl IntWidth {
    /// narrow a stored integer to this width (lossy by contract)
    pub fn narrow(self, value: i64) -> i64 {
        match self {
            IntWidth::I8 => value as i8 as i64,
            IntWidth::I16 => value as i16 as i64,
            IntWidth::I32 => value as i32 as i64,
            IntWidth::I64 => value,
            IntWidth::U8 => value as u8 as i64,
            IntWidth::U16 => value as u16 as i64,
            IntWidth::U32 => value as u32 as i64,
        }
    }

    fn name(self) -> &'static str {
        match self {
            IntWidth::I8 => "i8",
            IntWidth::I16 => "i16",
            IntWidth::I32 => "i32",
            IntWidth::I64 => "i64",
            IntWidth::U8 => "u8",
            IntWidth::U16 => "u16",
            IntWidth::U32 => "u32",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FloatWidth {
    F32,
    F64,
}

impl FloatWidth {
    pub fn narrow(self, value: f64) -> f64 {
        match self {
            FloatWidth::F32 => value as f32 as f64,
            FloatWidth::F64 => value,
        }
    }
}

/// flavour of a growable collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionKind {
    List,
    Set,
}

/// a nested struct type; the schema is resolved lazily so self-referential
/// types do not recurse while their descriptor is built
#[derive(Clone, Copy)]
pub struct ObjectType {
    pub name: &'static str,
    schema: fn() -> ObjectSchema,
}

impl ObjectType {
    pub fn new(name: &'static str, schema: fn() -> ObjectSchema) -> Self {
        Self { name, schema }
    }

    pub fn schema(&self) -> ObjectSchema {
        (self.schema)()
    }
}

impl fmt::Debug for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectType").field("name", &self.name).finish()
    }
}

impl PartialEq for ObjectType {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for ObjectType {}

/// What the mapper knows about a field's declared type.
///
/// This stands in for the declared field type that adapters inspect in
/// `can_handle`: adapters are selected by descriptor, values are carried
/// separately as [`Datum`](crate::mapping::Datum).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeDescriptor {
    Bool,
    Int(IntWidth),
    Float(FloatWidth),
    Str,
    ObjectId,
    /// nullable wrapper; the mapper unwraps it before adapter lookup
    Optional(Box<TypeDescriptor>),
    /// fixed-size array
    Array(Box<TypeDescriptor>),
    Collection(CollectionKind, Box<TypeDescriptor>),
    /// string-keyed map
    Map(Box<TypeDescriptor>),
    Object(ObjectType),
    /// opaque domain type, only storable through a dedicated adapter
    Domain(&'static str),
}

impl TypeDescriptor {
    pub fn object<T: Mappable>() -> Self {
        TypeDescriptor::Object(ObjectType::new(T::TYPE_NAME, ObjectSchema::of::<T>))
    }

    pub fn optional(inner: TypeDescriptor) -> Self {
        TypeDescriptor::Optional(Box::new(inner))
    }

    pub fn list(element: TypeDescriptor) -> Self {
        TypeDescriptor::Collection(CollectionKind::List, Box::new(element))
    }

    pub fn set(element: TypeDescriptor) -> Self {
        TypeDescriptor::Collection(CollectionKind::Set, Box::new(element))
    }

    pub fn array(element: TypeDescriptor) -> Self {
        TypeDescriptor::Array(Box::new(element))
    }

    pub fn map(value: TypeDescriptor) -> Self {
        TypeDescriptor::Map(Box::new(value))
    }

    pub fn is_optional(&self) -> bool {
        matches!(self, TypeDescriptor::Optional(_))
    }

    /// name used in error messages and for domain/object adapter matching
    pub fn type_name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDescriptor::Bool => write!(f, "bool"),
            TypeDescriptor::Int(width) => write!(f, "{}", width.name()),
            TypeDescriptor::Float(FloatWidth::F32) => write!(f, "f32"),
            TypeDescriptor::Float(FloatWidth::F64) => write!(f, "f64"),
            TypeDescriptor::Str => write!(f, "String"),
            TypeDescriptor::ObjectId => write!(f, "ObjectId"),
            TypeDescriptor::Optional(inner) => write!(f, "Option<{}>", inner),
            TypeDescriptor::Array(inner) => write!(f, "[{}]", inner),
            TypeDescriptor::Collection(CollectionKind::List, inner) => write!(f, "List<{}>", inner),
            TypeDescriptor::Collection(CollectionKind::Set, inner) => write!(f, "Set<{}>", inner),
            TypeDescriptor::Map(inner) => write!(f, "Map<String, {}>", inner),
            TypeDescriptor::Object(object) => write!(f, "{}", object.name),
            TypeDescriptor::Domain(name) => write!(f, "{}", name),
        }
    }
}
