//! collection, map and fixed-array adapters.
//!
//! Elements are written through the context so nesting depth and cycle
//! tracking cover container contents too.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::mapping::{
    Datum, DeserializationContext, MappingError, MappingResult, SerializationContext, TypeAdapter,
    TypeDescriptor,
};

fn write_items(items: &[Datum], element: &TypeDescriptor, ctx: &mut SerializationContext<'_>) -> MappingResult<Value> {
    items
        .iter()
        .map(|item| ctx.serialize(item, element))
        .collect::<MappingResult<Vec<_>>>()
        .map(Value::Array)
}

fn read_items(value: &Value, element: &TypeDescriptor, ctx: &mut DeserializationContext<'_>) -> MappingResult<Datum> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|item| ctx.deserialize(item, element))
            .collect::<MappingResult<Vec<_>>>()
            .map(Datum::List),
        other => Err(MappingError::type_mismatch("array", other)),
    }
}

/// lists and sets
pub struct CollectionAdapter;

impl TypeAdapter for CollectionAdapter {
    fn name(&self) -> &'static str {
        "collection"
    }

    fn can_handle(&self, ty: &TypeDescriptor) -> bool {
        matches!(ty, TypeDescriptor::Collection(..))
    }

    fn serialize(&self, value: &Datum, ty: &TypeDescriptor, ctx: &mut SerializationContext<'_>) -> MappingResult<Value> {
        match (ty, value) {
            (TypeDescriptor::Collection(_, element), Datum::List(items)) => write_items(items, element, ctx),
            (_, other) => Err(other.mismatch(ty.type_name())),
        }
    }

    fn deserialize(&self, value: &Value, ty: &TypeDescriptor, ctx: &mut DeserializationContext<'_>) -> MappingResult<Datum> {
        match ty {
            TypeDescriptor::Collection(_, element) => read_items(value, element, ctx),
            other => Err(MappingError::type_mismatch(other.type_name(), value)),
        }
    }
}

/// string-keyed maps, stored as embedded documents
pub struct MapAdapter;

impl TypeAdapter for MapAdapter {
    fn name(&self) -> &'static str {
        "map"
    }

    fn can_handle(&self, ty: &TypeDescriptor) -> bool {
        matches!(ty, TypeDescriptor::Map(_))
    }

    fn serialize(&self, value: &Datum, ty: &TypeDescriptor, ctx: &mut SerializationContext<'_>) -> MappingResult<Value> {
        let (element, entries) = match (ty, value) {
            (TypeDescriptor::Map(element), Datum::Map(entries)) => (element, entries),
            (_, other) => return Err(other.mismatch(ty.type_name())),
        };

        let mut document = Map::new();
        for (key, datum) in entries {
            let value = ctx.serialize(datum, element).map_err(|e| e.in_field(key))?;
            document.insert(key.clone(), value);
        }
        Ok(Value::Object(document))
    }

    fn deserialize(&self, value: &Value, ty: &TypeDescriptor, ctx: &mut DeserializationContext<'_>) -> MappingResult<Datum> {
        let (element, document) = match (ty, value) {
            (TypeDescriptor::Map(element), Value::Object(document)) => (element, document),
            _ => return Err(MappingError::type_mismatch(ty.type_name(), value)),
        };

        let mut entries = BTreeMap::new();
        for (key, value) in document {
            let datum = ctx.deserialize(value, element).map_err(|e| e.in_field(key))?;
            entries.insert(key.clone(), datum);
        }
        Ok(Datum::Map(entries))
    }
}

/// fixed-size arrays
pub struct ArrayAdapter;

impl TypeAdapter for ArrayAdapter {
    fn name(&self) -> &'static str {
        "array"
    }

    fn can_handle(&self, ty: &TypeDescriptor) -> bool {
        matches!(ty, TypeDescriptor::Array(_))
    }

    fn serialize(&self, value: &Datum, ty: &TypeDescriptor, ctx: &mut SerializationContext<'_>) -> MappingResult<Value> {
        match (ty, value) {
            (TypeDescriptor::Array(element), Datum::List(items)) => write_items(items, element, ctx),
            (_, other) => Err(other.mismatch(ty.type_name())),
        }
    }

    fn deserialize(&self, value: &Value, ty: &TypeDescriptor, ctx: &mut DeserializationContext<'_>) -> MappingResult<Datum> {
        match ty {
            TypeDescriptor::Array(element) => read_items(value, element, ctx),
            other => Err(MappingError::type_mismatch(other.type_name(), value)),
        }
    }
}
