//! The document mapper: entity <-> wire document.
//!
//! Writing walks the entity's fields in declaration order. Excluded fields
//! and null values are skipped, and the identifier field `id` is stored
//! as `_id`. Every value is written by the first adapter that claims its
//! descriptor; nested structs without a dedicated adapter are written field
//! by field. Reading mirrors this exactly.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::mapping::adapter::TypeAdapterRegistry;
use crate::mapping::context::{DeserializationContext, SerializationContext};
use crate::mapping::datum::{Datum, ObjectRef, Record};
use crate::mapping::descriptor::TypeDescriptor;
use crate::mapping::error::{MappingError, MappingResult};
use crate::mapping::field::{Field, ObjectSchema};

/// a wire document as handed to the backends
pub type Document = Map<String, Value>;

/// in-memory name of the identifier field
pub const ID_FIELD: &str = "id";
/// wire name of the identifier field
pub const WIRE_ID_FIELD: &str = "_id";

pub struct DocumentMapper {
    registry: Arc<TypeAdapterRegistry>,
}

impl DocumentMapper {
    pub fn new(registry: Arc<TypeAdapterRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<TypeAdapterRegistry> {
        &self.registry
    }

    /// the wire name for an in-memory field name
    pub fn wire_name(field: &str) -> &str {
        if field == ID_FIELD {
            WIRE_ID_FIELD
        } else {
            field
        }
    }

    pub fn to_document<T: Field>(&self, entity: &T) -> MappingResult<Document> {
        let ty = T::descriptor();
        let mut ctx = SerializationContext::new(self);
        match self.serialize_value(&entity.to_datum(), &ty, &mut ctx)? {
            Value::Object(document) => Ok(document),
            _ => Err(MappingError::RootNotDocument {
                type_name: ty.type_name(),
            }),
        }
    }

    pub fn from_document<T: Field>(&self, document: Document) -> MappingResult<T> {
        let mut ctx = DeserializationContext::new(self);
        let datum = self.deserialize_value(&Value::Object(document), &T::descriptor(), &mut ctx)?;
        T::from_datum(datum)
    }

    /// Write one value at the context's current depth.
    ///
    /// Adapters reach this through [`SerializationContext::serialize`], which
    /// accounts for depth before delegating here.
    pub fn serialize_value(
        &self,
        value: &Datum,
        ty: &TypeDescriptor,
        ctx: &mut SerializationContext<'_>,
    ) -> MappingResult<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        if let TypeDescriptor::Optional(inner) = ty {
            return self.serialize_value(value, inner, ctx);
        }
        if let Some(adapter) = self.registry.find_adapter(ty) {
            return adapter.serialize(value, ty, ctx);
        }

        match (ty, value) {
            (TypeDescriptor::Object(_), Datum::Object(object)) => {
                Ok(Value::Object(self.write_object(object, ctx)?))
            }
            (TypeDescriptor::Object(object_type), other) => Err(other.mismatch(object_type.name)),
            _ => Err(MappingError::NoAdapter {
                type_name: ty.type_name(),
            }),
        }
    }

    pub fn deserialize_value(
        &self,
        value: &Value,
        ty: &TypeDescriptor,
        ctx: &mut DeserializationContext<'_>,
    ) -> MappingResult<Datum> {
        if value.is_null() {
            return Ok(Datum::Null);
        }
        if let TypeDescriptor::Optional(inner) = ty {
            return self.deserialize_value(value, inner, ctx);
        }
        if let Some(adapter) = self.registry.find_adapter(ty) {
            return adapter.deserialize(value, ty, ctx);
        }

        match ty {
            TypeDescriptor::Object(object_type) => {
                let schema = object_type.schema();
                let record = self.read_object(&schema, value, ctx)?;
                Ok(Datum::Object(ObjectRef::detached(schema, record)))
            }
            _ => Err(MappingError::NoAdapter {
                type_name: ty.type_name(),
            }),
        }
    }

    fn write_object(&self, object: &ObjectRef, ctx: &mut SerializationContext<'_>) -> MappingResult<Document> {
        ctx.enter(object)?;
        let result = self.write_fields(object, ctx);
        ctx.leave(object);
        result
    }

    fn write_fields(&self, object: &ObjectRef, ctx: &mut SerializationContext<'_>) -> MappingResult<Document> {
        let schema = object.schema();
        let record = object.record();
        let mut document = Document::new();

        for field in schema.fields.iter().filter(|f| !f.excluded) {
            let datum = match record.get(field.name) {
                Some(datum) if !datum.is_null() => datum,
                _ => continue,
            };
            let value = ctx
                .serialize(datum, &field.ty)
                .map_err(|e| e.in_field(field.name))?;
            document.insert(Self::wire_name(field.name).to_string(), value);
        }

        Ok(document)
    }

    fn read_object(
        &self,
        schema: &ObjectSchema,
        value: &Value,
        ctx: &mut DeserializationContext<'_>,
    ) -> MappingResult<Record> {
        let document = value
            .as_object()
            .ok_or_else(|| MappingError::type_mismatch(schema.name, value))?;
        let mut record = Record::new();

        for field in schema.fields.iter().filter(|f| !f.excluded) {
            let value = match document.get(Self::wire_name(field.name)) {
                Some(value) if !value.is_null() => value,
                _ => continue,
            };
            let datum = ctx
                .deserialize(value, &field.ty)
                .map_err(|e| e.in_field(field.name))?;
            record.insert(field.name, datum);
        }

        Ok(record)
    }
}

impl Default for DocumentMapper {
    fn default() -> Self {
        Self::new(Arc::new(TypeAdapterRegistry::new()))
    }
}
