//! object identifiers are stored as their canonical string form

use serde_json::Value;

use crate::entity::ObjectId;
use crate::mapping::{
    Datum, DeserializationContext, MappingError, MappingResult, SerializationContext, TypeAdapter,
    TypeDescriptor,
};

pub struct ObjectIdAdapter;

impl TypeAdapter for ObjectIdAdapter {
    fn name(&self) -> &'static str {
        "object-id"
    }

    fn can_handle(&self, ty: &TypeDescriptor) -> bool {
        matches!(ty, TypeDescriptor::ObjectId)
    }

    fn serialize(&self, value: &Datum, _ty: &TypeDescriptor, _ctx: &mut SerializationContext<'_>) -> MappingResult<Value> {
        match value {
            Datum::ObjectId(id) => Ok(Value::String(id.to_string())),
            other => Err(other.mismatch("ObjectId")),
        }
    }

    fn deserialize(&self, value: &Value, _ty: &TypeDescriptor, _ctx: &mut DeserializationContext<'_>) -> MappingResult<Datum> {
        match value {
            Value::String(s) => Ok(Datum::ObjectId(s.parse::<ObjectId>()?)),
            other => Err(MappingError::type_mismatch("ObjectId", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::mapping::DocumentMapper;

    #[test]
    fn test_invalid_object_id() {
        let mapper = DocumentMapper::default();
        let mut ctx = DeserializationContext::new(&mapper);
        let err = ObjectIdAdapter
            .deserialize(&json!("not-an-id"), &TypeDescriptor::ObjectId, &mut ctx)
            .unwrap_err();
        assert!(matches!(err, MappingError::InvalidObjectId(_)));
    }

    #[test]
    fn test_string_form() {
        let mapper = DocumentMapper::default();
        let id = ObjectId::new();
        let mut ctx = SerializationContext::new(&mapper);
        let value = ObjectIdAdapter
            .serialize(&Datum::ObjectId(id), &TypeDescriptor::ObjectId, &mut ctx)
            .unwrap();
        assert_eq!(value, json!(id.to_string()));
    }
}
