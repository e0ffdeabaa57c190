//! string, number and boolean adapters

use serde_json::{Number, Value};

use crate::mapping::{
    Datum, DeserializationContext, MappingError, MappingResult, SerializationContext, TypeAdapter,
    TypeDescriptor,
};

pub struct StringAdapter;

impl TypeAdapter for StringAdapter {
    fn name(&self) -> &'static str {
        "string"
    }

    fn can_handle(&self, ty: &TypeDescriptor) -> bool {
        matches!(ty, TypeDescriptor::Str)
    }

    fn serialize(&self, value: &Datum, _ty: &TypeDescriptor, _ctx: &mut SerializationContext<'_>) -> MappingResult<Value> {
        match value {
            Datum::Str(s) => Ok(Value::String(s.clone())),
            other => Err(other.mismatch("string")),
        }
    }

    fn deserialize(&self, value: &Value, _ty: &TypeDescriptor, _ctx: &mut DeserializationContext<'_>) -> MappingResult<Datum> {
        match value {
            Value::String(s) => Ok(Datum::Str(s.clone())),
            other => Err(MappingError::type_mismatch("string", other)),
        }
    }
}

/// Integers and floats of every width.
///
/// Reads narrow the stored number to the declared width with `as`
/// conversions, so a stored 2^32 + 1 read as i32 yields 1.
pub struct NumberAdapter;

impl TypeAdapter for NumberAdapter {
    fn name(&self) -> &'static str {
        "number"
    }

    fn can_handle(&self, ty: &TypeDescriptor) -> bool {
        matches!(ty, TypeDescriptor::Int(_) | TypeDescriptor::Float(_))
    }

    fn serialize(&self, value: &Datum, _ty: &TypeDescriptor, _ctx: &mut SerializationContext<'_>) -> MappingResult<Value> {
        match value {
            Datum::Int(v) => Ok(Value::from(*v)),
            Datum::Float(v) => Number::from_f64(*v)
                .map(Value::Number)
                .ok_or(MappingError::NonFiniteNumber(*v)),
            other => Err(other.mismatch("number")),
        }
    }

    fn deserialize(&self, value: &Value, ty: &TypeDescriptor, _ctx: &mut DeserializationContext<'_>) -> MappingResult<Datum> {
        let number = match value {
            Value::Number(n) => n,
            other => return Err(MappingError::type_mismatch(ty.type_name(), other)),
        };

        match ty {
            TypeDescriptor::Int(width) => {
                let raw = match number.as_i64() {
                    Some(v) => v,
                    None => match number.as_u64() {
                        Some(v) => v as i64,
                        None => number.as_f64().unwrap_or_default() as i64,
                    },
                };
                Ok(Datum::Int(width.narrow(raw)))
            }
            TypeDescriptor::Float(width) => {
                Ok(Datum::Float(width.narrow(number.as_f64().unwrap_or_default())))
            }
            other => Err(MappingError::type_mismatch(other.type_name(), value)),
        }
    }
}

pub struct BooleanAdapter;

impl TypeAdapter for BooleanAdapter {
    fn name(&self) -> &'static str {
        "boolean"
    }

    fn can_handle(&self, ty: &TypeDescriptor) -> bool {
        matches!(ty, TypeDescriptor::Bool)
    }

    fn serialize(&self, value: &Datum, _ty: &TypeDescriptor, _ctx: &mut SerializationContext<'_>) -> MappingResult<Value> {
        match value {
            Datum::Bool(b) => Ok(Value::Bool(*b)),
            other => Err(other.mismatch("boolean")),
        }
    }

    fn deserialize(&self, value: &Value, _ty: &TypeDescriptor, _ctx: &mut DeserializationContext<'_>) -> MappingResult<Datum> {
        match value {
            Value::Bool(b) => Ok(Datum::Bool(*b)),
            other => Err(MappingError::type_mismatch("boolean", other)),
        }
    }
}
