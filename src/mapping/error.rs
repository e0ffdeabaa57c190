//! mapping error types

use serde_json::Value;
use thiserror::Error;

use crate::mapping::MAX_DEPTH;

/// errors raised while converting between entities and wire documents
#[derive(Debug, Error)]
pub enum MappingError {
    /// the same object was reached again while it was still being written
    #[error("circular reference detected for type {type_name}")]
    CycleDetected { type_name: &'static str },

    /// nesting went past the depth ceiling
    #[error("maximum serialization depth exceeded: {max}")]
    DepthExceeded { max: usize },

    /// no registered adapter claims the type
    #[error("no type adapter found for type: {type_name}")]
    NoAdapter { type_name: String },

    /// the value had a different shape than the descriptor expected
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: &'static str },

    /// a required (non-optional) field was absent
    #[error("missing required field '{field}' of type {expected}")]
    MissingField { field: String, expected: String },

    #[error("invalid object id: {0}")]
    InvalidObjectId(String),

    /// fixed-size array read with the wrong number of elements
    #[error("array length mismatch: expected {expected}, found {found}")]
    LengthMismatch { expected: usize, found: usize },

    #[error("cannot store non-finite number {0}")]
    NonFiniteNumber(f64),

    /// the root value did not serialize to a document
    #[error("root entity {type_name} must serialize to a document")]
    RootNotDocument { type_name: String },

    /// a domain adapter rejected the value
    #[error("invalid {type_name} value: {reason}")]
    InvalidValue { type_name: &'static str, reason: String },

    /// failure inside a named field, wrapping the underlying cause
    #[error("failed to map field '{field}': {source}")]
    Field {
        field: String,
        #[source]
        source: Box<MappingError>,
    },
}

impl MappingError {
    pub(crate) fn type_mismatch(expected: impl Into<String>, found: &Value) -> Self {
        MappingError::TypeMismatch {
            expected: expected.into(),
            found: json_kind(found),
        }
    }

    pub(crate) fn depth_exceeded() -> Self {
        MappingError::DepthExceeded { max: MAX_DEPTH }
    }

    pub(crate) fn in_field(self, field: &str) -> Self {
        MappingError::Field {
            field: field.to_string(),
            source: Box::new(self),
        }
    }

    /// the innermost error, looking through field context wrappers
    pub fn root_cause(&self) -> &MappingError {
        match self {
            MappingError::Field { source, .. } => source.root_cause(),
            other => other,
        }
    }

    pub fn is_cycle(&self) -> bool {
        matches!(self.root_cause(), MappingError::CycleDetected { .. })
    }

    pub fn is_depth_exceeded(&self) -> bool {
        matches!(self.root_cause(), MappingError::DepthExceeded { .. })
    }

    pub fn is_missing_adapter(&self) -> bool {
        matches!(self.root_cause(), MappingError::NoAdapter { .. })
    }
}

/// short name of a JSON value's kind, for error messages
pub fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "document",
    }
}

/// result type alias for mapping operations
pub type MappingResult<T> = Result<T, MappingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_cause_looks_through_field_context() {
        let err = MappingError::depth_exceeded().in_field("next").in_field("root");
        assert!(err.is_depth_exceeded());
        assert!(!err.is_cycle());
        assert!(err.to_string().contains("root"));
    }

    #[test]
    fn test_type_mismatch_names_found_kind() {
        let err = MappingError::type_mismatch("string", &Value::Bool(true));
        assert_eq!(err.to_string(), "type mismatch: expected string, found boolean");
    }
}
