//! per-call traversal state for the mapper.
//!
//! A context lives for exactly one top-level `to_document`/`from_document`
//! call. It counts nesting depth and, while writing, remembers which objects
//! are currently on the path from the root so a cycle is reported instead of
//! recursing forever.

use std::collections::HashSet;

use serde_json::Value;

use crate::mapping::datum::{Datum, ObjectRef};
use crate::mapping::descriptor::TypeDescriptor;
use crate::mapping::error::{MappingError, MappingResult};
use crate::mapping::mapper::DocumentMapper;

/// deepest nesting level a value may reach
pub const MAX_DEPTH: usize = 50;

pub struct SerializationContext<'m> {
    mapper: &'m DocumentMapper,
    depth: usize,
    visiting: HashSet<usize>,
}

impl<'m> SerializationContext<'m> {
    pub(crate) fn new(mapper: &'m DocumentMapper) -> Self {
        Self {
            mapper,
            depth: 0,
            visiting: HashSet::new(),
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// serialize a nested value one level deeper than the caller
    pub fn serialize(&mut self, value: &Datum, ty: &TypeDescriptor) -> MappingResult<Value> {
        if self.depth > MAX_DEPTH {
            return Err(MappingError::depth_exceeded());
        }
        self.depth += 1;
        let mapper = self.mapper;
        let result = mapper.serialize_value(value, ty, self);
        self.depth -= 1;
        result
    }

    pub fn is_serializing(&self, object: &ObjectRef) -> bool {
        self.visiting.contains(&object.identity())
    }

    pub(crate) fn enter(&mut self, object: &ObjectRef) -> MappingResult<()> {
        if !self.visiting.insert(object.identity()) {
            return Err(MappingError::CycleDetected {
                type_name: object.schema().name,
            });
        }
        Ok(())
    }

    pub(crate) fn leave(&mut self, object: &ObjectRef) {
        self.visiting.remove(&object.identity());
    }
}

pub struct DeserializationContext<'m> {
    mapper: &'m DocumentMapper,
    depth: usize,
}

impl<'m> DeserializationContext<'m> {
    pub(crate) fn new(mapper: &'m DocumentMapper) -> Self {
        Self { mapper, depth: 0 }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// deserialize a nested value one level deeper than the caller
    pub fn deserialize(&mut self, value: &Value, ty: &TypeDescriptor) -> MappingResult<Datum> {
        if self.depth > MAX_DEPTH {
            return Err(MappingError::depth_exceeded());
        }
        self.depth += 1;
        let mapper = self.mapper;
        let result = mapper.deserialize_value(value, ty, self);
        self.depth -= 1;
        result
    }
}
