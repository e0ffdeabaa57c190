//! the type adapter contract and the ordered registry.

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use crate::mapping::adapters::{
    ArrayAdapter, BooleanAdapter, CollectionAdapter, MapAdapter, NumberAdapter, ObjectIdAdapter,
    PunishmentAdapter, StringAdapter,
};
use crate::mapping::context::{DeserializationContext, SerializationContext};
use crate::mapping::datum::Datum;
use crate::mapping::descriptor::TypeDescriptor;
use crate::mapping::error::MappingResult;

/// Converts one family of types between runtime values and wire values.
///
/// Adapters that contain nested values (collections, maps) must recurse
/// through the context, never through the mapper directly, so depth and
/// cycle tracking stay intact.
pub trait TypeAdapter: Send + Sync {
    /// short name used in logs and diagnostics
    fn name(&self) -> &'static str;

    fn can_handle(&self, ty: &TypeDescriptor) -> bool;

    fn serialize(
        &self,
        value: &Datum,
        ty: &TypeDescriptor,
        ctx: &mut SerializationContext<'_>,
    ) -> MappingResult<Value>;

    fn deserialize(
        &self,
        value: &Value,
        ty: &TypeDescriptor,
        ctx: &mut DeserializationContext<'_>,
    ) -> MappingResult<Datum>;
}

/// Ordered adapter list; lookup returns the first adapter that claims a type.
///
/// Built-in order: punishment, string, number, boolean, object-id,
/// collection, map, array. User adapters are appended and therefore never
/// shadow a built-in.
pub struct TypeAdapterRegistry {
    adapters: RwLock<Vec<Arc<dyn TypeAdapter>>>,
}

impl TypeAdapterRegistry {
    /// registry with the built-in adapters
    pub fn new() -> Self {
        let registry = Self::empty();
        registry.register(PunishmentAdapter);
        registry.register(StringAdapter);
        registry.register(NumberAdapter);
        registry.register(BooleanAdapter);
        registry.register(ObjectIdAdapter);
        registry.register(CollectionAdapter);
        registry.register(MapAdapter);
        registry.register(ArrayAdapter);
        registry
    }

    pub fn empty() -> Self {
        Self {
            adapters: RwLock::new(Vec::new()),
        }
    }

    /// append an adapter after every adapter already registered
    pub fn register<A: TypeAdapter + 'static>(&self, adapter: A) {
        self.register_shared(Arc::new(adapter));
    }

    pub fn register_shared(&self, adapter: Arc<dyn TypeAdapter>) {
        self.adapters.write().push(adapter);
    }

    pub fn find_adapter(&self, ty: &TypeDescriptor) -> Option<Arc<dyn TypeAdapter>> {
        self.adapters
            .read()
            .iter()
            .find(|adapter| adapter.can_handle(ty))
            .cloned()
    }

    pub fn adapter_names(&self) -> Vec<&'static str> {
        self.adapters.read().iter().map(|a| a.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.adapters.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.read().is_empty()
    }
}

impl Default for TypeAdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{IntWidth, MappingError};

    struct ShoutingStrings;

    impl TypeAdapter for ShoutingStrings {
        fn name(&self) -> &'static str {
            "shouting"
        }

        fn can_handle(&self, ty: &TypeDescriptor) -> bool {
            matches!(ty, TypeDescriptor::Str | TypeDescriptor::Domain("Money"))
        }

        fn serialize(
            &self,
            value: &Datum,
            _ty: &TypeDescriptor,
            _ctx: &mut SerializationContext<'_>,
        ) -> MappingResult<Value> {
            match value {
                Datum::Str(s) => Ok(Value::String(s.to_uppercase())),
                other => Err(other.mismatch("string")),
            }
        }

        fn deserialize(
            &self,
            value: &Value,
            _ty: &TypeDescriptor,
            _ctx: &mut DeserializationContext<'_>,
        ) -> MappingResult<Datum> {
            match value {
                Value::String(s) => Ok(Datum::Str(s.to_lowercase())),
                other => Err(MappingError::type_mismatch("string", other)),
            }
        }
    }

    #[test]
    fn test_builtin_order() {
        let registry = TypeAdapterRegistry::new();
        assert_eq!(
            registry.adapter_names(),
            vec!["punishment", "string", "number", "boolean", "object-id", "collection", "map", "array"]
        );
    }

    #[test]
    fn test_first_match_wins() {
        let registry = TypeAdapterRegistry::new();
        registry.register(ShoutingStrings);

        let adapter = registry.find_adapter(&TypeDescriptor::Str).unwrap();
        assert_eq!(adapter.name(), "string");

        // only the appended adapter claims the domain type
        let adapter = registry.find_adapter(&TypeDescriptor::Domain("Money")).unwrap();
        assert_eq!(adapter.name(), "shouting");
    }

    #[test]
    fn test_unclaimed_types() {
        let registry = TypeAdapterRegistry::new();
        assert!(registry.find_adapter(&TypeDescriptor::Domain("Money")).is_none());
        assert!(registry
            .find_adapter(&TypeDescriptor::optional(TypeDescriptor::Int(IntWidth::I32)))
            .is_none());
        assert!(TypeAdapterRegistry::empty().find_adapter(&TypeDescriptor::Bool).is_none());
    }
}
