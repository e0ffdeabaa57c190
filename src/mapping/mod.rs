//! object/document mapping.
//!
//! Entities never reach a backend directly. They are converted into a
//! backend-neutral wire document (`serde_json::Map`) by the [`DocumentMapper`],
//! which walks a runtime view of the value ([`Datum`]) guided by a static type
//! description ([`TypeDescriptor`]) and delegates every leaf or container to the
//! first [`TypeAdapter`] in the registry that claims it.
//!
//! ```text
//!   entity ──Field::to_datum──▶ Datum ──DocumentMapper──▶ serde_json::Value
//!                                           │
//!                               TypeAdapterRegistry (ordered, first match)
//!                                           │
//!        punishment · string · number · boolean · object-id · collection · map · array
//! ```
//!
//! Struct types implement [`Mappable`] and pick up [`Field`] through the
//! [`object_field!`](crate::object_field) macro:
//!
//! ```ignore
//! impl Mappable for Address {
//!     const TYPE_NAME: &'static str = "Address";
//!     fn fields() -> Vec<FieldDescriptor> {
//!         vec![FieldDescriptor::of::<String>("street"), FieldDescriptor::of::<String>("city")]
//!     }
//!     fn to_record(&self) -> Record {
//!         Record::new().with("street", &self.street).with("city", &self.city)
//!     }
//!     fn from_record(mut record: Record) -> MappingResult<Self> {
//!         Ok(Self { street: record.take("street")?, city: record.take("city")? })
//!     }
//! }
//! object_field!(Address);
//! ```

mod adapter;
pub mod adapters;
mod context;
mod datum;
mod descriptor;
mod error;
mod field;
mod mapper;

pub use adapter::{TypeAdapter, TypeAdapterRegistry};
pub use context::{DeserializationContext, SerializationContext, MAX_DEPTH};
pub use datum::{Datum, DomainValue, ObjectRef, ObjectSource, Record};
pub use descriptor::{CollectionKind, FloatWidth, IntWidth, ObjectType, TypeDescriptor};
pub use error::{json_kind, MappingError, MappingResult};
pub use field::{object_from_datum, Field, FieldDescriptor, Mappable, ObjectSchema};
pub use mapper::{Document, DocumentMapper, ID_FIELD, WIRE_ID_FIELD};

/// Implements [`Field`] for a [`Mappable`] struct so it can be nested inside
/// other entities, collections and maps.
#[macro_export]
macro_rules! object_field {
    ($ty:ty) => {
        impl $crate::mapping::Field for $ty {
            fn descriptor() -> $crate::mapping::TypeDescriptor {
                $crate::mapping::TypeDescriptor::object::<$ty>()
            }

            fn to_datum(&self) -> $crate::mapping::Datum {
                $crate::mapping::Datum::Object($crate::mapping::ObjectRef::owned(
                    ::std::clone::Clone::clone(self),
                ))
            }

            fn from_datum(datum: $crate::mapping::Datum) -> $crate::mapping::MappingResult<Self> {
                $crate::mapping::object_from_datum::<$ty>(datum)
            }
        }
    };
}
