//! built-in type adapters, in registry order.

mod container;
mod object_id;
mod punishment;
mod scalar;

pub use container::{ArrayAdapter, CollectionAdapter, MapAdapter};
pub use object_id::ObjectIdAdapter;
pub use punishment::PunishmentAdapter;
pub use scalar::{BooleanAdapter, NumberAdapter, StringAdapter};
