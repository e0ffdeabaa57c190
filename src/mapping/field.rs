//! the `Field` and `Mappable` contracts that replace runtime reflection.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

use crate::entity::ObjectId;
use crate::mapping::datum::{Datum, ObjectRef, Record};
use crate::mapping::descriptor::{FloatWidth, IntWidth, TypeDescriptor};
use crate::mapping::error::{MappingError, MappingResult};

/// A value that can be stored as a document field.
pub trait Field: Sized {
    /// static description of the declared type
    fn descriptor() -> TypeDescriptor;

    fn to_datum(&self) -> Datum;

    fn from_datum(datum: Datum) -> MappingResult<Self>;
}

/// A struct type mapped field by field.
pub trait Mappable: Send + Sync + Sized + 'static {
    const TYPE_NAME: &'static str;

    /// declared fields, in write order
    fn fields() -> Vec<FieldDescriptor>;

    fn to_record(&self) -> Record;

    fn from_record(record: Record) -> MappingResult<Self>;
}

/// one declared field of a [`Mappable`] type
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub ty: TypeDescriptor,
    /// transient fields are neither written nor read
    pub excluded: bool,
}

impl FieldDescriptor {
    pub fn of<F: Field>(name: &'static str) -> Self {
        Self {
            name,
            ty: F::descriptor(),
            excluded: false,
        }
    }

    pub fn excluded(mut self) -> Self {
        self.excluded = true;
        self
    }
}

/// the field layout of a [`Mappable`] type
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectSchema {
    pub name: &'static str,
    pub fields: Vec<FieldDescriptor>,
}

impl ObjectSchema {
    pub fn of<T: Mappable>() -> Self {
        Self {
            name: T::TYPE_NAME,
            fields: T::fields(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// read a nested struct back out of an object datum
pub fn object_from_datum<T: Mappable>(datum: Datum) -> MappingResult<T> {
    match datum {
        Datum::Object(object) => T::from_record(object.record()),
        other => Err(other.mismatch(T::TYPE_NAME)),
    }
}

// ==================== Scalars ====================

impl Field for bool {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::Bool
    }

    fn to_datum(&self) -> Datum {
        Datum::Bool(*self)
    }

    fn from_datum(datum: Datum) -> MappingResult<Self> {
        match datum {
            Datum::Bool(b) => Ok(b),
            other => Err(other.mismatch("bool")),
        }
    }
}

macro_rules! int_field {
    ($($ty:ty => $width:ident),* $(,)?) => {$(
        impl Field for $ty {
            fn descriptor() -> TypeDescriptor {
                TypeDescriptor::Int(IntWidth::$width)
            }

            fn to_datum(&self) -> Datum {
                Datum::Int(*self as i64)
            }

            fn from_datum(datum: Datum) -> MappingResult<Self> {
                match datum {
                    Datum::Int(v) => Ok(v as $ty),
                    Datum::Float(v) => Ok(v as $ty),
                    other => Err(other.mismatch(stringify!($ty))),
                }
            }
        }
    )*};
}

int_field!(i8 => I8, i16 => I16, i32 => I32, i64 => I64, u8 => U8, u16 => U16, u32 => U32);

macro_rules! float_field {
    ($($ty:ty => $width:ident),* $(,)?) => {$(
        impl Field for $ty {
            fn descriptor() -> TypeDescriptor {
                TypeDescriptor::Float(FloatWidth::$width)
            }

            fn to_datum(&self) -> Datum {
                Datum::Float(*self as f64)
            }

            fn from_datum(datum: Datum) -> MappingResult<Self> {
                match datum {
                    Datum::Float(v) => Ok(v as $ty),
                    Datum::Int(v) => Ok(v as $ty),
                    other => Err(other.mismatch(stringify!($ty))),
                }
            }
        }
    )*};
}

float_field!(f32 => F32, f64 => F64);

impl Field for String {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::Str
    }

    fn to_datum(&self) -> Datum {
        Datum::Str(self.clone())
    }

    fn from_datum(datum: Datum) -> MappingResult<Self> {
        match datum {
            Datum::Str(s) => Ok(s),
            other => Err(other.mismatch("String")),
        }
    }
}

impl Field for ObjectId {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::ObjectId
    }

    fn to_datum(&self) -> Datum {
        Datum::ObjectId(*self)
    }

    fn from_datum(datum: Datum) -> MappingResult<Self> {
        match datum {
            Datum::ObjectId(id) => Ok(id),
            Datum::Str(s) => s.parse(),
            other => Err(other.mismatch("ObjectId")),
        }
    }
}

/// uuids are stored as their hyphenated string form
impl Field for Uuid {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::Str
    }

    fn to_datum(&self) -> Datum {
        Datum::Str(self.to_string())
    }

    fn from_datum(datum: Datum) -> MappingResult<Self> {
        match datum {
            Datum::Str(s) => Uuid::parse_str(&s).map_err(|e| MappingError::InvalidValue {
                type_name: "Uuid",
                reason: e.to_string(),
            }),
            other => Err(other.mismatch("Uuid")),
        }
    }
}

// ==================== Wrappers and containers ====================

impl<T: Field> Field for Option<T> {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::optional(T::descriptor())
    }

    fn to_datum(&self) -> Datum {
        match self {
            Some(value) => value.to_datum(),
            None => Datum::Null,
        }
    }

    fn from_datum(datum: Datum) -> MappingResult<Self> {
        match datum {
            Datum::Null => Ok(None),
            other => T::from_datum(other).map(Some),
        }
    }
}

fn items_from_datum<T: Field>(datum: Datum, expected: &str) -> MappingResult<Vec<T>> {
    match datum {
        Datum::List(items) => items.into_iter().map(T::from_datum).collect(),
        other => Err(other.mismatch(expected)),
    }
}

impl<T: Field> Field for Vec<T> {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::list(T::descriptor())
    }

    fn to_datum(&self) -> Datum {
        Datum::List(self.iter().map(Field::to_datum).collect())
    }

    fn from_datum(datum: Datum) -> MappingResult<Self> {
        items_from_datum(datum, "list")
    }
}

impl<T: Field + Eq + Hash> Field for HashSet<T> {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::set(T::descriptor())
    }

    fn to_datum(&self) -> Datum {
        Datum::List(self.iter().map(Field::to_datum).collect())
    }

    fn from_datum(datum: Datum) -> MappingResult<Self> {
        Ok(items_from_datum::<T>(datum, "set")?.into_iter().collect())
    }
}

impl<T: Field + Ord> Field for BTreeSet<T> {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::set(T::descriptor())
    }

    fn to_datum(&self) -> Datum {
        Datum::List(self.iter().map(Field::to_datum).collect())
    }

    fn from_datum(datum: Datum) -> MappingResult<Self> {
        Ok(items_from_datum::<T>(datum, "set")?.into_iter().collect())
    }
}

impl<T: Field, const N: usize> Field for [T; N] {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::array(T::descriptor())
    }

    fn to_datum(&self) -> Datum {
        Datum::List(self.iter().map(Field::to_datum).collect())
    }

    fn from_datum(datum: Datum) -> MappingResult<Self> {
        let items = items_from_datum::<T>(datum, "array")?;
        let found = items.len();
        items
            .try_into()
            .map_err(|_| MappingError::LengthMismatch { expected: N, found })
    }
}

fn entries_from_datum<T: Field>(datum: Datum) -> MappingResult<Vec<(String, T)>> {
    match datum {
        Datum::Map(entries) => entries
            .into_iter()
            .map(|(key, value)| {
                let value = T::from_datum(value).map_err(|e| e.in_field(&key))?;
                Ok((key, value))
            })
            .collect(),
        other => Err(other.mismatch("map")),
    }
}

impl<T: Field> Field for HashMap<String, T> {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::map(T::descriptor())
    }

    fn to_datum(&self) -> Datum {
        Datum::Map(self.iter().map(|(k, v)| (k.clone(), v.to_datum())).collect())
    }

    fn from_datum(datum: Datum) -> MappingResult<Self> {
        Ok(entries_from_datum(datum)?.into_iter().collect())
    }
}

impl<T: Field> Field for BTreeMap<String, T> {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::map(T::descriptor())
    }

    fn to_datum(&self) -> Datum {
        Datum::Map(self.iter().map(|(k, v)| (k.clone(), v.to_datum())).collect())
    }

    fn from_datum(datum: Datum) -> MappingResult<Self> {
        Ok(entries_from_datum(datum)?.into_iter().collect())
    }
}

/// shared nodes keep their identity, so graphs built from them can be cyclic
impl<T: Mappable> Field for Arc<RwLock<T>> {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::object::<T>()
    }

    fn to_datum(&self) -> Datum {
        Datum::Object(ObjectRef::shared(self))
    }

    fn from_datum(datum: Datum) -> MappingResult<Self> {
        object_from_datum::<T>(datum).map(|value| Arc::new(RwLock::new(value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_array_length_checked() {
        let datum = vec![1_i32, 2, 3].to_datum();
        let ok: [i32; 3] = Field::from_datum(datum.clone()).unwrap();
        assert_eq!(ok, [1, 2, 3]);

        let err = <[i32; 2]>::from_datum(datum).unwrap_err();
        assert!(matches!(err, MappingError::LengthMismatch { expected: 2, found: 3 }));
    }

    #[test]
    fn test_descriptors() {
        assert_eq!(
            <HashMap<String, Vec<u8>>>::descriptor(),
            TypeDescriptor::map(TypeDescriptor::list(TypeDescriptor::Int(IntWidth::U8)))
        );
        assert_eq!(<BTreeSet<String>>::descriptor(), TypeDescriptor::set(TypeDescriptor::Str));
        assert!(<Option<f32>>::descriptor().is_optional());
    }

    #[test]
    fn test_map_entry_error_names_key() {
        let mut entries = BTreeMap::new();
        entries.insert("wins".to_string(), Datum::Str("many".into()));
        let err = <BTreeMap<String, i64>>::from_datum(Datum::Map(entries)).unwrap_err();
        assert!(err.to_string().contains("wins"));
    }
}
