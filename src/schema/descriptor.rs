//! Type descriptors and the walker that produces them
//!
//! A descriptor is a language-neutral tree: primitive, array, map (string
//! keys) or record. Indirection wrappers (`&T`, `Box<T>`, `Arc<T>`,
//! `Option<T>`, ...) describe the shape of the value they point to, so a
//! boxed payload and a plain one produce the same tree.

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, LinkedList, VecDeque};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use super::SchemaError;

/// A primitive leaf of a descriptor tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    /// A signed or unsigned integer of the given bit width.
    Integer { bits: u8 },
    Boolean,
    /// Any other primitive, carried by its literal name (`string`, `float`, ...).
    Named(&'static str),
}

impl Primitive {
    /// The literal (non-canonical) name of this primitive.
    pub fn literal_name(&self) -> Cow<'static, str> {
        match self {
            Primitive::Integer { bits } => Cow::Owned(format!("int{}", bits)),
            Primitive::Boolean => Cow::Borrowed("bool"),
            Primitive::Named(name) => Cow::Borrowed(name),
        }
    }
}

/// Shape of a payload type or of one of its fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeDescriptor {
    Primitive(Primitive),
    Array(Box<TypeDescriptor>),
    /// String-keyed map; the boxed descriptor is the value type.
    Map(Box<TypeDescriptor>),
    Record(RecordDescriptor),
}

impl TypeDescriptor {
    pub fn array(element: TypeDescriptor) -> Self {
        TypeDescriptor::Array(Box::new(element))
    }

    pub fn map(values: TypeDescriptor) -> Self {
        TypeDescriptor::Map(Box::new(values))
    }

    /// Whether this shape may be registered as a payload type.
    pub fn is_valid_root(&self) -> bool {
        matches!(self, TypeDescriptor::Record(_) | TypeDescriptor::Map(_))
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDescriptor::Primitive(p) => write!(f, "{}", p.literal_name()),
            TypeDescriptor::Array(element) => write!(f, "array<{}>", element),
            TypeDescriptor::Map(values) => write!(f, "map<string, {}>", values),
            TypeDescriptor::Record(record) => write!(f, "{}", record.name),
        }
    }
}

/// A named record with its fields.
///
/// Fields keep insertion order until the descriptor goes through [`walk`],
/// which sorts them by schema name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordDescriptor {
    pub name: String,
    pub fields: Vec<FieldDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    /// Schema name: the serialization alias if one is declared, else the field name.
    pub name: String,
    pub ty: TypeDescriptor,
}

impl RecordDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Append a field.
    pub fn field(mut self, name: impl Into<String>, ty: TypeDescriptor) -> Self {
        self.fields.push(FieldDescriptor {
            name: name.into(),
            ty,
        });
        self
    }

    /// Look up a field by schema name.
    pub fn get(&self, name: &str) -> Option<&TypeDescriptor> {
        self.fields.iter().find(|f| f.name == name).map(|f| &f.ty)
    }
}

impl From<RecordDescriptor> for TypeDescriptor {
    fn from(record: RecordDescriptor) -> Self {
        TypeDescriptor::Record(record)
    }
}

/// Types that can describe their own shape.
///
/// Derive it for structs with `#[derive(Describe)]`; the derive honors
/// `#[serde(rename = "...")]`, `#[serde(rename_all = "...")]` and
/// `#[serde(skip)]` so the descriptor matches what serde writes.
///
/// Self-referential types are not supported: their `describe` never returns.
pub trait Describe {
    fn describe() -> TypeDescriptor;
}

/// Map key types. Only string-like keys are supported.
pub trait MapKey {}

impl MapKey for String {}
impl MapKey for str {}
impl MapKey for Box<str> {}
impl MapKey for Rc<str> {}
impl MapKey for Arc<str> {}
impl<'a> MapKey for &'a str {}
impl<'a> MapKey for Cow<'a, str> {}

macro_rules! describe_integer {
    ($($ty:ty),*) => {
        $(
            impl Describe for $ty {
                fn describe() -> TypeDescriptor {
                    TypeDescriptor::Primitive(Primitive::Integer { bits: <$ty>::BITS as u8 })
                }
            }
        )*
    };
}

describe_integer!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

macro_rules! describe_named {
    ($($ty:ty => $name:literal),*) => {
        $(
            impl Describe for $ty {
                fn describe() -> TypeDescriptor {
                    TypeDescriptor::Primitive(Primitive::Named($name))
                }
            }
        )*
    };
}

describe_named!(
    f32 => "float",
    f64 => "double",
    String => "string",
    str => "string",
    char => "string"
);

impl Describe for bool {
    fn describe() -> TypeDescriptor {
        TypeDescriptor::Primitive(Primitive::Boolean)
    }
}

// Indirection: describe the referenced shape.

impl<'a, T: Describe + ?Sized> Describe for &'a T {
    fn describe() -> TypeDescriptor {
        T::describe()
    }
}

impl<'a, T: Describe + ?Sized> Describe for &'a mut T {
    fn describe() -> TypeDescriptor {
        T::describe()
    }
}

impl<T: Describe + ?Sized> Describe for Box<T> {
    fn describe() -> TypeDescriptor {
        T::describe()
    }
}

impl<T: Describe + ?Sized> Describe for Rc<T> {
    fn describe() -> TypeDescriptor {
        T::describe()
    }
}

impl<T: Describe + ?Sized> Describe for Arc<T> {
    fn describe() -> TypeDescriptor {
        T::describe()
    }
}

impl<T: Describe> Describe for Option<T> {
    fn describe() -> TypeDescriptor {
        T::describe()
    }
}

impl<'a, T: Describe + ToOwned + ?Sized> Describe for Cow<'a, T> {
    fn describe() -> TypeDescriptor {
        T::describe()
    }
}

// Sequences.

impl<T: Describe> Describe for Vec<T> {
    fn describe() -> TypeDescriptor {
        TypeDescriptor::array(T::describe())
    }
}

impl<T: Describe> Describe for [T] {
    fn describe() -> TypeDescriptor {
        TypeDescriptor::array(T::describe())
    }
}

impl<T: Describe, const N: usize> Describe for [T; N] {
    fn describe() -> TypeDescriptor {
        TypeDescriptor::array(T::describe())
    }
}

impl<T: Describe> Describe for VecDeque<T> {
    fn describe() -> TypeDescriptor {
        TypeDescriptor::array(T::describe())
    }
}

impl<T: Describe> Describe for LinkedList<T> {
    fn describe() -> TypeDescriptor {
        TypeDescriptor::array(T::describe())
    }
}

impl<T: Describe, S> Describe for HashSet<T, S> {
    fn describe() -> TypeDescriptor {
        TypeDescriptor::array(T::describe())
    }
}

impl<T: Describe> Describe for BTreeSet<T> {
    fn describe() -> TypeDescriptor {
        TypeDescriptor::array(T::describe())
    }
}

// Associative containers, string keys only.

impl<K: MapKey, V: Describe, S> Describe for HashMap<K, V, S> {
    fn describe() -> TypeDescriptor {
        TypeDescriptor::map(V::describe())
    }
}

impl<K: MapKey, V: Describe> Describe for BTreeMap<K, V> {
    fn describe() -> TypeDescriptor {
        TypeDescriptor::map(V::describe())
    }
}

/// Walk a payload type into its normalized descriptor.
///
/// Record fields are sorted by schema name at every level; duplicate names
/// and roots that are neither records nor maps are rejected.
pub fn walk<T: Describe + ?Sized>() -> Result<TypeDescriptor, SchemaError> {
    let descriptor = normalize(T::describe())?;
    if !descriptor.is_valid_root() {
        return Err(SchemaError::UnsupportedRootType(descriptor.to_string()));
    }
    Ok(descriptor)
}

/// Walk the type of a sample value. The sample itself is never inspected.
pub fn walk_value<T: Describe + ?Sized>(_sample: &T) -> Result<TypeDescriptor, SchemaError> {
    walk::<T>()
}

/// Sort record fields by name and check name uniqueness, recursively.
pub(crate) fn normalize(descriptor: TypeDescriptor) -> Result<TypeDescriptor, SchemaError> {
    match descriptor {
        TypeDescriptor::Primitive(p) => Ok(TypeDescriptor::Primitive(p)),
        TypeDescriptor::Array(element) => Ok(TypeDescriptor::array(normalize(*element)?)),
        TypeDescriptor::Map(values) => Ok(TypeDescriptor::map(normalize(*values)?)),
        TypeDescriptor::Record(record) => {
            let mut fields = record
                .fields
                .into_iter()
                .map(|f| {
                    Ok(FieldDescriptor {
                        name: f.name,
                        ty: normalize(f.ty)?,
                    })
                })
                .collect::<Result<Vec<_>, SchemaError>>()?;
            fields.sort_by(|a, b| a.name.cmp(&b.name));

            if let Some(pair) = fields.windows(2).find(|w| w[0].name == w[1].name) {
                return Err(SchemaError::DuplicateField {
                    record: record.name,
                    field: pair[0].name.clone(),
                });
            }

            Ok(TypeDescriptor::Record(RecordDescriptor {
                name: record.name,
                fields,
            }))
        }
    }
}
