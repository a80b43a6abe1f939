//! Schema compiler
//!
//! Renders a [`TypeDescriptor`] tree into an Avro-style schema document.
//! Output is deterministic: the same descriptor always yields byte-identical
//! canonical text, which is what the registry fingerprints and looks up.

use std::fmt;

use serde::{Deserialize, Serialize, Serializer};
use sha2::{Digest, Sha256};

use super::descriptor::{normalize, walk, Describe, Primitive, TypeDescriptor};
use super::SchemaError;

/// The type of a schema node: a primitive name or a complex type object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SchemaType {
    Primitive(String),
    Complex(ComplexType),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ComplexType {
    Array { items: Box<SchemaType> },
    Map { values: Box<SchemaType> },
    Record(RecordSchema),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSchema {
    pub name: String,
    pub fields: Vec<FieldSchema>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: SchemaType,
}

impl RecordSchema {
    pub fn field(&self, name: &str) -> Option<&SchemaType> {
        self.fields.iter().find(|f| f.name == name).map(|f| &f.ty)
    }
}

/// A compiled schema document together with its canonical text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    root: SchemaType,
    text: String,
}

impl Schema {
    /// Walk and compile a payload type in one step.
    pub fn of<T: Describe + ?Sized>() -> Result<Self, SchemaError> {
        compile(&walk::<T>()?)
    }

    fn from_root(root: SchemaType) -> Result<Self, SchemaError> {
        let text = serde_json::to_string(&root)?;
        Ok(Self { root, text })
    }

    /// Parse schema text, e.g. as returned by a schema registry.
    ///
    /// The canonical text is re-rendered, so whitespace differences in the
    /// input do not change the fingerprint.
    pub fn parse(text: &str) -> Result<Self, SchemaError> {
        let root: SchemaType =
            serde_json::from_str(text).map_err(|e| SchemaError::InvalidSchema(e.to_string()))?;
        match root {
            SchemaType::Complex(ComplexType::Record(_)) | SchemaType::Complex(ComplexType::Map { .. }) => {
                Self::from_root(root)
            }
            _ => Err(SchemaError::InvalidSchema(format!(
                "root must be a record or a map: {}",
                text
            ))),
        }
    }

    pub fn root(&self) -> &SchemaType {
        &self.root
    }

    /// The root record, if the payload type is a record.
    pub fn record(&self) -> Option<&RecordSchema> {
        match &self.root {
            SchemaType::Complex(ComplexType::Record(record)) => Some(record),
            _ => None,
        }
    }

    /// Name of the root record, or `"map"` for map payloads.
    pub fn name(&self) -> &str {
        self.record().map(|r| r.name.as_str()).unwrap_or("map")
    }

    pub fn canonical_text(&self) -> &str {
        &self.text
    }

    /// Hex-encoded SHA-256 of the canonical text.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.text.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl Serialize for Schema {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.root.serialize(serializer)
    }
}

/// Compile a descriptor tree into a schema document.
///
/// The descriptor is normalized first, so hand-built descriptors get the
/// same field order as walked ones.
pub fn compile(descriptor: &TypeDescriptor) -> Result<Schema, SchemaError> {
    if !descriptor.is_valid_root() {
        return Err(SchemaError::UnsupportedRootType(descriptor.to_string()));
    }
    let normalized = normalize(descriptor.clone())?;
    Schema::from_root(render(&normalized))
}

fn render(descriptor: &TypeDescriptor) -> SchemaType {
    match descriptor {
        TypeDescriptor::Primitive(p) => SchemaType::Primitive(canonical_primitive(p)),
        TypeDescriptor::Array(element) => SchemaType::Complex(ComplexType::Array {
            items: Box::new(render(element)),
        }),
        TypeDescriptor::Map(values) => SchemaType::Complex(ComplexType::Map {
            values: Box::new(render(values)),
        }),
        TypeDescriptor::Record(record) => SchemaType::Complex(ComplexType::Record(RecordSchema {
            name: record.name.clone(),
            fields: record
                .fields
                .iter()
                .map(|f| FieldSchema {
                    name: f.name.clone(),
                    ty: render(&f.ty),
                })
                .collect(),
        })),
    }
}

/// Canonical schema name of a primitive.
///
/// | descriptor | schema |
/// |---|---|
/// | 8/16/32-bit integer | `int` |
/// | 64-bit integer | `long` |
/// | boolean | `boolean` |
/// | anything else | literal name |
pub fn canonical_primitive(primitive: &Primitive) -> String {
    match primitive {
        Primitive::Integer { bits } if *bits <= 32 => "int".to_string(),
        Primitive::Integer { bits: 64 } => "long".to_string(),
        Primitive::Boolean => "boolean".to_string(),
        other => other.literal_name().into_owned(),
    }
}
