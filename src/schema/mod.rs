//! Schema inference
//!
//! Payload types describe their shape through the [`Describe`] trait
//! (usually derived with `#[derive(Describe)]`). The walker normalizes that
//! description into a [`TypeDescriptor`] tree and the compiler renders the
//! tree into an Avro-style [`Schema`] document.
//!
//! ```text
//! T: Describe
//!   ↓ (walk: sort fields, check names, check root)
//! TypeDescriptor
//!   ↓ (compile: canonical primitive names)
//! Schema  ──► canonical JSON text, fingerprint
//! ```

pub mod compiler;
pub mod descriptor;

pub use compiler::{compile, ComplexType, FieldSchema, RecordSchema, Schema, SchemaType};
pub use descriptor::{
    walk, walk_value, Describe, FieldDescriptor, MapKey, Primitive, RecordDescriptor,
    TypeDescriptor,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Unsupported root type {0}: payloads must be records or string-keyed maps")]
    UnsupportedRootType(String),

    #[error("Duplicate field {field} in record {record}")]
    DuplicateField { record: String, field: String },

    #[error("Invalid schema document: {0}")]
    InvalidSchema(String),

    #[error("Schema serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
