//! Body codecs
//!
//! A codec turns a payload into the body bytes carried inside the wire
//! frame, and back. Codecs receive the compiled schema of the registered
//! payload type; schema-less formats ignore it.

pub mod avro;
pub mod cbor;
pub mod json;

pub use avro::AvroCodec;
pub use cbor::CborCodec;
pub use json::JsonCodec;

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

use crate::schema::Schema;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CBOR error: {0}")]
    Cbor(String),

    #[error("Avro error at {path}: {message}")]
    Avro { path: String, message: String },
}

impl CodecError {
    pub(crate) fn avro(path: &str, message: impl Into<String>) -> Self {
        CodecError::Avro {
            path: if path.is_empty() { "$".to_string() } else { path.to_string() },
            message: message.into(),
        }
    }
}

/// Payload <-> body bytes conversion.
pub trait Codec: Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    fn encode<P: Serialize + ?Sized>(&self, schema: &Schema, payload: &P) -> Result<Vec<u8>, CodecError>;

    fn decode<T: DeserializeOwned>(&self, schema: &Schema, body: &[u8]) -> Result<T, CodecError>;
}
