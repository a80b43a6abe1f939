//! JSON body codec

use serde::{de::DeserializeOwned, Serialize};

use super::{Codec, CodecError};
use crate::schema::Schema;

/// Structured-text bodies via `serde_json`. The schema is not consulted.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode<P: Serialize + ?Sized>(&self, _schema: &Schema, payload: &P) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(payload)?)
    }

    fn decode<T: DeserializeOwned>(&self, _schema: &Schema, body: &[u8]) -> Result<T, CodecError> {
        Ok(serde_json::from_slice(body)?)
    }
}
