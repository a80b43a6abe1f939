//! CBOR body codec

use serde::{de::DeserializeOwned, Serialize};

use super::{Codec, CodecError};
use crate::schema::Schema;

/// Compact binary bodies via `ciborium`. The schema is not consulted.
#[derive(Debug, Clone, Copy, Default)]
pub struct CborCodec;

impl Codec for CborCodec {
    fn name(&self) -> &'static str {
        "cbor"
    }

    fn encode<P: Serialize + ?Sized>(&self, _schema: &Schema, payload: &P) -> Result<Vec<u8>, CodecError> {
        let mut buf = Vec::new();
        ciborium::into_writer(payload, &mut buf).map_err(|e| CodecError::Cbor(e.to_string()))?;
        Ok(buf)
    }

    fn decode<T: DeserializeOwned>(&self, _schema: &Schema, body: &[u8]) -> Result<T, CodecError> {
        ciborium::from_reader(body).map_err(|e| CodecError::Cbor(e.to_string()))
    }
}
