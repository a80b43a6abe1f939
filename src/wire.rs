//! Schema-registry wire framing
//!
//! Layout: `magic (1 byte, always 0) || schema id (4 bytes, big-endian) || body`.
//! The layout is fixed by the schema-registry wire contract.

use thiserror::Error;

/// Framing format version; the only one defined.
pub const MAGIC_BYTE: u8 = 0;

/// Magic byte plus schema id.
pub const HEADER_LEN: usize = 5;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("Malformed envelope: {len} bytes is shorter than the 5-byte header")]
    TooShort { len: usize },

    #[error("Malformed envelope: unsupported format marker {0:#04x}")]
    UnsupportedFormat(u8),
}

/// Frame a body with its schema id.
pub fn encode(schema_id: u32, body: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(encoded_len(body.len()));
    buf.push(MAGIC_BYTE);
    buf.extend_from_slice(&schema_id.to_be_bytes());
    buf.extend_from_slice(body);
    buf
}

/// Split a framed message into schema id and body.
pub fn decode(data: &[u8]) -> Result<(u32, &[u8]), WireError> {
    if data.len() < HEADER_LEN {
        return Err(WireError::TooShort { len: data.len() });
    }
    if data[0] != MAGIC_BYTE {
        return Err(WireError::UnsupportedFormat(data[0]));
    }
    let mut id = [0u8; 4];
    id.copy_from_slice(&data[1..HEADER_LEN]);
    Ok((u32::from_be_bytes(id), &data[HEADER_LEN..]))
}

/// Length of the framed message for a body of `body_len` bytes.
pub fn encoded_len(body_len: usize) -> usize {
    HEADER_LEN + body_len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let framed = encode(0x0102_0304, b"abc");
        assert_eq!(framed, vec![0x00, 0x01, 0x02, 0x03, 0x04, b'a', b'b', b'c']);
        assert_eq!(framed.len(), encoded_len(3));
    }

    #[test]
    fn test_round_trip() {
        for (id, body) in [
            (0u32, Vec::new()),
            (1, vec![0xFF]),
            (u32::MAX, b"payload bytes".to_vec()),
        ] {
            let framed = encode(id, &body);
            let (decoded_id, decoded_body) = decode(&framed).unwrap();
            assert_eq!(decoded_id, id);
            assert_eq!(decoded_body, body.as_slice());
        }
    }

    #[test]
    fn test_header_only_is_valid() {
        let (id, body) = decode(&[0, 0, 0, 0, 42]).unwrap();
        assert_eq!(id, 42);
        assert!(body.is_empty());
    }

    #[test]
    fn test_rejects_short_input() {
        for len in 0..HEADER_LEN {
            let data = vec![0u8; len];
            assert_eq!(decode(&data), Err(WireError::TooShort { len }));
        }
    }

    #[test]
    fn test_rejects_unknown_marker() {
        let mut framed = encode(7, b"x");
        framed[0] = 1;
        assert_eq!(decode(&framed), Err(WireError::UnsupportedFormat(1)));
    }
}
