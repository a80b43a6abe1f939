//! Avro binary body codec
//!
//! Encodes payloads against the compiled schema using the Avro binary
//! encoding: zig-zag varints for `int`/`long`, little-endian IEEE floats,
//! length-prefixed strings, block-encoded arrays and maps, and record
//! fields in schema order. Payloads pass through `serde_json::Value`, so
//! anything serde can serialize to a value tree is accepted.
//!
//! Nullable fields are not part of the compiled schemas; a `null` value is
//! an encoding error.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Number, Value};

use super::{Codec, CodecError};
use crate::schema::{ComplexType, RecordSchema, Schema, SchemaType};

#[derive(Debug, Clone, Copy, Default)]
pub struct AvroCodec;

impl Codec for AvroCodec {
    fn name(&self) -> &'static str {
        "avro"
    }

    fn encode<P: Serialize + ?Sized>(&self, schema: &Schema, payload: &P) -> Result<Vec<u8>, CodecError> {
        let value = serde_json::to_value(payload)?;
        let mut buf = Vec::new();
        write_value(&mut buf, schema.root(), &value, "$")?;
        Ok(buf)
    }

    fn decode<T: DeserializeOwned>(&self, schema: &Schema, body: &[u8]) -> Result<T, CodecError> {
        let mut reader = Reader { buf: body, pos: 0 };
        let value = reader.read_value(schema.root(), "$")?;
        if reader.remaining() > 0 {
            return Err(CodecError::avro(
                "$",
                format!("{} trailing bytes after value", reader.remaining()),
            ));
        }
        Ok(serde_json::from_value(value)?)
    }
}

fn write_long(buf: &mut Vec<u8>, value: i64) {
    let mut n = ((value << 1) ^ (value >> 63)) as u64;
    while n & !0x7f != 0 {
        buf.push((n & 0x7f) as u8 | 0x80);
        n >>= 7;
    }
    buf.push(n as u8);
}

fn write_str(buf: &mut Vec<u8>, s: &str) {
    write_long(buf, s.len() as i64);
    buf.extend_from_slice(s.as_bytes());
}

fn type_error(path: &str, expected: &str, found: &Value) -> CodecError {
    let found = match found {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    CodecError::avro(path, format!("expected {}, found {}", expected, found))
}

fn write_value(buf: &mut Vec<u8>, ty: &SchemaType, value: &Value, path: &str) -> Result<(), CodecError> {
    match ty {
        SchemaType::Primitive(name) => write_primitive(buf, name, value, path),
        SchemaType::Complex(ComplexType::Array { items }) => {
            let elements = value.as_array().ok_or_else(|| type_error(path, "array", value))?;
            if !elements.is_empty() {
                write_long(buf, elements.len() as i64);
                for (i, element) in elements.iter().enumerate() {
                    write_value(buf, items, element, &format!("{}[{}]", path, i))?;
                }
            }
            write_long(buf, 0);
            Ok(())
        }
        SchemaType::Complex(ComplexType::Map { values }) => {
            let entries = value.as_object().ok_or_else(|| type_error(path, "map", value))?;
            if !entries.is_empty() {
                write_long(buf, entries.len() as i64);
                for (key, entry) in entries {
                    write_str(buf, key);
                    write_value(buf, values, entry, &format!("{}.{}", path, key))?;
                }
            }
            write_long(buf, 0);
            Ok(())
        }
        SchemaType::Complex(ComplexType::Record(record)) => write_record(buf, record, value, path),
    }
}

fn write_record(buf: &mut Vec<u8>, record: &RecordSchema, value: &Value, path: &str) -> Result<(), CodecError> {
    let object = value
        .as_object()
        .ok_or_else(|| type_error(path, &format!("record {}", record.name), value))?;
    for field in &record.fields {
        let field_path = format!("{}.{}", path, field.name);
        let field_value = object
            .get(&field.name)
            .ok_or_else(|| CodecError::avro(&field_path, "missing field"))?;
        write_value(buf, &field.ty, field_value, &field_path)?;
    }
    Ok(())
}

fn write_primitive(buf: &mut Vec<u8>, name: &str, value: &Value, path: &str) -> Result<(), CodecError> {
    match name {
        "boolean" => {
            let b = value.as_bool().ok_or_else(|| type_error(path, name, value))?;
            buf.push(b as u8);
        }
        "int" => {
            let n = value.as_i64().ok_or_else(|| type_error(path, name, value))?;
            if i32::try_from(n).is_err() {
                return Err(CodecError::avro(path, format!("{} out of range for int", n)));
            }
            write_long(buf, n);
        }
        "long" => {
            let n = value.as_i64().ok_or_else(|| type_error(path, name, value))?;
            write_long(buf, n);
        }
        "float" => {
            let n = value.as_f64().ok_or_else(|| type_error(path, name, value))?;
            buf.extend_from_slice(&(n as f32).to_le_bytes());
        }
        "double" => {
            let n = value.as_f64().ok_or_else(|| type_error(path, name, value))?;
            buf.extend_from_slice(&n.to_le_bytes());
        }
        "string" => {
            let s = value.as_str().ok_or_else(|| type_error(path, name, value))?;
            write_str(buf, s);
        }
        other => {
            return Err(CodecError::avro(path, format!("unsupported primitive type {}", other)));
        }
    }
    Ok(())
}

/// Upper bound on zero-width array items decoded from one sequence.
const MAX_EMPTY_ITEMS: usize = 1 << 16;

/// Whether values of `ty` encode to no bytes at all.
fn encodes_empty(ty: &SchemaType) -> bool {
    match ty {
        SchemaType::Complex(ComplexType::Record(record)) => {
            record.fields.iter().all(|field| encodes_empty(&field.ty))
        }
        _ => false,
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize, path: &str) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::avro(
                path,
                format!("unexpected end of body: need {} bytes, have {}", n, self.remaining()),
            ));
        }
        let bytes = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    fn read_long(&mut self, path: &str) -> Result<i64, CodecError> {
        let mut n: u64 = 0;
        let mut shift = 0;
        loop {
            if shift >= 64 {
                return Err(CodecError::avro(path, "varint overflow"));
            }
            let byte = self.take(1, path)?[0];
            n |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        Ok((n >> 1) as i64 ^ -((n & 1) as i64))
    }

    fn read_len(&mut self, path: &str) -> Result<usize, CodecError> {
        let len = self.read_long(path)?;
        usize::try_from(len).map_err(|_| CodecError::avro(path, format!("negative length {}", len)))
    }

    fn read_string(&mut self, path: &str) -> Result<String, CodecError> {
        let len = self.read_len(path)?;
        let bytes = self.take(len, path)?;
        String::from_utf8(bytes.to_vec()).map_err(|e| CodecError::avro(path, e.to_string()))
    }

    /// Next block count of an array or map; 0 ends the sequence. Negative
    /// counts carry a byte size, which is skipped.
    ///
    /// Items that take at least one byte cannot outnumber the bytes left.
    /// Zero-width items (records without fields) are capped at
    /// `MAX_EMPTY_ITEMS` per sequence, counting the `read` items already
    /// taken from earlier blocks.
    fn read_block_count(&mut self, zero_width: bool, read: usize, path: &str) -> Result<usize, CodecError> {
        let count = self.read_long(path)?;
        if count < 0 {
            self.read_long(path)?;
        }
        let count = usize::try_from(count.unsigned_abs())
            .map_err(|_| CodecError::avro(path, format!("block count {} out of range", count)))?;
        let limit = if zero_width {
            MAX_EMPTY_ITEMS.saturating_sub(read)
        } else {
            self.remaining()
        };
        if count > limit {
            return Err(CodecError::avro(
                path,
                format!("block count {} exceeds what the body can hold ({})", count, limit),
            ));
        }
        Ok(count)
    }

    fn read_value(&mut self, ty: &SchemaType, path: &str) -> Result<Value, CodecError> {
        match ty {
            SchemaType::Primitive(name) => self.read_primitive(name, path),
            SchemaType::Complex(ComplexType::Array { items }) => {
                let zero_width = encodes_empty(items);
                let mut elements = Vec::new();
                loop {
                    let count = self.read_block_count(zero_width, elements.len(), path)?;
                    if count == 0 {
                        break;
                    }
                    for _ in 0..count {
                        let element_path = format!("{}[{}]", path, elements.len());
                        elements.push(self.read_value(items, &element_path)?);
                    }
                }
                Ok(Value::Array(elements))
            }
            SchemaType::Complex(ComplexType::Map { values }) => {
                let mut entries = Map::new();
                loop {
                    // Every entry carries at least its key length.
                    let count = self.read_block_count(false, entries.len(), path)?;
                    if count == 0 {
                        break;
                    }
                    for _ in 0..count {
                        let key = self.read_string(path)?;
                        let entry = self.read_value(values, &format!("{}.{}", path, key))?;
                        entries.insert(key, entry);
                    }
                }
                Ok(Value::Object(entries))
            }
            SchemaType::Complex(ComplexType::Record(record)) => {
                let mut object = Map::new();
                for field in &record.fields {
                    let value = self.read_value(&field.ty, &format!("{}.{}", path, field.name))?;
                    object.insert(field.name.clone(), value);
                }
                Ok(Value::Object(object))
            }
        }
    }

    fn read_primitive(&mut self, name: &str, path: &str) -> Result<Value, CodecError> {
        match name {
            "boolean" => match self.take(1, path)?[0] {
                0 => Ok(Value::Bool(false)),
                1 => Ok(Value::Bool(true)),
                other => Err(CodecError::avro(path, format!("invalid boolean byte {}", other))),
            },
            "int" => {
                let n = self.read_long(path)?;
                if i32::try_from(n).is_err() {
                    return Err(CodecError::avro(path, format!("{} out of range for int", n)));
                }
                Ok(Value::from(n))
            }
            "long" => Ok(Value::from(self.read_long(path)?)),
            "float" => {
                let mut raw = [0u8; 4];
                raw.copy_from_slice(self.take(4, path)?);
                float_value(f64::from(f32::from_le_bytes(raw)), path)
            }
            "double" => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(self.take(8, path)?);
                float_value(f64::from_le_bytes(raw), path)
            }
            "string" => Ok(Value::String(self.read_string(path)?)),
            other => Err(CodecError::avro(path, format!("unsupported primitive type {}", other))),
        }
    }
}

fn float_value(n: f64, path: &str) -> Result<Value, CodecError> {
    Number::from_f64(n)
        .map(Value::Number)
        .ok_or_else(|| CodecError::avro(path, format!("non-finite number {}", n)))
}
