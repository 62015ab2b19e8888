//! Canonical CBOR encoding for deterministic serialization.
//!
//! Every immutable object is reduced to a CBOR map keyed by its wire field
//! names, then encoded with:
//! - Map keys sorted lexicographically by key bytes
//! - Integers in their smallest valid encoding
//! - Definite lengths only
//! - Absent optional fields written as the null marker (`0xf6`), never omitted
//! - Byte strings as major type 2
//! - No floats or tags (timestamps are i64 UTC milliseconds)
//!
//! The encoding is the preimage for both identifiers and signatures, so two
//! implementations that disagree on a single byte will fail to verify each
//! other's objects.

use ciborium::value::Value;

use crate::error::{CoreError, Result};
use crate::types::{Identifier, Timestamp};

/// Types that reduce to a canonical CBOR value.
pub trait Canonical {
    /// Build the CBOR value whose canonical encoding is this object's preimage.
    fn canonical_value(&self) -> Value;
}

/// Encode an object to canonical bytes.
pub fn canonical_bytes<T: Canonical + ?Sized>(object: &T) -> Result<Vec<u8>> {
    encode_value(&object.canonical_value())
}

/// Encode a CBOR value canonically.
pub fn encode_value(value: &Value) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    encode_value_to(&mut buf, value)?;
    Ok(buf)
}

/// Builder for the text-keyed maps that make up object bodies.
///
/// Entry order does not matter; the encoder sorts keys.
#[derive(Debug, Default)]
pub struct CanonicalMap {
    entries: Vec<(Value, Value)>,
}

impl CanonicalMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(mut self, key: &str, value: Value) -> Self {
        self.entries.push((Value::Text(key.to_string()), value));
        self
    }

    pub fn text(self, key: &str, value: &str) -> Self {
        self.value(key, Value::Text(value.to_string()))
    }

    pub fn int(self, key: &str, value: i64) -> Self {
        self.value(key, Value::Integer(value.into()))
    }

    pub fn bytes(self, key: &str, value: &[u8]) -> Self {
        self.value(key, Value::Bytes(value.to_vec()))
    }

    pub fn opt_bytes(self, key: &str, value: Option<&[u8]>) -> Self {
        self.value(key, value.map_or(Value::Null, |b| Value::Bytes(b.to_vec())))
    }

    pub fn id(self, key: &str, value: &Identifier) -> Self {
        self.value(key, id_value(value))
    }

    pub fn opt_id(self, key: &str, value: Option<&Identifier>) -> Self {
        self.value(key, value.map_or(Value::Null, id_value))
    }

    pub fn ids(self, key: &str, values: &[Identifier]) -> Self {
        self.value(key, Value::Array(values.iter().map(id_value).collect()))
    }

    pub fn timestamp(self, key: &str, value: Timestamp) -> Self {
        self.int(key, value)
    }

    pub fn opt_timestamp(self, key: &str, value: Option<Timestamp>) -> Self {
        self.value(key, value.map_or(Value::Null, |t| Value::Integer(t.into())))
    }

    pub fn opt_value(self, key: &str, value: Option<Value>) -> Self {
        self.value(key, value.unwrap_or(Value::Null))
    }

    pub fn build(self) -> Value {
        Value::Map(self.entries)
    }
}

/// Identifiers are carried as raw byte strings.
pub fn id_value(id: &Identifier) -> Value {
    Value::Bytes(id.0.to_vec())
}

/// Recursively encode a CBOR value.
fn encode_value_to(buf: &mut Vec<u8>, value: &Value) -> Result<()> {
    match value {
        Value::Integer(i) => encode_integer(buf, *i),
        Value::Bytes(b) => encode_bytes(buf, b),
        Value::Text(s) => encode_text(buf, s),
        Value::Array(arr) => encode_array(buf, arr)?,
        Value::Map(entries) => encode_map_canonical(buf, entries)?,
        Value::Bool(b) => buf.push(if *b { 0xf5 } else { 0xf4 }),
        Value::Null => buf.push(0xf6),
        Value::Float(_) => {
            return Err(CoreError::Encoding(
                "floats are not permitted in canonical encoding".into(),
            ))
        }
        Value::Tag(..) => {
            return Err(CoreError::Encoding(
                "tags are not permitted in canonical encoding".into(),
            ))
        }
        _ => return Err(CoreError::Encoding("unsupported CBOR value type".into())),
    }
    Ok(())
}

/// Encode a CBOR integer (major types 0 and 1).
fn encode_integer(buf: &mut Vec<u8>, i: ciborium::value::Integer) {
    let n: i128 = i.into();

    if n >= 0 {
        encode_uint(buf, 0, n as u64);
    } else {
        // CBOR encodes -1 as 0, -2 as 1, etc.
        let abs = (-1 - n) as u64;
        encode_uint(buf, 1, abs);
    }
}

/// Encode an unsigned integer with the given major type.
fn encode_uint(buf: &mut Vec<u8>, major: u8, n: u64) {
    let mt = major << 5;
    if n < 24 {
        buf.push(mt | (n as u8));
    } else if n <= 0xff {
        buf.push(mt | 24);
        buf.push(n as u8);
    } else if n <= 0xffff {
        buf.push(mt | 25);
        buf.extend_from_slice(&(n as u16).to_be_bytes());
    } else if n <= 0xffff_ffff {
        buf.push(mt | 26);
        buf.extend_from_slice(&(n as u32).to_be_bytes());
    } else {
        buf.push(mt | 27);
        buf.extend_from_slice(&n.to_be_bytes());
    }
}

fn encode_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    encode_uint(buf, 2, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

fn encode_text(buf: &mut Vec<u8>, s: &str) {
    encode_uint(buf, 3, s.len() as u64);
    buf.extend_from_slice(s.as_bytes());
}

fn encode_array(buf: &mut Vec<u8>, arr: &[Value]) -> Result<()> {
    encode_uint(buf, 4, arr.len() as u64);
    for item in arr {
        encode_value_to(buf, item)?;
    }
    Ok(())
}

/// Encode a map canonically (major type 5).
///
/// Keys must be text and unique; they are emitted in lexicographic order of
/// their UTF-8 bytes, which is the order of the wire field names.
fn encode_map_canonical(buf: &mut Vec<u8>, entries: &[(Value, Value)]) -> Result<()> {
    let mut pairs: Vec<(&str, &Value)> = Vec::with_capacity(entries.len());
    for (k, v) in entries {
        match k {
            Value::Text(key) => pairs.push((key.as_str(), v)),
            other => {
                return Err(CoreError::Encoding(format!(
                    "map keys must be text, got {:?}",
                    other
                )))
            }
        }
    }

    pairs.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));

    if let Some(dup) = pairs.windows(2).find(|w| w[0].0 == w[1].0) {
        return Err(CoreError::Encoding(format!("duplicate map key: {}", dup[0].0)));
    }

    encode_uint(buf, 5, pairs.len() as u64);
    for (key, value) in pairs {
        encode_text(buf, key);
        encode_value_to(buf, value)?;
    }
    Ok(())
}
