//! Canonical CBOR encoding for deterministic serialization.
//!
//! This module implements RFC 8949 Core Deterministic Encoding:
//! - Map keys sorted by encoded byte comparison
//! - Integers use smallest valid encoding
//! - Definite lengths only
//! - No floats (timestamps are i64 milliseconds)
//!
//! Roots are signed over their canonical bytes and objects are addressed by
//! the hash of theirs, so the same value must produce identical bytes on
//! every platform. Decoding is strict: input that does not re-encode to the
//! same bytes is rejected.

use ciborium::value::{Integer, Value};

use crate::error::CoreError;
use crate::types::ObjectKey;

/// Encode a CBOR value to canonical bytes.
pub(crate) fn encode_canonical(value: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_value_to(&mut buf, value);
    buf
}

/// Recursively encode a CBOR value.
fn encode_value_to(buf: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Integer(i) => encode_integer(buf, *i),
        Value::Bytes(b) => encode_bytes(buf, b),
        Value::Text(s) => encode_text(buf, s),
        Value::Array(arr) => encode_array(buf, arr),
        Value::Map(entries) => encode_map_canonical(buf, entries),
        Value::Bool(b) => buf.push(if *b { 0xf5 } else { 0xf4 }),
        Value::Null => buf.push(0xf6),
        // Builders in this crate never produce floats or tags.
        _ => unreachable!("unsupported CBOR value in canonical encoding"),
    }
}

/// Encode a CBOR integer (major types 0 and 1).
fn encode_integer(buf: &mut Vec<u8>, i: Integer) {
    let n: i128 = i.into();

    if n >= 0 {
        encode_uint(buf, 0, n as u64);
    } else {
        // CBOR encodes -1 as 0, -2 as 1, etc.
        encode_uint(buf, 1, (-1 - n) as u64);
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

fn encode_array(buf: &mut Vec<u8>, arr: &[Value]) {
    encode_uint(buf, 4, arr.len() as u64);
    for item in arr {
        encode_value_to(buf, item);
    }
}

/// Encode a map canonically (major type 5).
///
/// Keys are sorted by their encoded byte comparison.
fn encode_map_canonical(buf: &mut Vec<u8>, entries: &[(Value, Value)]) {
    let mut pairs: Vec<(Vec<u8>, &Value)> = entries
        .iter()
        .map(|(k, v)| {
            let mut key_buf = Vec::new();
            encode_value_to(&mut key_buf, k);
            (key_buf, v)
        })
        .collect();

    pairs.sort_by(|a, b| a.0.cmp(&b.0));

    encode_uint(buf, 5, pairs.len() as u64);
    for (key_bytes, value) in pairs {
        buf.extend_from_slice(&key_bytes);
        encode_value_to(buf, value);
    }
}

/// Build a map entry with an integer key.
pub(crate) fn entry(key: u64, value: Value) -> (Value, Value) {
    (Value::Integer(key.into()), value)
}

/// Encode a list of object keys as a CBOR array of byte strings.
pub(crate) fn keys_value(keys: &[ObjectKey]) -> Value {
    Value::Array(keys.iter().map(|k| Value::Bytes(k.0.to_vec())).collect())
}

/// A decoded canonical map with integer keys.
pub(crate) struct IntMap {
    entries: Vec<(u64, Value)>,
}

impl IntMap {
    /// Parse `bytes` as a single CBOR map with unsigned integer keys.
    pub(crate) fn parse(bytes: &[u8]) -> Result<Self, CoreError> {
        let value: Value =
            ciborium::from_reader(bytes).map_err(|e| CoreError::DecodingError(e.to_string()))?;

        let map = match value {
            Value::Map(m) => m,
            _ => return Err(CoreError::DecodingError("expected map".into())),
        };

        let mut entries = Vec::with_capacity(map.len());
        for (k, v) in map {
            let key = match k {
                Value::Integer(i) => u64::try_from(i)
                    .map_err(|_| CoreError::DecodingError("negative map key".into()))?,
                _ => return Err(CoreError::DecodingError("non-integer map key".into())),
            };
            entries.push((key, v));
        }

        Ok(Self { entries })
    }

    fn get(&self, key: u64) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn u64(&self, key: u64, name: &str) -> Result<u64, CoreError> {
        match self.get(key) {
            Some(Value::Integer(i)) => {
                u64::try_from(*i).map_err(|_| CoreError::DecodingError(format!("{name} out of range")))
            }
            _ => Err(CoreError::DecodingError(format!("missing {name}"))),
        }
    }

    pub(crate) fn i64(&self, key: u64, name: &str) -> Result<i64, CoreError> {
        match self.get(key) {
            Some(Value::Integer(i)) => {
                i64::try_from(*i).map_err(|_| CoreError::DecodingError(format!("{name} out of range")))
            }
            _ => Err(CoreError::DecodingError(format!("missing {name}"))),
        }
    }

    pub(crate) fn bytes(&self, key: u64, name: &str) -> Result<&[u8], CoreError> {
        match self.get(key) {
            Some(Value::Bytes(b)) => Ok(b),
            _ => Err(CoreError::DecodingError(format!("missing {name}"))),
        }
    }

    pub(crate) fn bytes32(&self, key: u64, name: &str) -> Result<[u8; 32], CoreError> {
        self.bytes(key, name)?
            .try_into()
            .map_err(|_| CoreError::DecodingError(format!("invalid {name}")))
    }

    /// A 32-byte value that may be encoded as null.
    pub(crate) fn opt_bytes32(&self, key: u64, name: &str) -> Result<Option<[u8; 32]>, CoreError> {
        match self.get(key) {
            Some(Value::Null) => Ok(None),
            Some(Value::Bytes(b)) => b
                .as_slice()
                .try_into()
                .map(Some)
                .map_err(|_| CoreError::DecodingError(format!("invalid {name}"))),
            _ => Err(CoreError::DecodingError(format!("missing {name}"))),
        }
    }

    pub(crate) fn keys(&self, key: u64, name: &str) -> Result<Vec<ObjectKey>, CoreError> {
        match self.get(key) {
            Some(Value::Array(arr)) => arr
                .iter()
                .map(|item| match item {
                    Value::Bytes(b) => ObjectKey::try_from(b.as_slice())
                        .map_err(|_| CoreError::DecodingError(format!("invalid {name} entry"))),
                    _ => Err(CoreError::DecodingError(format!("invalid {name} entry"))),
                })
                .collect(),
            _ => Err(CoreError::DecodingError(format!("missing {name}"))),
        }
    }
}

/// Reject input that does not re-encode to exactly the same bytes.
pub(crate) fn ensure_canonical(input: &[u8], reencoded: &[u8]) -> Result<(), CoreError> {
    if input == reencoded {
        Ok(())
    } else {
        Err(CoreError::NonCanonical)
    }
}
