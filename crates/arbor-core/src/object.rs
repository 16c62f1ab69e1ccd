//! Object envelope: the minimal structure needed to walk an object tree.
//!
//! An object is immutable bytes addressed by their Blake3 hash. Objects that
//! reference other objects use the envelope below so that a node can discover
//! references without understanding the application's schema. Any bytes that
//! do not parse as an envelope are an opaque leaf.

use bytes::Bytes;
use ciborium::value::Value;

use crate::canonical::{encode_canonical, ensure_canonical, entry, keys_value, IntMap};
use crate::error::CoreError;
use crate::types::ObjectKey;

mod keys {
    pub const REFS: u64 = 0;
    pub const DATA: u64 = 1;
}

/// A reference-bearing object.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ObjectNode {
    /// Child objects, in application order.
    pub refs: Vec<ObjectKey>,
    /// Application data carried by this node.
    pub data: Bytes,
}

impl ObjectNode {
    /// Create a node with the given children and data.
    pub fn new(refs: Vec<ObjectKey>, data: impl Into<Bytes>) -> Self {
        Self {
            refs,
            data: data.into(),
        }
    }

    /// Encode to canonical CBOR bytes.
    pub fn encode(&self) -> Vec<u8> {
        encode_canonical(&Value::Map(vec![
            entry(keys::REFS, keys_value(&self.refs)),
            entry(keys::DATA, Value::Bytes(self.data.to_vec())),
        ]))
    }

    /// Decode from canonical CBOR bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, CoreError> {
        let map = IntMap::parse(bytes).map_err(|e| CoreError::MalformedObject(e.to_string()))?;
        if map.len() != 2 {
            return Err(CoreError::MalformedObject("expected 2 fields".into()));
        }

        let node = Self {
            refs: map.keys(keys::REFS, "refs")?,
            data: Bytes::copy_from_slice(map.bytes(keys::DATA, "data")?),
        };

        ensure_canonical(bytes, &node.encode())?;
        Ok(node)
    }

    /// Encode and compute the content key in one step.
    pub fn to_stored(&self) -> (ObjectKey, Bytes) {
        let bytes = self.encode();
        (ObjectKey::of(&bytes), Bytes::from(bytes))
    }

    /// References carried by arbitrary object bytes.
    ///
    /// Opaque blobs have none.
    pub fn refs_of(bytes: &[u8]) -> Vec<ObjectKey> {
        Self::decode(bytes).map(|node| node.refs).unwrap_or_default()
    }
}
