//! Root: a signed, versioned reference into a feed's object tree.
//!
//! A root names one snapshot of a head: it carries the keys of the top-level
//! objects of the tree and is signed by the feed's key. Roots of a head are
//! ordered by sequence number; a newer root supersedes every older one.

use bytes::Bytes;
use ciborium::value::Value;

use crate::canonical::{encode_canonical, ensure_canonical, entry, keys_value, IntMap};
use crate::crypto::{Ed25519Signature, Keypair};
use crate::error::{CoreError, ValidationError};
use crate::types::{FeedId, HeadId, ObjectKey};
use crate::validation::validate_root;

/// The current root schema version.
pub const ROOT_VERSION: u8 = 0;

/// Maximum number of top-level references a root may carry.
pub const MAX_ROOT_REFS: usize = 1024;

/// Domain separator prepended to the encoded value before signing.
pub const ROOT_SIGN_DOMAIN: &[u8] = b"arbor-root-v0:";

/// Root value field keys (integer keys for compact encoding).
mod keys {
    pub const VERSION: u64 = 0;
    pub const FEED: u64 = 1;
    pub const NONCE: u64 = 2;
    pub const SEQ: u64 = 3;
    pub const TIMESTAMP: u64 = 4;
    pub const PREV: u64 = 5;
    pub const REFS: u64 = 6;
}

/// The signed content of a root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootValue {
    /// Schema version (currently 0).
    pub version: u8,
    /// The feed this root belongs to.
    pub feed: FeedId,
    /// Head nonce within the feed.
    pub nonce: u64,
    /// Sequence number within the head (1-indexed).
    pub seq: u64,
    /// Author-claimed timestamp (Unix milliseconds). Untrusted.
    pub timestamp: i64,
    /// Hash of the previous root of this head, if any.
    pub prev: Option<ObjectKey>,
    /// Top-level object references.
    pub refs: Vec<ObjectKey>,
}

impl RootValue {
    /// The head this value belongs to.
    pub fn head(&self) -> HeadId {
        HeadId::new(self.feed, self.nonce)
    }

    /// Encode to canonical CBOR bytes.
    pub fn encode(&self) -> Vec<u8> {
        let prev = match &self.prev {
            Some(key) => Value::Bytes(key.0.to_vec()),
            None => Value::Null,
        };

        encode_canonical(&Value::Map(vec![
            entry(keys::VERSION, Value::Integer(self.version.into())),
            entry(keys::FEED, Value::Bytes(self.feed.0.to_vec())),
            entry(keys::NONCE, Value::Integer(self.nonce.into())),
            entry(keys::SEQ, Value::Integer(self.seq.into())),
            entry(keys::TIMESTAMP, Value::Integer(self.timestamp.into())),
            entry(keys::PREV, prev),
            entry(keys::REFS, keys_value(&self.refs)),
        ]))
    }

    /// Decode from canonical CBOR bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, CoreError> {
        let map = IntMap::parse(bytes).map_err(|e| CoreError::MalformedRoot(e.to_string()))?;
        if map.len() != 7 {
            return Err(CoreError::MalformedRoot(format!(
                "expected 7 fields, got {}",
                map.len()
            )));
        }

        let version = map.u64(keys::VERSION, "version")?;
        let version = u8::try_from(version)
            .map_err(|_| CoreError::MalformedRoot(format!("version {version} out of range")))?;

        let value = Self {
            version,
            feed: FeedId(map.bytes32(keys::FEED, "feed")?),
            nonce: map.u64(keys::NONCE, "nonce")?,
            seq: map.u64(keys::SEQ, "seq")?,
            timestamp: map.i64(keys::TIMESTAMP, "timestamp")?,
            prev: map.opt_bytes32(keys::PREV, "prev")?.map(ObjectKey),
            refs: map.keys(keys::REFS, "refs")?,
        };

        ensure_canonical(bytes, &value.encode())?;
        Ok(value)
    }
}

/// A root as it travels between peers: the decoded value, the exact bytes
/// that were signed, and the signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Root {
    value: RootValue,
    encoded: Bytes,
    signature: Ed25519Signature,
}

impl Root {
    /// Decode and validate a root received from elsewhere.
    ///
    /// Checks the canonical encoding, structural rules and the signature.
    pub fn decode(signature: Ed25519Signature, encoded: Bytes) -> Result<Self, ValidationError> {
        let value = RootValue::decode(&encoded)?;
        let root = Self {
            value,
            encoded,
            signature,
        };
        validate_root(&root)?;
        Ok(root)
    }

    /// Assemble a root from trusted parts (for example, from local storage).
    ///
    /// No validation is performed.
    pub fn from_trusted_parts(
        value: RootValue,
        encoded: Bytes,
        signature: Ed25519Signature,
    ) -> Self {
        Self {
            value,
            encoded,
            signature,
        }
    }

    pub fn value(&self) -> &RootValue {
        &self.value
    }

    pub fn feed(&self) -> FeedId {
        self.value.feed
    }

    pub fn nonce(&self) -> u64 {
        self.value.nonce
    }

    pub fn seq(&self) -> u64 {
        self.value.seq
    }

    pub fn head(&self) -> HeadId {
        self.value.head()
    }

    pub fn timestamp(&self) -> i64 {
        self.value.timestamp
    }

    pub fn refs(&self) -> &[ObjectKey] {
        &self.value.refs
    }

    /// The exact bytes covered by the signature.
    pub fn encoded(&self) -> &Bytes {
        &self.encoded
    }

    pub fn signature(&self) -> &Ed25519Signature {
        &self.signature
    }

    /// Content hash of the encoded value. Used as `prev` by the next root.
    pub fn hash(&self) -> ObjectKey {
        ObjectKey::of(&self.encoded)
    }

    /// Short human-readable form for logs: `feed/nonce#seq`.
    pub fn short(&self) -> String {
        format!("{}#{}", self.head(), self.seq())
    }
}

/// The message actually signed: domain separator followed by the value.
pub fn signed_message(encoded: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(ROOT_SIGN_DOMAIN.len() + encoded.len());
    buf.extend_from_slice(ROOT_SIGN_DOMAIN);
    buf.extend_from_slice(encoded);
    buf
}

/// Builder for creating signed roots.
#[derive(Debug, Clone)]
pub struct RootBuilder {
    value: RootValue,
}

impl RootBuilder {
    /// Start a root for the given head position.
    pub fn new(head: HeadId, seq: u64) -> Self {
        Self {
            value: RootValue {
                version: ROOT_VERSION,
                feed: head.feed,
                nonce: head.nonce,
                seq,
                timestamp: 0,
                prev: None,
                refs: Vec::new(),
            },
        }
    }

    /// Start the root that follows `prev` on the same head.
    pub fn after(prev: &Root) -> Self {
        Self::new(prev.head(), prev.seq() + 1).prev(prev.hash())
    }

    pub fn timestamp(mut self, timestamp: i64) -> Self {
        self.value.timestamp = timestamp;
        self
    }

    pub fn prev(mut self, prev: ObjectKey) -> Self {
        self.value.prev = Some(prev);
        self
    }

    pub fn add_ref(mut self, key: ObjectKey) -> Self {
        self.value.refs.push(key);
        self
    }

    pub fn refs(mut self, refs: Vec<ObjectKey>) -> Self {
        self.value.refs = refs;
        self
    }

    /// Encode and sign with the feed's keypair.
    pub fn sign(self, keypair: &Keypair) -> Root {
        let encoded = self.value.encode();
        let signature = keypair.sign(&signed_message(&encoded));
        Root {
            value: self.value,
            encoded: Bytes::from(encoded),
            signature,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keypair() -> Keypair {
        Keypair::from_seed(&[0x42; 32])
    }

    fn sample(seq: u64) -> Root {
        let kp = keypair();
        RootBuilder::new(HeadId::new(kp.feed_id(), 7), seq)
            .timestamp(1_736_870_400_000)
            .add_ref(ObjectKey::of(b"a"))
            .add_ref(ObjectKey::of(b"b"))
            .sign(&kp)
    }

    #[test]
    fn test_root_decode_roundtrip() {
        let root = sample(1);
        let decoded = Root::decode(*root.signature(), root.encoded().clone()).unwrap();
        assert_eq!(decoded, root);
        assert_eq!(decoded.head(), HeadId::new(keypair().feed_id(), 7));
        assert_eq!(decoded.refs().len(), 2);
    }

    #[test]
    fn test_encoding_deterministic() {
        assert_eq!(sample(3).encoded(), sample(3).encoded());
        assert_ne!(sample(3).hash(), sample(4).hash());
    }

    #[test]
    fn test_after_links_prev() {
        let first = sample(1);
        let second = RootBuilder::after(&first).sign(&keypair());
        assert_eq!(second.seq(), 2);
        assert_eq!(second.value().prev, Some(first.hash()));
        assert_eq!(second.head(), first.head());
    }

    #[test]
    fn test_tampered_value_rejected() {
        let root = sample(1);
        let mut other = root.value().clone();
        other.seq = 99;
        let forged = Bytes::from(other.encode());
        assert!(matches!(
            Root::decode(*root.signature(), forged),
            Err(ValidationError::SignatureFailed)
        ));
    }

    #[test]
    fn test_garbage_rejected() {
        let result = Root::decode(Ed25519Signature::ZERO, Bytes::from_static(b"\x01\x02"));
        assert!(matches!(result, Err(ValidationError::StructuralError(_))));
    }

    #[test]
    fn test_non_canonical_rejected() {
        let root = sample(1);
        let mut bytes = root.encoded().to_vec();
        bytes.push(0x00);
        let result = Root::decode(*root.signature(), Bytes::from(bytes));
        assert!(result.is_err());
    }

    #[test]
    fn test_short_form() {
        let root = sample(5);
        assert!(root.short().ends_with("/7#5"));
    }
}
