//! Strong type definitions for Arbor.
//!
//! All identifiers are newtypes over fixed-size byte arrays so that a feed key
//! can never be passed where an object key is expected.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Implements the shared surface of a fixed-size byte identifier: hex
/// conversion, `Debug`/`Display`, byte conversions and a compact serde form
/// (a single CBOR byte string rather than an array of integers).
macro_rules! fixed_bytes {
    ($name:ident, $len:expr, $label:expr) => {
        impl $name {
            /// Create from raw bytes.
            pub const fn from_bytes(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            /// Get the raw bytes.
            pub const fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            /// Convert to hex string.
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            /// Parse from hex string.
            pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
                let bytes = hex::decode(s)?;
                let arr: [u8; $len] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| hex::FromHexError::InvalidStringLength)?;
                Ok(Self(arr))
            }

            /// The all-zero value.
            pub const ZERO: Self = Self([0u8; $len]);

            /// Whether this is the all-zero value.
            pub fn is_zero(&self) -> bool {
                self.0 == [0u8; $len]
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}({})", $label, &self.to_hex()[..16])
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", &self.to_hex()[..16])
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl From<[u8; $len]> for $name {
            fn from(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }
        }

        impl TryFrom<&[u8]> for $name {
            type Error = std::array::TryFromSliceError;

            fn try_from(slice: &[u8]) -> Result<Self, Self::Error> {
                let arr: [u8; $len] = slice.try_into()?;
                Ok(Self(arr))
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_bytes(&self.0)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                struct BytesVisitor;

                impl<'de> serde::de::Visitor<'de> for BytesVisitor {
                    type Value = $name;

                    fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                        write!(f, "{} bytes", $len)
                    }

                    fn visit_bytes<E: serde::de::Error>(self, v: &[u8]) -> Result<$name, E> {
                        <[u8; $len]>::try_from(v)
                            .map($name)
                            .map_err(|_| E::invalid_length(v.len(), &self))
                    }

                    fn visit_seq<A: serde::de::SeqAccess<'de>>(
                        self,
                        mut seq: A,
                    ) -> Result<$name, A::Error> {
                        let mut arr = [0u8; $len];
                        for (i, slot) in arr.iter_mut().enumerate() {
                            *slot = seq
                                .next_element()?
                                .ok_or_else(|| serde::de::Error::invalid_length(i, &self))?;
                        }
                        Ok($name(arr))
                    }
                }

                deserializer.deserialize_bytes(BytesVisitor)
            }
        }
    };
}

pub(crate) use fixed_bytes;

/// A 32-byte object key: the Blake3 hash of the object's bytes.
///
/// This is the content-address of an object. Two objects with the same
/// bytes have the same key.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey(pub [u8; 32]);

fixed_bytes!(ObjectKey, 32, "ObjectKey");

impl ObjectKey {
    /// Compute the key of the given object bytes.
    pub fn of(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Check that `data` hashes to this key.
    pub fn matches(&self, data: &[u8]) -> bool {
        Self::of(data) == *self
    }
}

/// A 32-byte feed identifier: the Ed25519 public key of the feed owner.
///
/// The zero value is the "blank" feed and is rejected everywhere a feed is
/// named on the wire.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FeedId(pub [u8; 32]);

fixed_bytes!(FeedId, 32, "Feed");

impl FeedId {
    /// Whether this is the blank (all-zero) feed.
    pub fn is_blank(&self) -> bool {
        self.is_zero()
    }
}

/// One versioned lineage of roots within a feed.
///
/// Roots of the same head are totally ordered by sequence number; roots of
/// different heads are independent.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HeadId {
    /// The feed this head belongs to.
    pub feed: FeedId,
    /// Distinguishes concurrent lineages of the same feed.
    pub nonce: u64,
}

impl HeadId {
    /// Create a head identifier.
    pub const fn new(feed: FeedId, nonce: u64) -> Self {
        Self { feed, nonce }
    }

    /// Create a head with a random nonce.
    pub fn random(feed: FeedId) -> Self {
        use rand::Rng;
        Self {
            feed,
            nonce: rand::thread_rng().gen(),
        }
    }
}

impl fmt::Debug for HeadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Head({}/{})", self.feed, self.nonce)
    }
}

impl fmt::Display for HeadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.feed, self.nonce)
    }
}
