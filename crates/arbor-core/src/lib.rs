//! # Arbor Core
//!
//! Pure primitives for Arbor: feed identifiers, signed roots and the object
//! envelope used to walk content-addressed trees.
//!
//! This crate contains no I/O, no storage, no networking. It is pure computation
//! over cryptographic data structures.
//!
//! ## Key Types
//!
//! - [`FeedId`] - A feed, named by its owner's Ed25519 public key
//! - [`HeadId`] - One lineage of roots within a feed (feed + nonce)
//! - [`Root`] - A signed, versioned reference into a feed's object tree
//! - [`ObjectKey`] - Content address of an object (Blake3 hash)
//! - [`ObjectNode`] - Envelope for objects that reference other objects
//!
//! ## Canonicalization
//!
//! Roots and object envelopes are encoded using deterministic CBOR. See the
//! [`canonical`] module.

pub mod canonical;
pub mod crypto;
pub mod error;
pub mod object;
pub mod root;
pub mod types;
pub mod validation;

pub use crypto::{Ed25519Signature, Keypair};
pub use error::{CoreError, ValidationError};
pub use object::ObjectNode;
pub use root::{Root, RootBuilder, RootValue, MAX_ROOT_REFS, ROOT_VERSION};
pub use types::{FeedId, HeadId, ObjectKey};
pub use validation::{validate_root, validate_root_structure};
