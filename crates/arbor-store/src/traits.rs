//! ObjectStore trait: the abstract interface for object and root persistence.
//!
//! The sync engine is storage-agnostic. Implementations include SQLite
//! (primary) and in-memory (for tests).

use std::collections::BTreeSet;

use async_trait::async_trait;
use bytes::Bytes;

use arbor_core::{Ed25519Signature, FeedId, HeadId, ObjectKey, ObjectNode, Root};

use crate::error::{Result, StoreError};

/// Outcome of accepting a root offered by a peer.
#[derive(Debug, Clone)]
pub struct AcceptedRoot {
    /// The decoded, validated root.
    pub root: Root,
    /// This exact root is already saved, so its tree is complete locally.
    pub already_full: bool,
}

/// The ObjectStore trait: async interface for objects and roots.
///
/// All methods are async to support both sync (SQLite) and async backends.
/// For SQLite, we use `spawn_blocking` internally to avoid blocking the runtime.
///
/// # Design Notes
///
/// - **Content addressing**: `put` rejects bytes that do not hash to the key.
/// - **Acceptance is not saving**: `accept_root` only decodes and validates.
///   A root is saved once its tree is complete, so `latest_root` always names
///   a root whose objects are all present.
/// - **History**: every saved root is kept; `latest_root` picks the highest
///   sequence number of the head.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Object Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Get an object's bytes by key.
    async fn get(&self, key: &ObjectKey) -> Result<Option<Bytes>>;

    /// Store an object. Storing the same object twice is a no-op.
    ///
    /// Fails with [`StoreError::KeyMismatch`] if `bytes` do not hash to `key`.
    async fn put(&self, key: &ObjectKey, bytes: Bytes) -> Result<()>;

    /// Check if an object is present.
    async fn has(&self, key: &ObjectKey) -> Result<bool>;

    // ─────────────────────────────────────────────────────────────────────────
    // Root Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Record a complete root as saved.
    ///
    /// Saving the same root twice is a no-op; saving a different root at an
    /// already-saved head position fails with [`StoreError::Conflict`].
    async fn save_root(&self, root: &Root) -> Result<()>;

    /// The saved root with the highest sequence number for `head`.
    async fn latest_root(&self, head: &HeadId) -> Result<Option<Root>>;

    /// Whether exactly this root (same position, same hash) is saved.
    async fn is_saved(&self, root: &Root) -> Result<bool>;

    /// All heads of `feed` with at least one saved root.
    async fn heads_of(&self, feed: &FeedId) -> Result<Vec<HeadId>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Derived Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Decode and validate a root received from elsewhere.
    ///
    /// Nothing is written. Validation failures surface as
    /// [`StoreError::Validation`].
    async fn accept_root(&self, signature: &Ed25519Signature, value: Bytes) -> Result<AcceptedRoot> {
        let root = Root::decode(*signature, value)?;
        let already_full = self.is_saved(&root).await?;
        Ok(AcceptedRoot { root, already_full })
    }

    /// Keys reachable from the root's references that are not stored.
    async fn missing_references(&self, root: &Root) -> Result<BTreeSet<ObjectKey>> {
        self.missing_below(root.refs()).await
    }

    /// Walk down from `keys` through present objects, collecting absent keys.
    async fn missing_below(&self, keys: &[ObjectKey]) -> Result<BTreeSet<ObjectKey>> {
        let mut missing = BTreeSet::new();
        let mut seen = BTreeSet::new();
        let mut stack: Vec<ObjectKey> = keys.to_vec();

        while let Some(key) = stack.pop() {
            if !seen.insert(key) {
                continue;
            }
            match self.get(&key).await? {
                Some(bytes) => stack.extend(ObjectNode::refs_of(&bytes)),
                None => {
                    missing.insert(key);
                }
            }
        }

        Ok(missing)
    }
}

/// Check that `bytes` hash to `key`.
pub(crate) fn verify_key(key: &ObjectKey, bytes: &[u8]) -> Result<()> {
    let actual = ObjectKey::of(bytes);
    if actual == *key {
        Ok(())
    } else {
        Err(StoreError::KeyMismatch {
            expected: *key,
            actual,
        })
    }
}
