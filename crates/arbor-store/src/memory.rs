//! In-memory implementation of the ObjectStore trait.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! but keeps everything in memory with no persistence.

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use bytes::Bytes;

use arbor_core::{FeedId, HeadId, ObjectKey, Root};

use crate::error::{Result, StoreError};
use crate::traits::{verify_key, ObjectStore};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    /// Objects indexed by key.
    objects: HashMap<ObjectKey, Bytes>,

    /// Saved roots per head, ordered by seq.
    roots: HashMap<HeadId, BTreeMap<u64, Root>>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
        }
    }

    /// Number of stored objects.
    pub fn object_count(&self) -> usize {
        self.read().objects.len()
    }

    fn read(&self) -> RwLockReadGuard<'_, MemoryStoreInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, MemoryStoreInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, key: &ObjectKey) -> Result<Option<Bytes>> {
        Ok(self.read().objects.get(key).cloned())
    }

    async fn put(&self, key: &ObjectKey, bytes: Bytes) -> Result<()> {
        verify_key(key, &bytes)?;
        self.write().objects.entry(*key).or_insert(bytes);
        Ok(())
    }

    async fn has(&self, key: &ObjectKey) -> Result<bool> {
        Ok(self.read().objects.contains_key(key))
    }

    async fn save_root(&self, root: &Root) -> Result<()> {
        let mut inner = self.write();
        let saved = inner.roots.entry(root.head()).or_default();

        match saved.get(&root.seq()) {
            Some(existing) if existing.hash() == root.hash() => Ok(()),
            Some(_) => Err(StoreError::Conflict {
                head: root.head(),
                seq: root.seq(),
            }),
            None => {
                saved.insert(root.seq(), root.clone());
                Ok(())
            }
        }
    }

    async fn latest_root(&self, head: &HeadId) -> Result<Option<Root>> {
        let inner = self.read();
        Ok(inner
            .roots
            .get(head)
            .and_then(|saved| saved.values().next_back())
            .cloned())
    }

    async fn is_saved(&self, root: &Root) -> Result<bool> {
        let inner = self.read();
        Ok(inner
            .roots
            .get(&root.head())
            .and_then(|saved| saved.get(&root.seq()))
            .is_some_and(|existing| existing.hash() == root.hash()))
    }

    async fn heads_of(&self, feed: &FeedId) -> Result<Vec<HeadId>> {
        let inner = self.read();
        let mut heads: Vec<HeadId> = inner
            .roots
            .keys()
            .filter(|head| head.feed == *feed)
            .copied()
            .collect();
        heads.sort();
        Ok(heads)
    }
}
