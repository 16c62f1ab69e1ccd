//! SQLite implementation of the ObjectStore trait.
//!
//! This is the primary storage backend for Arbor. It uses rusqlite with
//! bundled SQLite, wrapped in async via tokio::spawn_blocking.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use arbor_core::{Ed25519Signature, FeedId, HeadId, ObjectKey, Root, RootValue};

use crate::error::{Result, StoreError};
use crate::migration::{self, now_millis};
use crate::traits::{verify_key, ObjectStore};

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct SqliteStore {
    /// The SQLite connection, protected by a mutex.
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        debug!(path = %path.as_ref().display(), "opening sqlite store");
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a blocking operation on the connection in the blocking pool.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(|e| {
                StoreError::Database(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_LOCKED),
                    Some(format!("mutex poisoned: {}", e)),
                ))
            })?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Task(format!("spawn_blocking failed: {}", e)))?
    }
}

/// Nonces use the full u64 range; SQLite integers are i64. Store the bits.
fn nonce_to_sql(nonce: u64) -> i64 {
    nonce as i64
}

fn nonce_from_sql(nonce: i64) -> u64 {
    nonce as u64
}

// Flips the top bit so that SQLite's signed ordering matches u64 ordering.
fn seq_to_sql(seq: u64) -> i64 {
    (seq ^ (1 << 63)) as i64
}

// Helper to rebuild a Root from a stored row.
fn row_to_root(value: Vec<u8>, signature: Vec<u8>) -> Result<Root> {
    let decoded = RootValue::decode(&value)?;
    let signature = Ed25519Signature::try_from(signature.as_slice())
        .map_err(|_| StoreError::InvalidData("stored signature has wrong length".into()))?;
    Ok(Root::from_trusted_parts(decoded, Bytes::from(value), signature))
}

#[async_trait]
impl ObjectStore for SqliteStore {
    // ─────────────────────────────────────────────────────────────────────────
    // Object Operations
    // ─────────────────────────────────────────────────────────────────────────

    async fn get(&self, key: &ObjectKey) -> Result<Option<Bytes>> {
        let key = *key;
        self.blocking(move |conn| {
            let bytes: Option<Vec<u8>> = conn
                .query_row(
                    "SELECT bytes FROM objects WHERE object_key = ?1",
                    params![key.as_bytes().as_slice()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(bytes.map(Bytes::from))
        })
        .await
    }

    async fn put(&self, key: &ObjectKey, bytes: Bytes) -> Result<()> {
        verify_key(key, &bytes)?;
        let key = *key;
        self.blocking(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO objects (object_key, bytes) VALUES (?1, ?2)",
                params![key.as_bytes().as_slice(), bytes.as_ref()],
            )?;
            Ok(())
        })
        .await
    }

    async fn has(&self, key: &ObjectKey) -> Result<bool> {
        let key = *key;
        self.blocking(move |conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM objects WHERE object_key = ?1",
                    params![key.as_bytes().as_slice()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Root Operations
    // ─────────────────────────────────────────────────────────────────────────

    async fn save_root(&self, root: &Root) -> Result<()> {
        let root = root.clone();
        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            let head = root.head();
            let hash = root.hash();

            let existing: Option<Vec<u8>> = tx
                .query_row(
                    "SELECT root_hash FROM roots WHERE feed = ?1 AND nonce = ?2 AND seq = ?3",
                    params![
                        head.feed.as_bytes().as_slice(),
                        nonce_to_sql(head.nonce),
                        seq_to_sql(root.seq())
                    ],
                    |row| row.get(0),
                )
                .optional()?;

            match existing {
                Some(existing) if existing.as_slice() == hash.as_bytes() => return Ok(()),
                Some(_) => {
                    return Err(StoreError::Conflict {
                        head,
                        seq: root.seq(),
                    })
                }
                None => {}
            }

            tx.execute(
                "INSERT INTO roots (feed, nonce, seq, root_hash, value, signature, saved_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    head.feed.as_bytes().as_slice(),
                    nonce_to_sql(head.nonce),
                    seq_to_sql(root.seq()),
                    hash.as_bytes().as_slice(),
                    root.encoded().as_ref(),
                    root.signature().as_bytes().as_slice(),
                    now_millis(),
                ],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn latest_root(&self, head: &HeadId) -> Result<Option<Root>> {
        let head = *head;
        self.blocking(move |conn| {
            let row: Option<(Vec<u8>, Vec<u8>)> = conn
                .query_row(
                    "SELECT value, signature FROM roots
                     WHERE feed = ?1 AND nonce = ?2
                     ORDER BY seq DESC LIMIT 1",
                    params![head.feed.as_bytes().as_slice(), nonce_to_sql(head.nonce)],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            row.map(|(value, signature)| row_to_root(value, signature))
                .transpose()
        })
        .await
    }

    async fn is_saved(&self, root: &Root) -> Result<bool> {
        let head = root.head();
        let seq = root.seq();
        let hash = root.hash();
        self.blocking(move |conn| {
            let existing: Option<Vec<u8>> = conn
                .query_row(
                    "SELECT root_hash FROM roots WHERE feed = ?1 AND nonce = ?2 AND seq = ?3",
                    params![
                        head.feed.as_bytes().as_slice(),
                        nonce_to_sql(head.nonce),
                        seq_to_sql(seq)
                    ],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(existing.is_some_and(|h| h.as_slice() == hash.as_bytes()))
        })
        .await
    }

    async fn heads_of(&self, feed: &FeedId) -> Result<Vec<HeadId>> {
        let feed = *feed;
        self.blocking(move |conn| {
            let mut stmt =
                conn.prepare("SELECT DISTINCT nonce FROM roots WHERE feed = ?1")?;
            let nonces = stmt
                .query_map(params![feed.as_bytes().as_slice()], |row| row.get::<_, i64>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let mut heads: Vec<HeadId> = nonces
                .into_iter()
                .map(|n| HeadId::new(feed, nonce_from_sql(n)))
                .collect();
            heads.sort();
            Ok(heads)
        })
        .await
    }
}
