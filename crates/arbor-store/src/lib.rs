//! # Arbor Store
//!
//! Storage abstraction for Arbor. Provides a trait-based interface for
//! content-addressed objects and saved roots, with SQLite and in-memory
//! implementations.
//!
//! ## Overview
//!
//! The store abstracts persistence behind the [`ObjectStore`] trait, allowing
//! the sync engine to be storage-agnostic. The primary implementation is
//! [`SqliteStore`], with [`MemoryStore`] for testing.
//!
//! ## Key Types
//!
//! - [`ObjectStore`] - The async trait for all storage operations
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests
//! - [`AcceptedRoot`] - A validated root plus whether it is already complete
//!
//! ## Usage
//!
//! ```rust,no_run
//! use arbor_store::{ObjectStore, SqliteStore};
//! use arbor_core::ObjectKey;
//! use bytes::Bytes;
//!
//! async fn example() {
//!     let store = SqliteStore::open("arbor.db").unwrap();
//!
//!     let bytes = Bytes::from_static(b"hello");
//!     let key = ObjectKey::of(&bytes);
//!     store.put(&key, bytes).await.unwrap();
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Idempotent writes**: storing the same object or root twice is a no-op
//! - **Complete roots only**: a root is saved once every object it reaches is stored
//! - **Validation vs storage failures**: see [`StoreError::is_validation`]

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{AcceptedRoot, ObjectStore};
