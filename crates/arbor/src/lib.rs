//! # Arbor
//!
//! Peer-to-peer synchronization of signed feed roots and the
//! content-addressed object trees they reference.
//!
//! ## Overview
//!
//! - **Objects**: Immutable bytes addressed by their Blake3 hash
//! - **Feeds**: Ed25519 keys that sign roots; each feed has heads (nonces)
//! - **Roots**: Signed, sequenced snapshots of a head's object tree
//! - **Sync**: Peers subscribe to feeds, announce roots and fill the object
//!   trees they are missing
//!
//! ## Usage
//!
//! ```rust,no_run
//! use arbor::{Keypair, Node, NodeConfig};
//! use arbor::core::ObjectNode;
//! use arbor::store::MemoryStore;
//!
//! async fn example() -> arbor::Result<()> {
//!     let publisher = Node::new(MemoryStore::new(), NodeConfig::default());
//!     let reader = Node::new(MemoryStore::new(), NodeConfig::default());
//!
//!     // Build a tree and publish a root over it
//!     let feed = Keypair::generate();
//!     let leaf = publisher.put_object(b"hello".to_vec()).await?;
//!     let top = publisher.put_node(&ObjectNode::new(vec![leaf], b"dir".to_vec())).await?;
//!     let root = publisher.commit(&feed, 1, vec![top]).await?;
//!
//!     // Link the nodes and subscribe: the reader fills the tree
//!     let (conn, _) = reader.connect_local(&publisher);
//!     conn.subscribe(feed.feed_id()).await?;
//!     # let _ = root;
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `arbor::core` - Identifiers, roots and the object envelope
//! - `arbor::store` - Object store trait, memory and SQLite stores
//! - `arbor::sync` - Wire protocol and connection actor

pub mod config;
pub mod error;
pub mod node;

// Re-export component crates
pub use arbor_core as core;
pub use arbor_store as store;
pub use arbor_sync as sync;

pub use config::NodeConfig;
pub use error::{NodeError, Result};
pub use node::Node;

// Re-export commonly used types
pub use arbor_core::{FeedId, HeadId, Keypair, ObjectKey, ObjectNode, Root, RootBuilder};
pub use arbor_sync::{Connection, Direction, FillStatus, SyncConfig, SyncError};
