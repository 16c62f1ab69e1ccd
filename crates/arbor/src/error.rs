//! Error types for the node.

use arbor_core::{HeadId, ValidationError};
use arbor_store::StoreError;
use arbor_sync::SyncError;
use thiserror::Error;

/// Errors that can occur during node operations.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Validation error.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Sync error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// A root was published before every object it reaches was stored.
    #[error("root {root} references {missing} missing objects")]
    IncompleteTree { root: String, missing: usize },

    /// A root at or below the stored sequence of its head.
    #[error("stale root for {head}: seq {seq}, latest is {latest}")]
    StaleRoot { head: HeadId, seq: u64, latest: u64 },

    /// Configuration could not be parsed.
    #[error("config error: {0}")]
    Config(#[from] serde_json::Error),

    /// Configuration file could not be read.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;
