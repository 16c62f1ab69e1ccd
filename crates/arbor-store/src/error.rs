//! Error types for the store module.

use arbor_core::{CoreError, HeadId, ObjectKey, ValidationError};
use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A root offered for acceptance failed decoding or validation.
    #[error("invalid root: {0}")]
    Validation(#[from] ValidationError),

    /// Object bytes do not hash to the key they were stored under.
    #[error("object key mismatch: expected {expected}, bytes hash to {actual}")]
    KeyMismatch {
        expected: ObjectKey,
        actual: ObjectKey,
    },

    /// A different root is already saved at the same head position.
    #[error("conflict at {head} seq {seq}: a different root is already saved")]
    Conflict { head: HeadId, seq: u64 },

    /// Invalid data in storage.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// The blocking worker running a database call failed.
    #[error("storage task failed: {0}")]
    Task(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Whether this error reports bad input rather than a storage failure.
    ///
    /// Sync treats validation failures as non-fatal to the connection that
    /// delivered the input; everything else means the store is unusable.
    pub fn is_validation(&self) -> bool {
        matches!(self, StoreError::Validation(_) | StoreError::KeyMismatch { .. })
    }
}

impl From<CoreError> for StoreError {
    fn from(e: CoreError) -> Self {
        StoreError::InvalidData(e.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
