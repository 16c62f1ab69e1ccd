//! Error types for the sync module.

use arbor_core::{FeedId, ValidationError};
use arbor_store::StoreError;
use thiserror::Error;

/// Errors that can occur during sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A frame could not be decoded. The stream is desynchronized.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// A frame carried a message tag this node does not know.
    #[error("unknown message tag: {0}")]
    UnknownTag(u8),

    /// No response arrived before the request deadline.
    #[error("request timed out")]
    Timeout,

    /// The connection closed before the operation completed.
    #[error("connection closed")]
    Closed,

    /// Every sequence number of the connection has been used.
    #[error("sequence numbers exhausted")]
    SequenceExhausted,

    /// The all-zero feed identifier was named.
    #[error("blank feed identifier")]
    BlankFeed,

    /// The local node does not share the feed.
    #[error("feed {0} is not shared")]
    FeedNotShared(FeedId),

    /// The local node refused (subscribe policy or feed limit).
    #[error("rejected: {0}")]
    Rejected(String),

    /// The node does not advertise its feeds.
    #[error("node is not public")]
    NotPublic,

    /// The peer answered with an Error message.
    #[error("peer error: {0}")]
    Peer(String),

    /// The peer answered with a well-formed but unexpected message.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A root failed validation.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl SyncError {
    /// Whether this error terminates the connection it occurred on.
    ///
    /// Decode failures desynchronize the stream; storage failures leave the
    /// protocol unable to proceed. Everything else is reported or logged and
    /// the connection stays up.
    pub fn is_fatal(&self) -> bool {
        match self {
            SyncError::MalformedFrame(_)
            | SyncError::UnknownTag(_)
            | SyncError::SequenceExhausted => true,
            SyncError::Store(e) => !e.is_validation(),
            _ => false,
        }
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
