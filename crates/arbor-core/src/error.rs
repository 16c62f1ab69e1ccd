//! Error types for Arbor Core.

use thiserror::Error;

/// Core errors that can occur while encoding, decoding or signing.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("malformed root: {0}")]
    MalformedRoot(String),

    #[error("malformed object: {0}")]
    MalformedObject(String),

    #[error("non-canonical encoding")]
    NonCanonical,

    #[error("decoding error: {0}")]
    DecodingError(String),
}

/// Validation errors for root structure and signatures.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("signature verification failed")]
    SignatureFailed,

    #[error("unsupported root version: {0}")]
    UnsupportedVersion(u8),

    #[error("root sequence number must be positive")]
    ZeroSequence,

    #[error("blank feed identifier")]
    BlankFeed,

    #[error("root carries {count} references, maximum is {max}")]
    TooManyRefs { count: usize, max: usize },

    #[error("structural error: {0}")]
    StructuralError(String),
}

impl From<CoreError> for ValidationError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::InvalidSignature | CoreError::InvalidPublicKey => {
                ValidationError::SignatureFailed
            }
            CoreError::MalformedRoot(msg)
            | CoreError::MalformedObject(msg)
            | CoreError::DecodingError(msg) => ValidationError::StructuralError(msg),
            CoreError::NonCanonical => {
                ValidationError::StructuralError("non-canonical encoding".into())
            }
        }
    }
}
