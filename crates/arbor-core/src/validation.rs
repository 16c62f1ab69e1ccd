//! Root validation: signature verification and structural checks.

use crate::error::ValidationError;
use crate::root::{signed_message, Root, RootValue, MAX_ROOT_REFS, ROOT_VERSION};

/// Validate a root's structure and signature.
///
/// This performs:
/// - Structural rules (see [`validate_root_structure`])
/// - Signature verification against the feed key
pub fn validate_root(root: &Root) -> Result<(), ValidationError> {
    validate_root_structure(root.value())?;

    root.feed()
        .verify(&signed_message(root.encoded()), root.signature())
        .map_err(|_| ValidationError::SignatureFailed)
}

/// Validate root structure without signature verification.
pub fn validate_root_structure(value: &RootValue) -> Result<(), ValidationError> {
    if value.version != ROOT_VERSION {
        return Err(ValidationError::UnsupportedVersion(value.version));
    }

    if value.feed.is_blank() {
        return Err(ValidationError::BlankFeed);
    }

    if value.seq == 0 {
        return Err(ValidationError::ZeroSequence);
    }

    if value.refs.len() > MAX_ROOT_REFS {
        return Err(ValidationError::TooManyRefs {
            count: value.refs.len(),
            max: MAX_ROOT_REFS,
        });
    }

    if value.seq == 1 && value.prev.is_some() {
        return Err(ValidationError::StructuralError(
            "first root of a head cannot have prev".into(),
        ));
    }

    Ok(())
}
