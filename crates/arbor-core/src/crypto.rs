//! Cryptographic primitives for Arbor.
//!
//! Wraps Ed25519 signing with strong types. A feed is identified by the
//! public half of its keypair; only the holder of the secret half can
//! produce roots for it.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use std::fmt;

use crate::error::CoreError;
use crate::types::{fixed_bytes, FeedId};

/// A 64-byte Ed25519 signature.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Ed25519Signature(pub [u8; 64]);

fixed_bytes!(Ed25519Signature, 64, "Ed25519Sig");

impl FeedId {
    /// Verify a signature made by this feed's key over `message`.
    pub fn verify(&self, message: &[u8], signature: &Ed25519Signature) -> Result<(), CoreError> {
        let verifying_key =
            VerifyingKey::from_bytes(&self.0).map_err(|_| CoreError::InvalidPublicKey)?;

        let sig = Signature::from_bytes(&signature.0);

        verifying_key
            .verify(message, &sig)
            .map_err(|_| CoreError::InvalidSignature)
    }
}

/// A feed keypair, used to sign roots.
///
/// This wraps ed25519-dalek's SigningKey.
#[derive(Clone)]
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let signing_key = SigningKey::generate(&mut rng);
        Self { signing_key }
    }

    /// Create from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        Self { signing_key }
    }

    /// The feed this keypair owns.
    pub fn feed_id(&self) -> FeedId {
        FeedId(self.signing_key.verifying_key().to_bytes())
    }

    /// Sign a message.
    pub fn sign(&self, message: &[u8]) -> Ed25519Signature {
        let sig = self.signing_key.sign(message);
        Ed25519Signature(sig.to_bytes())
    }

    /// Get the raw seed bytes (secret key material).
    pub fn seed(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Keypair({:?})", self.feed_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_sign_verify() {
        let keypair = Keypair::generate();
        let signature = keypair.sign(b"hello world");

        keypair
            .feed_id()
            .verify(b"hello world", &signature)
            .expect("valid signature should verify");

        assert!(keypair.feed_id().verify(b"hello worlD", &signature).is_err());
    }

    #[test]
    fn test_keypair_deterministic_from_seed() {
        let kp1 = Keypair::from_seed(&[0x42; 32]);
        let kp2 = Keypair::from_seed(&[0x42; 32]);
        assert_eq!(kp1.feed_id(), kp2.feed_id());
        assert_eq!(kp1.seed(), [0x42; 32]);
    }

    #[test]
    fn test_signature_from_other_feed_fails() {
        let a = Keypair::from_seed(&[1; 32]);
        let b = Keypair::from_seed(&[2; 32]);
        let signature = a.sign(b"root");
        assert!(matches!(
            b.feed_id().verify(b"root", &signature),
            Err(CoreError::InvalidSignature)
        ));
    }

    #[test]
    fn test_signature_serde_roundtrip() {
        let signature = Keypair::from_seed(&[9; 32]).sign(b"x");
        let mut buf = Vec::new();
        ciborium::into_writer(&signature, &mut buf).unwrap();
        let decoded: Ed25519Signature = ciborium::from_reader(&buf[..]).unwrap();
        assert_eq!(decoded, signature);
    }
}
