//! Feed key material
//!
//! Each feed is keyed by an Ed25519 keypair:
//! - Public key: the feed's identity (32 bytes)
//! - Secret key: required to append; absent on read-only feeds
//!
//! The discovery key is a keyed BLAKE3 hash of the public key and is the
//! store's internal identifier for the feed.

use crate::types::{DiscoveryKey, FeedKey, SecretKey};
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use thiserror::Error;

/// Domain string mixed into discovery-key derivation.
const DISCOVERY_CONTEXT: &[u8; 32] = b"feedstore/discovery/v1..........";

/// Errors that can occur when handling key material
#[derive(Error, Debug)]
pub enum KeyError {
    #[error("invalid public key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("invalid secret key length: expected 32 bytes, got {0}")]
    InvalidSecretKeyLength(usize),

    #[error("secret key does not match public key")]
    SecretKeyMismatch,

    #[error("malformed public key")]
    MalformedKey,

    #[error("invalid signature")]
    InvalidSignature,
}

/// An Ed25519 keypair for a writable feed.
#[derive(Clone)]
pub struct Keypair {
    pub public: FeedKey,
    pub secret: SecretKey,
}

impl Keypair {
    /// Generate a fresh random keypair.
    pub fn generate() -> Self {
        let signing = SigningKey::generate(&mut OsRng);
        Self {
            public: FeedKey(signing.verifying_key().to_bytes()),
            secret: SecretKey(signing.to_bytes()),
        }
    }

    /// Rebuild a keypair from a secret key.
    pub fn from_secret(secret: SecretKey) -> Self {
        let signing = SigningKey::from_bytes(secret.as_bytes());
        Self {
            public: FeedKey(signing.verifying_key().to_bytes()),
            secret,
        }
    }
}

/// Derive the public key that corresponds to a secret key.
pub fn public_from_secret(secret: &SecretKey) -> FeedKey {
    let signing = SigningKey::from_bytes(secret.as_bytes());
    FeedKey(signing.verifying_key().to_bytes())
}

/// Check that a (public, secret) pair actually belongs together.
pub fn verify_pair(public: &FeedKey, secret: &SecretKey) -> Result<(), KeyError> {
    if public_from_secret(secret) != *public {
        return Err(KeyError::SecretKeyMismatch);
    }
    Ok(())
}

/// Derive the discovery key for a public key.
///
/// Deterministic: the same public key always yields the same discovery key,
/// so the store can use it as the canonical feed identifier.
pub fn discovery_key(key: &FeedKey) -> DiscoveryKey {
    DiscoveryKey(*blake3::keyed_hash(DISCOVERY_CONTEXT, key.as_bytes()).as_bytes())
}

/// Sign a message with a feed secret key.
pub fn sign(secret: &SecretKey, message: &[u8]) -> [u8; 64] {
    let signing = SigningKey::from_bytes(secret.as_bytes());
    signing.sign(message).to_bytes()
}

/// Verify a signature against a feed public key.
pub fn verify(public: &FeedKey, message: &[u8], signature: &[u8; 64]) -> Result<(), KeyError> {
    let verifying =
        VerifyingKey::from_bytes(public.as_bytes()).map_err(|_| KeyError::MalformedKey)?;
    let signature = ed25519_dalek::Signature::from_bytes(signature);
    verifying
        .verify(message, &signature)
        .map_err(|_| KeyError::InvalidSignature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_pair_matches() {
        let pair = Keypair::generate();
        assert!(verify_pair(&pair.public, &pair.secret).is_ok());
    }

    #[test]
    fn test_public_from_secret_stable() {
        let pair = Keypair::generate();
        assert_eq!(public_from_secret(&pair.secret), pair.public);
        let rebuilt = Keypair::from_secret(pair.secret);
        assert_eq!(rebuilt.public, pair.public);
    }

    #[test]
    fn test_discovery_key_deterministic() {
        let pair = Keypair::generate();
        assert_eq!(discovery_key(&pair.public), discovery_key(&pair.public));
    }

    #[test]
    fn test_discovery_key_differs_from_key() {
        let pair = Keypair::generate();
        let dk = discovery_key(&pair.public);
        assert_ne!(dk.as_bytes(), pair.public.as_bytes());
    }

    #[test]
    fn test_distinct_keys_distinct_discovery() {
        let a = Keypair::generate();
        let b = Keypair::generate();
        assert_ne!(discovery_key(&a.public), discovery_key(&b.public));
    }

    #[test]
    fn test_sign_and_verify() {
        let pair = Keypair::generate();
        let sig = sign(&pair.secret, b"hello feeds");
        assert!(verify(&pair.public, b"hello feeds", &sig).is_ok());
        assert!(verify(&pair.public, b"tampered", &sig).is_err());
    }

    #[test]
    fn test_mismatched_pair_rejected() {
        let a = Keypair::generate();
        let b = Keypair::generate();
        assert!(matches!(
            verify_pair(&a.public, &b.secret),
            Err(KeyError::SecretKeyMismatch)
        ));
    }
}
