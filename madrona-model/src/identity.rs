//! Node identity and cryptographic keys
//!
//! Each node holds an Ed25519 keypair:
//! - Private key: stored locally in a key file (never replicated)
//! - Public key: 32 bytes; the node's 20-byte address is derived from it

use crate::types::{Address, PubKey, Signature as Sig};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during identity operations
#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("Invalid public key")]
    InvalidPublicKey,

    #[error("Invalid signature")]
    InvalidSignature,
}

/// A signing identity for one peer.
///
/// Transactions are signed with this key; the sender address carried in
/// each transaction must match the key the signature verifies against.
#[derive(Clone)]
pub struct NodeIdentity {
    signing_key: SigningKey,
}

impl NodeIdentity {
    /// Generate a new identity with a random keypair.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    /// Create an identity from an existing signing key.
    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        Self { signing_key }
    }

    /// Load an identity from a key file, or generate and save if it doesn't exist.
    /// Returns (identity, is_new) where is_new is true if a new identity was generated.
    pub fn load_or_generate(path: impl AsRef<Path>) -> Result<(Self, bool), IdentityError> {
        let path = path.as_ref();
        if path.exists() {
            Ok((Self::load(path)?, false))
        } else {
            let identity = Self::generate();
            identity.save(path)?;
            Ok((identity, true))
        }
    }

    /// Load an identity from a key file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, IdentityError> {
        use zeroize::Zeroizing;

        // Read into a Zeroizing wrapper so the heap copy is wiped
        let bytes = Zeroizing::new(fs::read(path)?);

        if bytes.len() != 32 {
            return Err(IdentityError::InvalidKeyLength(bytes.len()));
        }

        let mut key_bytes = Zeroizing::new([0u8; 32]);
        key_bytes.copy_from_slice(&bytes);

        let signing_key = SigningKey::from_bytes(&key_bytes);
        Ok(Self { signing_key })
    }

    /// Save the private key to a file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), IdentityError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = fs::File::create(path)?;
        file.write_all(self.signing_key.as_bytes())?;
        Ok(())
    }

    /// The public key as a strong type.
    pub fn public_key(&self) -> PubKey {
        PubKey::from(self.signing_key.verifying_key().to_bytes())
    }

    /// The sender address derived from the public key.
    pub fn address(&self) -> Address {
        Address::from_pubkey(&self.public_key())
    }

    /// Sign a message.
    pub fn sign(&self, message: &[u8]) -> Sig {
        Sig::from(self.signing_key.sign(message).to_bytes())
    }

    /// Verify a signature using a raw public key.
    pub fn verify_with_key(
        pubkey: &PubKey,
        message: &[u8],
        signature: &Sig,
    ) -> Result<(), IdentityError> {
        let verifying_key = VerifyingKey::from_bytes(pubkey.as_bytes())
            .map_err(|_| IdentityError::InvalidPublicKey)?;
        let signature = Signature::from_bytes(signature.as_bytes());
        verifying_key
            .verify(message, &signature)
            .map_err(|_| IdentityError::InvalidSignature)
    }
}

impl std::fmt::Debug for NodeIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeIdentity")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let identity = NodeIdentity::generate();
        let message = b"hello madrona";

        let signature = identity.sign(message);
        assert!(NodeIdentity::verify_with_key(&identity.public_key(), message, &signature).is_ok());
    }

    #[test]
    fn test_verify_wrong_message() {
        let identity = NodeIdentity::generate();
        let signature = identity.sign(b"original");

        assert!(
            NodeIdentity::verify_with_key(&identity.public_key(), b"tampered", &signature).is_err()
        );
    }

    #[test]
    fn test_verify_with_different_key() {
        let id1 = NodeIdentity::generate();
        let id2 = NodeIdentity::generate();

        let signature = id1.sign(b"message");
        assert!(NodeIdentity::verify_with_key(&id2.public_key(), b"message", &signature).is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.key");

        let id1 = NodeIdentity::generate();
        id1.save(&path).unwrap();

        let id2 = NodeIdentity::load(&path).unwrap();
        assert_eq!(id1.public_key(), id2.public_key());
        assert_eq!(id1.address(), id2.address());
    }

    #[test]
    fn test_load_or_generate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.key");

        let (id1, is_new1) = NodeIdentity::load_or_generate(&path).unwrap();
        assert!(is_new1, "should be newly generated");

        let (id2, is_new2) = NodeIdentity::load_or_generate(&path).unwrap();
        assert!(!is_new2, "should load existing");

        assert_eq!(id1.public_key(), id2.public_key());
    }
}
