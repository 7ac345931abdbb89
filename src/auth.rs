//! Credential material for bus authentication.
//!
//! The bus authenticates connections with a seed-derived Ed25519 keypair:
//! the client proves key ownership by signing a server-issued nonce during
//! the handshake. The seed is consumed by `connect()` and zeroized on drop,
//! so the secret never outlives the handshake.

use base64::{engine::general_purpose, Engine as _};
use ed25519_dalek::{Signer, SigningKey};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Secret seed used to authenticate a bus connection.
///
/// Consumed by [`SkiffClient::connect`](crate::SkiffClient::connect); the
/// seed material is wiped from memory when the value drops. There is no
/// `Clone`: one seed, one connect attempt.
///
/// # Examples
///
/// ```rust
/// use skiff_link::CredentialSeed;
///
/// let seed = CredentialSeed::new("SKIFF-SEED-7f02c1d9");
/// println!("connecting as {}", seed.public_key());
/// ```
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct CredentialSeed {
    seed: String,
}

impl CredentialSeed {
    /// Create credential material from a seed string.
    ///
    /// The seed is opaque to the client; the bus operator issues it.
    pub fn new(seed: impl Into<String>) -> Self {
        Self { seed: seed.into() }
    }

    /// Base64 public key derived from this seed.
    ///
    /// This is the identity the bus sees; safe to log and to register with
    /// the bus operator.
    pub fn public_key(&self) -> String {
        let verifying_key = self.signing_key().verifying_key();
        general_purpose::STANDARD.encode(verifying_key.as_bytes())
    }

    /// Derive the Ed25519 signing key: SHA-256 of the seed bytes is the
    /// 32-byte secret key.
    pub(crate) fn signing_key(&self) -> SigningKey {
        let digest = Sha256::digest(self.seed.as_bytes());
        let mut key_bytes = [0u8; 32];
        key_bytes.copy_from_slice(&digest);
        SigningKey::from_bytes(&key_bytes)
    }

    /// Sign a server-issued nonce, returning the base64 signature for the
    /// auth frame.
    pub(crate) fn sign_nonce(&self, nonce: &[u8]) -> String {
        let signature = self.signing_key().sign(nonce);
        general_purpose::STANDARD.encode(signature.to_bytes())
    }
}

impl std::fmt::Debug for CredentialSeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the seed itself.
        f.debug_struct("CredentialSeed")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}
