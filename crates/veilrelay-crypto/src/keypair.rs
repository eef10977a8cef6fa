//! Session keypair generation.
//!
//! Each chat session owns one static secp256k1 keypair, generated at
//! registration and dropped with the session. Nothing is persisted.

use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::{PublicKey, SecretKey};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::error::CryptoError;

/// Size of a secp256k1 private scalar in bytes.
pub const SECRET_KEY_SIZE: usize = 32;

/// Upper bound on redraws before giving up on the RNG.
///
/// A uniformly random 32-byte string falls outside `[1, n)` with probability
/// below 2^-127, so hitting this bound means the entropy source is broken.
const MAX_SCALAR_DRAWS: usize = 64;

/// A secp256k1 keypair for one session.
#[derive(Clone)]
pub struct KeyPair {
    secret: SecretKey,
    public: PublicKey,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public_key_hex())
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl KeyPair {
    /// Generate a fresh keypair from the OS random source.
    ///
    /// Draws 32 bytes and rejects any value that is zero or not below the
    /// curve order, so the scalar is uniform over `[1, n)`.
    pub fn generate() -> Result<Self, CryptoError> {
        Self::generate_from_rng(&mut OsRng)
    }

    /// Generate a keypair from an explicit RNG.
    pub fn generate_from_rng<R: RngCore>(rng: &mut R) -> Result<Self, CryptoError> {
        let mut bytes = [0u8; SECRET_KEY_SIZE];
        for _ in 0..MAX_SCALAR_DRAWS {
            rng.try_fill_bytes(&mut bytes)
                .map_err(|e| CryptoError::EntropyUnavailable(e.to_string()))?;
            let candidate = SecretKey::from_slice(&bytes);
            bytes.zeroize();
            if let Ok(secret) = candidate {
                let public = secret.public_key();
                return Ok(Self { secret, public });
            }
        }
        Err(CryptoError::EntropyUnavailable(
            "random source kept producing out-of-range scalars".into(),
        ))
    }

    /// Reconstruct from raw 32-byte secret scalar bytes.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != SECRET_KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: SECRET_KEY_SIZE,
                actual: bytes.len(),
            });
        }
        let secret = SecretKey::from_slice(bytes).map_err(|_| {
            CryptoError::KeyDerivationFailed("secret scalar is zero or exceeds the curve order".into())
        })?;
        let public = secret.public_key();
        Ok(Self { secret, public })
    }

    /// Get the secret key reference for ECDH.
    pub(crate) const fn secret(&self) -> &SecretKey {
        &self.secret
    }

    /// Get the public key.
    pub const fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// SEC1 compressed encoding of the public key (33 bytes).
    pub fn public_bytes(&self) -> Vec<u8> {
        self.public.to_encoded_point(true).as_bytes().to_vec()
    }

    /// Public key as lowercase hex, the form announced through the relay.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_bytes())
    }

    /// Colon-separated SHA-256 fingerprint of the public key.
    pub fn fingerprint(&self) -> String {
        fingerprint_of(&self.public_bytes())
    }
}

/// Compute the fingerprint of arbitrary public key bytes.
///
/// Format: first 16 bytes of SHA-256, as colon-separated lowercase hex pairs.
pub fn fingerprint_of(pubkey_bytes: &[u8]) -> String {
    let hash = Sha256::digest(pubkey_bytes);
    hash.iter()
        .take(16)
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}
