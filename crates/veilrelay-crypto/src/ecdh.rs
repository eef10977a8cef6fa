//! ECDH shared secret derivation.
//!
//! `their_public * my_secret` on secp256k1, keeping only the x-coordinate of
//! the resulting point. Both ends of a peer pair derive the same 32 bytes.

use k256::PublicKey;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;
use crate::keypair::KeyPair;

/// Size of the derived shared secret in bytes.
pub const SHARED_SECRET_SIZE: usize = 32;

/// Raw ECDH output: the x-coordinate of the shared point.
///
/// Equality is constant-time. The bytes are wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret([u8; SHARED_SECRET_SIZE]);

impl SharedSecret {
    /// Wrap raw secret bytes.
    pub const fn from_bytes(bytes: [u8; SHARED_SECRET_SIZE]) -> Self {
        Self(bytes)
    }

    /// Borrow the raw bytes. Handle with care.
    pub const fn as_bytes(&self) -> &[u8; SHARED_SECRET_SIZE] {
        &self.0
    }
}

impl PartialEq for SharedSecret {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for SharedSecret {}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedSecret([REDACTED])")
    }
}

/// Parse a SEC1-encoded secp256k1 public key (compressed or uncompressed).
///
/// Rejects encodings of points off the curve and the identity element.
pub fn parse_public_key(bytes: &[u8]) -> Result<PublicKey, CryptoError> {
    PublicKey::from_sec1_bytes(bytes).map_err(|_| {
        CryptoError::InvalidPublicKey(format!(
            "{} bytes do not encode a point on secp256k1",
            bytes.len()
        ))
    })
}

/// Parse a hex-encoded SEC1 public key as announced through the relay.
pub fn parse_public_key_hex(hex_str: &str) -> Result<PublicKey, CryptoError> {
    let bytes = hex::decode(hex_str.trim())
        .map_err(|e| CryptoError::InvalidPublicKey(format!("bad hex: {e}")))?;
    parse_public_key(&bytes)
}

/// Derive the shared secret from our keypair and the peer's public key.
///
/// The result is the x-coordinate of the shared point, i.e. bytes `1..33`
/// of its uncompressed SEC1 encoding with the `0x04` prefix dropped.
pub fn derive(mine: &KeyPair, their_public: &[u8]) -> Result<SharedSecret, CryptoError> {
    let their_public = parse_public_key(their_public)?;
    Ok(derive_with(mine, &their_public))
}

/// Hex convenience wrapper around [`derive`].
pub fn derive_hex(mine: &KeyPair, their_public_hex: &str) -> Result<SharedSecret, CryptoError> {
    let their_public = parse_public_key_hex(their_public_hex)?;
    Ok(derive_with(mine, &their_public))
}

fn derive_with(mine: &KeyPair, their_public: &PublicKey) -> SharedSecret {
    let shared =
        k256::ecdh::diffie_hellman(mine.secret().to_nonzero_scalar(), their_public.as_affine());
    let mut out = [0u8; SHARED_SECRET_SIZE];
    out.copy_from_slice(shared.raw_secret_bytes());
    SharedSecret(out)
}
