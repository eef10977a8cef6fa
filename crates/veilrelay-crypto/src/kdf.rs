//! Message key derivation.
//!
//! The raw ECDH x-coordinate is never used as a cipher key directly; it is
//! run through HKDF-SHA256 with fixed domain-separation strings first.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::ecdh::SharedSecret;
use crate::error::CryptoError;

/// HKDF info string for message key derivation.
const HKDF_INFO: &[u8] = b"veilrelay-e2e-message-key-v1";

/// HKDF salt for domain separation (recommended by RFC 5869).
const HKDF_SALT: &[u8] = b"veilrelay-e2e-hkdf-salt-v1";

/// Size of a message key in bytes.
pub const MESSAGE_KEY_SIZE: usize = 32;

/// Symmetric key fed to the message cipher.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MessageKey([u8; MESSAGE_KEY_SIZE]);

impl MessageKey {
    /// Wrap raw key bytes without derivation.
    pub const fn from_bytes(bytes: [u8; MESSAGE_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Borrow the raw key bytes.
    pub const fn as_bytes(&self) -> &[u8; MESSAGE_KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for MessageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MessageKey([REDACTED])")
    }
}

/// Derive the message key for a peer pair from their shared secret.
pub fn derive_message_key(secret: &SharedSecret) -> Result<MessageKey, CryptoError> {
    let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), secret.as_bytes());
    let mut key = [0u8; MESSAGE_KEY_SIZE];
    hk.expand(HKDF_INFO, &mut key)
        .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
    Ok(MessageKey(key))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::ecdh::derive;
    use crate::keypair::KeyPair;

    #[test]
    fn both_sides_derive_same_message_key() {
        let a = KeyPair::generate().unwrap();
        let b = KeyPair::generate().unwrap();

        let key_a = derive_message_key(&derive(&a, &b.public_bytes()).unwrap()).unwrap();
        let key_b = derive_message_key(&derive(&b, &a.public_bytes()).unwrap()).unwrap();

        assert_eq!(key_a.as_bytes(), key_b.as_bytes());
    }

    #[test]
    fn message_key_differs_from_raw_secret() {
        let secret = SharedSecret::from_bytes([42u8; 32]);
        let key = derive_message_key(&secret).unwrap();
        assert_ne!(key.as_bytes(), secret.as_bytes());
    }

    #[test]
    fn different_secrets_give_different_keys() {
        let k1 = derive_message_key(&SharedSecret::from_bytes([1u8; 32])).unwrap();
        let k2 = derive_message_key(&SharedSecret::from_bytes([2u8; 32])).unwrap();
        assert_ne!(k1.as_bytes(), k2.as_bytes());
    }
}
