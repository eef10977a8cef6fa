//! Message encryption.
//!
//! Two suites are available:
//!
//! - **`aes-256-ctr`**: unauthenticated counter-mode stream cipher with a
//!   fresh 16-byte random nonce per message. Ciphertext length equals
//!   plaintext length. There is no tag, so a flipped ciphertext byte decrypts
//!   to a different plaintext byte *without any error*. Callers that pick this
//!   suite get confidentiality from the relay and nothing more.
//! - **`xchacha20-poly1305`** (default): AEAD with a 24-byte random nonce and
//!   associated data binding the sender and recipient ids. Any tampering is
//!   rejected with [`CryptoError::DecryptionFailed`].
//!
//! Nonces are random rather than counters because both ends of a peer pair
//! encrypt under the same key and share no counter state.

use std::fmt;
use std::str::FromStr;

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use ctr::cipher::{KeyIvInit, StreamCipher};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::error::CryptoError;
use crate::kdf::MessageKey;

type Aes256CtrCipher = ctr::Ctr128BE<aes::Aes256>;

/// Cipher key size in bytes. Longer keys are truncated to this size.
pub const KEY_SIZE: usize = 32;

/// Nonce size for AES-256-CTR (one full counter block).
pub const CTR_NONCE_SIZE: usize = 16;

/// Nonce size for XChaCha20-Poly1305.
pub const AEAD_NONCE_SIZE: usize = 24;

/// Poly1305 authentication tag size appended to AEAD ciphertexts.
pub const AEAD_TAG_SIZE: usize = 16;

/// Encrypted payload with the nonce needed for decryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedData {
    pub ciphertext: Vec<u8>,
    pub nonce: Vec<u8>,
}

/// Which cipher protects message bodies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CipherSuite {
    #[serde(rename = "aes-256-ctr")]
    Aes256Ctr,
    #[default]
    #[serde(rename = "xchacha20-poly1305")]
    XChaCha20Poly1305,
}

impl CipherSuite {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Aes256Ctr => "aes-256-ctr",
            Self::XChaCha20Poly1305 => "xchacha20-poly1305",
        }
    }

    pub const fn nonce_size(self) -> usize {
        match self {
            Self::Aes256Ctr => CTR_NONCE_SIZE,
            Self::XChaCha20Poly1305 => AEAD_NONCE_SIZE,
        }
    }

    /// Whether decryption detects tampering.
    pub const fn is_authenticated(self) -> bool {
        matches!(self, Self::XChaCha20Poly1305)
    }
}

impl fmt::Display for CipherSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CipherSuite {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aes-256-ctr" => Ok(Self::Aes256Ctr),
            "xchacha20-poly1305" => Ok(Self::XChaCha20Poly1305),
            other => Err(format!("unknown cipher suite: {other}")),
        }
    }
}

fn random_nonce<const N: usize>() -> Result<[u8; N], CryptoError> {
    let mut nonce = [0u8; N];
    OsRng
        .try_fill_bytes(&mut nonce)
        .map_err(|e| CryptoError::EntropyUnavailable(e.to_string()))?;
    Ok(nonce)
}

fn apply_ctr(key: &[u8], nonce: &[u8], data: &mut [u8]) -> Result<(), String> {
    let mut cipher = Aes256CtrCipher::new_from_slices(key, nonce).map_err(|e| e.to_string())?;
    cipher.apply_keystream(data);
    Ok(())
}

/// Encrypt with AES-256-CTR under the first 32 bytes of `key`.
pub fn encrypt(plaintext: &[u8], key: &[u8]) -> Result<EncryptedData, CryptoError> {
    if key.len() < KEY_SIZE {
        return Err(CryptoError::InvalidKeyLength {
            expected: KEY_SIZE,
            actual: key.len(),
        });
    }
    let nonce = random_nonce::<CTR_NONCE_SIZE>()?;
    let mut ciphertext = plaintext.to_vec();
    apply_ctr(&key[..KEY_SIZE], &nonce, &mut ciphertext).map_err(CryptoError::EncryptionFailed)?;
    Ok(EncryptedData {
        ciphertext,
        nonce: nonce.to_vec(),
    })
}

/// Decrypt AES-256-CTR ciphertext.
///
/// Fails only on malformed inputs (short key, wrong nonce length). Tampered
/// ciphertext of the right shape decrypts to garbage without error.
pub fn decrypt(ciphertext: &[u8], nonce: &[u8], key: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if key.len() < KEY_SIZE {
        return Err(CryptoError::DecryptionFailed(format!(
            "key must be at least {KEY_SIZE} bytes, got {}",
            key.len()
        )));
    }
    if nonce.len() != CTR_NONCE_SIZE {
        return Err(CryptoError::DecryptionFailed(format!(
            "nonce must be {CTR_NONCE_SIZE} bytes, got {}",
            nonce.len()
        )));
    }
    let mut plaintext = ciphertext.to_vec();
    apply_ctr(&key[..KEY_SIZE], nonce, &mut plaintext).map_err(CryptoError::DecryptionFailed)?;
    Ok(plaintext)
}

/// Encrypt with XChaCha20-Poly1305, binding `aad` to the ciphertext.
pub fn seal(plaintext: &[u8], key: &[u8], aad: &[u8]) -> Result<EncryptedData, CryptoError> {
    if key.len() < KEY_SIZE {
        return Err(CryptoError::InvalidKeyLength {
            expected: KEY_SIZE,
            actual: key.len(),
        });
    }
    let cipher = XChaCha20Poly1305::new_from_slice(&key[..KEY_SIZE])
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
    let nonce = random_nonce::<AEAD_NONCE_SIZE>()?;
    let ciphertext = cipher
        .encrypt(
            XNonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
    Ok(EncryptedData {
        ciphertext,
        nonce: nonce.to_vec(),
    })
}

/// Decrypt and authenticate XChaCha20-Poly1305 ciphertext.
pub fn open(
    ciphertext: &[u8],
    nonce: &[u8],
    key: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if key.len() < KEY_SIZE {
        return Err(CryptoError::DecryptionFailed(format!(
            "key must be at least {KEY_SIZE} bytes, got {}",
            key.len()
        )));
    }
    if nonce.len() != AEAD_NONCE_SIZE {
        return Err(CryptoError::DecryptionFailed(format!(
            "nonce must be {AEAD_NONCE_SIZE} bytes, got {}",
            nonce.len()
        )));
    }
    let cipher = XChaCha20Poly1305::new_from_slice(&key[..KEY_SIZE])
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))?;
    cipher
        .decrypt(
            XNonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
}

/// A message key bound to a cipher suite, cached per established peer.
pub struct MessageCipher {
    suite: CipherSuite,
    key: MessageKey,
}

impl fmt::Debug for MessageCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageCipher")
            .field("suite", &self.suite)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl MessageCipher {
    pub const fn new(suite: CipherSuite, key: MessageKey) -> Self {
        Self { suite, key }
    }

    pub const fn suite(&self) -> CipherSuite {
        self.suite
    }

    /// Encrypt a message body. `aad` is ignored by the CTR suite.
    pub fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> Result<EncryptedData, CryptoError> {
        match self.suite {
            CipherSuite::Aes256Ctr => encrypt(plaintext, self.key.as_bytes()),
            CipherSuite::XChaCha20Poly1305 => seal(plaintext, self.key.as_bytes(), aad),
        }
    }

    /// Decrypt a message body. `aad` is ignored by the CTR suite.
    pub fn decrypt(
        &self,
        ciphertext: &[u8],
        nonce: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        match self.suite {
            CipherSuite::Aes256Ctr => decrypt(ciphertext, nonce, self.key.as_bytes()),
            CipherSuite::XChaCha20Poly1305 => open(ciphertext, nonce, self.key.as_bytes(), aad),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use proptest::prelude::*;

    const KEY: [u8; 32] = [7u8; 32];

    #[test]
    fn ctr_matches_nist_sp800_38a_vector() {
        let key = hex::decode("603deb1015ca71be2b73aef0857d77811f352c073b6108d72d9810a30914dff4")
            .unwrap();
        let iv = hex::decode("f0f1f2f3f4f5f6f7f8f9fafbfcfdfeff").unwrap();
        let mut block = hex::decode("6bc1bee22e409f96e93d7e117393172a").unwrap();

        apply_ctr(&key, &iv, &mut block).unwrap();
        assert_eq!(hex::encode(&block), "601ec313775789a5b7a7f504bbf3d228");

        let plaintext = decrypt(&block, &iv, &key).unwrap();
        assert_eq!(hex::encode(plaintext), "6bc1bee22e409f96e93d7e117393172a");
    }

    #[test]
    fn ctr_roundtrip() {
        let encrypted = encrypt(b"hello", &KEY).unwrap();
        let decrypted = decrypt(&encrypted.ciphertext, &encrypted.nonce, &KEY).unwrap();
        assert_eq!(decrypted, b"hello");
    }

    #[test]
    fn ctr_ciphertext_length_equals_plaintext_length() {
        let plaintext = b"no tag is appended in counter mode";
        let encrypted = encrypt(plaintext, &KEY).unwrap();
        assert_eq!(encrypted.ciphertext.len(), plaintext.len());
        assert_eq!(encrypted.nonce.len(), CTR_NONCE_SIZE);
        assert_ne!(encrypted.ciphertext, plaintext);
    }

    #[test]
    fn ctr_uses_only_first_32_key_bytes() {
        let mut long_key = KEY.to_vec();
        long_key.extend_from_slice(b"trailing bytes are ignored");

        let encrypted = encrypt(b"payload", &long_key).unwrap();
        let decrypted = decrypt(&encrypted.ciphertext, &encrypted.nonce, &KEY).unwrap();
        assert_eq!(decrypted, b"payload");
    }

    #[test]
    fn ctr_empty_plaintext() {
        let encrypted = encrypt(b"", &KEY).unwrap();
        assert!(encrypted.ciphertext.is_empty());
        let decrypted = decrypt(&encrypted.ciphertext, &encrypted.nonce, &KEY).unwrap();
        assert!(decrypted.is_empty());
    }

    #[test]
    fn ten_thousand_nonces_are_distinct() {
        let mut nonces = HashSet::new();
        for _ in 0..10_000 {
            let encrypted = encrypt(b"x", &KEY).unwrap();
            assert!(nonces.insert(encrypted.nonce), "nonce collision detected");
        }
        assert_eq!(nonces.len(), 10_000);
    }

    #[test]
    fn ctr_tampering_is_not_detected() {
        let plaintext = b"transfer 100 coins";
        let mut encrypted = encrypt(plaintext, &KEY).unwrap();
        encrypted.ciphertext[0] ^= 0x01;

        let result = decrypt(&encrypted.ciphertext, &encrypted.nonce, &KEY);
        assert!(result.is_ok(), "unauthenticated mode must not raise");
        let garbled = result.unwrap();
        assert_eq!(garbled.len(), plaintext.len());
        assert_ne!(garbled, plaintext);
        assert_eq!(garbled[0], plaintext[0] ^ 0x01);
        assert_eq!(&garbled[1..], &plaintext[1..]);
    }

    #[test]
    fn ctr_rejects_wrong_nonce_length() {
        let encrypted = encrypt(b"hello", &KEY).unwrap();
        let result = decrypt(&encrypted.ciphertext, &encrypted.nonce[..8], &KEY);
        assert!(matches!(result, Err(CryptoError::DecryptionFailed(_))));
    }

    #[test]
    fn ctr_rejects_short_key() {
        let result = decrypt(b"ciphertext", &[0u8; CTR_NONCE_SIZE], &[0u8; 16]);
        assert!(matches!(result, Err(CryptoError::DecryptionFailed(_))));

        let result = encrypt(b"plaintext", &[0u8; 16]);
        assert!(matches!(
            result,
            Err(CryptoError::InvalidKeyLength {
                expected: 32,
                actual: 16
            })
        ));
    }

    #[test]
    fn ctr_wrong_key_yields_different_plaintext() {
        let encrypted = encrypt(b"hello", &KEY).unwrap();
        let decrypted = decrypt(&encrypted.ciphertext, &encrypted.nonce, &[8u8; 32]).unwrap();
        assert_ne!(decrypted, b"hello");
    }

    #[test]
    fn aead_roundtrip_with_aad() {
        let encrypted = seal(b"hello", &KEY, b"alice->bob").unwrap();
        assert_eq!(encrypted.nonce.len(), AEAD_NONCE_SIZE);
        assert_eq!(encrypted.ciphertext.len(), 5 + AEAD_TAG_SIZE);

        let decrypted = open(&encrypted.ciphertext, &encrypted.nonce, &KEY, b"alice->bob").unwrap();
        assert_eq!(decrypted, b"hello");
    }

    #[test]
    fn aead_detects_tampering() {
        let mut encrypted = seal(b"hello", &KEY, b"").unwrap();
        encrypted.ciphertext[0] ^= 0x01;
        let result = open(&encrypted.ciphertext, &encrypted.nonce, &KEY, b"");
        assert!(matches!(result, Err(CryptoError::DecryptionFailed(_))));
    }

    #[test]
    fn aead_rejects_mismatched_aad() {
        let encrypted = seal(b"hello", &KEY, b"alice->bob").unwrap();
        let result = open(&encrypted.ciphertext, &encrypted.nonce, &KEY, b"mallory->bob");
        assert!(matches!(result, Err(CryptoError::DecryptionFailed(_))));
    }

    #[test]
    fn aead_rejects_wrong_nonce_length() {
        let encrypted = seal(b"hello", &KEY, b"").unwrap();
        let result = open(&encrypted.ciphertext, &encrypted.nonce[..12], &KEY, b"");
        assert!(matches!(result, Err(CryptoError::DecryptionFailed(_))));
    }

    #[test]
    fn aead_empty_ciphertext_fails() {
        let result = open(&[], &[0u8; AEAD_NONCE_SIZE], &KEY, b"");
        assert!(result.is_err());
    }

    #[test]
    fn message_cipher_dispatches_on_suite() {
        for suite in [CipherSuite::Aes256Ctr, CipherSuite::XChaCha20Poly1305] {
            let cipher = MessageCipher::new(suite, MessageKey::from_bytes(KEY));
            let encrypted = cipher.encrypt(b"hello", b"a->b").unwrap();
            assert_eq!(encrypted.nonce.len(), suite.nonce_size());
            let decrypted = cipher
                .decrypt(&encrypted.ciphertext, &encrypted.nonce, b"a->b")
                .unwrap();
            assert_eq!(decrypted, b"hello");
        }
    }

    #[test]
    fn suite_names_roundtrip_through_serde_and_from_str() {
        for suite in [CipherSuite::Aes256Ctr, CipherSuite::XChaCha20Poly1305] {
            let json = serde_json::to_string(&suite).unwrap();
            assert_eq!(json, format!("\"{}\"", suite.as_str()));
            assert_eq!(serde_json::from_str::<CipherSuite>(&json).unwrap(), suite);
            assert_eq!(suite.as_str().parse::<CipherSuite>().unwrap(), suite);
        }
        assert!("rot13".parse::<CipherSuite>().is_err());
        assert_eq!(CipherSuite::default(), CipherSuite::XChaCha20Poly1305);
        assert!(CipherSuite::default().is_authenticated());
        assert!(!CipherSuite::Aes256Ctr.is_authenticated());
    }

    proptest! {
        #[test]
        fn ctr_roundtrip_any_plaintext(
            plaintext in proptest::collection::vec(any::<u8>(), 0..2048),
            key in proptest::array::uniform32(any::<u8>()),
        ) {
            let encrypted = encrypt(&plaintext, &key).unwrap();
            let decrypted = decrypt(&encrypted.ciphertext, &encrypted.nonce, &key).unwrap();
            prop_assert_eq!(decrypted, plaintext);
        }

        #[test]
        fn aead_roundtrip_any_plaintext(
            plaintext in proptest::collection::vec(any::<u8>(), 0..2048),
            key in proptest::array::uniform32(any::<u8>()),
        ) {
            let encrypted = seal(&plaintext, &key, b"aad").unwrap();
            let decrypted = open(&encrypted.ciphertext, &encrypted.nonce, &key, b"aad").unwrap();
            prop_assert_eq!(decrypted, plaintext);
        }
    }
}
