//! Crypto error types.

/// Errors from cryptographic operations.
///
/// Only `EntropyUnavailable` is fatal for a session. Every other variant is
/// local to one handshake step or one message.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Entropy unavailable: {0}")]
    EntropyUnavailable(String),

    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Channel to peer {peer} not ready: key exchange in progress")]
    ChannelNotReady { peer: String },

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),
}
