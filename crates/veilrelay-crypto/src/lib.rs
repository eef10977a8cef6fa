//! `VeilRelay` E2E Encryption Library
//!
//! Provides the cryptographic core for end-to-end encrypted chat relayed
//! through a server that can observe, but not decrypt, the traffic.
//!
//! ## Crypto primitives
//!
//! - **Session keypair**: static secp256k1 keypair per session, never persisted
//! - **Shared secret**: secp256k1 ECDH, x-coordinate of the shared point
//! - **Message key**: HKDF-SHA256 over the shared secret
//! - **Encryption**: XChaCha20-Poly1305 AEAD (default) or unauthenticated
//!   AES-256-CTR, random nonce per message
//!
//! ## Known weaknesses
//!
//! - Public keys are trusted on first use; a relay that swaps announced keys
//!   can sit in the middle.
//! - One static keypair per session: no forward secrecy within a session.
//! - The `aes-256-ctr` suite has no integrity protection.

pub mod cipher;
pub mod ecdh;
pub mod error;
pub mod exchange;
pub mod kdf;
pub mod keypair;

pub use cipher::{CipherSuite, EncryptedData, MessageCipher};
pub use ecdh::{SharedSecret, derive, derive_hex};
pub use error::CryptoError;
#[cfg(any(test, feature = "test-utils"))]
pub use exchange::perform_key_exchange;
pub use exchange::{
    HandshakePolicy, HandshakeReply, HandshakeRequest, KeyExchange, PeerState, SendReadiness,
};
pub use kdf::{MessageKey, derive_message_key};
pub use keypair::{KeyPair, fingerprint_of};
