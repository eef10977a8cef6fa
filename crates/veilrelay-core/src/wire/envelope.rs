//! Transport-neutral view of one encrypted message.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use super::types::{DeliveredMessage, OutboundMessage};
use crate::error::Result;

pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn decode_base64(text: &str) -> Result<Vec<u8>> {
    Ok(STANDARD.decode(text)?)
}

/// Milliseconds since the Unix epoch; zero if the clock is before 1970.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Ciphertext and nonce as raw bytes, plus routing metadata.
///
/// The relay forwards envelopes without interpreting `ciphertext` or `nonce`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedEnvelope {
    pub ciphertext: Vec<u8>,
    pub nonce: Vec<u8>,
    pub sender_id: String,
    pub recipient_id: String,
    pub timestamp: u64,
}

impl EncryptedEnvelope {
    /// Decode a delivered message addressed to `recipient_id`.
    pub fn from_delivered(msg: &DeliveredMessage, recipient_id: &str) -> Result<Self> {
        Ok(Self {
            ciphertext: decode_base64(&msg.ciphertext_base64)?,
            nonce: decode_base64(&msg.nonce_base64)?,
            sender_id: msg.from.clone(),
            recipient_id: recipient_id.to_string(),
            timestamp: msg.timestamp,
        })
    }

    pub fn to_outbound(&self) -> OutboundMessage {
        OutboundMessage {
            to: self.recipient_id.clone(),
            ciphertext_base64: encode_base64(&self.ciphertext),
            nonce_base64: encode_base64(&self.nonce),
        }
    }

    /// Associated data binding the message to its direction.
    pub fn associated_data(&self) -> Vec<u8> {
        direction_aad(&self.sender_id, &self.recipient_id)
    }
}

/// `sender->recipient` as bytes.
pub fn direction_aad(sender_id: &str, recipient_id: &str) -> Vec<u8> {
    format!("{sender_id}->{recipient_id}").into_bytes()
}
