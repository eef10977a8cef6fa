//! Frame types for the relay wire protocol.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Announce a participant to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterPayload {
    pub display_name: String,
    pub public_key_hex: String,
    #[serde(default)]
    pub is_monitor: bool,
}

/// Key-exchange step addressed to a peer (client → relay).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyExchangeTo {
    pub to: String,
    pub public_key_hex: String,
}

/// Key-exchange step as delivered by the relay (relay → client).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyExchangeFrom {
    pub from: String,
    pub public_key_hex: String,
}

/// Encrypted message submitted by a sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    pub to: String,
    pub ciphertext_base64: String,
    pub nonce_base64: String,
}

/// Encrypted message delivered to its recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveredMessage {
    pub from: String,
    #[serde(default)]
    pub from_display_name: String,
    #[serde(default)]
    pub to_display_name: String,
    pub ciphertext_base64: String,
    pub nonce_base64: String,
    /// Relay receive time, milliseconds since the Unix epoch.
    #[serde(default)]
    pub timestamp: u64,
}

/// Copy of a delivered message handed to monitors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterceptedMessage {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub from_display_name: String,
    #[serde(default)]
    pub to_display_name: String,
    pub ciphertext_base64: String,
    pub nonce_base64: String,
    #[serde(default)]
    pub timestamp: u64,
    #[serde(default)]
    pub note: String,
}

/// One registered participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub peer_id: String,
    pub display_name: String,
    pub public_key_hex: String,
    #[serde(default)]
    pub is_monitor: bool,
}

/// Relay-assigned identity, sent once on connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Welcome {
    pub peer_id: String,
}

/// Full list of registered participants in join order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Roster {
    #[serde(default)]
    pub peers: Vec<RosterEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayErrorPayload {
    pub message: String,
}

/// Frames sent by clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientFrame {
    Register(RegisterPayload),
    ExchangeKey(KeyExchangeTo),
    ExchangeKeyBack(KeyExchangeTo),
    Message(OutboundMessage),
    #[serde(skip_serializing)]
    Unknown { msg_type: String, payload: Value },
}

impl ClientFrame {
    /// Value of the `type` discriminator.
    pub fn frame_type(&self) -> &str {
        match self {
            Self::Register(_) => "register",
            Self::ExchangeKey(_) => "exchange-key",
            Self::ExchangeKeyBack(_) => "exchange-key-back",
            Self::Message(_) => "message",
            Self::Unknown { msg_type, .. } => msg_type,
        }
    }
}

/// Frames sent by the relay.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerFrame {
    Welcome(Welcome),
    Roster(Roster),
    ExchangeKey(KeyExchangeFrom),
    ExchangeKeyBack(KeyExchangeFrom),
    Message(DeliveredMessage),
    Intercepted(InterceptedMessage),
    Error(RelayErrorPayload),
    #[serde(skip_serializing)]
    Unknown { msg_type: String, payload: Value },
}

impl ServerFrame {
    pub fn frame_type(&self) -> &str {
        match self {
            Self::Welcome(_) => "welcome",
            Self::Roster(_) => "roster",
            Self::ExchangeKey(_) => "exchange-key",
            Self::ExchangeKeyBack(_) => "exchange-key-back",
            Self::Message(_) => "message",
            Self::Intercepted(_) => "intercepted",
            Self::Error(_) => "error",
            Self::Unknown { msg_type, .. } => msg_type,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(RelayErrorPayload {
            message: message.into(),
        })
    }
}
