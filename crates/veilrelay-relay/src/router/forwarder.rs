//! Routes client frames to their recipients.
//!
//! Payloads are forwarded opaquely: the router reads only addressing fields
//! and never inspects public keys, ciphertexts or nonces.

use std::sync::Arc;

use tracing::{debug, info};

use veilrelay_core::wire::{
    ClientFrame, DeliveredMessage, InterceptedMessage, KeyExchangeFrom, KeyExchangeTo,
    OutboundMessage, RegisterPayload, ServerFrame, now_millis,
};

use crate::registry::{PeerHandle, PeerProfile, PeerRegistry};

/// Outcome of routing that the sender should hear about.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("Unknown peer: {0}")]
    UnknownPeer(String),

    #[error("Peer must register before sending '{0}'")]
    NotRegistered(String),

    #[error("Invalid registration: {0}")]
    InvalidRegistration(String),

    #[error("Could not deliver to peer: {0}")]
    DeliveryFailed(String),
}

/// Forwards frames between registered peers and fans messages out to monitors.
#[derive(Clone)]
pub struct MessageRouter {
    registry: Arc<PeerRegistry>,
    monitor_note: String,
}

impl MessageRouter {
    pub fn new(registry: Arc<PeerRegistry>, monitor_note: impl Into<String>) -> Self {
        Self {
            registry,
            monitor_note: monitor_note.into(),
        }
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    /// Handle one frame received from `sender_id`.
    pub async fn route(&self, sender_id: &str, frame: ClientFrame) -> Result<(), RouterError> {
        match frame {
            ClientFrame::Register(payload) => self.register(sender_id, payload).await,
            ClientFrame::ExchangeKey(payload) => self.forward_key(sender_id, payload, false).await,
            ClientFrame::ExchangeKeyBack(payload) => {
                self.forward_key(sender_id, payload, true).await
            }
            ClientFrame::Message(payload) => self.forward_message(sender_id, payload).await,
            ClientFrame::Unknown { msg_type, .. } => {
                debug!(peer_id = %sender_id, msg_type = %msg_type, "Ignoring unknown frame type");
                Ok(())
            }
        }
    }

    async fn register(&self, sender_id: &str, payload: RegisterPayload) -> Result<(), RouterError> {
        if payload.display_name.trim().is_empty() {
            return Err(RouterError::InvalidRegistration(
                "displayName must not be empty".into(),
            ));
        }
        let profile = PeerProfile {
            display_name: payload.display_name,
            public_key_hex: payload.public_key_hex,
            is_monitor: payload.is_monitor,
        };
        if !self.registry.register(sender_id, profile).await {
            return Err(RouterError::UnknownPeer(sender_id.to_string()));
        }
        self.broadcast_roster().await;
        Ok(())
    }

    async fn forward_key(
        &self,
        sender_id: &str,
        payload: KeyExchangeTo,
        is_reply: bool,
    ) -> Result<(), RouterError> {
        let forwarded = KeyExchangeFrom {
            from: sender_id.to_string(),
            public_key_hex: payload.public_key_hex,
        };
        let frame = if is_reply {
            ServerFrame::ExchangeKeyBack(forwarded)
        } else {
            ServerFrame::ExchangeKey(forwarded)
        };
        self.registered_sender(sender_id, frame.frame_type()).await?;
        let recipient = self.registered_recipient(&payload.to).await?;
        debug!(
            from = %sender_id,
            to = %recipient.peer_id,
            frame_type = frame.frame_type(),
            "Forwarding key exchange"
        );
        deliver(&recipient, frame)
    }

    async fn forward_message(
        &self,
        sender_id: &str,
        payload: OutboundMessage,
    ) -> Result<(), RouterError> {
        let sender = self.registered_sender(sender_id, "message").await?;
        let recipient = self.registered_recipient(&payload.to).await?;
        let timestamp = now_millis();

        let delivered = DeliveredMessage {
            from: sender_id.to_string(),
            from_display_name: sender.display_name().to_string(),
            to_display_name: recipient.display_name().to_string(),
            ciphertext_base64: payload.ciphertext_base64,
            nonce_base64: payload.nonce_base64,
            timestamp,
        };

        let monitors = self.registry.monitors_except(sender_id).await;
        for monitor in &monitors {
            monitor.deliver(ServerFrame::Intercepted(InterceptedMessage {
                from: delivered.from.clone(),
                to: recipient.peer_id.clone(),
                from_display_name: delivered.from_display_name.clone(),
                to_display_name: delivered.to_display_name.clone(),
                ciphertext_base64: delivered.ciphertext_base64.clone(),
                nonce_base64: delivered.nonce_base64.clone(),
                timestamp,
                note: self.monitor_note.clone(),
            }));
        }

        info!(
            from = %sender_id,
            to = %recipient.peer_id,
            monitors = monitors.len(),
            "Message relayed"
        );
        deliver(&recipient, ServerFrame::Message(delivered))
    }

    /// Send the current roster to every open connection.
    pub async fn broadcast_roster(&self) {
        let roster = self.registry.roster().await;
        for handle in self.registry.all().await {
            handle.deliver(ServerFrame::Roster(roster.clone()));
        }
    }

    async fn registered_sender(
        &self,
        sender_id: &str,
        frame_type: &str,
    ) -> Result<PeerHandle, RouterError> {
        self.registry
            .get(sender_id)
            .await
            .filter(|h| h.profile.is_some())
            .ok_or_else(|| RouterError::NotRegistered(frame_type.to_string()))
    }

    async fn registered_recipient(&self, peer_id: &str) -> Result<PeerHandle, RouterError> {
        self.registry
            .get(peer_id)
            .await
            .filter(|h| h.profile.is_some())
            .ok_or_else(|| RouterError::UnknownPeer(peer_id.to_string()))
    }
}

fn deliver(recipient: &PeerHandle, frame: ServerFrame) -> Result<(), RouterError> {
    if recipient.deliver(frame) {
        Ok(())
    } else {
        Err(RouterError::DeliveryFailed(recipient.peer_id.clone()))
    }
}
