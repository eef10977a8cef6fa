//! Sans-IO chat session.
//!
//! [`ChatSession`] turns user intents and relay frames into outgoing frames
//! and user-visible events. It performs no I/O, so the transport decides
//! when frames are actually written.

use tracing::{debug, warn};

use veilrelay_core::wire::{
    ClientFrame, DeliveredMessage, EncryptedEnvelope, InterceptedMessage, KeyExchangeFrom,
    KeyExchangeTo, RegisterPayload, RosterEntry, ServerFrame, direction_aad,
};
use veilrelay_crypto::{CryptoError, KeyExchange, SendReadiness};

/// Shown in place of a message body that could not be decrypted.
pub const DECRYPTION_FAILED_PLACEHOLDER: &str = "[Decryption failed]";

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No secret yet; `handshake` must be sent and the message retried.
    #[error("Secure channel to {peer} not ready, key exchange started")]
    ChannelNotReady { peer: String, handshake: ClientFrame },

    #[error("Key exchange with {peer} timed out")]
    HandshakeExpired { peer: String },

    #[error("No such participant: {0}")]
    UnknownRecipient(String),

    #[error("Relay has not assigned a peer id yet")]
    NotWelcomed,

    #[error("Monitor sessions cannot send messages")]
    MonitorCannotSend,

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Something the user should see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Welcome {
        peer_id: String,
    },
    RosterChanged {
        peers: Vec<RosterEntry>,
        left: Vec<RosterEntry>,
    },
    SecureChannel {
        peer_id: String,
        display_name: String,
    },
    Message {
        from: String,
        from_display_name: String,
        /// Plaintext, or [`DECRYPTION_FAILED_PLACEHOLDER`].
        text: String,
        decrypted: bool,
        timestamp: u64,
    },
    Intercepted(InterceptedMessage),
    RelayError {
        message: String,
    },
}

/// Output of [`ChatSession::handle_frame`].
#[derive(Debug, Default)]
pub struct Inbound {
    pub events: Vec<SessionEvent>,
    /// Frames to send back to the relay, in order.
    pub replies: Vec<ClientFrame>,
}

/// One participant's view of the chat.
#[derive(Debug)]
pub struct ChatSession {
    exchange: KeyExchange,
    display_name: String,
    is_monitor: bool,
    peer_id: Option<String>,
    roster: Vec<RosterEntry>,
}

impl ChatSession {
    pub fn new(exchange: KeyExchange, display_name: impl Into<String>, is_monitor: bool) -> Self {
        Self {
            exchange,
            display_name: display_name.into(),
            is_monitor,
            peer_id: None,
            roster: Vec::new(),
        }
    }

    pub const fn exchange(&self) -> &KeyExchange {
        &self.exchange
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub const fn is_monitor(&self) -> bool {
        self.is_monitor
    }

    /// Relay-assigned id, known after `welcome`.
    pub fn peer_id(&self) -> Option<&str> {
        self.peer_id.as_deref()
    }

    pub fn roster(&self) -> &[RosterEntry] {
        &self.roster
    }

    /// The `register` frame announcing this session.
    pub fn register_frame(&self) -> ClientFrame {
        ClientFrame::Register(RegisterPayload {
            display_name: self.display_name.clone(),
            public_key_hex: self.exchange.public_key_hex(),
            is_monitor: self.is_monitor,
        })
    }

    /// Non-monitor participants other than this session.
    pub fn chat_partners(&self) -> impl Iterator<Item = &RosterEntry> {
        self.roster
            .iter()
            .filter(move |p| !p.is_monitor && Some(p.peer_id.as_str()) != self.peer_id())
    }

    /// Find a chat partner by peer id, falling back to display name.
    pub fn resolve(&self, name_or_id: &str) -> Option<&RosterEntry> {
        self.chat_partners()
            .find(|p| p.peer_id == name_or_id)
            .or_else(|| self.chat_partners().find(|p| p.display_name == name_or_id))
    }

    pub fn display_name_of(&self, peer_id: &str) -> Option<&str> {
        self.roster
            .iter()
            .find(|p| p.peer_id == peer_id)
            .map(|p| p.display_name.as_str())
    }

    /// Encrypt `text` for `to` (peer id or display name).
    pub fn send_text(&self, to: &str, text: &str) -> Result<ClientFrame, SessionError> {
        if self.is_monitor {
            return Err(SessionError::MonitorCannotSend);
        }
        let own_id = self.peer_id.as_deref().ok_or(SessionError::NotWelcomed)?;
        let recipient = self
            .resolve(to)
            .ok_or_else(|| SessionError::UnknownRecipient(to.to_string()))?;
        let peer = recipient.peer_id.as_str();

        match self.exchange.prepare_send(peer) {
            SendReadiness::Ready(cipher) => {
                let sealed = cipher.encrypt(text.as_bytes(), &direction_aad(own_id, peer))?;
                let envelope = EncryptedEnvelope {
                    ciphertext: sealed.ciphertext,
                    nonce: sealed.nonce,
                    sender_id: own_id.to_string(),
                    recipient_id: peer.to_string(),
                    timestamp: 0,
                };
                Ok(ClientFrame::Message(envelope.to_outbound()))
            }
            SendReadiness::Retrigger(request) => Err(SessionError::ChannelNotReady {
                peer: recipient.display_name.clone(),
                handshake: ClientFrame::ExchangeKey(KeyExchangeTo {
                    to: request.to,
                    public_key_hex: request.public_key_hex,
                }),
            }),
            SendReadiness::Expired => Err(SessionError::HandshakeExpired {
                peer: recipient.display_name.clone(),
            }),
        }
    }

    /// Process one frame from the relay.
    pub fn handle_frame(&mut self, frame: ServerFrame) -> Inbound {
        let mut inbound = Inbound::default();
        match frame {
            ServerFrame::Welcome(welcome) => {
                self.peer_id = Some(welcome.peer_id.clone());
                inbound.events.push(SessionEvent::Welcome {
                    peer_id: welcome.peer_id,
                });
            }
            ServerFrame::Roster(roster) => {
                inbound.events.push(self.apply_roster(roster.peers));
            }
            ServerFrame::ExchangeKey(request) => self.answer_exchange(request, &mut inbound),
            ServerFrame::ExchangeKeyBack(reply) => {
                match self.exchange.complete(&reply.from, &reply.public_key_hex) {
                    Ok(()) => inbound.events.push(self.secure_channel_event(&reply.from)),
                    Err(e) => warn!(peer_id = %reply.from, error = %e, "Ignoring exchange-key-back"),
                }
            }
            ServerFrame::Message(msg) => inbound.events.push(self.decrypt_message(msg)),
            ServerFrame::Intercepted(copy) => {
                if !self.is_monitor {
                    debug!("Received intercepted copy as a non-monitor");
                }
                inbound.events.push(SessionEvent::Intercepted(copy));
            }
            ServerFrame::Error(err) => inbound.events.push(SessionEvent::RelayError {
                message: err.message,
            }),
            ServerFrame::Unknown { msg_type, .. } => {
                debug!(msg_type = %msg_type, "Ignoring unknown frame type");
            }
        }
        inbound
    }

    /// Reset pending exchanges that outlived the handshake timeout.
    pub fn sweep_handshakes(&self) -> Vec<String> {
        self.exchange.expire_stale()
    }

    fn apply_roster(&mut self, peers: Vec<RosterEntry>) -> SessionEvent {
        let left: Vec<RosterEntry> = self
            .roster
            .iter()
            .filter(|old| !peers.iter().any(|p| p.peer_id == old.peer_id))
            .cloned()
            .collect();
        for gone in &left {
            if self.exchange.forget(&gone.peer_id) {
                debug!(peer_id = %gone.peer_id, "Dropped secret for departed peer");
            }
        }
        self.roster.clone_from(&peers);
        SessionEvent::RosterChanged { peers, left }
    }

    fn answer_exchange(&self, request: KeyExchangeFrom, inbound: &mut Inbound) {
        if self.is_monitor {
            debug!(peer_id = %request.from, "Monitor ignoring exchange-key");
            return;
        }
        match self.exchange.respond(&request.from, &request.public_key_hex) {
            Ok(reply) => {
                inbound.replies.push(ClientFrame::ExchangeKeyBack(KeyExchangeTo {
                    to: reply.to,
                    public_key_hex: reply.public_key_hex,
                }));
                inbound.events.push(self.secure_channel_event(&request.from));
            }
            Err(e) => warn!(peer_id = %request.from, error = %e, "Ignoring exchange-key"),
        }
    }

    fn decrypt_message(&self, msg: DeliveredMessage) -> SessionEvent {
        let text = self.open_message(&msg);
        let decrypted = text.is_some();
        if !decrypted {
            warn!(peer_id = %msg.from, "Could not decrypt message");
        }
        SessionEvent::Message {
            from_display_name: if msg.from_display_name.is_empty() {
                self.display_name_of(&msg.from).unwrap_or_default().to_string()
            } else {
                msg.from_display_name
            },
            from: msg.from,
            text: text.unwrap_or_else(|| DECRYPTION_FAILED_PLACEHOLDER.to_string()),
            decrypted,
            timestamp: msg.timestamp,
        }
    }

    fn open_message(&self, msg: &DeliveredMessage) -> Option<String> {
        let own_id = self.peer_id.as_deref()?;
        let envelope = EncryptedEnvelope::from_delivered(msg, own_id)
            .inspect_err(|e| debug!(error = %e, "Undecodable message payload"))
            .ok()?;
        let plaintext = self
            .exchange
            .open(
                &envelope.sender_id,
                &envelope.ciphertext,
                &envelope.nonce,
                &envelope.associated_data(),
            )
            .inspect_err(|e| debug!(error = %e, "Decryption failed"))
            .ok()?;
        // Unauthenticated suites turn tampering into garbage, not an error
        Some(String::from_utf8_lossy(&plaintext).into_owned())
    }

    fn secure_channel_event(&self, peer_id: &str) -> SessionEvent {
        SessionEvent::SecureChannel {
            peer_id: peer_id.to_string(),
            display_name: self.display_name_of(peer_id).unwrap_or_default().to_string(),
        }
    }
}
