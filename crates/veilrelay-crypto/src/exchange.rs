//! Key exchange protocol logic.
//!
//! Implements the relay-mediated two-message handshake between peers:
//!
//! 1. The initiator, lacking a secret for a peer, sends `exchange-key` with
//!    its public key and moves to `Pending`.
//! 2. The responder derives the secret on receipt, caches it as
//!    `Established` and answers with `exchange-key-back`.
//! 3. The initiator derives the same secret from the reply.
//!
//! [`KeyExchange`] is the per-session context: it owns the session keypair
//! and the peer secret cache, and is dropped with the session. The cache is a
//! single lock-guarded map; the receive path and the send path may interleave
//! on it. Derivations are idempotent, so the last writer wins harmlessly.
//!
//! Public keys are trusted on first use: nothing ties a received key to the
//! display name the relay announced for it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::cipher::{CipherSuite, EncryptedData, MessageCipher};
use crate::ecdh::{SharedSecret, derive_hex};
use crate::error::CryptoError;
use crate::kdf::derive_message_key;
use crate::keypair::KeyPair;

/// Default time a pending exchange may wait for its reply.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of `exchange-key` requests sent before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Bounds on a pending exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakePolicy {
    /// How long a pending exchange may wait for `exchange-key-back`.
    pub timeout: Duration,
    /// How many `exchange-key` requests may be sent for one exchange.
    pub max_attempts: u32,
}

impl Default for HandshakePolicy {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Observable per-peer handshake state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    NoSecret,
    PendingExchange { attempts: u32 },
    Established,
}

/// Outbound step 1: our public key addressed to a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    pub to: String,
    pub public_key_hex: String,
}

/// Outbound step 2: our public key answering a peer's request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeReply {
    pub to: String,
    pub public_key_hex: String,
}

/// Result of asking whether a message can be sent to a peer right now.
#[derive(Debug)]
pub enum SendReadiness {
    /// A secret is established; encrypt with this cipher.
    Ready(Arc<MessageCipher>),
    /// No secret yet. Send this request, then report "channel not ready".
    Retrigger(HandshakeRequest),
    /// The pending exchange ran out of time or attempts and was reset.
    Expired,
}

enum PeerEntry {
    Pending {
        started: Instant,
        attempts: u32,
    },
    Established {
        secret: SharedSecret,
        cipher: Arc<MessageCipher>,
    },
}

/// Per-session key exchange context and peer secret cache.
pub struct KeyExchange {
    keypair: KeyPair,
    suite: CipherSuite,
    policy: HandshakePolicy,
    peers: RwLock<HashMap<String, PeerEntry>>,
}

impl std::fmt::Debug for KeyExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyExchange")
            .field("public", &self.keypair.public_key_hex())
            .field("suite", &self.suite)
            .field("policy", &self.policy)
            .field("peers", &self.peers.read().len())
            .finish()
    }
}

impl KeyExchange {
    /// Start a session context around an existing keypair.
    pub fn new(keypair: KeyPair, suite: CipherSuite, policy: HandshakePolicy) -> Self {
        Self {
            keypair,
            suite,
            policy,
            peers: RwLock::new(HashMap::new()),
        }
    }

    /// Start a session context with a freshly generated keypair.
    pub fn generate(suite: CipherSuite, policy: HandshakePolicy) -> Result<Self, CryptoError> {
        Ok(Self::new(KeyPair::generate()?, suite, policy))
    }

    pub const fn keypair(&self) -> &KeyPair {
        &self.keypair
    }

    pub const fn suite(&self) -> CipherSuite {
        self.suite
    }

    pub const fn policy(&self) -> HandshakePolicy {
        self.policy
    }

    /// Our public key as announced to the relay.
    pub fn public_key_hex(&self) -> String {
        self.keypair.public_key_hex()
    }

    /// Step 1: start (or restart) an exchange with `peer`.
    ///
    /// An established secret is left in place; it is overwritten only when
    /// the reply arrives.
    pub fn initiate(&self, peer: &str) -> HandshakeRequest {
        let mut peers = self.peers.write();
        match peers.get_mut(peer) {
            Some(PeerEntry::Pending { started, attempts }) => {
                *started = Instant::now();
                *attempts += 1;
            }
            Some(PeerEntry::Established { .. }) => {
                debug!(peer_id = %peer, "Re-initiating exchange with established peer");
            }
            None => {
                peers.insert(
                    peer.to_string(),
                    PeerEntry::Pending {
                        started: Instant::now(),
                        attempts: 1,
                    },
                );
            }
        }
        drop(peers);
        info!(peer_id = %peer, "Key exchange initiated");
        self.request_for(peer)
    }

    /// Step 2: answer a peer's `exchange-key`.
    ///
    /// Derives and caches the secret immediately, overwriting any previous
    /// entry. An invalid key leaves the cache untouched.
    pub fn respond(
        &self,
        peer: &str,
        their_public_hex: &str,
    ) -> Result<HandshakeReply, CryptoError> {
        self.establish(peer, their_public_hex)?;
        info!(peer_id = %peer, "Key exchange answered");
        Ok(HandshakeReply {
            to: peer.to_string(),
            public_key_hex: self.keypair.public_key_hex(),
        })
    }

    /// Step 3: complete an exchange from the peer's `exchange-key-back`.
    ///
    /// Accepted even with no request pending; the result is the same secret.
    pub fn complete(&self, peer: &str, their_public_hex: &str) -> Result<(), CryptoError> {
        if !matches!(self.peers.read().get(peer), Some(PeerEntry::Pending { .. })) {
            debug!(peer_id = %peer, "exchange-key-back without a pending request");
        }
        self.establish(peer, their_public_hex)?;
        info!(peer_id = %peer, "Key exchange completed");
        Ok(())
    }

    fn establish(&self, peer: &str, their_public_hex: &str) -> Result<(), CryptoError> {
        let secret = derive_hex(&self.keypair, their_public_hex).inspect_err(|e| {
            warn!(peer_id = %peer, error = %e, "Rejected peer public key");
        })?;
        let key = derive_message_key(&secret)?;
        let cipher = Arc::new(MessageCipher::new(self.suite, key));
        self.peers
            .write()
            .insert(peer.to_string(), PeerEntry::Established { secret, cipher });
        Ok(())
    }

    /// Decide what a send to `peer` must do.
    ///
    /// `NoSecret` starts an exchange. A pending exchange is re-sent while it
    /// is inside its time and attempt budget, and reset to `NoSecret`
    /// once either is spent.
    pub fn prepare_send(&self, peer: &str) -> SendReadiness {
        let mut peers = self.peers.write();
        match peers.get_mut(peer) {
            Some(PeerEntry::Established { cipher, .. }) => SendReadiness::Ready(Arc::clone(cipher)),
            Some(PeerEntry::Pending { started, attempts }) => {
                if started.elapsed() >= self.policy.timeout || *attempts >= self.policy.max_attempts
                {
                    let attempts = *attempts;
                    peers.remove(peer);
                    drop(peers);
                    warn!(peer_id = %peer, attempts, "Key exchange expired");
                    SendReadiness::Expired
                } else {
                    *attempts += 1;
                    let attempts = *attempts;
                    drop(peers);
                    debug!(peer_id = %peer, attempts, "Re-sending exchange-key");
                    SendReadiness::Retrigger(self.request_for(peer))
                }
            }
            None => {
                peers.insert(
                    peer.to_string(),
                    PeerEntry::Pending {
                        started: Instant::now(),
                        attempts: 1,
                    },
                );
                drop(peers);
                info!(peer_id = %peer, "Key exchange initiated by send");
                SendReadiness::Retrigger(self.request_for(peer))
            }
        }
    }

    /// Encrypt a message for an established peer.
    pub fn seal(&self, peer: &str, plaintext: &[u8], aad: &[u8]) -> Result<EncryptedData, CryptoError> {
        self.cipher_for(peer)?.encrypt(plaintext, aad)
    }

    /// Decrypt a message from an established peer.
    pub fn open(
        &self,
        peer: &str,
        ciphertext: &[u8],
        nonce: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        self.cipher_for(peer)?.decrypt(ciphertext, nonce, aad)
    }

    /// Cipher for an established peer, without side effects.
    pub fn cipher_for(&self, peer: &str) -> Result<Arc<MessageCipher>, CryptoError> {
        match self.peers.read().get(peer) {
            Some(PeerEntry::Established { cipher, .. }) => Ok(Arc::clone(cipher)),
            _ => Err(CryptoError::ChannelNotReady {
                peer: peer.to_string(),
            }),
        }
    }

    /// Copy of the cached shared secret for `peer`, if established.
    pub fn shared_secret(&self, peer: &str) -> Option<SharedSecret> {
        match self.peers.read().get(peer) {
            Some(PeerEntry::Established { secret, .. }) => Some(secret.clone()),
            _ => None,
        }
    }

    pub fn state_of(&self, peer: &str) -> PeerState {
        match self.peers.read().get(peer) {
            None => PeerState::NoSecret,
            Some(PeerEntry::Pending { attempts, .. }) => PeerState::PendingExchange {
                attempts: *attempts,
            },
            Some(PeerEntry::Established { .. }) => PeerState::Established,
        }
    }

    /// Cancel a pending exchange. Returns `false` if none was pending.
    pub fn cancel(&self, peer: &str) -> bool {
        let mut peers = self.peers.write();
        if matches!(peers.get(peer), Some(PeerEntry::Pending { .. })) {
            peers.remove(peer);
            drop(peers);
            info!(peer_id = %peer, "Key exchange cancelled");
            true
        } else {
            false
        }
    }

    /// Drop every trace of `peer` (it left the roster).
    pub fn forget(&self, peer: &str) -> bool {
        self.peers.write().remove(peer).is_some()
    }

    /// Reset pending exchanges older than the policy timeout.
    ///
    /// Returns the ids of the peers that were reset.
    pub fn expire_stale(&self) -> Vec<String> {
        let timeout = self.policy.timeout;
        let mut expired = Vec::new();
        self.peers.write().retain(|peer, entry| match entry {
            PeerEntry::Pending { started, .. } if started.elapsed() >= timeout => {
                expired.push(peer.clone());
                false
            }
            _ => true,
        });
        for peer in &expired {
            warn!(peer_id = %peer, "Key exchange expired without reply");
        }
        expired
    }

    /// Ids of every peer with an established secret.
    pub fn established_peers(&self) -> Vec<String> {
        self.peers
            .read()
            .iter()
            .filter(|(_, e)| matches!(e, PeerEntry::Established { .. }))
            .map(|(p, _)| p.clone())
            .collect()
    }

    fn request_for(&self, peer: &str) -> HandshakeRequest {
        HandshakeRequest {
            to: peer.to_string(),
            public_key_hex: self.keypair.public_key_hex(),
        }
    }
}

/// Run all three handshake steps between two local contexts.
///
/// Mainly useful for testing; in production each step crosses the relay.
#[cfg(any(test, feature = "test-utils"))]
pub fn perform_key_exchange(
    initiator: &KeyExchange,
    initiator_id: &str,
    responder: &KeyExchange,
    responder_id: &str,
) -> Result<(), CryptoError> {
    let request = initiator.initiate(responder_id);
    let reply = responder.respond(initiator_id, &request.public_key_hex)?;
    initiator.complete(responder_id, &reply.public_key_hex)
}
