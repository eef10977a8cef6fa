//! In-memory registry of relay connections.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::{info, warn};

use veilrelay_core::wire::{Roster, RosterEntry, ServerFrame};

/// What a peer announced in its `register` frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerProfile {
    pub display_name: String,
    pub public_key_hex: String,
    pub is_monitor: bool,
}

/// Snapshot of one connection, cheap to clone out of the registry.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    pub peer_id: String,
    pub frame_tx: mpsc::Sender<ServerFrame>,
    /// `None` until the peer has registered.
    pub profile: Option<PeerProfile>,
}

impl PeerHandle {
    /// Queue a frame without waiting; a full or closed queue drops it.
    pub fn deliver(&self, frame: ServerFrame) -> bool {
        match self.frame_tx.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(frame)) => {
                warn!(
                    peer_id = %self.peer_id,
                    frame_type = frame.frame_type(),
                    "Outbound queue full, dropping frame"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn display_name(&self) -> &str {
        self.profile
            .as_ref()
            .map_or("", |p| p.display_name.as_str())
    }

    pub fn is_monitor(&self) -> bool {
        self.profile.as_ref().is_some_and(|p| p.is_monitor)
    }
}

#[derive(Default)]
struct RegistryInner {
    connections: HashMap<String, PeerHandle>,
    /// Registered peer ids in the order they first registered.
    join_order: Vec<String>,
}

/// Thread-safe registry of connected peers.
#[derive(Clone, Default)]
pub struct PeerRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly accepted connection that has not registered yet.
    pub async fn connect(&self, peer_id: String, frame_tx: mpsc::Sender<ServerFrame>) {
        let handle = PeerHandle {
            peer_id: peer_id.clone(),
            frame_tx,
            profile: None,
        };
        self.inner.write().await.connections.insert(peer_id, handle);
    }

    /// Attach a profile to a connection.
    ///
    /// Re-registering replaces the profile but keeps the original roster
    /// position. Returns `false` if the connection is unknown.
    pub async fn register(&self, peer_id: &str, profile: PeerProfile) -> bool {
        let mut inner = self.inner.write().await;
        let Some(handle) = inner.connections.get_mut(peer_id) else {
            warn!(peer_id = %peer_id, "Register from unknown connection");
            return false;
        };
        let first_time = handle.profile.is_none();
        info!(
            peer_id = %peer_id,
            display_name = %profile.display_name,
            is_monitor = profile.is_monitor,
            "Peer registered"
        );
        handle.profile = Some(profile);
        if first_time {
            inner.join_order.push(peer_id.to_string());
        }
        true
    }

    /// Remove a connection, returning its profile if it had registered.
    pub async fn disconnect(&self, peer_id: &str) -> Option<PeerProfile> {
        let mut inner = self.inner.write().await;
        let handle = inner.connections.remove(peer_id)?;
        inner.join_order.retain(|id| id != peer_id);
        if let Some(profile) = &handle.profile {
            info!(peer_id = %peer_id, display_name = %profile.display_name, "Peer left");
        }
        handle.profile
    }

    pub async fn get(&self, peer_id: &str) -> Option<PeerHandle> {
        self.inner.read().await.connections.get(peer_id).cloned()
    }

    /// Registered monitors other than `exclude`, in join order.
    pub async fn monitors_except(&self, exclude: &str) -> Vec<PeerHandle> {
        let inner = self.inner.read().await;
        inner
            .join_order
            .iter()
            .filter(|id| id.as_str() != exclude)
            .filter_map(|id| inner.connections.get(id))
            .filter(|handle| handle.is_monitor())
            .cloned()
            .collect()
    }

    /// Every open connection, registered or not.
    pub async fn all(&self) -> Vec<PeerHandle> {
        self.inner.read().await.connections.values().cloned().collect()
    }

    /// Registered peers in join order.
    pub async fn roster(&self) -> Roster {
        let inner = self.inner.read().await;
        let peers = inner
            .join_order
            .iter()
            .filter_map(|id| {
                let handle = inner.connections.get(id)?;
                let profile = handle.profile.as_ref()?;
                Some(RosterEntry {
                    peer_id: id.clone(),
                    display_name: profile.display_name.clone(),
                    public_key_hex: profile.public_key_hex.clone(),
                    is_monitor: profile.is_monitor,
                })
            })
            .collect();
        Roster { peers }
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn profile(name: &str, is_monitor: bool) -> PeerProfile {
        PeerProfile {
            display_name: name.into(),
            public_key_hex: format!("02{name}"),
            is_monitor,
        }
    }

    #[tokio::test]
    async fn connect_then_register() {
        let registry = PeerRegistry::new();
        let (tx, _rx) = mpsc::channel(4);
        registry.connect("p1".into(), tx).await;

        assert!(registry.get("p1").await.unwrap().profile.is_none());
        assert!(registry.roster().await.peers.is_empty());

        assert!(registry.register("p1", profile("alice", false)).await);
        let handle = registry.get("p1").await.unwrap();
        assert_eq!(handle.display_name(), "alice");
        assert_eq!(registry.roster().await.peers.len(), 1);
    }

    #[tokio::test]
    async fn register_unknown_connection_fails() {
        let registry = PeerRegistry::new();
        assert!(!registry.register("ghost", profile("ghost", false)).await);
    }

    #[tokio::test]
    async fn roster_keeps_join_order_across_reregister() {
        let registry = PeerRegistry::new();
        for id in ["p1", "p2", "p3"] {
            let (tx, _rx) = mpsc::channel(4);
            registry.connect(id.into(), tx).await;
        }
        registry.register("p2", profile("bob", false)).await;
        registry.register("p1", profile("alice", false)).await;
        registry.register("p3", profile("mallory", true)).await;
        registry.register("p2", profile("bobby", false)).await;

        let names: Vec<_> = registry
            .roster()
            .await
            .peers
            .into_iter()
            .map(|p| p.display_name)
            .collect();
        assert_eq!(names, ["bobby", "alice", "mallory"]);
    }

    #[tokio::test]
    async fn disconnect_removes_from_roster() {
        let registry = PeerRegistry::new();
        let (tx, _rx) = mpsc::channel(4);
        registry.connect("p1".into(), tx).await;
        registry.register("p1", profile("alice", false)).await;

        let removed = registry.disconnect("p1").await;
        assert_eq!(removed.unwrap().display_name, "alice");
        assert!(registry.roster().await.peers.is_empty());
        assert_eq!(registry.connection_count().await, 0);
        assert!(registry.disconnect("p1").await.is_none());
    }

    #[tokio::test]
    async fn monitors_except_skips_sender() {
        let registry = PeerRegistry::new();
        for (id, name, monitor) in [("a", "alice", false), ("m1", "m1", true), ("m2", "m2", true)] {
            let (tx, _rx) = mpsc::channel(4);
            registry.connect(id.into(), tx).await;
            registry.register(id, profile(name, monitor)).await;
        }

        let ids: Vec<_> = registry
            .monitors_except("m1")
            .await
            .into_iter()
            .map(|h| h.peer_id)
            .collect();
        assert_eq!(ids, ["m2"]);
    }

    #[tokio::test]
    async fn deliver_drops_when_queue_full() {
        let (tx, mut rx) = mpsc::channel(1);
        let handle = PeerHandle {
            peer_id: "p1".into(),
            frame_tx: tx,
            profile: None,
        };
        assert!(handle.deliver(ServerFrame::error("one")));
        assert!(!handle.deliver(ServerFrame::error("two")));
        assert_eq!(rx.recv().await.unwrap(), ServerFrame::error("one"));
    }
}
