//! Accept loop and per-connection handling.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::BufReader;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use veilrelay_core::config::RelayConfig;
use veilrelay_core::wire::{self, ServerFrame, Welcome};

use crate::registry::PeerRegistry;
use crate::router::MessageRouter;

/// Pause after a failed accept so a persistent error (e.g. `EMFILE`) does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Source of inbound connections.
pub trait Accept: Send + Sync + 'static {
    fn accept(&self) -> impl Future<Output = std::io::Result<(TcpStream, SocketAddr)>> + Send;
}

impl Accept for TcpListener {
    fn accept(&self) -> impl Future<Output = std::io::Result<(TcpStream, SocketAddr)>> + Send {
        Self::accept(self)
    }
}

/// The relay: a registry, a router and the limits applied to each connection.
pub struct RelayServer {
    registry: Arc<PeerRegistry>,
    router: MessageRouter,
    max_frame_bytes: usize,
    outbound_queue: usize,
}

impl RelayServer {
    pub fn new(config: &RelayConfig) -> Self {
        let registry = Arc::new(PeerRegistry::new());
        let router = MessageRouter::new(Arc::clone(&registry), config.monitor_note.clone());
        Self {
            registry,
            router,
            max_frame_bytes: config.max_frame_bytes,
            outbound_queue: config.outbound_queue.max(1),
        }
    }

    pub const fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    /// Accept connections forever. Accept errors are logged and skipped.
    pub async fn serve<A: Accept>(self: Arc<Self>, listener: A) {
        loop {
            let (stream, addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!(error = %e, "TCP accept error");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                server.handle_connection(stream, addr).await;
            });
        }
    }

    /// Drive one connection from `welcome` to disconnect.
    pub async fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let _ = stream.set_nodelay(true);
        let peer_id = Uuid::new_v4().to_string();
        let (read_half, write_half) = stream.into_split();
        let (frame_tx, frame_rx) = mpsc::channel(self.outbound_queue);

        let writer = tokio::spawn(write_loop(write_half, frame_rx, peer_id.clone()));

        self.registry.connect(peer_id.clone(), frame_tx.clone()).await;
        info!(peer_id = %peer_id, addr = %addr, "Connection opened");

        let welcome = ServerFrame::Welcome(Welcome {
            peer_id: peer_id.clone(),
        });
        if frame_tx.send(welcome).await.is_ok() {
            self.read_loop(read_half, &peer_id, &frame_tx).await;
        }

        let was_registered = self.registry.disconnect(&peer_id).await.is_some();
        drop(frame_tx);
        if was_registered {
            self.router.broadcast_roster().await;
        }
        let _ = writer.await;
        info!(peer_id = %peer_id, addr = %addr, "Connection closed");
    }

    async fn read_loop(
        &self,
        read_half: tokio::net::tcp::OwnedReadHalf,
        peer_id: &str,
        frame_tx: &mpsc::Sender<ServerFrame>,
    ) {
        let mut reader = BufReader::new(read_half);
        loop {
            let line = match wire::read_frame(&mut reader, self.max_frame_bytes).await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(veilrelay_core::Error::FrameTooLarge { limit, actual }) => {
                    warn!(peer_id = %peer_id, limit, actual, "Frame too large, closing connection");
                    let _ = frame_tx
                        .send(ServerFrame::error(format!(
                            "Frame of {actual} bytes exceeds limit of {limit}"
                        )))
                        .await;
                    break;
                }
                Err(e) => {
                    debug!(peer_id = %peer_id, error = %e, "Read failed");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            let frame = match wire::parse_client_line(&line) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(peer_id = %peer_id, error = %e, "Malformed frame");
                    let _ = frame_tx.send(ServerFrame::error(e.to_string())).await;
                    continue;
                }
            };

            if let Err(e) = self.router.route(peer_id, frame).await {
                debug!(peer_id = %peer_id, error = %e, "Routing failed");
                let _ = frame_tx.send(ServerFrame::error(e.to_string())).await;
            }
        }
    }
}

async fn write_loop(
    mut write_half: OwnedWriteHalf,
    mut frame_rx: mpsc::Receiver<ServerFrame>,
    peer_id: String,
) {
    while let Some(frame) = frame_rx.recv().await {
        if let Err(e) = wire::write_frame(&mut write_half, &frame).await {
            debug!(peer_id = %peer_id, error = %e, "Write failed");
            break;
        }
    }
}
