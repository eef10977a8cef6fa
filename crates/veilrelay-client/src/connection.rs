//! NDJSON-over-TCP connection to the relay.

use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use veilrelay_core::wire::{self, ClientFrame, ServerFrame};

/// Connection errors.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Failed to connect to relay at {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Connection to relay closed")]
    Closed,
}

const OUTBOUND_QUEUE: usize = 64;

/// A live relay connection with background reader and writer tasks.
pub struct RelayConnection {
    frame_tx: mpsc::Sender<ClientFrame>,
    frame_rx: mpsc::Receiver<ServerFrame>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl RelayConnection {
    pub async fn connect(addr: &str, max_frame_bytes: usize) -> Result<Self, ConnectionError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| ConnectionError::Connect {
                addr: addr.to_string(),
                source,
            })?;
        let _ = stream.set_nodelay(true);
        info!(addr = %addr, "Connected to relay");

        let (read_half, write_half) = stream.into_split();
        let (out_tx, out_rx) = mpsc::channel(OUTBOUND_QUEUE);
        let (in_tx, in_rx) = mpsc::channel(OUTBOUND_QUEUE);

        Ok(Self {
            frame_tx: out_tx,
            frame_rx: in_rx,
            reader: tokio::spawn(read_loop(read_half, in_tx, max_frame_bytes)),
            writer: tokio::spawn(write_loop(write_half, out_rx)),
        })
    }

    /// Queue a frame for the relay.
    pub async fn send(&self, frame: ClientFrame) -> Result<(), ConnectionError> {
        self.frame_tx
            .send(frame)
            .await
            .map_err(|_| ConnectionError::Closed)
    }

    /// Next frame from the relay; `None` once the connection is closed.
    pub async fn recv(&mut self) -> Option<ServerFrame> {
        self.frame_rx.recv().await
    }
}

impl Drop for RelayConnection {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

async fn read_loop(read_half: OwnedReadHalf, in_tx: mpsc::Sender<ServerFrame>, max_bytes: usize) {
    let mut reader = BufReader::new(read_half);
    loop {
        let line = match wire::read_frame(&mut reader, max_bytes).await {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("Relay closed the connection");
                break;
            }
            Err(e) => {
                warn!(error = %e, "Relay read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match wire::parse_server_line(&line) {
            Ok(frame) => {
                if in_tx.send(frame).await.is_err() {
                    break;
                }
            }
            Err(e) => warn!(error = %e, "Skipping malformed frame from relay"),
        }
    }
}

async fn write_loop(mut write_half: OwnedWriteHalf, mut out_rx: mpsc::Receiver<ClientFrame>) {
    while let Some(frame) = out_rx.recv().await {
        if let Err(e) = wire::write_frame(&mut write_half, &frame).await {
            debug!(error = %e, "Relay write failed");
            break;
        }
    }
}
