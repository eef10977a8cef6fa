//! `VeilRelay` Relay Server
//!
//! Forwards key-exchange and encrypted message frames between chat clients.
//! Monitors receive a copy of every message; nobody but the two endpoints
//! can read it.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use veilrelay_core::config::load_config;
use veilrelay_core::tracing_init::init_tracing;
use veilrelay_relay::server::RelayServer;

#[derive(Parser, Debug)]
#[command(name = "veilrelay-relay")]
#[command(version, about = "VeilRelay relay server - forwards end-to-end encrypted chat")]
struct Args {
    /// Address to listen on (overrides config).
    #[arg(long)]
    addr: Option<SocketAddr>,

    /// Path to a JSON config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = load_config(args.config.as_deref())?;
    if let Some(addr) = args.addr {
        config.relay.listen_addr = addr.to_string();
    }

    init_tracing(
        &format!("veilrelay_relay={0},veilrelay_core={0}", config.relay.log_level),
        args.log_json,
    );

    let listener = TcpListener::bind(&config.relay.listen_addr).await?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %listener.local_addr()?,
        max_frame_bytes = config.relay.max_frame_bytes,
        "Starting veilrelay-relay"
    );

    let server = Arc::new(RelayServer::new(&config.relay));

    tokio::select! {
        () = server.serve(listener) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    info!("Relay stopped");
    Ok(())
}
