//! `VeilRelay` Chat Client
//!
//! Headless terminal client: type `@name message` to send an end-to-end
//! encrypted message. With `--monitor` the client only observes the
//! ciphertext the relay duplicates.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::io::BufReader;
use tracing::info;

use veilrelay_client::connection::RelayConnection;
use veilrelay_client::headless;
use veilrelay_client::session::ChatSession;
use veilrelay_core::config::load_config;
use veilrelay_core::tracing_init::init_tracing;
use veilrelay_crypto::{CipherSuite, HandshakePolicy, KeyExchange};

#[derive(Parser, Debug)]
#[command(name = "veilrelay-client")]
#[command(version, about = "VeilRelay end-to-end encrypted chat client", long_about = None)]
struct Cli {
    /// Display name announced to other participants
    #[arg(short, long)]
    name: String,

    /// Relay address (host:port), overrides config
    #[arg(long)]
    relay: Option<String>,

    /// Join as a monitor: receive intercepted ciphertext, never send
    #[arg(long)]
    monitor: bool,

    /// Path to a JSON config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;
    if let Some(relay) = cli.relay {
        config.client.relay_addr = relay;
    }

    init_tracing(
        &format!(
            "veilrelay_client={0},veilrelay_crypto={0}",
            config.client.log_level
        ),
        cli.log_json,
    );

    let suite: CipherSuite = config
        .client
        .cipher_suite
        .parse()
        .map_err(anyhow::Error::msg)?;
    let policy = HandshakePolicy {
        timeout: Duration::from_secs(config.client.handshake_timeout_secs),
        max_attempts: config.client.handshake_max_attempts.max(1),
    };
    let exchange = KeyExchange::generate(suite, policy).context("Session keypair generation failed")?;
    info!(
        fingerprint = %exchange.keypair().fingerprint(),
        suite = %suite,
        "Session keypair generated"
    );

    let mut session = ChatSession::new(exchange, cli.name, cli.monitor);
    let mut conn =
        RelayConnection::connect(&config.client.relay_addr, config.client.max_frame_bytes).await?;

    headless::run(
        &mut conn,
        &mut session,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    )
    .await?;

    info!("Session ended");
    Ok(())
}
