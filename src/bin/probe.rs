//! Tether probe - exercise an event socket through the lifecycle manager
//!
//! Connects to a WebSocket peer, queues one tagged request, and prints
//! every response collected before exit.

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tether::{shared_results, Connection, TetherConfig, WsTransport};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Tether probe - send one tagged request over an event socket
#[derive(Parser, Debug)]
#[command(name = "tether-probe")]
#[command(about = "Connect, queue a tagged request, print collected responses")]
struct Args {
    /// WebSocket address of the peer
    #[arg(long, env = "TETHER_ADDRESS", default_value = "ws://localhost:9000")]
    address: String,

    /// Tag identifying the request to the server
    #[arg(long, env = "TETHER_TAG", default_value = "probe")]
    tag: String,

    /// JSON payload to send
    #[arg(long, env = "TETHER_PAYLOAD", default_value = "{}")]
    payload: String,

    /// Wait for the server to acknowledge the request
    #[arg(long, env = "TETHER_WAIT_ACK", default_value = "true")]
    wait_ack: bool,

    /// Handshake and acknowledgement timeout in milliseconds
    #[arg(long, env = "TETHER_TIMEOUT_MS", default_value = "5000")]
    timeout_ms: u64,

    /// How long to keep collecting responses before exiting (ms)
    #[arg(long, env = "TETHER_LINGER_MS", default_value = "2000")]
    linger_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("tether={},info", args.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let payload: serde_json::Value = serde_json::from_str(&args.payload)
        .map_err(|e| anyhow::anyhow!("--payload is not valid JSON: {e}"))?;

    info!("Probing {} with tag '{}'", args.address, args.tag);

    let config = TetherConfig {
        handshake_timeout: Duration::from_millis(args.timeout_ms),
        ack_timeout: Duration::from_millis(args.timeout_ms),
        ..TetherConfig::default()
    };
    let connection = Connection::with_config(WsTransport::new(), config);
    let results = shared_results();

    let status = connection
        .connect_collect(&args.address, Arc::clone(&results))
        .await;
    if !status.is_success() {
        error!("Connect failed: {status} (code {})", status.code());
        std::process::exit(status.code() as i32);
    }

    let status = connection.add_request(&args.tag, payload, args.wait_ack);
    info!("Request queued: {status}");

    tokio::time::sleep(Duration::from_millis(args.linger_ms)).await;

    for (tag, payload) in results.lock().expect("results log poisoned").iter() {
        println!("{tag}: {payload}");
    }

    let pending = connection.pending_requests();
    if pending > 0 {
        warn!("Exiting with {pending} request(s) still pending");
    }

    Ok(())
}
