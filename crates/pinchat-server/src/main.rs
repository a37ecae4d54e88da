//! Pinchat host binary.
//!
//! # Usage
//!
//! ```bash
//! # Host a session on all interfaces, default port
//! pinchat-server --bind 0.0.0.0:7070
//!
//! # Longer PIN, one-minute history
//! pinchat-server --pin-length 8 --retention-secs 60
//! ```

use std::time::Duration;

use clap::Parser;
use pinchat_server::{DEFAULT_SERVICE_NAME, Host, HostConfig, SystemEnv, TcpTransport};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Pinchat host
#[derive(Parser, Debug)]
#[command(name = "pinchat-server")]
#[command(about = "PIN-gated chat host")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:7070")]
    bind: String,

    /// Service name to advertise
    #[arg(short, long, default_value = DEFAULT_SERVICE_NAME)]
    service: String,

    /// Number of digits in the session PIN
    #[arg(long, default_value = "6")]
    pin_length: usize,

    /// Seconds a message stays in history
    #[arg(long, default_value = "300")]
    retention_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let config = HostConfig {
        service_name: args.service,
        pin_length: args.pin_length,
        retention: Duration::from_secs(args.retention_secs),
        ..HostConfig::default()
    };

    let transport = TcpTransport::new(args.bind);
    let host = Host::start(&transport, SystemEnv::new(), config).await?;

    tracing::info!("Authentication PIN: {}", host.pin().as_str());
    tracing::info!("Share this PIN with peers to let them join");
    if let Some(address) = host.local_addr() {
        tracing::info!("Listening on {address}");
    }

    tokio::signal::ctrl_c().await?;

    host.shutdown().await;
    Ok(())
}
