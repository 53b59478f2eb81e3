//! Layer8 tunnel server.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request        ┌───────────────────────────────────────────────┐
//!     ──────────────────────┼─▶ http server ─▶ dispatcher ─▶ classify       │
//!                           │                      │                        │
//!                           │        ┌─────────────┼──────────────┐         │
//!                           │        ▼             ▼              ▼         │
//!                           │   handshake     static assets   envelope      │
//!                           │   (ECDH, store)                 open/seal     │
//!                           │                                   │           │
//!                           │                                   ▼           │
//!     Client Response       │                             transcode ────────┼──▶ Backend
//!     ◀─────────────────────┼──────────────────────────── normalize ◀───────┼─── Server
//!                           │                                               │
//!                           │  config · sessions · observability · lifecycle│
//!                           └───────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use layer8_tunnel::config::{load_config, TunnelConfig};
use layer8_tunnel::http::TunnelServer;
use layer8_tunnel::lifecycle::{build_dispatcher, spawn_signal_listener, Shutdown};
use layer8_tunnel::observability::{logging::init_tracing, metrics::init_metrics};

#[derive(Parser)]
#[command(name = "layer8-tunnel", version, about = "Encrypted tunnel in front of an HTTP backend")]
struct Args {
    /// Path to a TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => TunnelConfig::default(),
    };

    init_tracing(&config.observability.log_level)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "layer8-tunnel starting");

    tracing::info!(
        bind_address = %config.listener.bind_address,
        upstream = %config.upstream.address,
        sessions = ?config.sessions.backend,
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics exporter");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let dispatcher = build_dispatcher(&config).await?;

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let stop = shutdown.subscribe();
    spawn_signal_listener(shutdown);

    TunnelServer::new(&config, dispatcher).run(listener, stop).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
