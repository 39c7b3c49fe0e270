//! WebSocket-aware reverse proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌──────────────────────────────────────────────────────┐
//!                     │                       PROXY                          │
//!   Client request    │  ┌────────┐    ┌────────────┐    ┌──────────────┐    │
//!   ──────────────────┼─▶│  http  │───▶│  dispatch  │───▶│  PlainProxy  │────┼──▶ Upstream
//!                     │  │ server │    │ (upgrade?) │    │ hyper client │    │    (HTTP)
//!                     │  └────────┘    └─────┬──────┘    └──────────────┘    │
//!                     │                      │ websocket                     │
//!                     │                      ▼                               │
//!   Client socket     │               ┌─────────────┐    ┌──────────────┐    │
//!   ◀═════════════════┼══════════════▶│RelaySession │◀══▶│BackendDialer │◀═══┼══▶ Upstream
//!                     │               └─────────────┘    └──────────────┘    │    (WS)
//!                     │  config · director · tls · logging · metrics         │
//!                     └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;

use ws_bridge_proxy::config::validation::validate_config;
use ws_bridge_proxy::config::{load_config, ConfigError, ProxyConfig};
use ws_bridge_proxy::lifecycle::{signals, Shutdown};
use ws_bridge_proxy::observability::{logging, metrics};
use ws_bridge_proxy::{HttpServer, Proxy, ProxySettings};

#[derive(Parser)]
#[command(name = "ws-bridge-proxy")]
#[command(about = "Reverse proxy with WebSocket relaying", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Upstream endpoint URL, overrides `upstream.endpoint`
    #[arg(short, long, value_name = "URL")]
    endpoint: Option<String>,

    /// Listen address, overrides `listener.bind_address`
    #[arg(short, long, value_name = "ADDR")]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };
    if let Some(endpoint) = cli.endpoint {
        config.upstream.endpoint = endpoint;
    }
    if let Some(listen) = cli.listen {
        config.listener.bind_address = listen;
    }
    validate_config(&config).map_err(ConfigError::Validation)?;

    logging::init(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "ws-bridge-proxy starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        endpoint = %config.upstream.endpoint,
        blacklisted_headers = config.upstream.header_blacklist.len(),
        flush_interval_ms = config.upstream.flush_interval_ms,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let proxy = Proxy::new(ProxySettings::from_config(&config)?);

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let shutdown_rx = shutdown.subscribe();
    tokio::spawn(signals::forward_termination(shutdown));

    let grace = Duration::from_secs(config.timeouts.shutdown_grace_secs);
    HttpServer::new(proxy, grace).run(listener, shutdown_rx).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
