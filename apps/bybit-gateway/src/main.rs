//! Bybit Gateway Binary
//!
//! Connects to Bybit, reports positions and active orders, then idles until
//! interrupted.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin bybit-gateway
//! ```
//!
//! # Environment Variables
//!
//! - `GATEWAY_CONFIG`: config file path (default: gateway.yaml)
//! - `GATEWAY_SYMBOLS`: comma-separated symbols to sync (default: BTCUSD)
//! - `BYBIT_API_KEY` / `BYBIT_API_SECRET`: referenced by the example config
//! - `RUST_LOG`: overrides the configured log level

use std::sync::Arc;

use anyhow::Context;
use bybit_gateway::config::load_config;
use bybit_gateway::infrastructure::metrics;
use bybit_gateway::telemetry::init_tracing;
use bybit_gateway::{BybitGateway, LoggingEvents};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    let path = std::env::var("GATEWAY_CONFIG").unwrap_or_else(|_| "gateway.yaml".to_string());
    let config = load_config(Some(&path)).with_context(|| format!("loading {path}"))?;
    init_tracing(&config.logging);
    metrics::describe_metrics();

    tracing::info!(
        config = %path,
        server = %config.exchange.server,
        live = config.exchange.server.is_live(),
        "Starting Bybit gateway"
    );

    let gateway = BybitGateway::connect(&config, Arc::new(LoggingEvents))
        .context("building gateway")?;

    let symbols = std::env::var("GATEWAY_SYMBOLS").unwrap_or_else(|_| "BTCUSD".to_string());
    let mut positions = gateway.query_positions(None);
    let mut handles = Vec::new();
    for symbol in symbols.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        handles.push(gateway.query_active_orders(symbol));
    }
    let status = positions.wait().await;
    tracing::info!(status = %status, "Position query finished");
    for mut handle in handles {
        handle.wait().await;
    }
    tracing::info!(active = gateway.active_orders().len(), "Initial sync complete");

    tokio::signal::ctrl_c()
        .await
        .context("installing Ctrl-C handler")?;
    tracing::info!("Shutdown signal received");

    gateway.shutdown().await;
    Ok(())
}

/// Load `.env` from the working directory or the nearest ancestor.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }
    if let Ok(cwd) = std::env::current_dir() {
        for dir in cwd.ancestors().skip(1) {
            let env_path = dir.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
        }
    }
}
