//! Roomcast relay server -- one shared chat room over WebSocket.
//!
//! An axum server that serves a chat page on `/` and relays every message a
//! client sends on `/room` to every connected client.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:3000
//! cargo run --bin roomcast-relay
//!
//! # Run on custom address
//! cargo run --bin roomcast-relay -- --bind 127.0.0.1:8080
//!
//! # Or via environment variable
//! ROOMCAST_ADDR=127.0.0.1:8080 cargo run --bin roomcast-relay
//! ```

use std::sync::Arc;

use clap::Parser;
use roomcast_relay::config::{RelayCliArgs, RelayConfig};
use roomcast_relay::server::{self, RelayState};

#[tokio::main]
async fn main() {
    let cli = RelayCliArgs::parse();

    // Load config from CLI args + config file + env vars + defaults.
    let config = match RelayConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    // Initialize tracing with the resolved log level.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(
        addr = %config.bind_addr,
        mailbox_capacity = config.mailbox_capacity,
        "starting roomcast relay server"
    );

    // The hub must be running before the first connection is accepted.
    let (state, hub_handle) = RelayState::from_config(&config);

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        tracing::info!("shutdown signal received");
    };

    match server::start_server_with_shutdown(&config.bind_addr, Arc::new(state), shutdown).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "relay server listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "relay server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start relay server");
            std::process::exit(1);
        }
    }

    let stats = hub_handle.shutdown().await;
    tracing::info!(
        joined = stats.joined,
        left = stats.left,
        evicted = stats.evicted,
        forwarded = stats.forwarded,
        "hub stopped"
    );
}
