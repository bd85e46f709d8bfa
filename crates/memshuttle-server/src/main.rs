//! memshuttle-server - two-tier memory shuttle
//!
//! Runs the upload and preload workers and serves a REST admin API.

use memshuttle_sdk::MemoryEngine;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;
mod routes;
mod state;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration first so it can pick the log format
    let config = config::Config::load()?;

    // Initialize logging
    let filter = EnvFilter::from_default_env().add_directive("memshuttle=info".parse()?);
    if config.log_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }

    info!("memshuttle-server v{}", env!("CARGO_PKG_VERSION"));
    info!("Config loaded from {:?}", config.config_path);

    let engine = Arc::new(MemoryEngine::new(config.engine.clone())?);
    if !engine.initialize().await {
        warn!(base_url = %config.engine.ltm.base_url, "Starting in short-term only mode");
    }
    engine.start().await;

    let bind = config.bind.clone();
    let state = Arc::new(state::AppState::new(config, Arc::clone(&engine)));
    let app = routes::create_router(state);

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(bind = %bind, "Server ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down...");
    engine.stop().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
