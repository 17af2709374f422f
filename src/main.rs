//! gecod - GECO heat-pump bridge daemon
//!
//! Keeps a connection to the RS485 adapter, polls (or listens to) the
//! controller and logs every decoded update.

use geco_service::{Config, Engine};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if GECO_CONFIG is set, then env overrides)
    let config = match Config::load() {
        Ok(c) => {
            if let Ok(path) = std::env::var("GECO_CONFIG") {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            return Err(e.into());
        }
    };
    if let Err(e) = config.validate() {
        tracing::error!("{}", e);
        return Err(e.into());
    }

    tracing::info!("Starting gecod");
    tracing::info!(
        "  Adapter: {}:{}",
        config.device.address,
        config.device.port
    );
    tracing::info!("  Mode: {}", config.bus.mode);
    tracing::info!(
        "  Controller: {}, device: {}",
        config.bus.controller.endpoint(),
        config.bus.device.endpoint()
    );
    tracing::info!("  Poll interval: {}s", config.polling.interval_secs);

    let engine = Arc::new(Engine::from_config(&config)?);

    // Log updates for whatever consumes the log stream
    let mut updates = engine.subscribe();
    let update_logger = tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(update) => match serde_json::to_string(&update) {
                    Ok(json) => tracing::info!("{}", json),
                    Err(e) => tracing::warn!("Failed to serialize update: {}", e),
                },
                Err(RecvError::Lagged(n)) => tracing::warn!("Dropped {} updates", n),
                Err(RecvError::Closed) => break,
            }
        }
    });

    // Spawn shutdown signal handler
    let shutdown_engine = engine.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal, stopping engine...");
        shutdown_engine.shutdown();
    });

    // Run engine (blocks until shutdown)
    engine.run().await?;

    let stats = engine.stats();
    tracing::info!(
        "Stopped after {} polls ({} failed), {} writes ({} failed), {} observations",
        stats.polls,
        stats.poll_failures,
        stats.writes,
        stats.write_failures,
        stats.observations
    );
    update_logger.abort();
    Ok(())
}
