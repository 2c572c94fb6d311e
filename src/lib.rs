//! Resale Market Pipeline - market-data acquisition for a resale marketplace
//!
//! Collects prices from rate-limited provider APIs (StockX, Alias) through a
//! durable, deduplicated job queue, keeps every raw response verbatim, and
//! normalizes them into one append-only price time series.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod normalizers;
pub mod providers;
pub mod scheduler;
pub mod services;
pub mod state;

#[cfg(test)]
mod test_support;

use api::ApiServer;
use config::AppConfig;
use error::Result;
use scheduler::Cadence;
use state::AppState;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable naming the config file when no CLI argument is given
pub const CONFIG_PATH_ENV: &str = "MARKET_PIPELINE_CONFIG";

/// Initialize and run the pipeline until ctrl-c
pub async fn run() -> Result<()> {
    // Initialize tracing/logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "resale_market_pipeline=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting market pipeline...");

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var(CONFIG_PATH_ENV).ok());
    let config = AppConfig::load(config_path.as_deref())?;

    let app_state = AppState::new(config)?;
    tracing::info!("Application state initialized");

    let cadence = Cadence::start(app_state.clone());

    let mut server = ApiServer::new(app_state.clone());
    if app_state.config.server.enabled {
        server.start(&app_state.config.server).await?;
    } else {
        tracing::info!("API server is disabled");
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");

    server.stop();
    cadence.stop();
    Ok(())
}
