//! HTTP server for the REST API
//!
//! Exposes the enqueue surface, scheduler triggers and market-data queries
//! to the CRUD application and to external cron invokers.

use crate::api::handlers;
use crate::config::ServerConfig;
use crate::error::{AppError, Result};
use crate::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use tokio::sync::oneshot;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Build the router with every route and layer
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ================================================================
        // Health check
        // ================================================================
        .route("/health", get(handlers::health_check))
        .route("/", get(handlers::health_check))

        // ================================================================
        // Enqueue surface
        // ================================================================
        .route("/api/v1/jobs", post(handlers::enqueue_job).get(handlers::list_jobs))
        .route("/api/v1/jobs/batch", post(handlers::enqueue_batch))
        .route("/api/v1/jobs/:id", get(handlers::get_job))
        .route("/api/v1/jobs/:id/reset", post(handlers::reset_job))

        // ================================================================
        // Scheduler triggers (cron invokers)
        // ================================================================
        .route("/api/v1/scheduler/tick", post(handlers::run_tick))
        .route("/api/v1/scheduler/sweep", post(handlers::run_sweep))
        .route("/api/v1/latest/refresh", post(handlers::refresh_latest))

        // ================================================================
        // Queries
        // ================================================================
        .route("/api/v1/latest", get(handlers::get_latest))
        .route("/api/v1/history", get(handlers::get_history))
        .route("/api/v1/stats", get(handlers::get_stats))

        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// API server manager
pub struct ApiServer {
    state: AppState,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl ApiServer {
    pub fn new(state: AppState) -> Self {
        Self {
            state,
            shutdown_tx: None,
        }
    }

    /// Bind and serve in a background task
    pub async fn start(&mut self, config: &ServerConfig) -> Result<SocketAddr> {
        let addr: SocketAddr = format!("{}:{}", config.host, config.port)
            .parse()
            .map_err(|e| AppError::Config(format!("Invalid server address: {}", e)))?;

        let listener = tokio::net::TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let app = router(self.state.clone());

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        self.shutdown_tx = Some(shutdown_tx);

        tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                info!("API server shutting down");
            });

            if let Err(e) = server.await {
                error!("API server error: {}", e);
            }
        });

        info!("Market pipeline API listening on http://{}", local_addr);
        info!("  POST /api/v1/jobs | /api/v1/jobs/batch | /api/v1/jobs/:id/reset");
        info!("  POST /api/v1/scheduler/tick | /api/v1/scheduler/sweep | /api/v1/latest/refresh");
        info!("  GET  /api/v1/latest | /api/v1/history | /api/v1/stats");

        Ok(local_addr)
    }

    /// Stop the server
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
            info!("API server stop signal sent");
        }
    }

    pub fn is_running(&self) -> bool {
        self.shutdown_tx.is_some()
    }
}

impl Drop for ApiServer {
    fn drop(&mut self) {
        self.stop();
    }
}
