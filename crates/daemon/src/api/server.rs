/// API Server implementation
use super::handlers::*;
use anyhow::Result;
use axum::{routing::get, Router};
use std::net::SocketAddr;
use tower_http::cors::CorsLayer;
use tracing::info;
use weaver_core::OrchestratorHandle;

/// HTTP server exposing the aggregator's result snapshots during a run.
pub struct ApiServer {
    listen_addr: SocketAddr,
    orchestrator: OrchestratorHandle,
}

impl ApiServer {
    /// Create a new API server
    pub fn new(listen_addr: SocketAddr, orchestrator: OrchestratorHandle) -> Self {
        Self {
            listen_addr,
            orchestrator,
        }
    }

    /// Start the API server
    pub async fn start(self) -> Result<()> {
        let state = AppState {
            orchestrator: self.orchestrator,
        };

        let app = Router::new()
            .route("/health", get(health_check))
            .route("/api/status", get(get_status))
            .route("/api/results", get(get_all_results))
            .route("/api/orders/:order_id/results", get(get_order_results))
            .layer(CorsLayer::permissive())
            .with_state(state);

        info!("API server starting on {}", self.listen_addr);

        let listener = tokio::net::TcpListener::bind(self.listen_addr).await?;

        axum::serve(listener, app)
            .await
            .map_err(|e| anyhow::anyhow!("API server error: {}", e))?;

        Ok(())
    }
}
