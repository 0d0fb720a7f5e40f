//! Health HTTP Server

use super::handlers::{self, AppState};
use crate::metrics::Metrics;
use crate::Result;
use anyhow::Context;
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use tower_http::cors::CorsLayer;

/// HTTP server for health, readiness, and metrics queries
pub struct HealthServer {
    bind_addr: SocketAddr,
    app_state: AppState,
}

impl HealthServer {
    /// Create a new health server reading from the given metrics sink
    pub fn new(bind_addr: SocketAddr, metrics: Arc<Metrics>) -> Self {
        Self {
            bind_addr,
            app_state: AppState { metrics },
        }
    }

    /// Build the route table
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(handlers::service_info))
            .route("/health", get(handlers::health_check))
            .route("/ready", get(handlers::ready_check))
            .route("/live", get(handlers::live_check))
            .route("/metrics", get(handlers::metrics_snapshot))
            .route("/metrics/prometheus", get(handlers::metrics_prometheus))
            .with_state(self.app_state.clone())
            .layer(CorsLayer::permissive())
    }

    /// Start serving; runs until the task is aborted
    pub async fn start(self) -> Result<()> {
        let app = self.router();

        let listener = TcpListener::bind(self.bind_addr)
            .await
            .with_context(|| format!("Failed to bind health server to {}", self.bind_addr))?;

        info!("Health check server listening on {}", self.bind_addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("Health server error: {}", e);
            return Err(e.into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn test_server() -> HealthServer {
        HealthServer::new(
            "127.0.0.1:0".parse().unwrap(),
            Arc::new(Metrics::new()),
        )
    }

    #[tokio::test]
    async fn test_ready_endpoint() {
        let app = test_server().router();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/ready")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_path_is_404() {
        let app = test_server().router();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
