//! Health Endpoint Handlers

use super::types::{HealthDetail, LiveResponse, ReadyResponse, ServiceInfo};
use crate::metrics::{Metrics, MetricsSnapshot};
use axum::extract::State;
use axum::Json;
use std::sync::Arc;
use std::time::SystemTime;

/// Shared state for the health endpoint handlers
#[derive(Clone)]
pub struct AppState {
    pub metrics: Arc<Metrics>,
}

fn rfc3339_now() -> String {
    humantime::format_rfc3339(SystemTime::now()).to_string()
}

/// `GET /` service banner
pub async fn service_info(State(state): State<AppState>) -> Json<ServiceInfo> {
    Json(ServiceInfo {
        service: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        status: "running".to_string(),
        uptime_seconds: state.metrics.uptime().as_secs_f64(),
        timestamp: rfc3339_now(),
    })
}

/// `GET /health` liveness detail
pub async fn health_check(State(state): State<AppState>) -> Json<HealthDetail> {
    Json(HealthDetail {
        status: "healthy".to_string(),
        uptime_seconds: state.metrics.uptime().as_secs_f64(),
        timestamp: rfc3339_now(),
        active_connections: state.metrics.active_connections(),
    })
}

/// `GET /ready`
pub async fn ready_check() -> Json<ReadyResponse> {
    Json(ReadyResponse { ready: true })
}

/// `GET /live`
pub async fn live_check() -> Json<LiveResponse> {
    Json(LiveResponse { alive: true })
}

/// `GET /metrics` JSON snapshot of the metrics sink
pub async fn metrics_snapshot(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

/// `GET /metrics/prometheus` text-format export
pub async fn metrics_prometheus(State(state): State<AppState>) -> String {
    state.metrics.export_prometheus()
}
