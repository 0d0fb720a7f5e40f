//! Tests for the health/status endpoint

use axum::body::Body;
use axum::http::{Request, StatusCode};
use pgbridge::health::HealthServer;
use pgbridge::Metrics;
use std::sync::Arc;
use tower::ServiceExt;

fn test_server(metrics: Arc<Metrics>) -> HealthServer {
    HealthServer::new("127.0.0.1:0".parse().unwrap(), metrics)
}

async fn get_json(
    server: &HealthServer,
    path: &str,
) -> (StatusCode, serde_json::Value) {
    let response = server
        .router()
        .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap();
    (status, value)
}

#[tokio::test]
async fn test_root_serves_service_banner() {
    let server = test_server(Arc::new(Metrics::new()));
    let (status, body) = get_json(&server, "/").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"], "pgbridge");
    assert_eq!(body["status"], "running");
    assert!(body["uptime_seconds"].is_number());
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn test_health_reports_active_connections() {
    let metrics = Arc::new(Metrics::new());
    metrics.connection_opened();
    metrics.connection_opened();

    let server = test_server(Arc::clone(&metrics));
    let (status, body) = get_json(&server, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["active_connections"], 2);
}

#[tokio::test]
async fn test_ready_and_live_probes() {
    let server = test_server(Arc::new(Metrics::new()));

    let (status, body) = get_json(&server, "/ready").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ready"], true);

    let (status, body) = get_json(&server, "/live").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["alive"], true);
}

#[tokio::test]
async fn test_metrics_endpoint_serves_snapshot() {
    let metrics = Arc::new(Metrics::new());
    metrics.connection_opened();
    metrics.connection_succeeded();
    metrics.add_bytes_received(8);
    metrics.add_bytes_sent(1);

    let server = test_server(Arc::clone(&metrics));
    let (status, body) = get_json(&server, "/metrics").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_connections"], 1);
    assert_eq!(body["successful_connections"], 1);
    assert_eq!(body["bytes_received"], 8);
    assert_eq!(body["bytes_sent"], 1);
    assert_eq!(body["success_rate"], 100.0);
}

#[tokio::test]
async fn test_prometheus_endpoint_serves_text_format() {
    let metrics = Arc::new(Metrics::new());
    metrics.connection_opened();

    let server = test_server(metrics);
    let response = server
        .router()
        .oneshot(
            Request::builder()
                .uri("/metrics/prometheus")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("pgbridge_connections_total"));
}

#[tokio::test]
async fn test_unknown_path_returns_404() {
    let server = test_server(Arc::new(Metrics::new()));
    let response = server
        .router()
        .oneshot(
            Request::builder()
                .uri("/admin")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
