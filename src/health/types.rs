//! Health Endpoint Types

use serde::{Deserialize, Serialize};

/// Service banner served at the root path
#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub service: String,
    pub version: String,
    pub status: String,
    pub uptime_seconds: f64,
    pub timestamp: String,
}

/// Liveness detail
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthDetail {
    pub status: String,
    pub uptime_seconds: f64,
    pub timestamp: String,
    pub active_connections: u64,
}

/// Readiness probe response
#[derive(Debug, Serialize, Deserialize)]
pub struct ReadyResponse {
    pub ready: bool,
}

/// Liveness probe response
#[derive(Debug, Serialize, Deserialize)]
pub struct LiveResponse {
    pub alive: bool,
}
