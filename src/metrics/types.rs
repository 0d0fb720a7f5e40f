//! Metrics Types

use serde::{Deserialize, Serialize};

/// Point-in-time view of the proxy counters.
///
/// Derived fields (success rate, throughput) are computed when the snapshot
/// is taken, never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_connections: u64,
    pub successful_connections: u64,
    pub failed_connections: u64,
    pub active_connections: u64,
    pub total_errors: u64,
    /// Bytes relayed client -> backend
    pub bytes_received: u64,
    /// Bytes relayed backend -> client
    pub bytes_sent: u64,
    pub uptime_seconds: f64,
    /// Successful / total connections, as a percentage
    pub success_rate: f64,
    pub throughput: Throughput,
}

/// Average transfer rates over the process lifetime
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Throughput {
    pub received_kb_per_sec: f64,
    pub sent_kb_per_sec: f64,
}
