//! Metrics Collector

use super::types::{MetricsSnapshot, Throughput};
use prometheus::{Counter, Gauge, Registry, TextEncoder};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::error;

/// Process-wide connection and byte accounting.
///
/// The atomic counters are the source of truth for snapshots; the prometheus
/// series mirror them for text-format export. All update operations are safe
/// to call from per-connection tasks concurrently with snapshot reads.
pub struct Metrics {
    start_time: Instant,

    // Internal counters
    total_connections: AtomicU64,
    successful_connections: AtomicU64,
    failed_connections: AtomicU64,
    active_connections: AtomicU64,
    total_errors: AtomicU64,
    bytes_received: AtomicU64,
    bytes_sent: AtomicU64,

    // Prometheus metrics
    prometheus_registry: Registry,
    connections_total: Counter,
    connections_succeeded_total: Counter,
    connections_failed_total: Counter,
    active_connections_gauge: Gauge,
    errors_total: Counter,
    bytes_received_total: Counter,
    bytes_sent_total: Counter,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        let prometheus_registry = Registry::new();

        let connections_total = Counter::new(
            "pgbridge_connections_total",
            "Total number of accepted client connections",
        )
        .expect("Failed to create connections_total counter");

        let connections_succeeded_total = Counter::new(
            "pgbridge_connections_succeeded_total",
            "Connections whose backend dial completed",
        )
        .expect("Failed to create connections_succeeded_total counter");

        let connections_failed_total = Counter::new(
            "pgbridge_connections_failed_total",
            "Connections torn down by an error",
        )
        .expect("Failed to create connections_failed_total counter");

        let active_connections_gauge = Gauge::new(
            "pgbridge_active_connections",
            "Number of currently relayed connections",
        )
        .expect("Failed to create active_connections gauge");

        let errors_total = Counter::new(
            "pgbridge_errors_total",
            "Total dial and socket errors",
        )
        .expect("Failed to create errors_total counter");

        let bytes_received_total = Counter::new(
            "pgbridge_bytes_received_total",
            "Bytes relayed from clients to the backend",
        )
        .expect("Failed to create bytes_received_total counter");

        let bytes_sent_total = Counter::new(
            "pgbridge_bytes_sent_total",
            "Bytes relayed from the backend to clients",
        )
        .expect("Failed to create bytes_sent_total counter");

        prometheus_registry
            .register(Box::new(connections_total.clone()))
            .expect("Failed to register connections_total");
        prometheus_registry
            .register(Box::new(connections_succeeded_total.clone()))
            .expect("Failed to register connections_succeeded_total");
        prometheus_registry
            .register(Box::new(connections_failed_total.clone()))
            .expect("Failed to register connections_failed_total");
        prometheus_registry
            .register(Box::new(active_connections_gauge.clone()))
            .expect("Failed to register active_connections");
        prometheus_registry
            .register(Box::new(errors_total.clone()))
            .expect("Failed to register errors_total");
        prometheus_registry
            .register(Box::new(bytes_received_total.clone()))
            .expect("Failed to register bytes_received_total");
        prometheus_registry
            .register(Box::new(bytes_sent_total.clone()))
            .expect("Failed to register bytes_sent_total");

        Self {
            start_time: Instant::now(),
            total_connections: AtomicU64::new(0),
            successful_connections: AtomicU64::new(0),
            failed_connections: AtomicU64::new(0),
            active_connections: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            prometheus_registry,
            connections_total,
            connections_succeeded_total,
            connections_failed_total,
            active_connections_gauge,
            errors_total,
            bytes_received_total,
            bytes_sent_total,
        }
    }

    /// Record an accepted client connection
    pub fn connection_opened(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.connections_total.inc();
        self.active_connections_gauge.inc();
    }

    /// Record a torn-down connection. The active count floors at zero, so a
    /// duplicate call never drives it negative.
    pub fn connection_closed(&self) {
        let previous = self
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(1))
            })
            .unwrap_or(0);

        if previous > 0 {
            self.active_connections_gauge.dec();
        }
    }

    /// Record a completed backend dial
    pub fn connection_succeeded(&self) {
        self.successful_connections.fetch_add(1, Ordering::Relaxed);
        self.connections_succeeded_total.inc();
    }

    /// Record a dial or socket error; the affected connection also counts
    /// as failed
    pub fn record_error(&self) {
        self.total_errors.fetch_add(1, Ordering::Relaxed);
        self.failed_connections.fetch_add(1, Ordering::Relaxed);
        self.errors_total.inc();
        self.connections_failed_total.inc();
    }

    /// Record bytes relayed client -> backend
    pub fn add_bytes_received(&self, bytes: u64) {
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
        self.bytes_received_total.inc_by(bytes as f64);
    }

    /// Record bytes relayed backend -> client
    pub fn add_bytes_sent(&self, bytes: u64) {
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
        self.bytes_sent_total.inc_by(bytes as f64);
    }

    /// Get number of currently relayed connections
    pub fn active_connections(&self) -> u64 {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Process uptime
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Take a point-in-time snapshot; derived rates are computed here,
    /// never stored
    pub fn snapshot(&self) -> MetricsSnapshot {
        let total = self.total_connections.load(Ordering::Relaxed);
        let successful = self.successful_connections.load(Ordering::Relaxed);
        let bytes_received = self.bytes_received.load(Ordering::Relaxed);
        let bytes_sent = self.bytes_sent.load(Ordering::Relaxed);
        let uptime = self.uptime().as_secs_f64().max(f64::MIN_POSITIVE);

        let success_rate = if total > 0 {
            (successful as f64 / total as f64) * 100.0
        } else {
            0.0
        };

        MetricsSnapshot {
            total_connections: total,
            successful_connections: successful,
            failed_connections: self.failed_connections.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            total_errors: self.total_errors.load(Ordering::Relaxed),
            bytes_received,
            bytes_sent,
            uptime_seconds: self.uptime().as_secs_f64(),
            success_rate,
            throughput: Throughput {
                received_kb_per_sec: bytes_received as f64 / uptime / 1024.0,
                sent_kb_per_sec: bytes_sent as f64 / uptime / 1024.0,
            },
        }
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.prometheus_registry.gather();

        match encoder.encode_to_string(&metric_families) {
            Ok(output) => output,
            Err(e) => {
                error!(error = %e, "Failed to encode Prometheus metrics");
                String::new()
            }
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_counters() {
        let metrics = Metrics::new();

        metrics.connection_opened();
        metrics.connection_opened();
        metrics.connection_succeeded();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_connections, 2);
        assert_eq!(snapshot.successful_connections, 1);
        assert_eq!(snapshot.active_connections, 2);
        assert_eq!(snapshot.success_rate, 50.0);

        metrics.connection_closed();
        assert_eq!(metrics.active_connections(), 1);
    }

    #[test]
    fn test_active_count_floors_at_zero() {
        let metrics = Metrics::new();

        metrics.connection_opened();
        metrics.connection_closed();
        // Duplicate teardown must not underflow
        metrics.connection_closed();
        metrics.connection_closed();

        assert_eq!(metrics.active_connections(), 0);
    }

    #[test]
    fn test_error_counts_failed_connection() {
        let metrics = Metrics::new();

        metrics.connection_opened();
        metrics.record_error();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_errors, 1);
        assert_eq!(snapshot.failed_connections, 1);
    }

    #[test]
    fn test_byte_counters() {
        let metrics = Metrics::new();

        metrics.add_bytes_received(100);
        metrics.add_bytes_received(24);
        metrics.add_bytes_sent(7);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.bytes_received, 124);
        assert_eq!(snapshot.bytes_sent, 7);
    }

    #[test]
    fn test_prometheus_export_contains_series() {
        let metrics = Metrics::new();
        metrics.connection_opened();

        let output = metrics.export_prometheus();
        assert!(output.contains("pgbridge_connections_total"));
        assert!(output.contains("pgbridge_active_connections"));
    }
}
