//! Periodic Metrics Reporter
//!
//! Logs a snapshot of the proxy counters at a fixed interval.

use super::Metrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

/// Interval task that logs a metrics report until stopped
pub struct MetricsReporter {
    metrics: Arc<Metrics>,
    interval: Duration,
    handle: Option<JoinHandle<()>>,
}

impl MetricsReporter {
    /// Create a new reporter; call `start` to begin reporting
    pub fn new(metrics: Arc<Metrics>, interval: Duration) -> Self {
        Self {
            metrics,
            interval,
            handle: None,
        }
    }

    /// Start the periodic report task
    pub fn start(&mut self) {
        if self.handle.is_some() {
            return;
        }

        let metrics = Arc::clone(&self.metrics);
        let interval = self.interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; skip it so reports are spaced
            ticker.tick().await;

            loop {
                ticker.tick().await;

                let snapshot = metrics.snapshot();
                info!(
                    active_connections = snapshot.active_connections,
                    total_connections = snapshot.total_connections,
                    success_rate = %format!("{:.2}%", snapshot.success_rate),
                    received_kb_per_sec = snapshot.throughput.received_kb_per_sec,
                    sent_kb_per_sec = snapshot.throughput.sent_kb_per_sec,
                    "Metrics report"
                );
            }
        });

        self.handle = Some(handle);
        info!(interval = ?self.interval, "Started periodic metrics reporting");
    }

    /// Stop the periodic report task; safe to call when not started
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            info!("Stopped periodic metrics reporting");
        }
    }
}

impl Drop for MetricsReporter {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
