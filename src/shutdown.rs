//! Graceful Shutdown Handling
//!
//! Listens for termination signals and coordinates the ordered stop of the
//! relay, the metrics reporter, and the health server.

use crate::relay::RelayServer;
use crate::Result;
use std::time::{Duration, Instant};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Shutdown coordinator that manages the shutdown process
pub struct ShutdownCoordinator {
    /// Broadcast sender for shutdown signal
    shutdown_tx: broadcast::Sender<()>,
    /// How long to wait for forced teardowns to drain the registry
    timeout: Duration,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator
    pub fn new(timeout: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            shutdown_tx,
            timeout,
        }
    }

    /// Get a shutdown receiver for components to listen for shutdown signals
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Block until a termination signal arrives (SIGTERM, SIGINT)
    pub async fn listen_for_signals(&self) -> Result<()> {
        info!("Starting shutdown signal listener");

        #[cfg(unix)]
        {
            let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
            let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, initiating graceful shutdown");
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, initiating graceful shutdown");
                }
            }
        }

        #[cfg(windows)]
        {
            signal::ctrl_c().await?;
            info!("Received Ctrl+C, initiating graceful shutdown");
        }

        // Notify any subscribed components
        if self.shutdown_tx.send(()).is_err() {
            debug!("No components subscribed to the shutdown signal");
        }

        Ok(())
    }

    /// Wait for the relay's registry to drain after a forced stop.
    ///
    /// stop() does not wait for teardowns, so the registry may briefly hold
    /// connections whose tasks are still observing the shutdown broadcast.
    pub async fn wait_for_drain(&self, relay: &RelayServer) {
        let start_time = Instant::now();
        let mut last_count = relay.active_connection_count();

        if last_count == 0 {
            info!("No active connections to drain");
            return;
        }

        info!(
            "Waiting for {} forced teardowns to complete (timeout: {:?})",
            last_count, self.timeout
        );

        while last_count > 0 && start_time.elapsed() < self.timeout {
            tokio::time::sleep(Duration::from_millis(100)).await;

            let current_count = relay.active_connection_count();
            if current_count != last_count {
                debug!("Active connections: {} -> {}", last_count, current_count);
                last_count = current_count;
            }
        }

        let final_count = relay.active_connection_count();
        let elapsed = start_time.elapsed();

        if final_count == 0 {
            info!("All connections torn down in {:?}", elapsed);
        } else {
            warn!(
                "Drain timeout reached after {:?} with {} connections still tracked",
                elapsed, final_count
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::metrics::Metrics;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_shutdown_coordinator_creation() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(5));
        let _receiver = coordinator.subscribe();
    }

    #[tokio::test]
    async fn test_shutdown_signal_broadcast() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(5));
        let mut receiver = coordinator.subscribe();

        coordinator.shutdown_tx.send(()).unwrap();

        assert!(receiver.recv().await.is_ok());
    }

    #[tokio::test]
    async fn test_drain_with_no_connections_returns_immediately() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(5));
        let relay = RelayServer::new(Arc::new(Config::default()), Arc::new(Metrics::new()));

        let start = Instant::now();
        coordinator.wait_for_drain(&relay).await;
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
