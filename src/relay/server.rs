//! Relay Server
//!
//! Owns the listening socket and the registry of active connections. Each
//! accepted client gets its own task that dials the backend over IPv6 and
//! runs two independently cancellable copy loops.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Context};
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{lookup_host, TcpListener, TcpStream};
use tokio::sync::{broadcast, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::connection::{CloseReason, Connection, Leg};
use crate::config::{BackendConfig, Config};
use crate::metrics::Metrics;
use crate::Result;

type ConnectionRegistry = Arc<Mutex<HashMap<u64, Arc<Connection>>>>;

/// Accepts client connections and relays them to the IPv6 backend
pub struct RelayServer {
    config: Arc<Config>,
    metrics: Arc<Metrics>,
    connections: ConnectionRegistry,
    next_connection_id: Arc<AtomicU64>,
    connection_slots: Arc<Semaphore>,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_flag: Arc<AtomicBool>,
    accept_handle: Mutex<Option<JoinHandle<()>>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl RelayServer {
    /// Create a new relay server; call `start` to bind and begin accepting
    pub fn new(config: Arc<Config>, metrics: Arc<Metrics>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let connection_slots = Arc::new(Semaphore::new(config.server.max_connections));

        Self {
            config,
            metrics,
            connections: Arc::new(Mutex::new(HashMap::new())),
            next_connection_id: Arc::new(AtomicU64::new(1)),
            connection_slots,
            shutdown_tx,
            shutdown_flag: Arc::new(AtomicBool::new(false)),
            accept_handle: Mutex::new(None),
            local_addr: Mutex::new(None),
        }
    }

    /// Bind the listener and spawn the accept loop.
    ///
    /// A bind failure is fatal and surfaced to the caller; every other
    /// failure is local to a single connection.
    pub async fn start(&self) -> Result<()> {
        if self.accept_handle.lock().unwrap().is_some() {
            return Err(anyhow!("Relay server already started"));
        }

        let listen_addr = self.config.server.listen_addr;
        info!("Binding TCP listener to {}", listen_addr);

        let listener = TcpListener::bind(listen_addr)
            .await
            .with_context(|| format!("Failed to bind proxy listener to {}", listen_addr))?;

        let local_addr = listener
            .local_addr()
            .context("Failed to read bound listener address")?;
        *self.local_addr.lock().unwrap() = Some(local_addr);

        info!(
            "Proxy listening on {}, forwarding to {}:{}",
            local_addr, self.config.backend.host, self.config.backend.port
        );

        let handle = tokio::spawn(Self::accept_loop(
            listener,
            Arc::clone(&self.config),
            Arc::clone(&self.metrics),
            Arc::clone(&self.connections),
            Arc::clone(&self.next_connection_id),
            Arc::clone(&self.connection_slots),
            self.shutdown_tx.clone(),
            Arc::clone(&self.shutdown_flag),
        ));
        *self.accept_handle.lock().unwrap() = Some(handle);

        Ok(())
    }

    /// Stop accepting, force-close every tracked connection, and release the
    /// listening socket. Resolves only after the listener is fully released;
    /// does not wait for graceful closes. Safe to call with no connections
    /// active, before `start`, and more than once.
    pub async fn stop(&self) {
        info!(
            "Stopping relay server ({} active connections)",
            self.active_connection_count()
        );

        // The flag covers connections accepted between the broadcast and
        // their subscription; every running task gets the broadcast
        self.shutdown_flag.store(true, Ordering::Relaxed);
        let _ = self.shutdown_tx.send(());

        let handle = self.accept_handle.lock().unwrap().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    error!("Accept loop task failed: {}", e);
                }
            }
        }

        self.local_addr.lock().unwrap().take();
        info!("Relay server stopped, listener released");
    }

    /// Current size of the active-connection registry
    pub fn active_connection_count(&self) -> usize {
        self.connections.lock().unwrap().len()
    }

    /// The bound listener address, once `start` has succeeded
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap()
    }

    /// Main connection acceptance loop; never blocks on an individual
    /// connection's dial or transfer
    #[allow(clippy::too_many_arguments)]
    async fn accept_loop(
        listener: TcpListener,
        config: Arc<Config>,
        metrics: Arc<Metrics>,
        connections: ConnectionRegistry,
        next_connection_id: Arc<AtomicU64>,
        connection_slots: Arc<Semaphore>,
        shutdown_tx: broadcast::Sender<()>,
        shutdown_flag: Arc<AtomicBool>,
    ) {
        info!("Starting connection acceptance loop");
        let mut shutdown_rx = shutdown_tx.subscribe();

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => {
                            if shutdown_flag.load(Ordering::Relaxed) {
                                debug!("Rejecting connection from {} due to shutdown", addr);
                                continue;
                            }

                            let permit = match Arc::clone(&connection_slots).try_acquire_owned() {
                                Ok(permit) => permit,
                                Err(_) => {
                                    warn!("Connection limit reached, rejecting connection from {}", addr);
                                    continue;
                                }
                            };

                            let id = next_connection_id.fetch_add(1, Ordering::Relaxed);
                            let conn = Arc::new(Connection::new(id, addr));

                            tokio::spawn(Self::handle_connection(
                                stream,
                                conn,
                                permit,
                                Arc::clone(&config),
                                Arc::clone(&metrics),
                                Arc::clone(&connections),
                                shutdown_tx.subscribe(),
                                Arc::clone(&shutdown_flag),
                            ));
                        }
                        Err(e) => {
                            error!("Error accepting connection: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Received shutdown signal, stopping connection acceptance");
                    break;
                }
            }
        }

        info!("Connection acceptance loop stopped");
        // The listener is dropped here, releasing the socket
    }

    /// Handle one accepted client: register, dial, splice, tear down
    #[allow(clippy::too_many_arguments)]
    async fn handle_connection(
        client: TcpStream,
        conn: Arc<Connection>,
        _permit: OwnedSemaphorePermit,
        config: Arc<Config>,
        metrics: Arc<Metrics>,
        connections: ConnectionRegistry,
        mut shutdown_rx: broadcast::Receiver<()>,
        shutdown_flag: Arc<AtomicBool>,
    ) {
        // Our shutdown receiver already exists, so a flag observed false
        // here guarantees the broadcast below will reach us
        if shutdown_flag.load(Ordering::Relaxed) {
            debug!(client = %conn.client_addr, "Dropping connection accepted during shutdown");
            return;
        }

        debug!(
            connection_id = conn.id,
            client = %conn.client_addr,
            "New client connection"
        );

        connections
            .lock()
            .unwrap()
            .insert(conn.id, Arc::clone(&conn));
        metrics.connection_opened();

        // The dial races shutdown so stop() interrupts pending dials too
        let dial_result = tokio::select! {
            result = dial_backend(&config.backend) => result,
            _ = shutdown_rx.recv() => {
                Self::teardown(&connections, &metrics, &conn, &CloseReason::Shutdown);
                return;
            }
        };

        let backend = match dial_result {
            Ok(stream) => stream,
            Err(e) => {
                Self::teardown(&connections, &metrics, &conn, &CloseReason::DialFailed(e));
                return;
            }
        };

        conn.set_relaying();
        metrics.connection_succeeded();
        debug!(
            connection_id = conn.id,
            client = %conn.client_addr,
            "Connected to backend"
        );

        let idle_timeout = config.server.idle_timeout;
        let buffer_size = config.server.buffer_size;
        let (client_read, client_write) = client.into_split();
        let (backend_read, backend_write) = backend.into_split();

        // Completion of either copy loop (or shutdown) cancels the other;
        // dropping the halves destroys both sockets together
        let reason = tokio::select! {
            reason = relay_copy(
                client_read, backend_write, Leg::Client,
                idle_timeout, buffer_size, &metrics, &conn,
            ) => reason,
            reason = relay_copy(
                backend_read, client_write, Leg::Backend,
                idle_timeout, buffer_size, &metrics, &conn,
            ) => reason,
            _ = shutdown_rx.recv() => CloseReason::Shutdown,
        };

        Self::teardown(&connections, &metrics, &conn, &reason);
    }

    /// Idempotent teardown: deregister, account, log. Both legs of a dying
    /// connection can race into this; only the `begin_close` winner acts.
    fn teardown(
        connections: &Mutex<HashMap<u64, Arc<Connection>>>,
        metrics: &Metrics,
        conn: &Connection,
        reason: &CloseReason,
    ) {
        if !conn.begin_close() {
            return;
        }

        connections.lock().unwrap().remove(&conn.id);

        if reason.is_error() {
            metrics.record_error();
            error!(
                connection_id = conn.id,
                client = %conn.client_addr,
                reason = %reason,
                "Connection error"
            );
        } else if reason.is_timeout() {
            debug!(
                connection_id = conn.id,
                client = %conn.client_addr,
                reason = %reason,
                "Connection idle timeout"
            );
        } else {
            debug!(
                connection_id = conn.id,
                client = %conn.client_addr,
                reason = %reason,
                "Connection closed"
            );
        }

        metrics.connection_closed();
        conn.mark_closed();

        debug!(
            connection_id = conn.id,
            client = %conn.client_addr,
            duration_ms = conn.duration().as_millis() as u64,
            bytes_in = conn.bytes_in(),
            bytes_out = conn.bytes_out(),
            "Removed connection from active tracking"
        );
    }
}

/// Resolve the backend with a forced IPv6 address family
async fn resolve_backend_addr(config: &BackendConfig) -> Result<SocketAddr> {
    if let Ok(ip) = config.host.parse::<IpAddr>() {
        return match ip {
            IpAddr::V6(_) => Ok(SocketAddr::new(ip, config.port)),
            IpAddr::V4(v4) => Err(anyhow!(
                "backend {} is an IPv4 literal; the backend leg requires IPv6",
                v4
            )),
        };
    }

    let mut addrs = lookup_host((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("DNS resolution failed for {}", config.host))?;

    addrs
        .find(|addr| addr.is_ipv6())
        .ok_or_else(|| anyhow!("no IPv6 address resolved for {}", config.host))
}

/// Single connect attempt to the backend, bounded by the connect timeout
async fn dial_backend(config: &BackendConfig) -> Result<TcpStream> {
    let addr = resolve_backend_addr(config).await?;
    debug!("Dialing backend at {}", addr);

    match timeout(config.connect_timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(anyhow!("Connection to backend {} failed: {}", addr, e)),
        Err(_) => Err(anyhow!(
            "Connection to backend {} timed out after {:?}",
            addr,
            config.connect_timeout
        )),
    }
}

/// One direction of the splice. Reads from `leg`, writes to its peer, and
/// runs until EOF, an error, or the per-socket idle timeout. Every relayed
/// chunk is accounted in the metrics sink and on the connection.
async fn relay_copy<R, W>(
    mut reader: R,
    mut writer: W,
    leg: Leg,
    idle_timeout: Duration,
    buffer_size: usize,
    metrics: &Metrics,
    conn: &Connection,
) -> CloseReason
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = BytesMut::with_capacity(buffer_size);

    loop {
        buf.clear();

        let read = match timeout(idle_timeout, reader.read_buf(&mut buf)).await {
            Err(_) => return leg.timed_out(),
            Ok(Err(e)) => return leg.errored(e),
            Ok(Ok(0)) => return leg.closed(),
            Ok(Ok(n)) => n,
        };

        if let Err(e) = writer.write_all(&buf).await {
            return leg.peer().errored(e);
        }

        match leg {
            Leg::Client => {
                metrics.add_bytes_received(read as u64);
                conn.add_bytes_in(read as u64);
            }
            Leg::Backend => {
                metrics.add_bytes_sent(read as u64);
                conn.add_bytes_out(read as u64);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendConfig;

    fn registry_with(conn: &Arc<Connection>) -> Mutex<HashMap<u64, Arc<Connection>>> {
        let mut map = HashMap::new();
        map.insert(conn.id, Arc::clone(conn));
        Mutex::new(map)
    }

    #[test]
    fn test_teardown_is_idempotent() {
        let metrics = Metrics::new();
        let conn = Arc::new(Connection::new(7, "127.0.0.1:50000".parse().unwrap()));
        let connections = registry_with(&conn);

        metrics.connection_opened();

        // Simultaneous backend-error and client-close deliver two triggers
        RelayServer::teardown(
            &connections,
            &metrics,
            &conn,
            &CloseReason::BackendError(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "reset",
            )),
        );
        RelayServer::teardown(&connections, &metrics, &conn, &CloseReason::ClientClosed);

        assert_eq!(connections.lock().unwrap().len(), 0);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.active_connections, 0);
        assert_eq!(snapshot.total_errors, 1);
        assert_eq!(snapshot.failed_connections, 1);
    }

    #[test]
    fn test_timeout_teardown_is_not_an_error() {
        let metrics = Metrics::new();
        let conn = Arc::new(Connection::new(8, "127.0.0.1:50001".parse().unwrap()));
        let connections = registry_with(&conn);

        metrics.connection_opened();
        RelayServer::teardown(&connections, &metrics, &conn, &CloseReason::ClientTimeout);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_errors, 0);
        assert_eq!(snapshot.active_connections, 0);
    }

    #[tokio::test]
    async fn test_resolve_rejects_ipv4_literal() {
        let config = BackendConfig {
            host: "192.0.2.10".to_string(),
            port: 6543,
            connect_timeout: Duration::from_secs(1),
        };

        let result = resolve_backend_addr(&config).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("IPv4"));
    }

    #[tokio::test]
    async fn test_resolve_accepts_ipv6_literal() {
        let config = BackendConfig {
            host: "::1".to_string(),
            port: 6543,
            connect_timeout: Duration::from_secs(1),
        };

        let addr = resolve_backend_addr(&config).await.unwrap();
        assert!(addr.is_ipv6());
        assert_eq!(addr.port(), 6543);
    }

    #[tokio::test]
    async fn test_stop_before_start_is_safe() {
        let server = RelayServer::new(
            Arc::new(Config::default()),
            Arc::new(Metrics::new()),
        );

        server.stop().await;
        assert_eq!(server.active_connection_count(), 0);
        assert!(server.local_addr().is_none());
    }
}
