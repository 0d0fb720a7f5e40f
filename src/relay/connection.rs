//! Relayed Connection State

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};

/// Lifecycle state of a relayed connection.
///
/// Teardown is guarded by the transition into `Closing`: whichever event
/// wins that transition performs cleanup, every later event is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnState {
    Dialing = 0,
    Relaying = 1,
    Closing = 2,
    Closed = 3,
}

impl ConnState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnState::Dialing,
            1 => ConnState::Relaying,
            2 => ConnState::Closing,
            _ => ConnState::Closed,
        }
    }
}

/// One client-to-backend relay session.
///
/// The socket handles are owned by the connection's task, not by this
/// struct; dropping the task's stream halves destroys both sockets.
#[derive(Debug)]
pub struct Connection {
    pub id: u64,
    pub client_addr: SocketAddr,
    created_at: Instant,
    state: AtomicU8,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
}

impl Connection {
    pub fn new(id: u64, client_addr: SocketAddr) -> Self {
        Self {
            id,
            client_addr,
            created_at: Instant::now(),
            state: AtomicU8::new(ConnState::Dialing as u8),
            bytes_in: AtomicU64::new(0),
            bytes_out: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> ConnState {
        ConnState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Mark the backend dial as completed; ignored once closing has begun
    pub fn set_relaying(&self) {
        let _ = self.state.compare_exchange(
            ConnState::Dialing as u8,
            ConnState::Relaying as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Attempt the transition into `Closing`. Returns true for exactly one
    /// caller; duplicate teardown triggers get false.
    pub fn begin_close(&self) -> bool {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                if v < ConnState::Closing as u8 {
                    Some(ConnState::Closing as u8)
                } else {
                    None
                }
            })
            .is_ok()
    }

    pub fn mark_closed(&self) {
        self.state.store(ConnState::Closed as u8, Ordering::Release);
    }

    /// Bytes relayed client -> backend
    pub fn bytes_in(&self) -> u64 {
        self.bytes_in.load(Ordering::Relaxed)
    }

    /// Bytes relayed backend -> client
    pub fn bytes_out(&self) -> u64 {
        self.bytes_out.load(Ordering::Relaxed)
    }

    pub fn add_bytes_in(&self, bytes: u64) {
        self.bytes_in.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_bytes_out(&self, bytes: u64) {
        self.bytes_out.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn duration(&self) -> Duration {
        self.created_at.elapsed()
    }
}

/// Which side of the relay a copy loop reads from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leg {
    Client,
    Backend,
}

impl Leg {
    pub fn peer(self) -> Leg {
        match self {
            Leg::Client => Leg::Backend,
            Leg::Backend => Leg::Client,
        }
    }

    pub fn closed(self) -> CloseReason {
        match self {
            Leg::Client => CloseReason::ClientClosed,
            Leg::Backend => CloseReason::BackendClosed,
        }
    }

    pub fn timed_out(self) -> CloseReason {
        match self {
            Leg::Client => CloseReason::ClientTimeout,
            Leg::Backend => CloseReason::BackendTimeout,
        }
    }

    pub fn errored(self, error: std::io::Error) -> CloseReason {
        match self {
            Leg::Client => CloseReason::ClientError(error),
            Leg::Backend => CloseReason::BackendError(error),
        }
    }
}

/// Why a connection was torn down.
///
/// Dial failures and socket errors are recorded as errors in the metrics
/// sink; idle timeouts and peer closes are policy teardowns, not errors.
#[derive(Debug)]
pub enum CloseReason {
    ClientClosed,
    BackendClosed,
    ClientError(std::io::Error),
    BackendError(std::io::Error),
    ClientTimeout,
    BackendTimeout,
    DialFailed(anyhow::Error),
    Shutdown,
}

impl CloseReason {
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            CloseReason::ClientError(_)
                | CloseReason::BackendError(_)
                | CloseReason::DialFailed(_)
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            CloseReason::ClientTimeout | CloseReason::BackendTimeout
        )
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::ClientClosed => write!(f, "client closed"),
            CloseReason::BackendClosed => write!(f, "backend closed"),
            CloseReason::ClientError(e) => write!(f, "client error: {}", e),
            CloseReason::BackendError(e) => write!(f, "backend error: {}", e),
            CloseReason::ClientTimeout => write!(f, "client idle timeout"),
            CloseReason::BackendTimeout => write!(f, "backend idle timeout"),
            CloseReason::DialFailed(e) => write!(f, "backend dial failed: {}", e),
            CloseReason::Shutdown => write!(f, "forced shutdown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_connection() -> Connection {
        Connection::new(1, "127.0.0.1:45678".parse().unwrap())
    }

    #[test]
    fn test_state_transitions() {
        let conn = test_connection();
        assert_eq!(conn.state(), ConnState::Dialing);

        conn.set_relaying();
        assert_eq!(conn.state(), ConnState::Relaying);

        assert!(conn.begin_close());
        assert_eq!(conn.state(), ConnState::Closing);

        conn.mark_closed();
        assert_eq!(conn.state(), ConnState::Closed);
    }

    #[test]
    fn test_begin_close_is_exclusive() {
        let conn = test_connection();

        assert!(conn.begin_close());
        // Simultaneous client-close and backend-error: second trigger loses
        assert!(!conn.begin_close());

        conn.mark_closed();
        assert!(!conn.begin_close());
    }

    #[test]
    fn test_set_relaying_after_close_is_ignored() {
        let conn = test_connection();

        assert!(conn.begin_close());
        conn.set_relaying();
        assert_eq!(conn.state(), ConnState::Closing);
    }

    #[test]
    fn test_byte_counters() {
        let conn = test_connection();

        conn.add_bytes_in(8);
        conn.add_bytes_out(1);
        conn.add_bytes_in(4);

        assert_eq!(conn.bytes_in(), 12);
        assert_eq!(conn.bytes_out(), 1);
    }

    #[test]
    fn test_close_reason_classification() {
        assert!(CloseReason::DialFailed(anyhow::anyhow!("refused")).is_error());
        assert!(!CloseReason::ClientTimeout.is_error());
        assert!(CloseReason::BackendTimeout.is_timeout());
        assert!(!CloseReason::ClientClosed.is_error());
        assert!(!CloseReason::Shutdown.is_error());
    }
}
