//! pgbridge Library
//!
//! An IPv4-to-IPv6 bridging TCP proxy for PostgreSQL backends that only
//! accept IPv6 connections. Clients connect over IPv4 or IPv6; the backend
//! leg is always dialed with a forced IPv6 address family.

pub mod config;
pub mod health;
pub mod metrics;
pub mod relay;
pub mod shutdown;

pub use config::Config;
pub use metrics::Metrics;
pub use relay::RelayServer;
pub use shutdown::ShutdownCoordinator;

/// Common error type for the proxy server
pub type Result<T> = anyhow::Result<T>;
