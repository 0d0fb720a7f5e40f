//! Configuration Types

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub backend: BackendConfig,
    pub health: HealthConfig,
    pub monitoring: MonitoringConfig,
}

/// Proxy server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the relay listens on; accepts both IPv4 and IPv6 clients
    pub listen_addr: SocketAddr,
    pub max_connections: usize,
    /// Per-socket idle timeout; a silent leg tears the connection down
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,
    pub buffer_size: usize,
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

/// Backend endpoint configuration; the backend leg is always IPv6
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackendConfig {
    /// IPv6 literal or a hostname with AAAA records
    pub host: String,
    pub port: u16,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
}

/// Health/status HTTP endpoint configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthConfig {
    pub enabled: bool,
    pub bind_addr: SocketAddr,
}

/// Monitoring configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Enables the periodic metrics report in the log
    pub report_enabled: bool,
    #[serde(with = "humantime_serde")]
    pub report_interval: Duration,
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            // The v6 wildcard accepts IPv4-mapped clients on dual-stack hosts
            listen_addr: "[::]:5432".parse().unwrap(),
            max_connections: 100,
            idle_timeout: Duration::from_secs(300),
            buffer_size: 8192,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6543,
            connect_timeout: Duration::from_secs(30),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_addr: "[::]:3000".parse().unwrap(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            report_enabled: true,
            report_interval: Duration::from_secs(60),
            log_level: "info".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            backend: BackendConfig::default(),
            health: HealthConfig::default(),
            monitoring: MonitoringConfig::default(),
        }
    }
}
