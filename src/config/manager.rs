//! Configuration Manager

use super::Config;
use crate::Result;
use anyhow::{bail, Context};
use std::net::IpAddr;
use std::path::Path;

/// Manages configuration loading and validation
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration from file
    pub fn load_from_file(path: &Path) -> Result<Config> {
        if path.exists() {
            tracing::info!("Loading configuration from: {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;

            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

            config
                .validate()
                .with_context(|| "Configuration validation failed")?;

            tracing::info!("Configuration loaded and validated successfully");
            Ok(config)
        } else {
            tracing::warn!(
                "Configuration file not found at {}, using defaults",
                path.display()
            );
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Load configuration from environment variables
    pub fn load_from_env() -> Result<Config> {
        let mut config = Config::default();

        if let Ok(listen_addr) = std::env::var("PGBRIDGE_LISTEN_ADDR") {
            config.server.listen_addr = listen_addr
                .parse()
                .with_context(|| format!("Invalid PGBRIDGE_LISTEN_ADDR: {}", listen_addr))?;
        }

        if let Ok(host) = std::env::var("PGBRIDGE_BACKEND_HOST") {
            config.backend.host = host;
        }

        if let Ok(port) = std::env::var("PGBRIDGE_BACKEND_PORT") {
            config.backend.port = port
                .parse()
                .with_context(|| format!("Invalid PGBRIDGE_BACKEND_PORT: {}", port))?;
        }

        if let Ok(timeout) = std::env::var("PGBRIDGE_CONNECT_TIMEOUT") {
            config.backend.connect_timeout = humantime::parse_duration(&timeout)
                .with_context(|| format!("Invalid PGBRIDGE_CONNECT_TIMEOUT: {}", timeout))?;
        }

        if let Ok(timeout) = std::env::var("PGBRIDGE_IDLE_TIMEOUT") {
            config.server.idle_timeout = humantime::parse_duration(&timeout)
                .with_context(|| format!("Invalid PGBRIDGE_IDLE_TIMEOUT: {}", timeout))?;
        }

        if let Ok(max_conn) = std::env::var("PGBRIDGE_MAX_CONNECTIONS") {
            config.server.max_connections = max_conn
                .parse()
                .with_context(|| format!("Invalid PGBRIDGE_MAX_CONNECTIONS: {}", max_conn))?;
        }

        if let Ok(health_addr) = std::env::var("PGBRIDGE_HEALTH_ADDR") {
            config.health.bind_addr = health_addr
                .parse()
                .with_context(|| format!("Invalid PGBRIDGE_HEALTH_ADDR: {}", health_addr))?;
        }

        if let Ok(interval) = std::env::var("PGBRIDGE_METRICS_INTERVAL") {
            config.monitoring.report_interval = humantime::parse_duration(&interval)
                .with_context(|| format!("Invalid PGBRIDGE_METRICS_INTERVAL: {}", interval))?;
        }

        if let Ok(log_level) = std::env::var("PGBRIDGE_LOG_LEVEL") {
            config.monitoring.log_level = log_level;
        }

        config.validate()?;
        Ok(config)
    }
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_server_config()
            .with_context(|| "Server configuration validation failed")?;

        self.validate_backend_config()
            .with_context(|| "Backend configuration validation failed")?;

        self.validate_monitoring_config()
            .with_context(|| "Monitoring configuration validation failed")?;

        Ok(())
    }

    fn validate_server_config(&self) -> Result<()> {
        if self.server.max_connections == 0 {
            bail!("max_connections must be greater than 0");
        }

        if self.server.max_connections > 100000 {
            bail!("max_connections cannot exceed 100,000 for safety");
        }

        if self.server.idle_timeout.as_millis() == 0 {
            bail!("idle_timeout must be greater than 0");
        }

        if self.server.buffer_size < 1024 {
            bail!("buffer_size must be at least 1024 bytes");
        }

        if self.server.buffer_size > 1048576 {
            bail!("buffer_size cannot exceed 1MB");
        }

        Ok(())
    }

    fn validate_backend_config(&self) -> Result<()> {
        if self.backend.host.is_empty() {
            bail!("backend.host must not be empty");
        }

        // The backend leg is IPv6 by contract; an IPv4 literal can never dial
        if let Ok(IpAddr::V4(addr)) = self.backend.host.parse::<IpAddr>() {
            bail!(
                "backend.host {} is an IPv4 literal; an IPv6 address or hostname is required",
                addr
            );
        }

        if self.backend.port == 0 {
            bail!("backend.port must not be 0");
        }

        if self.backend.connect_timeout.as_millis() == 0 {
            bail!("backend.connect_timeout must be greater than 0");
        }

        Ok(())
    }

    fn validate_monitoring_config(&self) -> Result<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.monitoring.log_level.as_str()) {
            bail!(
                "monitoring.log_level must be one of: {}",
                valid_log_levels.join(", ")
            );
        }

        if self.monitoring.report_enabled && self.monitoring.report_interval.as_secs() == 0 {
            bail!("monitoring.report_interval must be greater than 0");
        }

        Ok(())
    }

    /// Merge with CLI arguments
    pub fn merge_with_cli_args(
        &mut self,
        listen: Option<&str>,
        port: Option<u16>,
        backend_host: Option<&str>,
        backend_port: Option<u16>,
        idle_timeout_secs: Option<u64>,
        max_connections: Option<usize>,
    ) {
        if let Some(listen_str) = listen {
            if let Ok(addr) = listen_str.parse::<std::net::SocketAddr>() {
                self.server.listen_addr = addr;
                tracing::info!("CLI override: listen address set to {}", addr);
            } else {
                tracing::warn!("Invalid listen address provided: {}", listen_str);
            }
        }

        if let Some(port) = port {
            self.server.listen_addr.set_port(port);
            tracing::info!("CLI override: listen port set to {}", port);
        }

        if let Some(host) = backend_host {
            self.backend.host = host.to_string();
            tracing::info!("CLI override: backend host set to {}", host);
        }

        if let Some(port) = backend_port {
            self.backend.port = port;
            tracing::info!("CLI override: backend port set to {}", port);
        }

        if let Some(secs) = idle_timeout_secs {
            self.server.idle_timeout = std::time::Duration::from_secs(secs);
            tracing::info!("CLI override: idle timeout set to {}s", secs);
        }

        if let Some(max_conn) = max_connections {
            self.server.max_connections = max_conn;
            tracing::info!("CLI override: max connections set to {}", max_conn);
        }
    }
}
