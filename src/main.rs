//! pgbridge - IPv4-to-IPv6 Bridging Proxy for PostgreSQL
//!
//! Relays TCP byte streams between IPv4 (or dual-stack) clients and a
//! PostgreSQL backend that only accepts IPv6 connections.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pgbridge::{
    config::ConfigManager, health::HealthServer, metrics::MetricsReporter, Metrics, RelayServer,
    ShutdownCoordinator,
};

/// CLI arguments for pgbridge
#[derive(Parser, Debug)]
#[command(name = "pgbridge")]
#[command(about = "pgbridge - IPv4-to-IPv6 bridging proxy for PostgreSQL")]
#[command(version)]
#[command(long_about = "
pgbridge - IPv4-to-IPv6 bridging proxy for PostgreSQL

Accepts IPv4 and IPv6 client connections and relays them to a PostgreSQL
backend that only publishes IPv6 addresses, such as a Supabase pooler.

Configuration priority (highest to lowest):
1. Command-line arguments
2. Configuration file
3. Environment variables
4. Built-in defaults

Environment variables:
  PGBRIDGE_LISTEN_ADDR      - Proxy listen address (e.g., 0.0.0.0:5432)
  PGBRIDGE_BACKEND_HOST     - Backend host (IPv6 literal or hostname)
  PGBRIDGE_BACKEND_PORT     - Backend port
  PGBRIDGE_CONNECT_TIMEOUT  - Backend connect timeout (e.g., 30s)
  PGBRIDGE_IDLE_TIMEOUT     - Per-socket idle timeout (e.g., 5m)
  PGBRIDGE_MAX_CONNECTIONS  - Maximum concurrent connections
  PGBRIDGE_HEALTH_ADDR      - Health endpoint address (e.g., 0.0.0.0:3000)
  PGBRIDGE_METRICS_INTERVAL - Metrics report interval (e.g., 60s)
  PGBRIDGE_LOG_LEVEL        - Log level (trace, debug, info, warn, error)
")]
pub struct CliArgs {
    /// Configuration file path
    #[arg(
        short,
        long,
        default_value = "config.toml",
        help = "Path to configuration file"
    )]
    pub config: PathBuf,

    /// Listen address (overrides config file)
    #[arg(short, long, help = "Listen address (e.g., 0.0.0.0:5432)")]
    pub listen: Option<String>,

    /// Port to listen on (overrides config file)
    #[arg(short, long, help = "Port to listen on")]
    pub port: Option<u16>,

    /// Backend host (overrides config file)
    #[arg(long, help = "Backend host (IPv6 literal or hostname)")]
    pub backend_host: Option<String>,

    /// Backend port (overrides config file)
    #[arg(long, help = "Backend port")]
    pub backend_port: Option<u16>,

    /// Idle timeout in seconds
    #[arg(long, help = "Per-socket idle timeout in seconds")]
    pub idle_timeout: Option<u64>,

    /// Maximum number of concurrent connections
    #[arg(long, help = "Maximum number of concurrent connections")]
    pub max_connections: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", help = "Log level")]
    pub log_level: String,

    /// Enable verbose logging (sets log level to debug)
    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration and exit")]
    pub validate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    init_tracing(&args)?;

    info!(
        "Starting pgbridge v{} - IPv4-to-IPv6 PostgreSQL proxy",
        env!("CARGO_PKG_VERSION")
    );

    // Load configuration with priority: CLI args > config file > environment > defaults
    let mut config = if args.config.exists() {
        ConfigManager::load_from_file(&args.config)?
    } else {
        info!("Config file not found, checking environment variables");
        ConfigManager::load_from_env()?
    };

    // Apply CLI argument overrides (highest priority)
    config.merge_with_cli_args(
        args.listen.as_deref(),
        args.port,
        args.backend_host.as_deref(),
        args.backend_port,
        args.idle_timeout,
        args.max_connections,
    );

    // Final validation after all overrides
    config
        .validate()
        .context("Final configuration validation failed")?;

    if args.validate_config {
        info!("Configuration is valid");
        info!("Configuration summary:");
        info!("  Listen address: {}", config.server.listen_addr);
        info!(
            "  Backend: {}:{}",
            config.backend.host, config.backend.port
        );
        info!("  Max connections: {}", config.server.max_connections);
        info!("  Idle timeout: {:?}", config.server.idle_timeout);
        info!(
            "  Health endpoint: {}",
            if config.health.enabled {
                config.health.bind_addr.to_string()
            } else {
                "disabled".to_string()
            }
        );
        return Ok(());
    }

    info!("Configuration loaded successfully");
    info!("Target: {}:{}", config.backend.host, config.backend.port);

    let config = Arc::new(config);

    // Single metrics sink shared by the relay, the reporter, and the
    // health endpoint
    let metrics = Arc::new(Metrics::new());

    // Periodic metrics report
    let mut reporter = MetricsReporter::new(
        Arc::clone(&metrics),
        config.monitoring.report_interval,
    );
    if config.monitoring.report_enabled {
        reporter.start();
    }

    // Health/status endpoint
    let health_handle = if config.health.enabled {
        let health_server = HealthServer::new(config.health.bind_addr, Arc::clone(&metrics));

        Some(tokio::spawn(async move {
            if let Err(e) = health_server.start().await {
                error!("Health server error: {}", e);
            }
        }))
    } else {
        info!("Health endpoint disabled");
        None
    };

    // The relay itself; a bind failure here is fatal
    let relay = Arc::new(RelayServer::new(
        Arc::clone(&config),
        Arc::clone(&metrics),
    ));
    relay.start().await.context("Failed to start relay server")?;

    info!("All services started successfully");

    let shutdown_coordinator = ShutdownCoordinator::new(config.server.shutdown_timeout);
    if let Err(e) = shutdown_coordinator.listen_for_signals().await {
        error!("Error setting up signal handlers: {}", e);
    }

    info!("Initiating graceful shutdown...");

    relay.stop().await;
    reporter.stop();

    if let Some(handle) = health_handle {
        handle.abort();
        info!("Health server shutdown");
    }

    shutdown_coordinator.wait_for_drain(&relay).await;

    info!("Shutdown complete");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(args: &CliArgs) -> Result<()> {
    let log_level = if args.verbose {
        "debug"
    } else {
        &args.log_level
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true),
        )
        .with(env_filter)
        .init();

    Ok(())
}
