//! Insight gateway server - HTTP front end for read-only analytics SQL
//! and pre-aggregated KPI lookups.

use anyhow::Result;
use clap::Parser;
use insight_server::{build_router, config::Config, logging, state::AppState};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use logging::{LogConfig, LogFormat};

/// Insight gateway server - guarded analytics queries with PII masking.
#[derive(Parser, Debug)]
#[command(name = "insight-server")]
#[command(about = "HTTP gateway for read-only analytics queries and KPI snapshots")]
#[command(version)]
struct Cli {
    /// Path to config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override port from config
    #[arg(short, long)]
    port: Option<u16>,

    /// Override analytics database path from config
    #[arg(long, value_name = "FILE")]
    analytics_db: Option<PathBuf>,

    /// Enable verbose logging (INFO level for most targets)
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug logging (DEBUG level)
    #[arg(short, long)]
    debug: bool,

    /// Enable trace logging (TRACE level for everything)
    #[arg(long)]
    trace: bool,

    /// Quiet mode (WARN and ERROR only)
    #[arg(short, long)]
    quiet: bool,

    /// Set log level for specific targets (e.g., "kpi=debug" or "guard=trace")
    /// Can be specified multiple times. Targets are prefixed with "gateway::" automatically.
    #[arg(long = "log", value_name = "TARGET=LEVEL")]
    log_overrides: Vec<String>,

    /// Log output format
    #[arg(long = "log-format", value_name = "FORMAT", default_value = "text")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = LogConfig::from_cli(
        cli.verbose,
        cli.debug,
        cli.trace,
        cli.quiet,
        cli.log_overrides,
        cli.log_format,
    );
    logging::init(&log_config);

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    // Apply CLI overrides
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(path) = cli.analytics_db {
        config.analytics_db_path = path;
    }

    tracing::info!(
        target: "gateway::startup",
        "Loaded configuration (port: {}, analytics store: {})",
        config.port,
        config.analytics_db_path.display()
    );

    let state = Arc::new(AppState::new(config.clone())?);
    tracing::info!(target: "gateway::startup", "Initialized application state");

    // Warm the KPI snapshots before accepting traffic; a failed warm-up
    // leaves the snapshots empty and the background loop retries.
    if let Err(e) = state.aggregator.refresh().await {
        tracing::warn!(target: "gateway::startup", "Initial KPI refresh failed: {}", e);
    }
    insight_core::spawn_refresh_task(Arc::clone(&state.aggregator), state.refresh_interval());
    tracing::info!(target: "gateway::startup", "Started background KPI refresh task");

    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!(target: "gateway::startup", "Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
