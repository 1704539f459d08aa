use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mcp_dispatch_server::config::{AppConfig, CliConfig, FileConfig};
use mcp_dispatch_server::mcp::resources::RecentLogs;
use mcp_dispatch_server::{run_server, version_string, McpService, RequestsLoggingLevel, ServerConfig};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    if path_buf.is_absolute() {
        return Ok(path_buf);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(path_buf))
}

#[derive(Parser, Debug)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct CliArgs {
    /// Path to a TOML configuration file. Its values override the flags below.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 3001)]
    pub port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// Disable the /metrics endpoint.
    #[clap(long)]
    pub no_metrics: bool,
}

impl CliArgs {
    fn to_cli_config(&self) -> CliConfig {
        CliConfig {
            port: self.port,
            logging_level: self.logging_level.clone(),
            metrics_enabled: !self.no_metrics,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    let recent_logs = RecentLogs::default();
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(recent_logs.layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    let file_config = cli_args
        .config
        .as_deref()
        .map(FileConfig::load)
        .transpose()?;
    if let Some(path) = &cli_args.config {
        info!("Loaded configuration from {:?}", path);
    }
    let config = AppConfig::resolve(&cli_args.to_cli_config(), file_config)?;
    info!(
        "Auth mode: {}, rate limiting: {}",
        config.auth.mode.name(),
        if config.rate_limit.enabled { "on" } else { "off" }
    );

    let version = version_string();
    let service = Arc::new(McpService::init(&config, &version)?.with_recent_logs(recent_logs));
    service.register_builtins(&config)?;
    service.ready();
    let maintenance = service.spawn_maintenance();

    let server_config = ServerConfig {
        requests_logging_level: config.logging_level.clone(),
        port: config.port,
        metrics_enabled: config.metrics_enabled,
    };

    let shutdown_service = service.clone();
    let shutdown = async move {
        if tokio::signal::ctrl_c().await.is_err() {
            tracing::error!("Failed to listen for Ctrl-C, shutting down");
        }
        info!("Shutdown requested");
        // Health goes down before the listener stops accepting
        shutdown_service.shutdown();
    };

    info!("Starting MCP server {} on port {}", version, config.port);
    run_server(server_config, service.clone(), version, |_| {}, shutdown).await?;

    service.shutdown();
    if let Some(handle) = maintenance {
        let _ = handle.await;
    }
    info!("Server stopped");
    Ok(())
}
