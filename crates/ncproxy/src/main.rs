//! Network configuration proxy daemon
//!
//! Runs on each host, relaying network configuration between the node
//! network service and the compute agents of running workloads.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ncproxy_lib::{
    agent::{AgentDialer, UdsDialer},
    health::HealthRegistry,
    hns::{HostNetworkBackend, MemoryHostNetwork},
    observability::ProxyMetrics,
    server::ProxyServer,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

use config::ProxyConfig;

/// Network configuration proxy
#[derive(Parser)]
#[command(name = "ncproxy")]
#[command(author, version, about = "Network configuration proxy daemon", long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Database path, overrides the configuration file
    #[arg(long, env = "NCPROXY_DATABASE_PATH")]
    database_path: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration helpers
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the default configuration as JSON
    Default,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Commands::Config(ConfigCommands::Default)) = cli.command {
        let json = serde_json::to_string_pretty(&ProxyConfig::default())
            .context("failed to serialize default configuration")?;
        println!("{json}");
        return Ok(());
    }

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)))
        .with(fmt::layer().json())
        .init();

    info!("Starting ncproxy");

    let mut config = ProxyConfig::load(cli.config.as_deref())?;
    if let Some(path) = cli.database_path {
        config.database_path = Some(path);
    }
    let server_config = config.server_config()?;
    info!(
        grpc_addr = %config.grpc_addr,
        agent_socket = %config.agent_socket,
        database_path = %server_config.database_path.display(),
        "Proxy configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register_all().await;

    let metrics = ProxyMetrics::new();

    let app_state = Arc::new(api::AppState::new(health_registry.clone(), metrics.clone()));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    let backend: Arc<dyn HostNetworkBackend> = Arc::new(MemoryHostNetwork::new());
    let dialer: Arc<dyn AgentDialer> = Arc::new(UdsDialer::default());
    let server = ProxyServer::new(server_config, backend, dialer, health_registry.clone(), metrics);

    let result = server
        .run_until(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => "SIGINT received".to_string(),
                Err(e) => format!("failed to listen for shutdown signal: {e}"),
            }
        })
        .await;

    if let Err(e) = &result {
        error!(error = %e, "Proxy exited with error");
    }
    api_handle.abort();
    info!("Shutting down");

    result
}
