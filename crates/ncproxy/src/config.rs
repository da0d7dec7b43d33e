//! Daemon configuration

use anyhow::{bail, Context, Result};
use ncproxy_lib::server::ServerConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DATABASE_FILE: &str = "networkproxy.db";

/// Daemon configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// TCP address of the control surface
    #[serde(default = "default_grpc_addr")]
    pub grpc_addr: String,

    /// Unix socket path of the agent-management surface
    #[serde(default = "default_agent_socket")]
    pub agent_socket: String,

    /// Node network service address; ConfigureNetworking is rejected without it
    #[serde(default)]
    pub node_net_svc_addr: Option<String>,

    /// Node network service dial timeout in seconds, 0 to connect lazily
    #[serde(default)]
    pub timeout_secs: u64,

    /// Database location, next to the executable when unset
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Node name reported in lifecycle events
    #[serde(default = "default_node_name")]
    pub node_name: String,
}

fn default_grpc_addr() -> String {
    "127.0.0.1:6669".to_string()
}

fn default_agent_socket() -> String {
    "/run/ncproxy/ncproxy.sock".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_node_name() -> String {
    std::env::var("NODE_NAME").unwrap_or_else(|_| "unknown".to_string())
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            grpc_addr: default_grpc_addr(),
            agent_socket: default_agent_socket(),
            node_net_svc_addr: None,
            timeout_secs: 0,
            database_path: None,
            api_port: default_api_port(),
            node_name: default_node_name(),
        }
    }
}

impl ProxyConfig {
    /// Load configuration from an optional JSON file, overridden by
    /// `NCPROXY_*` environment variables.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Json)
                    .required(true),
            );
        }
        let config: Self = builder
            .add_source(config::Environment::with_prefix("NCPROXY"))
            .build()
            .context("failed to read configuration")?
            .try_deserialize()
            .context("failed to parse configuration")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.grpc_addr.is_empty() {
            bail!("must specify a gRPC address for the control surface");
        }
        if self.agent_socket.is_empty() {
            bail!("must specify a socket path for the agent-management surface");
        }
        Ok(())
    }

    /// Configured database path, or `networkproxy.db` next to the executable.
    pub fn resolve_database_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.database_path {
            return Ok(path.clone());
        }
        let exe = std::env::current_exe().context("failed to locate the executable")?;
        let dir = exe
            .parent()
            .context("executable path has no parent directory")?;
        Ok(dir.join(DATABASE_FILE))
    }

    pub fn server_config(&self) -> Result<ServerConfig> {
        Ok(ServerConfig {
            grpc_addr: self.grpc_addr.clone(),
            agent_socket: PathBuf::from(&self.agent_socket),
            database_path: self.resolve_database_path()?,
            node_net_svc_addr: self
                .node_net_svc_addr
                .clone()
                .filter(|addr| !addr.is_empty()),
            node_net_timeout: Duration::from_secs(self.timeout_secs),
            node_name: self.node_name.clone(),
        })
    }
}
