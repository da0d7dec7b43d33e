//! Proxy server lifecycle
//!
//! Startup runs in a fixed order: open the database, build the stores, cache
//! and resource layer, connect the optional node network service client,
//! reconnect persisted compute agents, then bind the control listener (TCP)
//! and the agent-management listener (Unix socket). Readiness is reported only
//! once both listeners are serving.
//!
//! Shutdown reverses it: stop both servers, close every agent connection,
//! close the database and remove the socket file.

use crate::agent::{AgentDialer, ComputeAgentCache};
use crate::health::{components, HealthRegistry};
use crate::hns::HostNetworkBackend;
use crate::nodenet::{GrpcNodeNetworkClient, NodeNetworkService};
use crate::observability::{ProxyMetrics, StructuredLogger};
use crate::proto::ncproxygrpc::{v0, v1};
use crate::proto::ncproxyinternal::network_config_proxy_internal_server::NetworkConfigProxyInternalServer;
use crate::reconnect::{disconnect_compute_agents, reconnect_compute_agents};
use crate::resources::ResourceLayer;
use crate::service::{AgentManagementService, ControlService, V0Service};
use crate::store::{ComputeAgentStore, Database, NetworkingStore};
use anyhow::{Context, Result};
use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::{TcpListenerStream, UnixListenerStream};
use tonic::transport::Server;
use tracing::{info, warn};

const PROXY_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Everything the server needs to know about its environment
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP address of the control surface. Port 0 picks a free port.
    pub grpc_addr: String,
    pub agent_socket: PathBuf,
    pub database_path: PathBuf,
    pub node_net_svc_addr: Option<String>,
    /// Dial timeout for the node network service. Zero connects lazily.
    pub node_net_timeout: Duration,
    pub node_name: String,
}

pub struct ProxyServer {
    config: ServerConfig,
    backend: Arc<dyn HostNetworkBackend>,
    dialer: Arc<dyn AgentDialer>,
    health: HealthRegistry,
    metrics: ProxyMetrics,
    logger: StructuredLogger,
}

impl ProxyServer {
    pub fn new(
        config: ServerConfig,
        backend: Arc<dyn HostNetworkBackend>,
        dialer: Arc<dyn AgentDialer>,
        health: HealthRegistry,
        metrics: ProxyMetrics,
    ) -> Self {
        let logger = StructuredLogger::new(&config.node_name);
        Self {
            config,
            backend,
            dialer,
            health,
            metrics,
            logger,
        }
    }

    /// Brings the proxy up and returns once both listeners are serving.
    pub async fn start(self) -> Result<RunningServer> {
        let Self {
            config,
            backend,
            dialer,
            health,
            metrics,
            logger,
        } = self;

        let db = Database::open(&config.database_path).with_context(|| {
            format!("failed to open database at {}", config.database_path.display())
        })?;
        health.set_healthy(components::STORE).await;

        let agent_store = ComputeAgentStore::new(db.clone());
        let resources = Arc::new(ResourceLayer::new(backend, NetworkingStore::new(db.clone())));
        let agents = Arc::new(ComputeAgentCache::new());

        let node_net = match &config.node_net_svc_addr {
            Some(address) => {
                let client = GrpcNodeNetworkClient::connect(address, config.node_net_timeout)
                    .await
                    .context("failed to connect to node network service")?;
                health.set_healthy(components::NODE_NETWORK_SERVICE).await;
                Some(Arc::new(client) as Arc<dyn NodeNetworkService>)
            }
            None => {
                health
                    .set_degraded(components::NODE_NETWORK_SERVICE, "not configured")
                    .await;
                None
            }
        };

        let summary = reconnect_compute_agents(&agent_store, &agents, &dialer).await;
        metrics.record_reconnect(&summary);
        metrics.set_compute_agents_registered(agents.len().await);
        logger.log_reconnect(&summary);
        health.set_healthy(components::AGENT_CACHE).await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // control surface: v1 and v0 share the TCP listener
        let listener = TcpListener::bind(&config.grpc_addr)
            .await
            .with_context(|| format!("failed to listen on {}", config.grpc_addr))?;
        let control_addr = listener
            .local_addr()
            .context("failed to read control listener address")?;

        let control = Arc::new(ControlService::new(resources, agents.clone(), metrics.clone()));
        let legacy = V0Service::new(control.clone(), metrics.clone());
        let control_server = Server::builder()
            .add_service(v1::network_config_proxy_server::NetworkConfigProxyServer::from_arc(
                control,
            ))
            .add_service(v0::network_config_proxy_server::NetworkConfigProxyServer::new(
                legacy,
            ))
            .serve_with_incoming_shutdown(
                TcpListenerStream::new(listener),
                wait_for_shutdown(shutdown_rx.clone()),
            );
        let control_handle = tokio::spawn(control_server);
        health.set_healthy(components::CONTROL_SERVER).await;

        // agent-management surface on the local socket
        let socket = bind_socket(&config.agent_socket)?;
        let management = AgentManagementService::new(
            agent_store,
            agents.clone(),
            dialer,
            node_net,
            metrics.clone(),
        );
        let agent_server = Server::builder()
            .add_service(NetworkConfigProxyInternalServer::new(management))
            .serve_with_incoming_shutdown(
                UnixListenerStream::new(socket),
                wait_for_shutdown(shutdown_rx),
            );
        let agent_handle = tokio::spawn(agent_server);
        health.set_healthy(components::AGENT_SERVER).await;

        health.set_ready(true).await;
        logger.log_startup(
            PROXY_VERSION,
            &control_addr.to_string(),
            &config.agent_socket.display().to_string(),
        );

        Ok(RunningServer {
            control_addr,
            agent_socket: config.agent_socket,
            shutdown_tx,
            servers: vec![("control", control_handle), ("agent", agent_handle)],
            agents,
            db,
            health,
            logger,
        })
    }

    /// Runs until `signal` resolves, then shuts down.
    pub async fn run_until<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = String>,
    {
        let running = self.start().await?;
        let reason = signal.await;
        running.shutdown(&reason).await
    }
}

/// Handle to a started proxy
pub struct RunningServer {
    control_addr: SocketAddr,
    agent_socket: PathBuf,
    shutdown_tx: watch::Sender<bool>,
    servers: Vec<(&'static str, JoinHandle<Result<(), tonic::transport::Error>>)>,
    agents: Arc<ComputeAgentCache>,
    db: Database,
    health: HealthRegistry,
    logger: StructuredLogger,
}

impl RunningServer {
    /// Address the control surface is bound to.
    pub fn control_addr(&self) -> SocketAddr {
        self.control_addr
    }

    pub fn agent_socket(&self) -> &Path {
        &self.agent_socket
    }

    pub async fn shutdown(self, reason: &str) -> Result<()> {
        self.logger.log_shutdown(reason);
        self.health.set_ready(false).await;

        let _ = self.shutdown_tx.send(true);
        for (name, handle) in self.servers {
            match handle.await {
                Ok(Ok(())) => info!(server = name, "Server stopped"),
                Ok(Err(e)) => warn!(server = name, error = %e, "Server exited with error"),
                Err(e) => warn!(server = name, error = %e, "Server task failed"),
            }
        }
        self.health
            .set_unhealthy(components::CONTROL_SERVER, "stopped")
            .await;
        self.health
            .set_unhealthy(components::AGENT_SERVER, "stopped")
            .await;

        match disconnect_compute_agents(&self.agents).await {
            Ok(closed) => info!(closed, "Disconnected compute agents"),
            Err(e) => warn!(error = %e, "Failed to disconnect compute agents"),
        }

        self.db.close().await.context("failed to close database")?;

        if let Err(e) = std::fs::remove_file(&self.agent_socket) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.agent_socket.display(), error = %e, "Failed to remove agent socket");
            }
        }
        Ok(())
    }
}

async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Binds the agent socket, replacing a stale socket file from an earlier run.
fn bind_socket(path: &Path) -> Result<UnixListener> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    match std::fs::remove_file(path) {
        Ok(()) => info!(path = %path.display(), "Removed stale agent socket"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(e).with_context(|| format!("failed to remove stale socket {}", path.display()))
        }
    }
    UnixListener::bind(path).with_context(|| format!("failed to listen on {}", path.display()))
}
