//! `ncproxyinternal` agent-management surface

use super::{agent_failure, respond, SURFACE_AGENT};
use crate::agent::{AgentDialer, ComputeAgent, ComputeAgentCache};
use crate::error::ProxyError;
use crate::nodenet::NodeNetworkService;
use crate::observability::ProxyMetrics;
use crate::proto::ncproxyinternal::{
    network_config_proxy_internal_server::NetworkConfigProxyInternal,
    ConfigureNetworkingInternalRequest, ConfigureNetworkingInternalResponse,
    RegisterComputeAgentRequest, RegisterComputeAgentResponse, RequestTypeInternal,
    UnregisterComputeAgentRequest, UnregisterComputeAgentResponse,
};
use crate::proto::nodenetsvc::v1::RequestType;
use crate::store::ComputeAgentStore;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tonic::{Request, Response, Status};
use tracing::{info, warn};

/// Upper bound on a forwarded ConfigureNetworking call.
pub const CONFIGURE_NETWORKING_TIMEOUT: Duration = Duration::from_secs(300);

pub struct AgentManagementService {
    store: ComputeAgentStore,
    agents: Arc<ComputeAgentCache>,
    dialer: Arc<dyn AgentDialer>,
    node_net: Option<Arc<dyn NodeNetworkService>>,
    metrics: ProxyMetrics,
    configure_timeout: Duration,
}

impl AgentManagementService {
    pub fn new(
        store: ComputeAgentStore,
        agents: Arc<ComputeAgentCache>,
        dialer: Arc<dyn AgentDialer>,
        node_net: Option<Arc<dyn NodeNetworkService>>,
        metrics: ProxyMetrics,
    ) -> Self {
        Self {
            store,
            agents,
            dialer,
            node_net,
            metrics,
            configure_timeout: CONFIGURE_NETWORKING_TIMEOUT,
        }
    }

    pub fn with_configure_timeout(mut self, timeout: Duration) -> Self {
        self.configure_timeout = timeout;
        self
    }

    async fn refresh_gauge(&self) {
        self.metrics
            .set_compute_agents_registered(self.agents.len().await);
    }

    /// Dials the agent, persists the registration and caches the connection.
    /// A connection replaced by this registration is closed.
    #[tracing::instrument(name = "RegisterComputeAgent", skip_all, fields(
        container_id = %req.container_id,
        agent_address = %req.agent_address,
    ))]
    pub async fn register_compute_agent(
        &self,
        req: RegisterComputeAgentRequest,
    ) -> Result<RegisterComputeAgentResponse, ProxyError> {
        if req.container_id.is_empty() || req.agent_address.is_empty() {
            return Err(ProxyError::empty_field(&req));
        }

        let agent = self
            .dialer
            .dial(&req.agent_address)
            .await
            .map_err(|e| agent_failure("failed to connect to compute agent", e))?;

        if let Err(e) = self.store.update(&req.container_id, &req.agent_address).await {
            close_quietly(agent.as_ref()).await;
            return Err(ProxyError::internal(
                format!("failed to persist compute agent for {:?}", req.container_id),
                e,
            ));
        }

        let replaced = match self.agents.put(req.container_id.clone(), agent.clone()).await {
            Ok(replaced) => replaced,
            Err(e) => {
                close_quietly(agent.as_ref()).await;
                return Err(ProxyError::failed_precondition(format!(
                    "cannot register compute agent: {e}"
                )));
            }
        };

        if let Some(old) = replaced {
            if let Err(e) = old.close().await {
                warn!(error = %e, old_address = %old.address(), "Failed to close replaced compute agent connection");
            }
        }

        info!("Registered compute agent");
        self.refresh_gauge().await;
        Ok(RegisterComputeAgentResponse {})
    }

    #[tracing::instrument(name = "UnregisterComputeAgent", skip_all, fields(
        container_id = %req.container_id,
    ))]
    pub async fn unregister_compute_agent(
        &self,
        req: UnregisterComputeAgentRequest,
    ) -> Result<UnregisterComputeAgentResponse, ProxyError> {
        if req.container_id.is_empty() {
            return Err(ProxyError::empty_field(&req));
        }

        if let Err(e) = self.store.delete(&req.container_id).await {
            warn!(error = %e, "Failed to delete compute agent registration");
        }

        let agent = match self.agents.get_and_delete(&req.container_id).await {
            Ok(Some(agent)) => agent,
            Ok(None) => {
                return Err(ProxyError::not_found(format!(
                    "no compute agent registered for {:?}",
                    req.container_id
                )))
            }
            Err(e) => {
                return Err(ProxyError::failed_precondition(format!(
                    "cannot unregister compute agent: {e}"
                )))
            }
        };

        close_quietly(agent.as_ref()).await;

        info!("Unregistered compute agent");
        self.refresh_gauge().await;
        Ok(UnregisterComputeAgentResponse {})
    }

    #[tracing::instrument(name = "ConfigureNetworking", skip_all, fields(
        container_id = %req.container_id,
        request_type = req.request_type,
    ))]
    pub async fn configure_networking(
        &self,
        req: ConfigureNetworkingInternalRequest,
    ) -> Result<ConfigureNetworkingInternalResponse, ProxyError> {
        if req.container_id.is_empty() {
            return Err(ProxyError::invalid_argument("ContainerID is empty"));
        }

        let Some(node_net) = &self.node_net else {
            return Err(ProxyError::failed_precondition(
                "No NodeNetworkService client registered",
            ));
        };

        let request_type = match RequestTypeInternal::try_from(req.request_type) {
            Ok(RequestTypeInternal::Setup) => RequestType::Setup,
            Ok(RequestTypeInternal::Teardown) => RequestType::Teardown,
            Err(_) => {
                return Err(ProxyError::invalid_argument(format!(
                    "Request type {} is not known",
                    req.request_type
                )))
            }
        };

        let call = node_net.configure_networking(&req.container_id, request_type);
        match tokio::time::timeout(self.configure_timeout, call).await {
            Ok(Ok(())) => Ok(ConfigureNetworkingInternalResponse {}),
            Ok(Err(status)) => Err(ProxyError::Remote(status)),
            Err(_) => Err(ProxyError::Remote(Status::deadline_exceeded(format!(
                "ConfigureNetworking for {:?} did not complete within {:?}",
                req.container_id, self.configure_timeout
            )))),
        }
    }
}

async fn close_quietly(agent: &dyn ComputeAgent) {
    if let Err(e) = agent.close().await {
        warn!(agent_address = %agent.address(), error = %e, "Failed to close compute agent connection");
    }
}

#[tonic::async_trait]
impl NetworkConfigProxyInternal for AgentManagementService {
    async fn register_compute_agent(
        &self,
        request: Request<RegisterComputeAgentRequest>,
    ) -> Result<Response<RegisterComputeAgentResponse>, Status> {
        let started = Instant::now();
        let result = Self::register_compute_agent(self, request.into_inner()).await;
        respond(&self.metrics, SURFACE_AGENT, "RegisterComputeAgent", started, result)
    }

    async fn unregister_compute_agent(
        &self,
        request: Request<UnregisterComputeAgentRequest>,
    ) -> Result<Response<UnregisterComputeAgentResponse>, Status> {
        let started = Instant::now();
        let result = Self::unregister_compute_agent(self, request.into_inner()).await;
        respond(&self.metrics, SURFACE_AGENT, "UnregisterComputeAgent", started, result)
    }

    async fn configure_networking(
        &self,
        request: Request<ConfigureNetworkingInternalRequest>,
    ) -> Result<Response<ConfigureNetworkingInternalResponse>, Status> {
        let started = Instant::now();
        let result = Self::configure_networking(self, request.into_inner()).await;
        respond(&self.metrics, SURFACE_AGENT, "ConfigureNetworking", started, result)
    }
}
