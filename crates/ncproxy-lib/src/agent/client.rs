//! gRPC client for compute agents listening on Unix domain sockets

use super::{AgentDialer, AgentError, ComputeAgent};
use crate::proto::computeagent::{
    compute_agent_client::ComputeAgentClient, AddNicInternalRequest, AssignPciInternalRequest,
    DeleteNicInternalRequest, ModifyNicInternalRequest, RemovePciInternalRequest,
};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UnixStream;
use tokio::sync::RwLock;
use tonic::transport::{Channel, Endpoint, Uri};
use tonic::{Code, Status};
use tower::service_fn;
use tracing::debug;

/// Default time allowed for establishing an agent connection
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(10);

// The URI is ignored by the connector; every request goes to the socket.
const PLACEHOLDER_URI: &str = "http://[::]:50051";

/// Connection to one compute agent
pub struct GrpcComputeAgent {
    address: String,
    channel: RwLock<Option<Channel>>,
}

impl std::fmt::Debug for GrpcComputeAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrpcComputeAgent")
            .field("address", &self.address)
            .finish()
    }
}

impl GrpcComputeAgent {
    /// Connects to the agent socket at `address`.
    pub async fn connect(address: &str, timeout: Duration) -> Result<Self, AgentError> {
        let dial_error = |source: tonic::transport::Error| AgentError::Dial {
            address: address.to_string(),
            source: Box::new(source),
        };

        let path = PathBuf::from(address);
        let channel = Endpoint::try_from(PLACEHOLDER_URI)
            .map_err(dial_error)?
            .connect_timeout(timeout)
            .connect_with_connector(service_fn(move |_: Uri| {
                let path = path.clone();
                async move { UnixStream::connect(path).await }
            }))
            .await
            .map_err(dial_error)?;

        debug!(agent_address = %address, "Connected to compute agent");
        Ok(Self {
            address: address.to_string(),
            channel: RwLock::new(Some(channel)),
        })
    }

    async fn client(&self) -> Result<ComputeAgentClient<Channel>, AgentError> {
        let channel = self.channel.read().await;
        channel
            .as_ref()
            .map(|c| ComputeAgentClient::new(c.clone()))
            .ok_or(AgentError::Closed)
    }
}

/// NotFound from the agent means the NIC or namespace no longer exists.
fn classify(status: Status) -> AgentError {
    match status.code() {
        Code::NotFound => AgentError::NotFound(status.message().to_string()),
        _ => AgentError::Rpc(status),
    }
}

#[async_trait]
impl ComputeAgent for GrpcComputeAgent {
    fn address(&self) -> &str {
        &self.address
    }

    async fn add_nic(&self, request: AddNicInternalRequest) -> Result<(), AgentError> {
        self.client().await?.add_nic(request).await.map_err(classify)?;
        Ok(())
    }

    async fn modify_nic(&self, request: ModifyNicInternalRequest) -> Result<(), AgentError> {
        self.client()
            .await?
            .modify_nic(request)
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn delete_nic(&self, request: DeleteNicInternalRequest) -> Result<(), AgentError> {
        self.client()
            .await?
            .delete_nic(request)
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn assign_pci(&self, request: AssignPciInternalRequest) -> Result<String, AgentError> {
        let response = self
            .client()
            .await?
            .assign_pci(request)
            .await
            .map_err(classify)?;
        Ok(response.into_inner().id)
    }

    async fn remove_pci(&self, request: RemovePciInternalRequest) -> Result<(), AgentError> {
        self.client()
            .await?
            .remove_pci(request)
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn close(&self) -> Result<(), AgentError> {
        // Dropping the last channel handle tears the connection down.
        if self.channel.write().await.take().is_some() {
            debug!(agent_address = %self.address, "Closed compute agent connection");
        }
        Ok(())
    }
}

/// Dials compute agents over Unix domain sockets
#[derive(Debug, Clone)]
pub struct UdsDialer {
    timeout: Duration,
}

impl Default for UdsDialer {
    fn default() -> Self {
        Self::new(DEFAULT_DIAL_TIMEOUT)
    }
}

impl UdsDialer {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl AgentDialer for UdsDialer {
    async fn dial(&self, address: &str) -> Result<Arc<dyn ComputeAgent>, AgentError> {
        let agent = GrpcComputeAgent::connect(address, self.timeout).await?;
        Ok(Arc::new(agent))
    }
}
