//! Client for the orchestration-side node network service

use crate::proto::nodenetsvc::v1::{
    node_network_service_client::NodeNetworkServiceClient, ConfigureNetworkingRequest, RequestType,
};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tonic::transport::{Channel, Endpoint};
use tonic::Status;
use tracing::info;

#[derive(Debug, Error)]
pub enum NodeNetError {
    #[error("invalid node network service address {address:?}: {source}")]
    InvalidAddress {
        address: String,
        #[source]
        source: tonic::transport::Error,
    },

    #[error("failed to connect to node network service at {address:?}: {source}")]
    Connect {
        address: String,
        #[source]
        source: tonic::transport::Error,
    },
}

/// Outbound calls to the node network service
#[async_trait]
pub trait NodeNetworkService: Send + Sync {
    async fn configure_networking(
        &self,
        container_id: &str,
        request_type: RequestType,
    ) -> Result<(), Status>;
}

#[derive(Debug, Clone)]
pub struct GrpcNodeNetworkClient {
    address: String,
    client: NodeNetworkServiceClient<Channel>,
}

impl GrpcNodeNetworkClient {
    /// Dials the service. A zero `timeout` defers the connection until the
    /// first call.
    pub async fn connect(address: &str, timeout: Duration) -> Result<Self, NodeNetError> {
        let uri = with_scheme(address);
        let endpoint = Endpoint::from_shared(uri).map_err(|source| NodeNetError::InvalidAddress {
            address: address.to_string(),
            source,
        })?;

        let channel = if timeout.is_zero() {
            endpoint.connect_lazy()
        } else {
            endpoint
                .connect_timeout(timeout)
                .connect()
                .await
                .map_err(|source| NodeNetError::Connect {
                    address: address.to_string(),
                    source,
                })?
        };

        info!(node_net_svc_addr = %address, lazy = timeout.is_zero(), "Node network service client ready");
        Ok(Self {
            address: address.to_string(),
            client: NodeNetworkServiceClient::new(channel),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

#[async_trait]
impl NodeNetworkService for GrpcNodeNetworkClient {
    async fn configure_networking(
        &self,
        container_id: &str,
        request_type: RequestType,
    ) -> Result<(), Status> {
        let request = ConfigureNetworkingRequest {
            container_id: container_id.to_string(),
            request_type: request_type.into(),
        };
        // The generated client needs `&mut self`; clones share the channel.
        self.client.clone().configure_networking(request).await?;
        Ok(())
    }
}

fn with_scheme(address: &str) -> String {
    if address.contains("://") {
        address.to_string()
    } else {
        format!("http://{address}")
    }
}
