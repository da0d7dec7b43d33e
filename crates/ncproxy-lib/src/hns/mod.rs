//! Host network backend
//!
//! The proxy never talks to the host networking stack directly. Everything
//! goes through [`HostNetworkBackend`], which mirrors the small set of host
//! network service calls the proxy needs: network and endpoint CRUD,
//! namespace attachment and endpoint policy modification.

mod memory;

pub use memory::MemoryHostNetwork;

use crate::models::IovPolicy;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors reported by a host network backend
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("network {0:?} not found")]
    NetworkNotFound(String),

    #[error("endpoint {0:?} not found")]
    EndpointNotFound(String),

    #[error("namespace {0:?} not found")]
    NamespaceNotFound(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("not supported: {0}")]
    Unsupported(String),

    #[error("{0}")]
    Failed(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkMode {
    #[default]
    Transparent,
    #[serde(rename = "NAT")]
    Nat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum IpamType {
    #[default]
    Static,
    #[serde(rename = "DHCP")]
    Dhcp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub next_hop: String,
    pub destination_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subnet {
    pub ip_address_prefix: String,
    pub routes: Vec<Route>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacRange {
    pub start_mac_address: String,
    pub end_mac_address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "settings")]
pub enum NetworkPolicy {
    /// Layer the network over an existing virtual switch.
    LayerConstraint { layer_id: String },
}

/// Host-backed network as reported by the backend
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostNetwork {
    /// Assigned by the backend on creation.
    pub id: String,
    pub name: String,
    pub mode: NetworkMode,
    pub ipam_type: IpamType,
    pub subnets: Vec<Subnet>,
    pub policies: Vec<NetworkPolicy>,
    pub mac_pool: Vec<MacRange>,
    /// Layer new networks can be constrained to when this network is used as
    /// a switch.
    pub layered_on: Option<String>,
    /// ID of the network whose switch this network was layered over.
    pub switch_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpConfig {
    pub ip_address: String,
    pub prefix_length: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dns {
    pub server_list: Vec<String>,
    pub domain: String,
    pub search: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "settings")]
pub enum EndpointPolicy {
    PortName { name: String },
    Iov(IovPolicy),
}

impl EndpointPolicy {
    fn same_kind(&self, other: &EndpointPolicy) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

/// Host-backed endpoint as reported by the backend
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostEndpoint {
    pub id: String,
    pub name: String,
    pub network_id: String,
    pub network_name: String,
    pub mac_address: String,
    pub ip_configurations: Vec<IpConfig>,
    pub dns: Dns,
    pub policies: Vec<EndpointPolicy>,
    /// Empty until the endpoint is attached to a namespace.
    pub namespace_id: String,
}

impl HostEndpoint {
    pub fn iov_policy(&self) -> Option<IovPolicy> {
        self.policies.iter().find_map(|p| match p {
            EndpointPolicy::Iov(iov) => Some(*iov),
            _ => None,
        })
    }
}

/// How a policy modification is applied to an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyRequest {
    /// Insert the policies, replacing any existing policy of the same kind.
    Update,
    /// Revoke the policies of the given kinds.
    Remove,
}

#[async_trait]
pub trait HostNetworkBackend: Send + Sync {
    /// Creates a network. `id` and `mac_pool` are assigned by the backend.
    async fn create_network(&self, network: HostNetwork) -> Result<HostNetwork, BackendError>;

    async fn get_network_by_name(&self, name: &str) -> Result<HostNetwork, BackendError>;

    async fn get_network_by_id(&self, id: &str) -> Result<HostNetwork, BackendError>;

    async fn list_networks(&self) -> Result<Vec<HostNetwork>, BackendError>;

    async fn delete_network(&self, id: &str) -> Result<(), BackendError>;

    /// Creates an endpoint. `id` is assigned by the backend.
    async fn create_endpoint(&self, endpoint: HostEndpoint) -> Result<HostEndpoint, BackendError>;

    async fn get_endpoint_by_name(&self, name: &str) -> Result<HostEndpoint, BackendError>;

    async fn list_endpoints(&self) -> Result<Vec<HostEndpoint>, BackendError>;

    async fn delete_endpoint(&self, id: &str) -> Result<(), BackendError>;

    async fn add_namespace_endpoint(
        &self,
        namespace_id: &str,
        endpoint_id: &str,
    ) -> Result<(), BackendError>;

    /// ID of the namespace the host itself lives in.
    async fn host_default_namespace(&self) -> Result<String, BackendError>;

    async fn modify_endpoint_policies(
        &self,
        endpoint_id: &str,
        policies: Vec<EndpointPolicy>,
        request: PolicyRequest,
    ) -> Result<(), BackendError>;

    /// Returns an error when IPv6 dual stack is not available on this host.
    fn ipv6_dual_stack_supported(&self) -> Result<(), BackendError>;
}
