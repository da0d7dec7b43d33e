//! Network and endpoint resources
//!
//! Resources are backed either by the host network backend or by the proxy's
//! own networking store. Both backends are modeled as closed enums so every
//! operation branches on the backend kind explicitly.

use crate::hns::{HostEndpoint, HostNetwork};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Type URL attached to host-backed endpoint descriptors sent to agents.
pub const HOST_ENDPOINT_TYPE_URL: &str = "ncproxy/hcn/HostComputeEndpoint";
/// Type URL attached to custom endpoint descriptors sent to agents.
pub const CUSTOM_ENDPOINT_TYPE_URL: &str = "ncproxy/ncproxynetworking/Endpoint";

/// Which subsystem owns a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Host,
    Custom,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Host => f.write_str("host"),
            BackendKind::Custom => f.write_str("custom"),
        }
    }
}

/// IOV offload policy for an endpoint. A zero weight means offload is off.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IovPolicy {
    pub offload_weight: u32,
    pub queue_pairs_requested: u32,
    pub interrupt_moderation: u32,
}

impl IovPolicy {
    pub fn is_enabled(&self) -> bool {
        self.offload_weight != 0
    }
}

/// Passthrough device assigned to the workload when a custom endpoint is
/// attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PciDeviceDetails {
    pub device_id: String,
    pub virtual_function_index: u32,
}

/// Network managed entirely by the proxy. Its ID is its name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomNetwork {
    pub name: String,
}

/// Endpoint managed entirely by the proxy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomEndpoint {
    pub name: String,
    pub mac_address: String,
    pub ip_address: String,
    pub prefix_length: u32,
    pub network_name: String,
    #[serde(default)]
    pub default_gateway: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_details: Option<PciDeviceDetails>,
    #[serde(default)]
    pub namespace_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum NetworkResource {
    Host(HostNetwork),
    Custom(CustomNetwork),
}

impl NetworkResource {
    pub fn name(&self) -> &str {
        match self {
            NetworkResource::Host(n) => &n.name,
            NetworkResource::Custom(n) => &n.name,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            NetworkResource::Host(n) => &n.id,
            NetworkResource::Custom(n) => &n.name,
        }
    }

    pub fn backend_kind(&self) -> BackendKind {
        match self {
            NetworkResource::Host(_) => BackendKind::Host,
            NetworkResource::Custom(_) => BackendKind::Custom,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum EndpointResource {
    Host(HostEndpoint),
    Custom(CustomEndpoint),
}

impl EndpointResource {
    pub fn name(&self) -> &str {
        match self {
            EndpointResource::Host(e) => &e.name,
            EndpointResource::Custom(e) => &e.name,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            EndpointResource::Host(e) => &e.id,
            EndpointResource::Custom(e) => &e.name,
        }
    }

    pub fn network_name(&self) -> &str {
        match self {
            EndpointResource::Host(e) => &e.network_name,
            EndpointResource::Custom(e) => &e.network_name,
        }
    }

    pub fn namespace_id(&self) -> &str {
        match self {
            EndpointResource::Host(e) => &e.namespace_id,
            EndpointResource::Custom(e) => &e.namespace_id,
        }
    }

    pub fn backend_kind(&self) -> BackendKind {
        match self {
            EndpointResource::Host(_) => BackendKind::Host,
            EndpointResource::Custom(_) => BackendKind::Custom,
        }
    }

    /// Encodes the endpoint as the opaque descriptor handed to compute agents.
    pub fn to_any(&self) -> Result<prost_types::Any, serde_json::Error> {
        let (type_url, value) = match self {
            EndpointResource::Host(e) => (HOST_ENDPOINT_TYPE_URL, serde_json::to_vec(e)?),
            EndpointResource::Custom(e) => (CUSTOM_ENDPOINT_TYPE_URL, serde_json::to_vec(e)?),
        };
        Ok(prost_types::Any {
            type_url: type_url.to_string(),
            value,
        })
    }
}
