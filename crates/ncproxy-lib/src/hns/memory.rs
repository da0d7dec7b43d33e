//! In-process host network backend
//!
//! Keeps networks, endpoints and namespaces in concurrent maps. Used on hosts
//! without a native host network service and throughout the test suites.

use super::{
    BackendError, EndpointPolicy, HostEndpoint, HostNetwork, HostNetworkBackend, IpConfig,
    MacRange, NetworkMode, PolicyRequest,
};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tracing::debug;
use uuid::Uuid;

const DEFAULT_MAC_RANGE_START: &str = "00-15-5D-52-C0-00";
const DEFAULT_MAC_RANGE_END: &str = "00-15-5D-52-CF-FF";
const MAX_ADDRESS_CANDIDATES: usize = 1 << 16;

/// Host network backend held entirely in memory
#[derive(Debug)]
pub struct MemoryHostNetwork {
    networks: DashMap<String, HostNetwork>,
    endpoints: DashMap<String, HostEndpoint>,
    namespaces: DashMap<String, HashSet<String>>,
    host_namespace: String,
    ipv6_supported: bool,
}

impl Default for MemoryHostNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHostNetwork {
    pub fn new() -> Self {
        let host_namespace = Uuid::new_v4().to_string();
        let namespaces = DashMap::new();
        namespaces.insert(host_namespace.clone(), HashSet::new());

        Self {
            networks: DashMap::new(),
            endpoints: DashMap::new(),
            namespaces,
            host_namespace,
            ipv6_supported: true,
        }
    }

    /// Backend that rejects IPv6 subnets and addresses.
    pub fn without_ipv6() -> Self {
        Self {
            ipv6_supported: false,
            ..Self::new()
        }
    }

    /// Registers a namespace so endpoints can be attached to it.
    pub fn add_namespace(&self, namespace_id: impl Into<String>) {
        self.namespaces.entry(namespace_id.into()).or_default();
    }

    /// Endpoint IDs attached to a namespace, if the namespace exists.
    pub fn namespace_endpoints(&self, namespace_id: &str) -> Option<Vec<String>> {
        self.namespaces
            .get(namespace_id)
            .map(|eps| eps.iter().cloned().collect())
    }

    fn find_network(&self, name: &str) -> Option<HostNetwork> {
        self.networks
            .iter()
            .find(|n| n.name == name)
            .map(|n| n.value().clone())
    }

    fn find_endpoint(&self, name: &str) -> Option<HostEndpoint> {
        self.endpoints
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.value().clone())
    }

    /// First free address in the network's first subnet, skipping the
    /// network address, the broadcast address, gateways and addresses held by
    /// other endpoints.
    fn allocate_address(&self, network: &HostNetwork) -> Result<IpConfig, BackendError> {
        let subnet = network.subnets.first().ok_or_else(|| {
            BackendError::Unsupported(format!(
                "network {:?} has no subnet to assign an address from",
                network.name
            ))
        })?;
        let (base, length) = parse_prefix(&subnet.ip_address_prefix).ok_or_else(|| {
            BackendError::Failed(format!(
                "network {:?} has an invalid subnet {:?}",
                network.name, subnet.ip_address_prefix
            ))
        })?;

        let mut taken: HashSet<IpAddr> = subnet
            .routes
            .iter()
            .filter_map(|r| r.next_hop.parse().ok())
            .collect();
        for endpoint in self.endpoints.iter().filter(|e| e.network_id == network.id) {
            taken.extend(
                endpoint
                    .ip_configurations
                    .iter()
                    .filter_map(|c| c.ip_address.parse::<IpAddr>().ok()),
            );
        }

        let (bits, start) = match base {
            IpAddr::V4(v4) => (32, u128::from(u32::from(v4))),
            IpAddr::V6(v6) => (128, u128::from(v6)),
        };
        let full = u128::MAX >> (128 - bits);
        let host_mask = full.checked_shr(u32::from(length)).unwrap_or(0);
        let first = start & !host_mask & full;
        let last = first | host_mask;

        (first.saturating_add(1)..last)
            .take(MAX_ADDRESS_CANDIDATES)
            .map(|n| match base {
                IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::from(n as u32)),
                IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::from(n)),
            })
            .find(|ip| !taken.contains(ip))
            .map(|ip| IpConfig {
                ip_address: ip.to_string(),
                prefix_length: length,
            })
            .ok_or_else(|| {
                BackendError::Failed(format!(
                    "no free address left in subnet {:?}",
                    subnet.ip_address_prefix
                ))
            })
    }
}

fn parse_prefix(prefix: &str) -> Option<(IpAddr, u8)> {
    let (address, length) = prefix.split_once('/')?;
    let address: IpAddr = address.parse().ok()?;
    let length: u8 = length.parse().ok()?;
    let max = if address.is_ipv4() { 32 } else { 128 };
    (length <= max).then_some((address, length))
}

#[async_trait]
impl HostNetworkBackend for MemoryHostNetwork {
    async fn create_network(&self, mut network: HostNetwork) -> Result<HostNetwork, BackendError> {
        if self.find_network(&network.name).is_some() {
            return Err(BackendError::AlreadyExists(format!(
                "network {:?}",
                network.name
            )));
        }

        network.id = Uuid::new_v4().to_string();
        if network.mac_pool.is_empty() {
            network.mac_pool.push(MacRange {
                start_mac_address: DEFAULT_MAC_RANGE_START.to_string(),
                end_mac_address: DEFAULT_MAC_RANGE_END.to_string(),
            });
        }
        // Transparent networks own a switch other networks can layer over.
        if network.mode == NetworkMode::Transparent && network.layered_on.is_none() {
            network.layered_on = Some(Uuid::new_v4().to_string());
        }

        debug!(network_name = %network.name, network_id = %network.id, "Created host network");
        self.networks.insert(network.id.clone(), network.clone());
        Ok(network)
    }

    async fn get_network_by_name(&self, name: &str) -> Result<HostNetwork, BackendError> {
        self.find_network(name)
            .ok_or_else(|| BackendError::NetworkNotFound(name.to_string()))
    }

    async fn get_network_by_id(&self, id: &str) -> Result<HostNetwork, BackendError> {
        self.networks
            .get(id)
            .map(|n| n.value().clone())
            .ok_or_else(|| BackendError::NetworkNotFound(id.to_string()))
    }

    async fn list_networks(&self) -> Result<Vec<HostNetwork>, BackendError> {
        let mut networks: Vec<HostNetwork> =
            self.networks.iter().map(|n| n.value().clone()).collect();
        networks.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(networks)
    }

    async fn delete_network(&self, id: &str) -> Result<(), BackendError> {
        if !self.networks.contains_key(id) {
            return Err(BackendError::NetworkNotFound(id.to_string()));
        }
        if self.endpoints.iter().any(|e| e.network_id == id) {
            return Err(BackendError::Failed(format!(
                "network {id:?} still has endpoints"
            )));
        }
        self.networks.remove(id);
        Ok(())
    }

    async fn create_endpoint(&self, mut endpoint: HostEndpoint) -> Result<HostEndpoint, BackendError> {
        if self.find_endpoint(&endpoint.name).is_some() {
            return Err(BackendError::AlreadyExists(format!(
                "endpoint {:?}",
                endpoint.name
            )));
        }
        let network = self
            .networks
            .get(&endpoint.network_id)
            .map(|n| n.value().clone())
            .ok_or_else(|| BackendError::NetworkNotFound(endpoint.network_id.clone()))?;

        if endpoint.ip_configurations.is_empty() {
            let assigned = self.allocate_address(&network)?;
            debug!(endpoint_name = %endpoint.name, ip_address = %assigned.ip_address, "Assigned endpoint address");
            endpoint.ip_configurations.push(assigned);
        }

        endpoint.id = Uuid::new_v4().to_string();
        endpoint.network_name = network.name;
        endpoint.namespace_id.clear();

        self.endpoints.insert(endpoint.id.clone(), endpoint.clone());
        Ok(endpoint)
    }

    async fn get_endpoint_by_name(&self, name: &str) -> Result<HostEndpoint, BackendError> {
        self.find_endpoint(name)
            .ok_or_else(|| BackendError::EndpointNotFound(name.to_string()))
    }

    async fn list_endpoints(&self) -> Result<Vec<HostEndpoint>, BackendError> {
        let mut endpoints: Vec<HostEndpoint> =
            self.endpoints.iter().map(|e| e.value().clone()).collect();
        endpoints.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(endpoints)
    }

    async fn delete_endpoint(&self, id: &str) -> Result<(), BackendError> {
        let (_, endpoint) = self
            .endpoints
            .remove(id)
            .ok_or_else(|| BackendError::EndpointNotFound(id.to_string()))?;

        if let Some(mut attached) = self.namespaces.get_mut(&endpoint.namespace_id) {
            attached.remove(id);
        }
        Ok(())
    }

    async fn add_namespace_endpoint(
        &self,
        namespace_id: &str,
        endpoint_id: &str,
    ) -> Result<(), BackendError> {
        let mut attached = self
            .namespaces
            .get_mut(namespace_id)
            .ok_or_else(|| BackendError::NamespaceNotFound(namespace_id.to_string()))?;
        let mut endpoint = self
            .endpoints
            .get_mut(endpoint_id)
            .ok_or_else(|| BackendError::EndpointNotFound(endpoint_id.to_string()))?;

        attached.insert(endpoint_id.to_string());
        endpoint.namespace_id = namespace_id.to_string();
        Ok(())
    }

    async fn host_default_namespace(&self) -> Result<String, BackendError> {
        Ok(self.host_namespace.clone())
    }

    async fn modify_endpoint_policies(
        &self,
        endpoint_id: &str,
        policies: Vec<EndpointPolicy>,
        request: PolicyRequest,
    ) -> Result<(), BackendError> {
        let mut endpoint = self
            .endpoints
            .get_mut(endpoint_id)
            .ok_or_else(|| BackendError::EndpointNotFound(endpoint_id.to_string()))?;

        for policy in policies {
            endpoint.policies.retain(|p| !p.same_kind(&policy));
            if request == PolicyRequest::Update {
                endpoint.policies.push(policy);
            }
        }
        Ok(())
    }

    fn ipv6_dual_stack_supported(&self) -> Result<(), BackendError> {
        if self.ipv6_supported {
            Ok(())
        } else {
            Err(BackendError::Unsupported(
                "IPv6 dual stack is not available on this host".to_string(),
            ))
        }
    }
}
