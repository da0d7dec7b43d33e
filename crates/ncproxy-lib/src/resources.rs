//! Network and endpoint resource layer
//!
//! Resolves names across both backends. Every lookup consults the proxy's own
//! networking store first and falls back to the host network backend, so a
//! custom resource shadows a host resource of the same name.

use crate::error::ProxyError;
use crate::hns::{
    BackendError, Dns, EndpointPolicy, HostEndpoint, HostNetwork, HostNetworkBackend, IpConfig,
    IpamType, NetworkMode, NetworkPolicy, PolicyRequest, Route, Subnet,
};
use crate::models::{CustomEndpoint, CustomNetwork, EndpointResource, IovPolicy, NetworkResource};
use crate::store::{NetworkingStore, StoreError, StoreResult};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, warn};

const IPV4_DEFAULT_ROUTE: &str = "0.0.0.0/0";
const IPV6_DEFAULT_ROUTE: &str = "::/0";

/// Parameters for a new host-backed network
#[derive(Debug, Clone, Default)]
pub struct HostNetworkSpec {
    pub name: String,
    pub mode: NetworkMode,
    pub ipam_type: IpamType,
    /// Existing network whose switch the new network is layered over.
    pub switch_name: String,
    pub subnet_prefixes: Vec<String>,
    pub default_gateway: String,
    pub subnet_prefixes_v6: Vec<String>,
    pub default_gateway_v6: String,
}

/// Parameters for a new host-backed endpoint
#[derive(Debug, Clone, Default)]
pub struct HostEndpointSpec {
    pub name: String,
    pub mac_address: String,
    pub ip_address: String,
    pub prefix_length: u32,
    pub ipv6_address: String,
    pub ipv6_prefix_length: u32,
    pub network_name: String,
    pub port_name: Option<String>,
    pub iov: Option<IovPolicy>,
    pub dns: Option<Dns>,
}

pub struct ResourceLayer {
    backend: Arc<dyn HostNetworkBackend>,
    store: NetworkingStore,
}

impl ResourceLayer {
    pub fn new(backend: Arc<dyn HostNetworkBackend>, store: NetworkingStore) -> Self {
        Self { backend, store }
    }

    pub fn backend(&self) -> &Arc<dyn HostNetworkBackend> {
        &self.backend
    }

    // -- lookups --

    /// Looks up a custom endpoint. Anything other than a definite hit is
    /// reported as `None`; unexpected store failures are logged.
    pub async fn find_custom_endpoint(&self, name: &str) -> Option<CustomEndpoint> {
        custom_hit(self.store.get_endpoint(name).await)
    }

    pub async fn find_custom_network(&self, name: &str) -> Option<CustomNetwork> {
        custom_hit(self.store.get_network(name).await)
    }

    pub async fn find_host_endpoint(&self, name: &str) -> Result<HostEndpoint, ProxyError> {
        self.backend
            .get_endpoint_by_name(name)
            .await
            .map_err(|e| match e {
                BackendError::EndpointNotFound(_) => {
                    ProxyError::not_found(format!("no endpoint with name `{name}` found"))
                }
                other => backend_failure(format!("failed to get endpoint with name {name:?}"), other),
            })
    }

    pub async fn find_host_network(&self, name: &str) -> Result<HostNetwork, ProxyError> {
        self.backend
            .get_network_by_name(name)
            .await
            .map_err(|e| match e {
                BackendError::NetworkNotFound(_) => {
                    ProxyError::not_found(format!("no network with name `{name}` found"))
                }
                other => backend_failure(format!("failed to get network with name {name:?}"), other),
            })
    }

    /// Custom endpoints first, then host endpoints.
    pub async fn find_endpoint(&self, name: &str) -> Result<EndpointResource, ProxyError> {
        if let Some(endpoint) = self.find_custom_endpoint(name).await {
            return Ok(EndpointResource::Custom(endpoint));
        }
        self.find_host_endpoint(name)
            .await
            .map(EndpointResource::Host)
    }

    /// Custom networks first, then host networks.
    pub async fn find_network(&self, name: &str) -> Result<NetworkResource, ProxyError> {
        if let Some(network) = self.find_custom_network(name).await {
            return Ok(NetworkResource::Custom(network));
        }
        self.find_host_network(name).await.map(NetworkResource::Host)
    }

    /// Name of the network a host network was layered over, if any.
    pub async fn switch_name(&self, network: &HostNetwork) -> Result<Option<String>, ProxyError> {
        let Some(switch_id) = &network.switch_id else {
            return Ok(None);
        };
        let switch = self
            .backend
            .get_network_by_id(switch_id)
            .await
            .map_err(|e| backend_failure(format!("failed to get switch network {switch_id:?}"), e))?;
        Ok(Some(switch.name))
    }

    // -- networks --

    pub async fn create_host_network(&self, spec: HostNetworkSpec) -> Result<HostNetwork, ProxyError> {
        if self.backend.get_network_by_name(&spec.name).await.is_ok() {
            return Err(ProxyError::failed_precondition(format!(
                "network with name {:?} already exists",
                spec.name
            )));
        }

        let mut network = HostNetwork {
            name: spec.name.clone(),
            mode: spec.mode,
            ipam_type: spec.ipam_type,
            ..Default::default()
        };

        if !spec.switch_name.is_empty() {
            let switch = self
                .backend
                .get_network_by_name(&spec.switch_name)
                .await
                .map_err(|e| match e {
                    BackendError::NetworkNotFound(_) => ProxyError::not_found(format!(
                        "no network/switch with name `{}` found",
                        spec.switch_name
                    )),
                    other => backend_failure(
                        format!("failed to get network/switch with name {:?}", spec.switch_name),
                        other,
                    ),
                })?;
            let layer_id = switch.layered_on.clone().ok_or_else(|| {
                ProxyError::failed_precondition(format!(
                    "no layer ID found for network {:?}",
                    switch.id
                ))
            })?;
            network.policies.push(NetworkPolicy::LayerConstraint { layer_id });
            network.switch_id = Some(switch.id);
        }

        for prefix in &spec.subnet_prefixes {
            check_subnet_prefix(prefix, false)?;
            network
                .subnets
                .push(subnet(prefix, &spec.default_gateway, IPV4_DEFAULT_ROUTE));
        }

        if !spec.subnet_prefixes_v6.is_empty() {
            self.require_ipv6()?;
        }
        for prefix in &spec.subnet_prefixes_v6 {
            check_subnet_prefix(prefix, true)?;
            network
                .subnets
                .push(subnet(prefix, &spec.default_gateway_v6, IPV6_DEFAULT_ROUTE));
        }

        let network = self
            .backend
            .create_network(network)
            .await
            .map_err(|e| backend_failure(format!("failed to create network {:?}", spec.name), e))?;
        debug!(network_name = %network.name, network_id = %network.id, "Created host network");
        Ok(network)
    }

    /// Stores a custom network and returns its ID, which is its name.
    pub async fn create_custom_network(&self, name: &str) -> Result<String, ProxyError> {
        let network = CustomNetwork {
            name: name.to_string(),
        };
        self.store
            .create_network(&network)
            .await
            .map_err(|e| store_failure(format!("failed to create network {name:?}"), e))?;
        Ok(network.name)
    }

    pub async fn delete_network(&self, name: &str) -> Result<(), ProxyError> {
        if self.find_custom_network(name).await.is_some() {
            return self
                .store
                .delete_network(name)
                .await
                .map_err(|e| store_failure(format!("failed to delete network with name {name:?}"), e));
        }

        let network = self.find_host_network(name).await?;
        self.backend
            .delete_network(&network.id)
            .await
            .map_err(|e| backend_failure(format!("failed to delete network with name {name:?}"), e))
    }

    /// Host-backed networks followed by custom networks.
    pub async fn list_networks(&self) -> Result<Vec<NetworkResource>, ProxyError> {
        let host = self
            .backend
            .list_networks()
            .await
            .map_err(|e| backend_failure("failed to list host networks", e))?;
        let custom = empty_if_missing(self.store.list_networks().await)
            .map_err(|e| store_failure("failed to list custom networks", e))?;

        Ok(host
            .into_iter()
            .map(NetworkResource::Host)
            .chain(custom.into_iter().map(NetworkResource::Custom))
            .collect())
    }

    // -- endpoints --

    pub async fn create_host_endpoint(&self, spec: HostEndpointSpec) -> Result<HostEndpoint, ProxyError> {
        let network = self.find_host_network(&spec.network_name).await?;

        // Without any address the backend assigns one from the network's subnet.
        let mut ip_configurations = Vec::new();
        if !spec.ip_address.is_empty() {
            ip_configurations.push(ip_config(&spec.ip_address, spec.prefix_length, false)?);
        }
        if !spec.ipv6_address.is_empty() {
            self.require_ipv6()?;
            ip_configurations.push(ip_config(&spec.ipv6_address, spec.ipv6_prefix_length, true)?);
        }

        let mut policies = Vec::new();
        if let Some(iov) = spec.iov {
            policies.push(EndpointPolicy::Iov(iov));
        }
        if let Some(name) = spec.port_name {
            policies.push(EndpointPolicy::PortName { name });
        }

        let endpoint = HostEndpoint {
            name: spec.name.clone(),
            network_id: network.id,
            mac_address: spec.mac_address,
            ip_configurations,
            dns: spec.dns.unwrap_or_default(),
            policies,
            ..Default::default()
        };

        self.backend
            .create_endpoint(endpoint)
            .await
            .map_err(|e| backend_failure(format!("failed to create endpoint {:?}", spec.name), e))
    }

    /// Stores a custom endpoint on an existing custom network and returns its
    /// ID, which is its name.
    pub async fn create_custom_endpoint(&self, endpoint: CustomEndpoint) -> Result<String, ProxyError> {
        if endpoint.device_details.is_none() {
            return Err(ProxyError::invalid_argument(format!(
                "endpoint {:?} has no device details",
                endpoint.name
            )));
        }
        if self.find_custom_network(&endpoint.network_name).await.is_none() {
            return Err(ProxyError::not_found(format!(
                "network `{}` does not exist",
                endpoint.network_name
            )));
        }

        self.store
            .create_endpoint(&endpoint)
            .await
            .map_err(|e| store_failure(format!("failed to create endpoint {:?}", endpoint.name), e))?;
        Ok(endpoint.name)
    }

    /// Attaches an endpoint to a network namespace. With `attach_to_host` a
    /// host endpoint goes into the host's default namespace and any supplied
    /// namespace ID is ignored.
    pub async fn attach_endpoint(
        &self,
        name: &str,
        namespace_id: &str,
        attach_to_host: bool,
    ) -> Result<(), ProxyError> {
        if let Some(mut endpoint) = self.find_custom_endpoint(name).await {
            endpoint.namespace_id = namespace_id.to_string();
            return self
                .store
                .update_endpoint(&endpoint)
                .await
                .map_err(|e| store_failure(format!("failed to update endpoint with name `{name}`"), e));
        }

        let endpoint = self.find_host_endpoint(name).await?;
        let namespace_id = if attach_to_host {
            if !namespace_id.is_empty() {
                warn!(
                    namespace_id = %namespace_id,
                    "Specified namespace ID will be ignored when attaching to default host namespace"
                );
            }
            let host_namespace = self
                .backend
                .host_default_namespace()
                .await
                .map_err(|e| backend_failure("failed to find the host default namespace", e))?;
            debug!(namespace_id = %host_namespace, "Attaching endpoint to default host namespace");
            host_namespace
        } else {
            namespace_id.to_string()
        };

        self.backend
            .add_namespace_endpoint(&namespace_id, &endpoint.id)
            .await
            .map_err(|e| {
                backend_failure(format!("failed to add endpoint with name {name:?} to namespace"), e)
            })
    }

    pub async fn delete_endpoint(&self, name: &str) -> Result<(), ProxyError> {
        if self.find_custom_endpoint(name).await.is_some() {
            return self
                .store
                .delete_endpoint(name)
                .await
                .map_err(|e| store_failure(format!("failed to delete endpoint with name {name:?}"), e));
        }

        let endpoint = self.find_host_endpoint(name).await?;
        self.backend
            .delete_endpoint(&endpoint.id)
            .await
            .map_err(|e| backend_failure(format!("failed to delete endpoint with name {name:?}"), e))
    }

    /// Host-backed endpoints followed by custom endpoints.
    pub async fn list_endpoints(&self) -> Result<Vec<EndpointResource>, ProxyError> {
        let host = self
            .backend
            .list_endpoints()
            .await
            .map_err(|e| backend_failure("failed to list host endpoints", e))?;
        let custom = empty_if_missing(self.store.list_endpoints().await)
            .map_err(|e| store_failure("failed to list custom endpoints", e))?;

        Ok(host
            .into_iter()
            .map(EndpointResource::Host)
            .chain(custom.into_iter().map(EndpointResource::Custom))
            .collect())
    }

    /// Applies (`Update`) or revokes (`Remove`) the IOV policy on a host
    /// endpoint.
    pub async fn modify_iov_policy(
        &self,
        endpoint_id: &str,
        policy: IovPolicy,
        request: PolicyRequest,
    ) -> Result<(), ProxyError> {
        self.backend
            .modify_endpoint_policies(endpoint_id, vec![EndpointPolicy::Iov(policy)], request)
            .await
            .map_err(|e| backend_failure("failed to modify network adapter", e))
    }

    fn require_ipv6(&self) -> Result<(), ProxyError> {
        self.backend.ipv6_dual_stack_supported().map_err(|e| {
            ProxyError::failed_precondition(format!("IPv6 address requested but not supported: {e}"))
        })
    }
}

fn subnet(prefix: &str, gateway: &str, default_route: &str) -> Subnet {
    Subnet {
        ip_address_prefix: prefix.to_string(),
        routes: vec![Route {
            next_hop: gateway.to_string(),
            destination_prefix: default_route.to_string(),
        }],
    }
}

fn max_prefix_length(ipv6: bool) -> u8 {
    if ipv6 {
        128
    } else {
        32
    }
}

/// Subnet prefixes are CIDR strings of the requested address family.
fn check_subnet_prefix(prefix: &str, ipv6: bool) -> Result<(), ProxyError> {
    let invalid = || ProxyError::invalid_argument(format!("invalid subnet prefix {prefix:?}"));
    let (address, length) = prefix.split_once('/').ok_or_else(invalid)?;
    let address: IpAddr = address.parse().map_err(|_| invalid())?;
    let length: u8 = length.parse().map_err(|_| invalid())?;
    if address.is_ipv6() != ipv6 || length > max_prefix_length(ipv6) {
        return Err(invalid());
    }
    Ok(())
}

fn ip_config(address: &str, length: u32, ipv6: bool) -> Result<IpConfig, ProxyError> {
    let ip: IpAddr = address.parse().map_err(|_| {
        ProxyError::invalid_argument(format!("invalid ip address {address:?}"))
    })?;
    if ip.is_ipv6() != ipv6 {
        return Err(ProxyError::invalid_argument(format!(
            "ip address {address:?} is not of the expected family"
        )));
    }
    let prefix_length = u8::try_from(length)
        .ok()
        .filter(|l| (1..=max_prefix_length(ipv6)).contains(l))
        .ok_or_else(|| {
            ProxyError::invalid_argument(format!(
                "invalid ip address prefix length {length} for address {address:?}"
            ))
        })?;
    Ok(IpConfig {
        ip_address: address.to_string(),
        prefix_length,
    })
}

fn custom_hit<T>(result: StoreResult<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) if e.is_not_found() => None,
        Err(e) => {
            warn!(error = %e, "Failed to query ncproxy networking database");
            None
        }
    }
}

fn empty_if_missing<T>(result: StoreResult<Vec<T>>) -> StoreResult<Vec<T>> {
    match result {
        Err(StoreError::NamespaceNotFound(_)) => Ok(Vec::new()),
        other => other,
    }
}

fn backend_failure(context: impl Into<String>, err: BackendError) -> ProxyError {
    let context = context.into();
    match err {
        BackendError::NetworkNotFound(_)
        | BackendError::EndpointNotFound(_)
        | BackendError::NamespaceNotFound(_) => ProxyError::not_found(format!("{context}: {err}")),
        BackendError::AlreadyExists(_) | BackendError::Unsupported(_) => {
            ProxyError::failed_precondition(format!("{context}: {err}"))
        }
        BackendError::Failed(_) => ProxyError::internal(context, err),
    }
}

fn store_failure(context: impl Into<String>, err: StoreError) -> ProxyError {
    let context = context.into();
    match err {
        StoreError::AlreadyExists { .. } => ProxyError::failed_precondition(format!("{context}: {err}")),
        e if e.is_not_found() => ProxyError::not_found(format!("{context}: {e}")),
        e => ProxyError::internal(context, e),
    }
}
