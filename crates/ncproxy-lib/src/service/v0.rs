//! Legacy `ncproxygrpc.v0` surface
//!
//! Every request is rewritten into its v1 form and handed to the
//! [`ControlService`]. v0 can only describe host-backed resources, so custom
//! resources are reported as missing and left out of listings.

use super::control::ControlService;
use super::{respond, SURFACE_V0};
use crate::error::ProxyError;
use crate::observability::ProxyMetrics;
use crate::proto::ncproxygrpc::{v0, v1};
use std::sync::Arc;
use std::time::Instant;
use tonic::{Request, Response, Status};

pub struct V0Service {
    v1: Arc<ControlService>,
    metrics: ProxyMetrics,
}

impl V0Service {
    pub fn new(v1: Arc<ControlService>, metrics: ProxyMetrics) -> Self {
        Self { v1, metrics }
    }

    pub async fn add_nic(&self, req: v0::AddNicRequest) -> Result<v0::AddNicResponse, ProxyError> {
        self.v1
            .add_nic(v1::AddNicRequest {
                container_id: req.container_id,
                nic_id: req.nic_id,
                endpoint_name: req.endpoint_name,
                endpoint_settings: None,
            })
            .await?;
        Ok(v0::AddNicResponse {})
    }

    pub async fn modify_nic(
        &self,
        req: v0::ModifyNicRequest,
    ) -> Result<v0::ModifyNicResponse, ProxyError> {
        let policies = req.iov_policy_settings.map(|iov| v1::HcnEndpointPolicies {
            portname_policy_setting: None,
            iov_policy_settings: Some(iov_setting(iov)),
        });
        self.v1
            .modify_nic(v1::ModifyNicRequest {
                container_id: req.container_id,
                nic_id: req.nic_id,
                endpoint_name: req.endpoint_name,
                endpoint_settings: Some(v1::EndpointSettings {
                    settings: Some(v1::endpoint_settings::Settings::HcnEndpoint(
                        v1::HcnEndpointSettings {
                            policies,
                            ..Default::default()
                        },
                    )),
                }),
            })
            .await?;
        Ok(v0::ModifyNicResponse {})
    }

    pub async fn delete_nic(
        &self,
        req: v0::DeleteNicRequest,
    ) -> Result<v0::DeleteNicResponse, ProxyError> {
        self.v1
            .delete_nic(v1::DeleteNicRequest {
                container_id: req.container_id,
                nic_id: req.nic_id,
                endpoint_name: req.endpoint_name,
            })
            .await?;
        Ok(v0::DeleteNicResponse {})
    }

    /// Mode and IPAM enums share their numbering across versions.
    pub async fn create_network(
        &self,
        req: v0::CreateNetworkRequest,
    ) -> Result<v0::CreateNetworkResponse, ProxyError> {
        let settings = v1::HostComputeNetworkSettings {
            name: req.name,
            mode: req.mode,
            switch_name: req.switch_name,
            ipam_type: req.ipam_type,
            subnet_ipaddress_prefix: req.subnet_ipaddress_prefix,
            default_gateway: req.default_gateway,
            ..Default::default()
        };
        let resp = self
            .v1
            .create_network(v1::CreateNetworkRequest {
                network: Some(v1::Network {
                    settings: Some(v1::network::Settings::HcnNetwork(settings)),
                }),
            })
            .await?;
        Ok(v0::CreateNetworkResponse { id: resp.id })
    }

    pub async fn create_endpoint(
        &self,
        req: v0::CreateEndpointRequest,
    ) -> Result<v0::CreateEndpointResponse, ProxyError> {
        let prefix_length: u32 = req.ipaddress_prefixlength.parse().map_err(|e| {
            ProxyError::invalid_argument(format!(
                "received invalid ip address prefix length {:?}: {e}",
                req.ipaddress_prefixlength
            ))
        })?;

        let settings = v1::HcnEndpointSettings {
            name: req.name,
            macaddress: req.macaddress,
            ipaddress: req.ipaddress,
            ipaddress_prefixlength: prefix_length,
            network_name: req.network_name,
            policies: Some(v1::HcnEndpointPolicies {
                portname_policy_setting: req.portname_policy_setting.map(|p| {
                    v1::PortNameEndpointPolicySetting {
                        port_name: p.port_name,
                    }
                }),
                iov_policy_settings: req.iov_policy_settings.map(iov_setting),
            }),
            dns_setting: req.dns_setting.map(|d| v1::DnsSetting {
                server_ip_addrs: d.server_ip_addrs,
                domain: d.domain,
                search: d.search,
            }),
            ..Default::default()
        };
        let resp = self
            .v1
            .create_endpoint(v1::CreateEndpointRequest {
                endpoint_settings: Some(v1::EndpointSettings {
                    settings: Some(v1::endpoint_settings::Settings::HcnEndpoint(settings)),
                }),
            })
            .await?;
        Ok(v0::CreateEndpointResponse { id: resp.id })
    }

    pub async fn add_endpoint(
        &self,
        req: v0::AddEndpointRequest,
    ) -> Result<v0::AddEndpointResponse, ProxyError> {
        self.v1
            .add_endpoint(v1::AddEndpointRequest {
                name: req.name,
                namespace_id: req.namespace_id,
                attach_to_host: false,
            })
            .await?;
        Ok(v0::AddEndpointResponse {})
    }

    pub async fn delete_endpoint(
        &self,
        req: v0::DeleteEndpointRequest,
    ) -> Result<v0::DeleteEndpointResponse, ProxyError> {
        self.v1
            .delete_endpoint(v1::DeleteEndpointRequest { name: req.name })
            .await?;
        Ok(v0::DeleteEndpointResponse {})
    }

    pub async fn delete_network(
        &self,
        req: v0::DeleteNetworkRequest,
    ) -> Result<v0::DeleteNetworkResponse, ProxyError> {
        self.v1
            .delete_network(v1::DeleteNetworkRequest { name: req.name })
            .await?;
        Ok(v0::DeleteNetworkResponse {})
    }

    pub async fn get_endpoint(
        &self,
        req: v0::GetEndpointRequest,
    ) -> Result<v0::GetEndpointResponse, ProxyError> {
        let name = req.name.clone();
        let resp = self
            .v1
            .get_endpoint(v1::GetEndpointRequest { name: req.name })
            .await?;
        legacy_endpoint(resp).ok_or_else(|| {
            ProxyError::not_found(format!("no endpoint with name `{name}` found"))
        })
    }

    pub async fn get_endpoints(
        &self,
        _req: v0::GetEndpointsRequest,
    ) -> Result<v0::GetEndpointsResponse, ProxyError> {
        let resp = self.v1.get_endpoints(v1::GetEndpointsRequest {}).await?;
        Ok(v0::GetEndpointsResponse {
            endpoints: resp.endpoints.into_iter().filter_map(legacy_endpoint).collect(),
        })
    }

    pub async fn get_network(
        &self,
        req: v0::GetNetworkRequest,
    ) -> Result<v0::GetNetworkResponse, ProxyError> {
        let name = req.name.clone();
        let resp = self
            .v1
            .get_network(v1::GetNetworkRequest { name: req.name })
            .await?;
        legacy_network(resp)
            .ok_or_else(|| ProxyError::not_found(format!("no network with name `{name}` found")))
    }

    pub async fn get_networks(
        &self,
        _req: v0::GetNetworksRequest,
    ) -> Result<v0::GetNetworksResponse, ProxyError> {
        let resp = self.v1.get_networks(v1::GetNetworksRequest {}).await?;
        Ok(v0::GetNetworksResponse {
            networks: resp.networks.into_iter().filter_map(legacy_network).collect(),
        })
    }
}

fn iov_setting(iov: v0::IovEndpointPolicySetting) -> v1::IovEndpointPolicySetting {
    v1::IovEndpointPolicySetting {
        iov_offload_weight: iov.iov_offload_weight,
        queue_pairs_requested: iov.queue_pairs_requested,
        interrupt_moderation: iov.interrupt_moderation,
    }
}

/// `None` for custom endpoints.
fn legacy_endpoint(resp: v1::GetEndpointResponse) -> Option<v0::GetEndpointResponse> {
    let settings = resp.endpoint?.settings?;
    let v1::endpoint_settings::Settings::HcnEndpoint(hcn) = settings else {
        return None;
    };
    Some(v0::GetEndpointResponse {
        id: resp.id,
        name: hcn.name,
        network: hcn.network_name,
        namespace: resp.namespace,
        dns_setting: hcn.dns_setting.map(|d| v0::DnsSetting {
            server_ip_addrs: d.server_ip_addrs,
            domain: d.domain,
            search: d.search,
        }),
    })
}

/// `None` for custom networks.
fn legacy_network(resp: v1::GetNetworkResponse) -> Option<v0::GetNetworkResponse> {
    match resp.network?.settings? {
        v1::network::Settings::HcnNetwork(hcn) => Some(v0::GetNetworkResponse {
            id: resp.id,
            name: hcn.name,
        }),
        v1::network::Settings::NcproxyNetwork(_) => None,
    }
}

macro_rules! handle {
    ($self:ident, $method:literal, $handler:ident, $request:ident) => {{
        let started = Instant::now();
        let result = V0Service::$handler($self, $request.into_inner()).await;
        respond(&$self.metrics, SURFACE_V0, $method, started, result)
    }};
}

#[tonic::async_trait]
impl v0::network_config_proxy_server::NetworkConfigProxy for V0Service {
    async fn add_nic(
        &self,
        request: Request<v0::AddNicRequest>,
    ) -> Result<Response<v0::AddNicResponse>, Status> {
        handle!(self, "AddNIC", add_nic, request)
    }

    async fn modify_nic(
        &self,
        request: Request<v0::ModifyNicRequest>,
    ) -> Result<Response<v0::ModifyNicResponse>, Status> {
        handle!(self, "ModifyNIC", modify_nic, request)
    }

    async fn delete_nic(
        &self,
        request: Request<v0::DeleteNicRequest>,
    ) -> Result<Response<v0::DeleteNicResponse>, Status> {
        handle!(self, "DeleteNIC", delete_nic, request)
    }

    async fn create_network(
        &self,
        request: Request<v0::CreateNetworkRequest>,
    ) -> Result<Response<v0::CreateNetworkResponse>, Status> {
        handle!(self, "CreateNetwork", create_network, request)
    }

    async fn create_endpoint(
        &self,
        request: Request<v0::CreateEndpointRequest>,
    ) -> Result<Response<v0::CreateEndpointResponse>, Status> {
        handle!(self, "CreateEndpoint", create_endpoint, request)
    }

    async fn add_endpoint(
        &self,
        request: Request<v0::AddEndpointRequest>,
    ) -> Result<Response<v0::AddEndpointResponse>, Status> {
        handle!(self, "AddEndpoint", add_endpoint, request)
    }

    async fn delete_endpoint(
        &self,
        request: Request<v0::DeleteEndpointRequest>,
    ) -> Result<Response<v0::DeleteEndpointResponse>, Status> {
        handle!(self, "DeleteEndpoint", delete_endpoint, request)
    }

    async fn delete_network(
        &self,
        request: Request<v0::DeleteNetworkRequest>,
    ) -> Result<Response<v0::DeleteNetworkResponse>, Status> {
        handle!(self, "DeleteNetwork", delete_network, request)
    }

    async fn get_endpoint(
        &self,
        request: Request<v0::GetEndpointRequest>,
    ) -> Result<Response<v0::GetEndpointResponse>, Status> {
        handle!(self, "GetEndpoint", get_endpoint, request)
    }

    async fn get_network(
        &self,
        request: Request<v0::GetNetworkRequest>,
    ) -> Result<Response<v0::GetNetworkResponse>, Status> {
        handle!(self, "GetNetwork", get_network, request)
    }

    async fn get_endpoints(
        &self,
        request: Request<v0::GetEndpointsRequest>,
    ) -> Result<Response<v0::GetEndpointsResponse>, Status> {
        handle!(self, "GetEndpoints", get_endpoints, request)
    }

    async fn get_networks(
        &self,
        request: Request<v0::GetNetworksRequest>,
    ) -> Result<Response<v0::GetNetworksResponse>, Status> {
        handle!(self, "GetNetworks", get_networks, request)
    }
}
