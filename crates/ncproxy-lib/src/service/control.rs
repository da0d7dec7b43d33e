//! `ncproxygrpc.v1` control surface

use super::convert;
use super::{agent_failure, respond, SURFACE_V1};
use crate::agent::{ComputeAgent, ComputeAgentCache};
use crate::error::ProxyError;
use crate::hns::PolicyRequest;
use crate::models::{EndpointResource, NetworkResource};
use crate::observability::ProxyMetrics;
use crate::proto::computeagent::{
    AddNicInternalRequest, AssignPciInternalRequest, DeleteNicInternalRequest,
    ModifyNicInternalRequest, RemovePciInternalRequest,
};
use crate::proto::ncproxygrpc::v1::{
    endpoint_settings, network, network_config_proxy_server::NetworkConfigProxy, AddEndpointRequest,
    AddEndpointResponse, AddNicRequest, AddNicResponse, AssignPciRequest, AssignPciResponse,
    CreateEndpointRequest, CreateEndpointResponse, CreateNetworkRequest, CreateNetworkResponse,
    DeleteEndpointRequest, DeleteEndpointResponse, DeleteNetworkRequest, DeleteNetworkResponse,
    DeleteNicRequest, DeleteNicResponse, GetEndpointRequest, GetEndpointResponse,
    GetEndpointsRequest, GetEndpointsResponse, GetNetworkRequest, GetNetworkResponse,
    GetNetworksRequest, GetNetworksResponse, ModifyNicRequest, ModifyNicResponse, RemovePciRequest,
    RemovePciResponse,
};
use crate::resources::ResourceLayer;
use std::sync::Arc;
use std::time::Instant;
use tonic::{Request, Response, Status};
use tracing::info;

/// Network, endpoint and NIC lifecycle requests from the node network service
pub struct ControlService {
    resources: Arc<ResourceLayer>,
    agents: Arc<ComputeAgentCache>,
    metrics: ProxyMetrics,
}

impl ControlService {
    pub fn new(
        resources: Arc<ResourceLayer>,
        agents: Arc<ComputeAgentCache>,
        metrics: ProxyMetrics,
    ) -> Self {
        Self {
            resources,
            agents,
            metrics,
        }
    }

    /// A drained cache is reported the same way as a missing registration.
    async fn agent_for(&self, container_id: &str) -> Result<Arc<dyn ComputeAgent>, ProxyError> {
        match self.agents.get(container_id).await {
            Ok(Some(agent)) => Ok(agent),
            Ok(None) | Err(_) => Err(ProxyError::failed_precondition(format!(
                "No shim registered for namespace `{container_id}`"
            ))),
        }
    }

    // -- NICs --

    #[tracing::instrument(name = "AddNIC", skip_all, fields(
        container_id = %req.container_id,
        endpoint_name = %req.endpoint_name,
        nic_id = %req.nic_id,
    ))]
    pub async fn add_nic(&self, req: AddNicRequest) -> Result<AddNicResponse, ProxyError> {
        if req.container_id.is_empty() || req.endpoint_name.is_empty() || req.nic_id.is_empty() {
            return Err(ProxyError::empty_field(&req));
        }

        let endpoint = self.resources.find_endpoint(&req.endpoint_name).await?;
        let agent = self.agent_for(&req.container_id).await?;

        match &endpoint {
            EndpointResource::Custom(custom) => {
                let device = custom
                    .device_details
                    .as_ref()
                    .ok_or_else(|| ProxyError::empty_field(&req))?;
                agent
                    .assign_pci(AssignPciInternalRequest {
                        container_id: req.container_id.clone(),
                        device_id: device.device_id.clone(),
                        virtual_function_index: device.virtual_function_index,
                        nic_id: req.nic_id.clone(),
                    })
                    .await
                    .map_err(|e| {
                        agent_failure(
                            format!(
                                "failed to assign device {:?} to container {:?}",
                                device.device_id, req.container_id
                            ),
                            e,
                        )
                    })?;
            }
            EndpointResource::Host(host) => {
                if let Some(iov) = convert::inline_iov(req.endpoint_settings.as_ref()) {
                    info!(?iov, "AddNIC iov settings");
                    if iov.is_enabled() {
                        self.resources
                            .modify_iov_policy(&host.id, iov, PolicyRequest::Update)
                            .await?;
                    }
                }
            }
        }

        let descriptor = endpoint
            .to_any()
            .map_err(|e| ProxyError::internal("failed to encode endpoint", e))?;
        let context = format!(
            "failed to add NIC {:?} to container {:?}",
            req.nic_id, req.container_id
        );
        agent
            .add_nic(AddNicInternalRequest {
                container_id: req.container_id,
                nic_id: req.nic_id,
                endpoint: Some(descriptor),
            })
            .await
            .map_err(|e| agent_failure(context, e))?;
        Ok(AddNicResponse {})
    }

    /// Turning offload on updates the host policy before the agent call;
    /// turning it off reverses the order and then revokes the policy.
    #[tracing::instrument(name = "ModifyNIC", skip_all, fields(
        container_id = %req.container_id,
        endpoint_name = %req.endpoint_name,
        nic_id = %req.nic_id,
    ))]
    pub async fn modify_nic(&self, req: ModifyNicRequest) -> Result<ModifyNicResponse, ProxyError> {
        if req.container_id.is_empty()
            || req.endpoint_name.is_empty()
            || req.nic_id.is_empty()
            || req.endpoint_settings.is_none()
        {
            return Err(ProxyError::empty_field(&req));
        }

        if self
            .resources
            .find_custom_endpoint(&req.endpoint_name)
            .await
            .is_some()
        {
            return Err(ProxyError::unimplemented(format!(
                "cannot modify custom endpoints: {req:?}"
            )));
        }

        let endpoint = self.resources.find_host_endpoint(&req.endpoint_name).await?;
        let endpoint_id = endpoint.id.clone();
        let descriptor = EndpointResource::Host(endpoint)
            .to_any()
            .map_err(|e| ProxyError::internal("failed to encode endpoint", e))?;

        let agent = self.agent_for(&req.container_id).await?;
        let iov = convert::inline_iov(req.endpoint_settings.as_ref())
            .ok_or_else(|| ProxyError::empty_field(&req))?;
        info!(?iov, "ModifyNIC iov settings");

        let context = format!(
            "failed to modify NIC {:?} of container {:?}",
            req.nic_id, req.container_id
        );
        let agent_request = ModifyNicInternalRequest {
            nic_id: req.nic_id.clone(),
            endpoint: Some(descriptor),
            iov_policy_settings: Some(convert::agent_iov_settings(&iov)),
        };

        if iov.is_enabled() {
            self.resources
                .modify_iov_policy(&endpoint_id, iov, PolicyRequest::Update)
                .await?;
            agent
                .modify_nic(agent_request)
                .await
                .map_err(|e| agent_failure(context, e))?;
        } else {
            agent
                .modify_nic(agent_request)
                .await
                .map_err(|e| agent_failure(context, e))?;
            self.resources
                .modify_iov_policy(&endpoint_id, iov, PolicyRequest::Update)
                .await?;
            self.resources
                .modify_iov_policy(&endpoint_id, iov, PolicyRequest::Remove)
                .await?;
        }

        Ok(ModifyNicResponse {})
    }

    #[tracing::instrument(name = "DeleteNIC", skip_all, fields(
        container_id = %req.container_id,
        endpoint_name = %req.endpoint_name,
        nic_id = %req.nic_id,
    ))]
    pub async fn delete_nic(&self, req: DeleteNicRequest) -> Result<DeleteNicResponse, ProxyError> {
        if req.container_id.is_empty() || req.endpoint_name.is_empty() || req.nic_id.is_empty() {
            return Err(ProxyError::empty_field(&req));
        }

        let endpoint = self.resources.find_endpoint(&req.endpoint_name).await?;
        let descriptor = endpoint
            .to_any()
            .map_err(|e| ProxyError::internal("failed to encode endpoint", e))?;
        let agent = self.agent_for(&req.container_id).await?;

        agent
            .delete_nic(DeleteNicInternalRequest {
                container_id: req.container_id.clone(),
                nic_id: req.nic_id.clone(),
                endpoint: Some(descriptor),
            })
            .await
            .map_err(|e| match e {
                crate::agent::AgentError::NotFound(_) => ProxyError::not_found(format!(
                    "failed to remove endpoint {:?} from namespace {:?}",
                    req.endpoint_name, req.nic_id
                )),
                other => agent_failure(
                    format!(
                        "failed to delete NIC {:?} from container {:?}",
                        req.nic_id, req.container_id
                    ),
                    other,
                ),
            })?;
        Ok(DeleteNicResponse {})
    }

    // -- networks --

    #[tracing::instrument(name = "CreateNetwork", skip_all)]
    pub async fn create_network(
        &self,
        req: CreateNetworkRequest,
    ) -> Result<CreateNetworkResponse, ProxyError> {
        let Some(settings) = req.network.as_ref().and_then(|n| n.settings.as_ref()) else {
            return Err(ProxyError::empty_field(&req));
        };

        let id = match settings {
            network::Settings::HcnNetwork(hcn) => {
                if hcn.name.is_empty() {
                    return Err(ProxyError::empty_field(&req));
                }
                info!(
                    network_name = %hcn.name,
                    mode = ?hcn.mode(),
                    ipam_type = ?hcn.ipam_type(),
                    "Creating host network"
                );
                self.resources
                    .create_host_network(convert::host_network_spec(hcn))
                    .await?
                    .id
            }
            network::Settings::NcproxyNetwork(custom) => {
                if custom.name.is_empty() {
                    return Err(ProxyError::empty_field(&req));
                }
                self.resources.create_custom_network(&custom.name).await?
            }
        };
        Ok(CreateNetworkResponse { id })
    }

    #[tracing::instrument(name = "DeleteNetwork", skip_all, fields(network_name = %req.name))]
    pub async fn delete_network(
        &self,
        req: DeleteNetworkRequest,
    ) -> Result<DeleteNetworkResponse, ProxyError> {
        if req.name.is_empty() {
            return Err(ProxyError::empty_field(&req));
        }
        self.resources.delete_network(&req.name).await?;
        Ok(DeleteNetworkResponse {})
    }

    async fn describe_network(&self, network: &NetworkResource) -> Result<GetNetworkResponse, ProxyError> {
        match network {
            NetworkResource::Host(host) => {
                let switch_name = self.resources.switch_name(host).await?;
                convert::host_network_response(host, switch_name)
            }
            NetworkResource::Custom(custom) => Ok(convert::custom_network_response(custom)),
        }
    }

    #[tracing::instrument(name = "GetNetwork", skip_all, fields(network_name = %req.name))]
    pub async fn get_network(&self, req: GetNetworkRequest) -> Result<GetNetworkResponse, ProxyError> {
        if req.name.is_empty() {
            return Err(ProxyError::empty_field(&req));
        }
        let network = self.resources.find_network(&req.name).await?;
        self.describe_network(&network).await
    }

    #[tracing::instrument(name = "GetNetworks", skip_all)]
    pub async fn get_networks(
        &self,
        _req: GetNetworksRequest,
    ) -> Result<GetNetworksResponse, ProxyError> {
        let mut networks = Vec::new();
        for network in self.resources.list_networks().await? {
            networks.push(self.describe_network(&network).await?);
        }
        Ok(GetNetworksResponse { networks })
    }

    // -- endpoints --

    #[tracing::instrument(name = "CreateEndpoint", skip_all)]
    pub async fn create_endpoint(
        &self,
        req: CreateEndpointRequest,
    ) -> Result<CreateEndpointResponse, ProxyError> {
        let Some(settings) = req
            .endpoint_settings
            .as_ref()
            .and_then(|s| s.settings.as_ref())
        else {
            return Err(ProxyError::empty_field(&req));
        };

        let id = match settings {
            endpoint_settings::Settings::HcnEndpoint(hcn) => {
                if hcn.name.is_empty()
                    || hcn.ipaddress.is_empty()
                    || hcn.macaddress.is_empty()
                    || hcn.network_name.is_empty()
                {
                    return Err(ProxyError::empty_field(&req));
                }
                info!(
                    endpoint_name = %hcn.name,
                    network_name = %hcn.network_name,
                    mac_address = %hcn.macaddress,
                    ip_address = %hcn.ipaddress,
                    "Creating host endpoint"
                );
                self.resources
                    .create_host_endpoint(convert::host_endpoint_spec(hcn))
                    .await?
                    .id
            }
            endpoint_settings::Settings::NcproxyEndpoint(custom) => {
                if custom.name.is_empty()
                    || custom.ipaddress.is_empty()
                    || custom.macaddress.is_empty()
                    || custom.network_name.is_empty()
                    || custom.device_details.is_none()
                {
                    return Err(ProxyError::empty_field(&req));
                }
                self.resources
                    .create_custom_endpoint(convert::custom_endpoint(custom))
                    .await?
            }
        };
        Ok(CreateEndpointResponse { id })
    }

    #[tracing::instrument(name = "AddEndpoint", skip_all, fields(
        endpoint_name = %req.name,
        namespace_id = %req.namespace_id,
    ))]
    pub async fn add_endpoint(&self, req: AddEndpointRequest) -> Result<AddEndpointResponse, ProxyError> {
        if req.name.is_empty() || (!req.attach_to_host && req.namespace_id.is_empty()) {
            return Err(ProxyError::empty_field(&req));
        }
        self.resources
            .attach_endpoint(&req.name, &req.namespace_id, req.attach_to_host)
            .await?;
        Ok(AddEndpointResponse {})
    }

    #[tracing::instrument(name = "DeleteEndpoint", skip_all, fields(endpoint_name = %req.name))]
    pub async fn delete_endpoint(
        &self,
        req: DeleteEndpointRequest,
    ) -> Result<DeleteEndpointResponse, ProxyError> {
        if req.name.is_empty() {
            return Err(ProxyError::empty_field(&req));
        }
        self.resources.delete_endpoint(&req.name).await?;
        Ok(DeleteEndpointResponse {})
    }

    fn describe_endpoint(endpoint: &EndpointResource) -> Result<GetEndpointResponse, ProxyError> {
        match endpoint {
            EndpointResource::Host(host) => convert::host_endpoint_response(host),
            EndpointResource::Custom(custom) => Ok(convert::custom_endpoint_response(custom)),
        }
    }

    #[tracing::instrument(name = "GetEndpoint", skip_all, fields(endpoint_name = %req.name))]
    pub async fn get_endpoint(&self, req: GetEndpointRequest) -> Result<GetEndpointResponse, ProxyError> {
        if req.name.is_empty() {
            return Err(ProxyError::empty_field(&req));
        }
        let endpoint = self.resources.find_endpoint(&req.name).await?;
        Self::describe_endpoint(&endpoint)
    }

    #[tracing::instrument(name = "GetEndpoints", skip_all)]
    pub async fn get_endpoints(
        &self,
        _req: GetEndpointsRequest,
    ) -> Result<GetEndpointsResponse, ProxyError> {
        let endpoints = self
            .resources
            .list_endpoints()
            .await?
            .iter()
            .map(Self::describe_endpoint)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(GetEndpointsResponse { endpoints })
    }

    // -- passthrough devices --

    #[tracing::instrument(name = "AssignPCI", skip_all, fields(
        container_id = %req.container_id,
        device_id = %req.device_id,
    ))]
    pub async fn assign_pci(&self, req: AssignPciRequest) -> Result<AssignPciResponse, ProxyError> {
        if req.container_id.is_empty() || req.device_id.is_empty() {
            return Err(ProxyError::empty_field(&req));
        }
        let agent = self.agent_for(&req.container_id).await?;
        let context = format!(
            "failed to assign device {:?} to container {:?}",
            req.device_id, req.container_id
        );
        let id = agent
            .assign_pci(AssignPciInternalRequest {
                container_id: req.container_id,
                device_id: req.device_id,
                virtual_function_index: req.virtual_function_index,
                nic_id: req.nic_id,
            })
            .await
            .map_err(|e| agent_failure(context, e))?;
        Ok(AssignPciResponse { id })
    }

    #[tracing::instrument(name = "RemovePCI", skip_all, fields(
        container_id = %req.container_id,
        device_id = %req.device_id,
    ))]
    pub async fn remove_pci(&self, req: RemovePciRequest) -> Result<RemovePciResponse, ProxyError> {
        if req.container_id.is_empty() || req.device_id.is_empty() {
            return Err(ProxyError::empty_field(&req));
        }
        let agent = self.agent_for(&req.container_id).await?;
        let context = format!(
            "failed to remove device {:?} from container {:?}",
            req.device_id, req.container_id
        );
        agent
            .remove_pci(RemovePciInternalRequest {
                container_id: req.container_id,
                device_id: req.device_id,
                virtual_function_index: req.virtual_function_index,
            })
            .await
            .map_err(|e| agent_failure(context, e))?;
        Ok(RemovePciResponse {})
    }
}

/// Runs an inherent handler and records it under `$method`.
macro_rules! handle {
    ($self:ident, $method:literal, $handler:ident, $request:ident) => {{
        let started = Instant::now();
        let result = ControlService::$handler($self, $request.into_inner()).await;
        respond(&$self.metrics, SURFACE_V1, $method, started, result)
    }};
}

#[tonic::async_trait]
impl NetworkConfigProxy for ControlService {
    async fn add_nic(&self, request: Request<AddNicRequest>) -> Result<Response<AddNicResponse>, Status> {
        handle!(self, "AddNIC", add_nic, request)
    }

    async fn modify_nic(
        &self,
        request: Request<ModifyNicRequest>,
    ) -> Result<Response<ModifyNicResponse>, Status> {
        handle!(self, "ModifyNIC", modify_nic, request)
    }

    async fn delete_nic(
        &self,
        request: Request<DeleteNicRequest>,
    ) -> Result<Response<DeleteNicResponse>, Status> {
        handle!(self, "DeleteNIC", delete_nic, request)
    }

    async fn create_network(
        &self,
        request: Request<CreateNetworkRequest>,
    ) -> Result<Response<CreateNetworkResponse>, Status> {
        handle!(self, "CreateNetwork", create_network, request)
    }

    async fn create_endpoint(
        &self,
        request: Request<CreateEndpointRequest>,
    ) -> Result<Response<CreateEndpointResponse>, Status> {
        handle!(self, "CreateEndpoint", create_endpoint, request)
    }

    async fn add_endpoint(
        &self,
        request: Request<AddEndpointRequest>,
    ) -> Result<Response<AddEndpointResponse>, Status> {
        handle!(self, "AddEndpoint", add_endpoint, request)
    }

    async fn delete_endpoint(
        &self,
        request: Request<DeleteEndpointRequest>,
    ) -> Result<Response<DeleteEndpointResponse>, Status> {
        handle!(self, "DeleteEndpoint", delete_endpoint, request)
    }

    async fn delete_network(
        &self,
        request: Request<DeleteNetworkRequest>,
    ) -> Result<Response<DeleteNetworkResponse>, Status> {
        handle!(self, "DeleteNetwork", delete_network, request)
    }

    async fn get_endpoint(
        &self,
        request: Request<GetEndpointRequest>,
    ) -> Result<Response<GetEndpointResponse>, Status> {
        handle!(self, "GetEndpoint", get_endpoint, request)
    }

    async fn get_network(
        &self,
        request: Request<GetNetworkRequest>,
    ) -> Result<Response<GetNetworkResponse>, Status> {
        handle!(self, "GetNetwork", get_network, request)
    }

    async fn get_endpoints(
        &self,
        request: Request<GetEndpointsRequest>,
    ) -> Result<Response<GetEndpointsResponse>, Status> {
        handle!(self, "GetEndpoints", get_endpoints, request)
    }

    async fn get_networks(
        &self,
        request: Request<GetNetworksRequest>,
    ) -> Result<Response<GetNetworksResponse>, Status> {
        handle!(self, "GetNetworks", get_networks, request)
    }

    async fn assign_pci(
        &self,
        request: Request<AssignPciRequest>,
    ) -> Result<Response<AssignPciResponse>, Status> {
        handle!(self, "AssignPCI", assign_pci, request)
    }

    async fn remove_pci(
        &self,
        request: Request<RemovePciRequest>,
    ) -> Result<Response<RemovePciResponse>, Status> {
        handle!(self, "RemovePCI", remove_pci, request)
    }
}
