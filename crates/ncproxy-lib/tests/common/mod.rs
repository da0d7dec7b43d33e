//! Shared fixtures for the integration tests

#![allow(dead_code)]

use ncproxy_lib::proto::computeagent::{
    compute_agent_server::{ComputeAgent, ComputeAgentServer},
    AddNicInternalRequest, AddNicInternalResponse, AssignPciInternalRequest,
    AssignPciInternalResponse, DeleteNicInternalRequest, DeleteNicInternalResponse,
    ModifyNicInternalRequest, ModifyNicInternalResponse, RemovePciInternalRequest,
    RemovePciInternalResponse,
};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnixListenerStream;
use tonic::transport::{Channel, Endpoint, Server, Uri};
use tonic::{Request, Response, Status};
use tower::service_fn;

/// NIC ID the fake agent reports as already removed.
pub const MISSING_NIC: &str = "nic-gone";

/// Compute agent that records every call it receives
#[derive(Clone, Default)]
pub struct FakeComputeAgent {
    calls: Arc<Mutex<Vec<String>>>,
}

impl FakeComputeAgent {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[tonic::async_trait]
impl ComputeAgent for FakeComputeAgent {
    async fn add_nic(
        &self,
        request: Request<AddNicInternalRequest>,
    ) -> Result<Response<AddNicInternalResponse>, Status> {
        let req = request.into_inner();
        let type_url = req.endpoint.map(|e| e.type_url).unwrap_or_default();
        self.record(format!("AddNIC {} {} {}", req.container_id, req.nic_id, type_url));
        Ok(Response::new(AddNicInternalResponse {}))
    }

    async fn modify_nic(
        &self,
        request: Request<ModifyNicInternalRequest>,
    ) -> Result<Response<ModifyNicInternalResponse>, Status> {
        let req = request.into_inner();
        let weight = req
            .iov_policy_settings
            .map(|s| s.iov_offload_weight)
            .unwrap_or_default();
        self.record(format!("ModifyNIC {} {}", req.nic_id, weight));
        Ok(Response::new(ModifyNicInternalResponse {}))
    }

    async fn delete_nic(
        &self,
        request: Request<DeleteNicInternalRequest>,
    ) -> Result<Response<DeleteNicInternalResponse>, Status> {
        let req = request.into_inner();
        if req.nic_id == MISSING_NIC {
            return Err(Status::not_found(format!("nic {} not found", req.nic_id)));
        }
        self.record(format!("DeleteNIC {} {}", req.container_id, req.nic_id));
        Ok(Response::new(DeleteNicInternalResponse {}))
    }

    async fn assign_pci(
        &self,
        request: Request<AssignPciInternalRequest>,
    ) -> Result<Response<AssignPciInternalResponse>, Status> {
        let req = request.into_inner();
        self.record(format!("AssignPCI {} {}", req.container_id, req.device_id));
        Ok(Response::new(AssignPciInternalResponse {
            id: format!("{}-{}", req.device_id, req.virtual_function_index),
        }))
    }

    async fn remove_pci(
        &self,
        request: Request<RemovePciInternalRequest>,
    ) -> Result<Response<RemovePciInternalResponse>, Status> {
        let req = request.into_inner();
        self.record(format!("RemovePCI {} {}", req.container_id, req.device_id));
        Ok(Response::new(RemovePciInternalResponse {}))
    }
}

/// Serves a [`FakeComputeAgent`] on a Unix socket at `path`.
pub fn spawn_fake_agent(path: &Path) -> (FakeComputeAgent, JoinHandle<()>) {
    let agent = FakeComputeAgent::default();
    let listener = UnixListener::bind(path).unwrap();
    let service = ComputeAgentServer::new(agent.clone());

    let handle = tokio::spawn(async move {
        Server::builder()
            .add_service(service)
            .serve_with_incoming(UnixListenerStream::new(listener))
            .await
            .unwrap();
    });
    (agent, handle)
}

/// Opens a channel to a gRPC server listening on a Unix socket.
pub async fn uds_channel(path: impl Into<PathBuf>) -> Channel {
    let path = path.into();
    Endpoint::try_from("http://[::]:50051")
        .unwrap()
        .connect_with_connector(service_fn(move |_: Uri| {
            let path = path.clone();
            async move { UnixStream::connect(path).await }
        }))
        .await
        .unwrap()
}
