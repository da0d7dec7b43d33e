//! In-process compute agent and dialer for unit tests

use super::{AgentDialer, AgentError, ComputeAgent};
use crate::hns::{HostNetworkBackend, MemoryHostNetwork};
use crate::models::IovPolicy;
use crate::proto::computeagent::{
    AddNicInternalRequest, AssignPciInternalRequest, DeleteNicInternalRequest,
    ModifyNicInternalRequest, RemovePciInternalRequest,
};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AgentCall {
    AddNic {
        container_id: String,
        nic_id: String,
        type_url: String,
    },
    ModifyNic {
        nic_id: String,
        offload_weight: u32,
    },
    DeleteNic {
        container_id: String,
        nic_id: String,
    },
    AssignPci {
        container_id: String,
        device_id: String,
        virtual_function_index: u32,
    },
    RemovePci {
        container_id: String,
        device_id: String,
    },
}

/// Records the host IOV policy of an endpoint whenever the agent is asked to
/// modify a NIC.
#[derive(Debug)]
struct PolicyObserver {
    backend: Arc<MemoryHostNetwork>,
    endpoint_name: String,
    seen: Mutex<Vec<Option<IovPolicy>>>,
}

#[derive(Debug)]
pub(crate) struct MockAgent {
    address: String,
    calls: Mutex<Vec<AgentCall>>,
    closed: AtomicBool,
    nic_missing: AtomicBool,
    fail_modify: AtomicBool,
    fail_close: AtomicBool,
    observer: Option<PolicyObserver>,
}

impl MockAgent {
    pub(crate) fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            calls: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            nic_missing: AtomicBool::new(false),
            fail_modify: AtomicBool::new(false),
            fail_close: AtomicBool::new(false),
            observer: None,
        }
    }

    pub(crate) fn observing(
        address: &str,
        backend: Arc<MemoryHostNetwork>,
        endpoint_name: &str,
    ) -> Self {
        Self {
            observer: Some(PolicyObserver {
                backend,
                endpoint_name: endpoint_name.to_string(),
                seen: Mutex::new(Vec::new()),
            }),
            ..Self::new(address)
        }
    }

    pub(crate) fn calls(&self) -> Vec<AgentCall> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Makes `delete_nic` report the NIC as already gone.
    pub(crate) fn set_nic_missing(&self) {
        self.nic_missing.store(true, Ordering::SeqCst);
    }

    pub(crate) fn set_fail_modify(&self) {
        self.fail_modify.store(true, Ordering::SeqCst);
    }

    /// Makes `close` report an error after closing.
    pub(crate) fn set_fail_close(&self) {
        self.fail_close.store(true, Ordering::SeqCst);
    }

    /// Host IOV policy observed at each `modify_nic` call.
    pub(crate) fn observed_policies(&self) -> Vec<Option<IovPolicy>> {
        self.observer
            .as_ref()
            .map(|o| o.seen.lock().unwrap().clone())
            .unwrap_or_default()
    }

    fn record(&self, call: AgentCall) -> Result<(), AgentError> {
        if self.is_closed() {
            return Err(AgentError::Closed);
        }
        self.calls.lock().unwrap().push(call);
        Ok(())
    }
}

#[async_trait]
impl ComputeAgent for MockAgent {
    fn address(&self) -> &str {
        &self.address
    }

    async fn add_nic(&self, request: AddNicInternalRequest) -> Result<(), AgentError> {
        self.record(AgentCall::AddNic {
            container_id: request.container_id,
            nic_id: request.nic_id,
            type_url: request.endpoint.map(|e| e.type_url).unwrap_or_default(),
        })
    }

    async fn modify_nic(&self, request: ModifyNicInternalRequest) -> Result<(), AgentError> {
        if let Some(observer) = &self.observer {
            let policy = observer
                .backend
                .get_endpoint_by_name(&observer.endpoint_name)
                .await
                .ok()
                .and_then(|ep| ep.iov_policy());
            observer.seen.lock().unwrap().push(policy);
        }
        self.record(AgentCall::ModifyNic {
            nic_id: request.nic_id,
            offload_weight: request
                .iov_policy_settings
                .map(|s| s.iov_offload_weight)
                .unwrap_or_default(),
        })?;
        if self.fail_modify.load(Ordering::SeqCst) {
            return Err(AgentError::Rpc(tonic::Status::internal("modify rejected")));
        }
        Ok(())
    }

    async fn delete_nic(&self, request: DeleteNicInternalRequest) -> Result<(), AgentError> {
        if self.nic_missing.load(Ordering::SeqCst) {
            return Err(AgentError::NotFound(format!("nic {}", request.nic_id)));
        }
        self.record(AgentCall::DeleteNic {
            container_id: request.container_id,
            nic_id: request.nic_id,
        })
    }

    async fn assign_pci(&self, request: AssignPciInternalRequest) -> Result<String, AgentError> {
        let id = format!("{}-vf{}", request.device_id, request.virtual_function_index);
        self.record(AgentCall::AssignPci {
            container_id: request.container_id,
            device_id: request.device_id,
            virtual_function_index: request.virtual_function_index,
        })?;
        Ok(id)
    }

    async fn remove_pci(&self, request: RemovePciInternalRequest) -> Result<(), AgentError> {
        self.record(AgentCall::RemovePci {
            container_id: request.container_id,
            device_id: request.device_id,
        })
    }

    async fn close(&self) -> Result<(), AgentError> {
        self.closed.store(true, Ordering::SeqCst);
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(AgentError::Rpc(tonic::Status::unavailable("transport already gone")));
        }
        Ok(())
    }
}

/// Hands out a fresh [`MockAgent`] per dial, except for addresses marked as
/// unreachable.
#[derive(Default)]
pub(crate) struct MockDialer {
    unreachable: Mutex<HashSet<String>>,
    dialed: Mutex<Vec<Arc<MockAgent>>>,
}

impl MockDialer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_unreachable(&self, address: &str) {
        self.unreachable.lock().unwrap().insert(address.to_string());
    }

    /// Every connection opened to `address`, oldest first.
    pub(crate) fn agents_for(&self, address: &str) -> Vec<Arc<MockAgent>> {
        self.dialed
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.address == address)
            .cloned()
            .collect()
    }

    pub(crate) fn dial_count(&self) -> usize {
        self.dialed.lock().unwrap().len()
    }
}

#[async_trait]
impl AgentDialer for MockDialer {
    async fn dial(&self, address: &str) -> Result<Arc<dyn ComputeAgent>, AgentError> {
        if self.unreachable.lock().unwrap().contains(address) {
            return Err(AgentError::Dial {
                address: address.to_string(),
                source: "connection refused".into(),
            });
        }
        let agent = Arc::new(MockAgent::new(address));
        self.dialed.lock().unwrap().push(agent.clone());
        Ok(agent)
    }
}
