//! Compute agent connections
//!
//! This module provides:
//! - The [`ComputeAgent`] client interface and its gRPC implementation over
//!   a Unix domain socket
//! - [`AgentDialer`] for opening new agent connections
//! - The in-memory [`ComputeAgentCache`] of live connections

mod cache;
mod client;

#[cfg(test)]
pub(crate) mod mock;
#[cfg(test)]
mod tests;

pub use cache::{CacheError, ComputeAgentCache};
pub use client::{GrpcComputeAgent, UdsDialer, DEFAULT_DIAL_TIMEOUT};

use crate::proto::computeagent::{
    AddNicInternalRequest, AssignPciInternalRequest, DeleteNicInternalRequest,
    ModifyNicInternalRequest, RemovePciInternalRequest,
};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("failed to connect to compute agent at {address:?}: {source}")]
    Dial {
        address: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The agent reported that the NIC or its network namespace is gone.
    #[error("NIC or network namespace not found: {0}")]
    NotFound(String),

    #[error("compute agent connection is closed")]
    Closed,

    #[error("compute agent call failed: {0}")]
    Rpc(#[from] tonic::Status),
}

/// Handle to one compute agent
#[async_trait]
pub trait ComputeAgent: Send + Sync + std::fmt::Debug {
    /// Address the connection was dialed on.
    fn address(&self) -> &str;

    async fn add_nic(&self, request: AddNicInternalRequest) -> Result<(), AgentError>;

    async fn modify_nic(&self, request: ModifyNicInternalRequest) -> Result<(), AgentError>;

    async fn delete_nic(&self, request: DeleteNicInternalRequest) -> Result<(), AgentError>;

    /// Assigns a passthrough device and returns the agent's ID for it.
    async fn assign_pci(&self, request: AssignPciInternalRequest) -> Result<String, AgentError>;

    async fn remove_pci(&self, request: RemovePciInternalRequest) -> Result<(), AgentError>;

    /// Releases the connection. Calls made after closing fail with
    /// [`AgentError::Closed`].
    async fn close(&self) -> Result<(), AgentError>;
}

/// Opens connections to compute agents
#[async_trait]
pub trait AgentDialer: Send + Sync {
    async fn dial(&self, address: &str) -> Result<Arc<dyn ComputeAgent>, AgentError>;
}
