//! gRPC services
//!
//! This module provides:
//! - [`ControlService`], the `ncproxygrpc.v1` control surface
//! - [`V0Service`], the legacy `ncproxygrpc.v0` surface, translated onto v1
//! - [`AgentManagementService`], the `ncproxyinternal` surface used by agents
//!
//! Each service keeps its logic in inherent methods returning [`ProxyError`];
//! the generated trait impls only add metrics and convert to `tonic::Status`.

mod control;
mod convert;
mod management;
mod v0;


pub use control::ControlService;
pub use management::{AgentManagementService, CONFIGURE_NETWORKING_TIMEOUT};
pub use v0::V0Service;

use crate::agent::AgentError;
use crate::error::ProxyError;
use crate::observability::ProxyMetrics;
use std::time::Instant;
use tonic::{Response, Status};
use tracing::{debug, warn};

pub(crate) const SURFACE_V1: &str = "v1";
pub(crate) const SURFACE_V0: &str = "v0";
pub(crate) const SURFACE_AGENT: &str = "agent";

/// Records the outcome of one request and turns it into a gRPC reply.
pub(crate) fn respond<T>(
    metrics: &ProxyMetrics,
    surface: &'static str,
    method: &'static str,
    started: Instant,
    result: Result<T, ProxyError>,
) -> Result<Response<T>, Status> {
    let elapsed = started.elapsed();
    match result {
        Ok(reply) => {
            metrics.observe_rpc(surface, method, tonic::Code::Ok, elapsed);
            debug!(surface, method, elapsed_ms = elapsed.as_millis() as u64, "Request completed");
            Ok(Response::new(reply))
        }
        Err(err) => {
            let status = Status::from(err);
            metrics.observe_rpc(surface, method, status.code(), elapsed);
            warn!(surface, method, code = ?status.code(), error = %status.message(), "Request failed");
            Err(status)
        }
    }
}

/// Maps a compute agent failure onto the proxy's error kinds.
pub(crate) fn agent_failure(context: impl Into<String>, err: AgentError) -> ProxyError {
    match err {
        AgentError::Rpc(status) => ProxyError::Remote(status),
        AgentError::NotFound(_) => ProxyError::not_found(format!("{}: {err}", context.into())),
        other => ProxyError::internal(context, other),
    }
}
