//! Network configuration proxy library
//!
//! This crate provides the core functionality for:
//! - Tracking compute agents per workload, in memory and on disk
//! - Creating networks and endpoints on the host network backend or in the
//!   proxy's own store
//! - Forwarding NIC and device requests to compute agents
//! - Serving the control and agent-management gRPC surfaces
//! - Health checks and observability

pub mod agent;
pub mod error;
pub mod health;
pub mod hns;
pub mod models;
pub mod nodenet;
pub mod observability;
pub mod proto;
pub mod reconnect;
pub mod resources;
pub mod server;
pub mod service;
pub mod store;

pub use error::{ErrorKind, ProxyError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use observability::{ProxyMetrics, StructuredLogger};
pub use server::{ProxyServer, RunningServer, ServerConfig};
