//! Observability for the proxy daemon
//!
//! Provides:
//! - Prometheus metrics (RPC counts and latency, registered agents, reconnect outcomes)
//! - Structured lifecycle events through tracing

use crate::reconnect::ReconnectSummary;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, HistogramVec,
    IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{info, warn};

/// RPC latency buckets, in seconds
const LATENCY_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0, 30.0,
];

static GLOBAL_METRICS: OnceLock<ProxyMetricsInner> = OnceLock::new();

struct ProxyMetricsInner {
    rpc_requests_total: IntCounterVec,
    rpc_latency_seconds: HistogramVec,
    compute_agents_registered: IntGauge,
    reconnect_results_total: IntCounterVec,
}

impl ProxyMetricsInner {
    fn new() -> Self {
        Self {
            rpc_requests_total: register_int_counter_vec!(
                "ncproxy_rpc_requests_total",
                "RPC requests handled, by surface, method and status code",
                &["surface", "method", "code"]
            )
            .expect("Failed to register rpc_requests_total"),

            rpc_latency_seconds: register_histogram_vec!(
                "ncproxy_rpc_latency_seconds",
                "Time spent handling an RPC request",
                &["surface", "method"],
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register rpc_latency_seconds"),

            compute_agents_registered: register_int_gauge!(
                "ncproxy_compute_agents_registered",
                "Compute agents with a live connection"
            )
            .expect("Failed to register compute_agents_registered"),

            reconnect_results_total: register_int_counter_vec!(
                "ncproxy_reconnect_results_total",
                "Compute agent reconnection attempts at startup, by result",
                &["result"]
            )
            .expect("Failed to register reconnect_results_total"),
        }
    }
}

/// Handle to the process-wide proxy metrics. Clones share the same
/// registered collectors.
#[derive(Clone)]
pub struct ProxyMetrics {
    _private: (),
}

impl Default for ProxyMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProxyMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyMetrics").finish_non_exhaustive()
    }
}

impl ProxyMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ProxyMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ProxyMetricsInner {
        GLOBAL_METRICS.get_or_init(ProxyMetricsInner::new)
    }

    /// Counts one finished request and records its latency.
    pub fn observe_rpc(&self, surface: &str, method: &str, code: tonic::Code, elapsed: Duration) {
        let inner = self.inner();
        inner
            .rpc_requests_total
            .with_label_values(&[surface, method, code_label(code)])
            .inc();
        inner
            .rpc_latency_seconds
            .with_label_values(&[surface, method])
            .observe(elapsed.as_secs_f64());
    }

    pub fn set_compute_agents_registered(&self, count: usize) {
        self.inner()
            .compute_agents_registered
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    pub fn record_reconnect(&self, summary: &ReconnectSummary) {
        let counter = &self.inner().reconnect_results_total;
        counter
            .with_label_values(&["reconnected"])
            .inc_by(summary.reconnected as u64);
        counter
            .with_label_values(&["failed"])
            .inc_by(summary.failed as u64);
    }
}

fn code_label(code: tonic::Code) -> &'static str {
    match code {
        tonic::Code::Ok => "ok",
        tonic::Code::InvalidArgument => "invalid_argument",
        tonic::Code::NotFound => "not_found",
        tonic::Code::AlreadyExists => "already_exists",
        tonic::Code::FailedPrecondition => "failed_precondition",
        tonic::Code::Unimplemented => "unimplemented",
        tonic::Code::DeadlineExceeded => "deadline_exceeded",
        tonic::Code::Unavailable => "unavailable",
        tonic::Code::Internal => "internal",
        _ => "other",
    }
}

/// Lifecycle events in a consistent shape
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    pub fn log_startup(&self, version: &str, control_addr: &str, agent_socket: &str) {
        info!(
            event = "proxy_started",
            node = %self.node_name,
            proxy_version = %version,
            control_addr = %control_addr,
            agent_socket = %agent_socket,
            "Network config proxy started"
        );
    }

    pub fn log_reconnect(&self, summary: &ReconnectSummary) {
        if summary.failed > 0 {
            warn!(
                event = "agents_reconnected",
                node = %self.node_name,
                reconnected = summary.reconnected,
                failed = summary.failed,
                "Reconnected compute agents, some registrations were dropped"
            );
        } else {
            info!(
                event = "agents_reconnected",
                node = %self.node_name,
                reconnected = summary.reconnected,
                "Reconnected compute agents"
            );
        }
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "proxy_shutdown",
            node = %self.node_name,
            reason = %reason,
            "Network config proxy shutting down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_can_be_recorded() {
        let metrics = ProxyMetrics::new();
        let again = ProxyMetrics::new();

        metrics.observe_rpc("v1", "AddNIC", tonic::Code::Ok, Duration::from_millis(3));
        again.observe_rpc("v1", "AddNIC", tonic::Code::NotFound, Duration::from_millis(1));
        metrics.set_compute_agents_registered(4);
        metrics.record_reconnect(&ReconnectSummary {
            reconnected: 2,
            failed: 1,
        });

        let families = prometheus::gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "ncproxy_rpc_requests_total"));
    }

    #[test]
    fn test_code_labels() {
        assert_eq!(code_label(tonic::Code::FailedPrecondition), "failed_precondition");
        assert_eq!(code_label(tonic::Code::Aborted), "other");
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("node-1");
        assert_eq!(logger.node_name, "node-1");
    }
}
