//! Persistent storage for agent registrations and custom network resources
//!
//! Both stores share one sled database. Each store owns one or more trees,
//! named after a versioned namespace such as `v1/computeagent`. A namespace
//! that has never been written to is reported as
//! [`StoreError::NamespaceNotFound`], which callers listing resources treat as
//! "empty".

mod agents;
mod database;
mod networking;

#[cfg(test)]
mod tests;

pub use agents::{ComputeAgentStore, COMPUTE_AGENT_NAMESPACE};
pub use database::Database;
pub use networking::{NetworkingStore, ENDPOINT_NAMESPACE, NETWORK_NAMESPACE};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("namespace {0:?} not found")]
    NamespaceNotFound(String),

    #[error("key {key:?} not found in namespace {namespace:?}")]
    KeyNotFound { namespace: String, key: String },

    #[error("key {key:?} already exists in namespace {namespace:?}")]
    AlreadyExists { namespace: String, key: String },

    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("failed to encode or decode stored value: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("corrupt value for key {key:?}: {reason}")]
    Corrupt { key: String, reason: String },
}

impl StoreError {
    /// True for both a missing key and a missing namespace.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StoreError::NamespaceNotFound(_) | StoreError::KeyNotFound { .. }
        )
    }

    pub(crate) fn key_not_found(namespace: &str, key: &str) -> Self {
        StoreError::KeyNotFound {
            namespace: namespace.to_string(),
            key: key.to_string(),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
