//! Live compute agent connections keyed by workload ID

use super::ComputeAgent;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("compute agent cache has already been drained")]
    Drained,
}

/// Concurrency-safe map of workload ID to agent connection.
///
/// Once [`drain_all`](Self::drain_all) has run the cache is permanently
/// drained, and every later call fails with [`CacheError::Drained`]. The lock
/// is only held for the map access itself, never across an agent call.
pub struct ComputeAgentCache {
    // `None` once drained
    agents: RwLock<Option<HashMap<String, Arc<dyn ComputeAgent>>>>,
}

impl Default for ComputeAgentCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ComputeAgentCache {
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(Some(HashMap::new())),
        }
    }

    /// Stores `agent` under `container_id`, returning the connection it
    /// replaced, if any.
    pub async fn put(
        &self,
        container_id: impl Into<String>,
        agent: Arc<dyn ComputeAgent>,
    ) -> Result<Option<Arc<dyn ComputeAgent>>, CacheError> {
        let mut guard = self.agents.write().await;
        let agents = guard.as_mut().ok_or(CacheError::Drained)?;
        Ok(agents.insert(container_id.into(), agent))
    }

    /// `Ok(None)` means no agent is registered for `container_id`.
    pub async fn get(&self, container_id: &str) -> Result<Option<Arc<dyn ComputeAgent>>, CacheError> {
        let guard = self.agents.read().await;
        let agents = guard.as_ref().ok_or(CacheError::Drained)?;
        Ok(agents.get(container_id).cloned())
    }

    /// Atomically removes and returns the agent for `container_id`.
    pub async fn get_and_delete(
        &self,
        container_id: &str,
    ) -> Result<Option<Arc<dyn ComputeAgent>>, CacheError> {
        let mut guard = self.agents.write().await;
        let agents = guard.as_mut().ok_or(CacheError::Drained)?;
        Ok(agents.remove(container_id))
    }

    /// Empties the cache for good and hands back every connection exactly
    /// once. A second call fails with [`CacheError::Drained`].
    pub async fn drain_all(&self) -> Result<Vec<Arc<dyn ComputeAgent>>, CacheError> {
        let mut guard = self.agents.write().await;
        let agents = guard.take().ok_or(CacheError::Drained)?;
        Ok(agents.into_values().collect())
    }

    /// Number of live connections. A drained cache holds none.
    pub async fn len(&self) -> usize {
        self.agents.read().await.as_ref().map_or(0, HashMap::len)
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
