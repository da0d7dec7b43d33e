use super::{Database, StoreError, StoreResult};
use std::collections::HashMap;

pub const COMPUTE_AGENT_NAMESPACE: &str = "v1/computeagent";

/// Persisted mapping of workload ID to compute agent address
#[derive(Clone, Debug)]
pub struct ComputeAgentStore {
    db: Database,
}

impl ComputeAgentStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Inserts or overwrites the address registered for `container_id`.
    pub async fn update(&self, container_id: &str, address: &str) -> StoreResult<()> {
        let tree = self.db.tree(COMPUTE_AGENT_NAMESPACE)?;
        tree.insert(container_id.as_bytes(), address.as_bytes())?;
        tree.flush_async().await?;
        Ok(())
    }

    pub async fn get(&self, container_id: &str) -> StoreResult<String> {
        let tree = self.db.require_tree(COMPUTE_AGENT_NAMESPACE)?;
        let value = tree
            .get(container_id.as_bytes())?
            .ok_or_else(|| StoreError::key_not_found(COMPUTE_AGENT_NAMESPACE, container_id))?;
        decode_address(container_id, &value)
    }

    /// Removes the registration for `container_id`. Fails with `KeyNotFound`
    /// when there was none.
    pub async fn delete(&self, container_id: &str) -> StoreResult<()> {
        let tree = self.db.require_tree(COMPUTE_AGENT_NAMESPACE)?;
        tree.remove(container_id.as_bytes())?
            .ok_or_else(|| StoreError::key_not_found(COMPUTE_AGENT_NAMESPACE, container_id))?;
        tree.flush_async().await?;
        Ok(())
    }

    /// Every registration, keyed by workload ID.
    pub async fn list_all(&self) -> StoreResult<HashMap<String, String>> {
        let tree = self.db.require_tree(COMPUTE_AGENT_NAMESPACE)?;
        let mut agents = HashMap::new();
        for entry in tree.iter() {
            let (key, value) = entry?;
            let container_id = String::from_utf8(key.to_vec()).map_err(|e| StoreError::Corrupt {
                key: String::from_utf8_lossy(&key).into_owned(),
                reason: e.to_string(),
            })?;
            let address = decode_address(&container_id, &value)?;
            agents.insert(container_id, address);
        }
        Ok(agents)
    }
}

fn decode_address(container_id: &str, value: &[u8]) -> StoreResult<String> {
    String::from_utf8(value.to_vec()).map_err(|e| StoreError::Corrupt {
        key: container_id.to_string(),
        reason: e.to_string(),
    })
}
