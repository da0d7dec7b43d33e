use super::{Database, StoreError, StoreResult};
use crate::models::{CustomEndpoint, CustomNetwork, EndpointResource, NetworkResource};
use sled::transaction::{ConflictableTransactionError, TransactionError};

pub const NETWORK_NAMESPACE: &str = "v1/networking/networks";
pub const ENDPOINT_NAMESPACE: &str = "v1/networking/endpoints";

/// Persisted custom networks and endpoints, keyed by name.
///
/// Values are stored as the JSON tagged union of [`NetworkResource`] and
/// [`EndpointResource`] so the on-disk record names its backend kind.
#[derive(Clone, Debug)]
pub struct NetworkingStore {
    db: Database,
}

impl NetworkingStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn create_network(&self, network: &CustomNetwork) -> StoreResult<()> {
        let value = serde_json::to_vec(&NetworkResource::Custom(network.clone()))?;
        self.insert_new(NETWORK_NAMESPACE, &network.name, value)
            .await
    }

    pub async fn get_network(&self, name: &str) -> StoreResult<CustomNetwork> {
        let tree = self.db.require_tree(NETWORK_NAMESPACE)?;
        let value = tree
            .get(name.as_bytes())?
            .ok_or_else(|| StoreError::key_not_found(NETWORK_NAMESPACE, name))?;
        decode_network(name, &value)
    }

    pub async fn delete_network(&self, name: &str) -> StoreResult<()> {
        self.remove(NETWORK_NAMESPACE, name).await
    }

    pub async fn list_networks(&self) -> StoreResult<Vec<CustomNetwork>> {
        let tree = self.db.require_tree(NETWORK_NAMESPACE)?;
        let mut networks = Vec::new();
        for entry in tree.iter() {
            let (key, value) = entry?;
            networks.push(decode_network(&String::from_utf8_lossy(&key), &value)?);
        }
        Ok(networks)
    }

    pub async fn create_endpoint(&self, endpoint: &CustomEndpoint) -> StoreResult<()> {
        let value = serde_json::to_vec(&EndpointResource::Custom(endpoint.clone()))?;
        self.insert_new(ENDPOINT_NAMESPACE, &endpoint.name, value)
            .await
    }

    pub async fn get_endpoint(&self, name: &str) -> StoreResult<CustomEndpoint> {
        let tree = self.db.require_tree(ENDPOINT_NAMESPACE)?;
        let value = tree
            .get(name.as_bytes())?
            .ok_or_else(|| StoreError::key_not_found(ENDPOINT_NAMESPACE, name))?;
        decode_endpoint(name, &value)
    }

    /// Replaces an existing endpoint record. Fails with `KeyNotFound` if the
    /// endpoint was deleted concurrently.
    pub async fn update_endpoint(&self, endpoint: &CustomEndpoint) -> StoreResult<()> {
        let tree = self.db.require_tree(ENDPOINT_NAMESPACE)?;
        let key = endpoint.name.as_bytes();
        let value = serde_json::to_vec(&EndpointResource::Custom(endpoint.clone()))?;

        tree.transaction(|tx| {
            if tx.get(key)?.is_none() {
                return Err(ConflictableTransactionError::Abort(
                    StoreError::key_not_found(ENDPOINT_NAMESPACE, &endpoint.name),
                ));
            }
            tx.insert(key, value.clone())?;
            Ok(())
        })
        .map_err(|e| match e {
            TransactionError::Abort(e) => e,
            TransactionError::Storage(e) => StoreError::Storage(e),
        })?;

        tree.flush_async().await?;
        Ok(())
    }

    pub async fn delete_endpoint(&self, name: &str) -> StoreResult<()> {
        self.remove(ENDPOINT_NAMESPACE, name).await
    }

    pub async fn list_endpoints(&self) -> StoreResult<Vec<CustomEndpoint>> {
        let tree = self.db.require_tree(ENDPOINT_NAMESPACE)?;
        let mut endpoints = Vec::new();
        for entry in tree.iter() {
            let (key, value) = entry?;
            endpoints.push(decode_endpoint(&String::from_utf8_lossy(&key), &value)?);
        }
        Ok(endpoints)
    }

    async fn insert_new(&self, namespace: &str, key: &str, value: Vec<u8>) -> StoreResult<()> {
        let tree = self.db.tree(namespace)?;
        if tree
            .compare_and_swap(key.as_bytes(), None::<&[u8]>, Some(value))?
            .is_err()
        {
            return Err(StoreError::AlreadyExists {
                namespace: namespace.to_string(),
                key: key.to_string(),
            });
        }
        tree.flush_async().await?;
        Ok(())
    }

    async fn remove(&self, namespace: &str, key: &str) -> StoreResult<()> {
        let tree = self.db.require_tree(namespace)?;
        tree.remove(key.as_bytes())?
            .ok_or_else(|| StoreError::key_not_found(namespace, key))?;
        tree.flush_async().await?;
        Ok(())
    }
}

fn decode_network(key: &str, value: &[u8]) -> StoreResult<CustomNetwork> {
    match serde_json::from_slice(value)? {
        NetworkResource::Custom(network) => Ok(network),
        other => Err(StoreError::Corrupt {
            key: key.to_string(),
            reason: format!("unexpected {} network in networking store", other.backend_kind()),
        }),
    }
}

fn decode_endpoint(key: &str, value: &[u8]) -> StoreResult<CustomEndpoint> {
    match serde_json::from_slice(value)? {
        EndpointResource::Custom(endpoint) => Ok(endpoint),
        other => Err(StoreError::Corrupt {
            key: key.to_string(),
            reason: format!("unexpected {} endpoint in networking store", other.backend_kind()),
        }),
    }
}
