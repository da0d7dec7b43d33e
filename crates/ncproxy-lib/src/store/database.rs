use super::{StoreError, StoreResult};
use std::path::Path;
use tracing::{debug, info};

/// Handle to the proxy database. Cloning is cheap and shares the same
/// underlying database.
#[derive(Clone, Debug)]
pub struct Database {
    db: sled::Db,
}

impl Database {
    /// Opens or creates the database at `path`, creating parent directories
    /// as needed.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Storage(e.into()))?;
        }

        let db = sled::open(path)?;
        info!(path = %path.display(), recovered = db.was_recovered(), "Opened proxy database");
        Ok(Self { db })
    }

    /// Returns the tree for `namespace` only if it was created before.
    pub(crate) fn existing_tree(&self, namespace: &str) -> StoreResult<Option<sled::Tree>> {
        let exists = self
            .db
            .tree_names()
            .iter()
            .any(|name| name.as_ref() == namespace.as_bytes());
        if !exists {
            return Ok(None);
        }
        Ok(Some(self.db.open_tree(namespace)?))
    }

    /// Like [`existing_tree`](Self::existing_tree), but a missing namespace is
    /// an error.
    pub(crate) fn require_tree(&self, namespace: &str) -> StoreResult<sled::Tree> {
        self.existing_tree(namespace)?
            .ok_or_else(|| StoreError::NamespaceNotFound(namespace.to_string()))
    }

    /// Opens the tree for `namespace`, creating it if needed.
    pub(crate) fn tree(&self, namespace: &str) -> StoreResult<sled::Tree> {
        Ok(self.db.open_tree(namespace)?)
    }

    /// Flushes every pending write to disk.
    pub async fn flush(&self) -> StoreResult<()> {
        let bytes = self.db.flush_async().await?;
        debug!(bytes, "Flushed proxy database");
        Ok(())
    }

    /// Flushes and releases this handle.
    pub async fn close(self) -> StoreResult<()> {
        self.flush().await?;
        info!("Closed proxy database");
        Ok(())
    }
}
