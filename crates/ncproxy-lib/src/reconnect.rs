//! Startup reconnection and shutdown disconnection of compute agents
//!
//! On startup every registration persisted in the [`ComputeAgentStore`] is
//! dialed again, one task per registration, and the servers are only started
//! once every attempt has finished. A registration whose agent cannot be
//! reached is dropped from the store.

use crate::agent::{AgentDialer, CacheError, ComputeAgentCache};
use crate::store::{ComputeAgentStore, StoreError};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Outcome of a reconnection pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconnectSummary {
    pub reconnected: usize,
    pub failed: usize,
}

enum Outcome {
    Reconnected,
    Failed,
}

/// Re-dials every persisted compute agent and repopulates `cache`.
///
/// Never fails: store errors are logged and treated as "nothing to reconnect",
/// and individual dial failures only remove the stale registration.
pub async fn reconnect_compute_agents(
    store: &ComputeAgentStore,
    cache: &Arc<ComputeAgentCache>,
    dialer: &Arc<dyn AgentDialer>,
) -> ReconnectSummary {
    let registrations = match store.list_all().await {
        Ok(registrations) => registrations,
        Err(StoreError::NamespaceNotFound(_)) => {
            info!("No compute agent registrations to reconnect");
            return ReconnectSummary::default();
        }
        Err(e) => {
            error!(error = %e, "Failed to list compute agent registrations");
            return ReconnectSummary::default();
        }
    };

    let mut tasks = JoinSet::new();
    for (container_id, address) in registrations {
        let store = store.clone();
        let cache = cache.clone();
        let dialer = dialer.clone();

        tasks.spawn(async move {
            let agent = match dialer.dial(&address).await {
                Ok(agent) => agent,
                Err(e) => {
                    error!(
                        container_id = %container_id,
                        agent_address = %address,
                        error = %e,
                        "Failed to reconnect to compute agent, removing registration"
                    );
                    if let Err(e) = store.delete(&container_id).await {
                        warn!(container_id = %container_id, error = %e, "Failed to delete stale compute agent registration");
                    }
                    return Outcome::Failed;
                }
            };

            match cache.put(container_id.clone(), agent.clone()).await {
                Ok(_) => {
                    info!(container_id = %container_id, agent_address = %address, "Reconnected to compute agent");
                    Outcome::Reconnected
                }
                Err(e) => {
                    warn!(container_id = %container_id, error = %e, "Failed to cache reconnected compute agent");
                    if let Err(e) = agent.close().await {
                        warn!(agent_address = %address, error = %e, "Failed to close compute agent connection");
                    }
                    Outcome::Failed
                }
            }
        });
    }

    let mut summary = ReconnectSummary::default();
    while let Some(result) = tasks.join_next().await {
        match result {
            Ok(Outcome::Reconnected) => summary.reconnected += 1,
            Ok(Outcome::Failed) => summary.failed += 1,
            Err(e) => {
                error!(error = %e, "Compute agent reconnect task panicked");
                summary.failed += 1;
            }
        }
    }
    summary
}

/// Drains the cache and closes every connection. Close failures are logged
/// and otherwise ignored.
pub async fn disconnect_compute_agents(cache: &ComputeAgentCache) -> Result<usize, CacheError> {
    let agents = cache.drain_all().await?;
    let count = agents.len();
    for agent in agents {
        if let Err(e) = agent.close().await {
            error!(agent_address = %agent.address(), error = %e, "Failed to close compute agent connection");
        }
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::mock::MockDialer;
    use crate::store::Database;
    use tempfile::TempDir;

    fn setup() -> (TempDir, ComputeAgentStore, Arc<ComputeAgentCache>, Arc<MockDialer>) {
        let dir = TempDir::new().unwrap();
        let db = Database::open(dir.path().join("networkproxy.db")).unwrap();
        (
            dir,
            ComputeAgentStore::new(db),
            Arc::new(ComputeAgentCache::new()),
            Arc::new(MockDialer::new()),
        )
    }

    #[tokio::test]
    async fn test_reconnect_with_empty_store() {
        let (_dir, store, cache, dialer) = setup();
        let dyn_dialer: Arc<dyn AgentDialer> = dialer.clone();

        let summary = reconnect_compute_agents(&store, &cache, &dyn_dialer).await;

        assert_eq!(summary, ReconnectSummary::default());
        assert_eq!(dialer.dial_count(), 0);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_reconnect_drops_unreachable_agents() {
        let (_dir, store, cache, dialer) = setup();
        for i in 0..5 {
            store.update(&format!("c{i}"), &format!("A{i}")).await.unwrap();
        }
        dialer.set_unreachable("A1");
        dialer.set_unreachable("A3");
        let dyn_dialer: Arc<dyn AgentDialer> = dialer.clone();

        let summary = reconnect_compute_agents(&store, &cache, &dyn_dialer).await;

        assert_eq!(summary.reconnected, 3);
        assert_eq!(summary.failed, 2);
        assert_eq!(cache.len().await, 3);

        let remaining = store.list_all().await.unwrap();
        assert_eq!(remaining.len(), 3);
        assert!(!remaining.contains_key("c1"));
        assert!(!remaining.contains_key("c3"));
        assert_eq!(cache.get("c4").await.unwrap().unwrap().address(), "A4");
        assert!(cache.get("c1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_disconnect_closes_every_agent() {
        let (_dir, store, cache, dialer) = setup();
        store.update("c1", "A1").await.unwrap();
        store.update("c2", "A2").await.unwrap();
        let dyn_dialer: Arc<dyn AgentDialer> = dialer.clone();
        reconnect_compute_agents(&store, &cache, &dyn_dialer).await;

        let closed = disconnect_compute_agents(&cache).await.unwrap();

        assert_eq!(closed, 2);
        assert!(dialer.agents_for("A1")[0].is_closed());
        assert!(dialer.agents_for("A2")[0].is_closed());
        assert_eq!(
            disconnect_compute_agents(&cache).await.unwrap_err(),
            CacheError::Drained
        );
        // Registrations survive a clean shutdown.
        assert_eq!(store.list_all().await.unwrap().len(), 2);
    }
}
