//! Tests for the compute agent cache

use super::mock::MockAgent;
use super::*;

fn agent(address: &str) -> Arc<dyn ComputeAgent> {
    Arc::new(MockAgent::new(address))
}

#[tokio::test]
async fn test_put_then_get() {
    let cache = ComputeAgentCache::new();
    cache.put("c1", agent("A1")).await.unwrap();

    let found = cache.get("c1").await.unwrap().unwrap();
    assert_eq!(found.address(), "A1");
    assert!(cache.get("c2").await.unwrap().is_none());
}

#[tokio::test]
async fn test_put_overwrites_existing_entry() {
    let cache = ComputeAgentCache::new();
    assert!(cache.put("c1", agent("A1")).await.unwrap().is_none());

    let replaced = cache.put("c1", agent("A2")).await.unwrap().unwrap();
    assert_eq!(replaced.address(), "A1");
    assert_eq!(cache.get("c1").await.unwrap().unwrap().address(), "A2");
    assert_eq!(cache.len().await, 1);
}

#[tokio::test]
async fn test_get_and_delete_removes_entry() {
    let cache = ComputeAgentCache::new();
    cache.put("c1", agent("A1")).await.unwrap();

    let removed = cache.get_and_delete("c1").await.unwrap().unwrap();
    assert_eq!(removed.address(), "A1");
    assert!(cache.get("c1").await.unwrap().is_none());
    assert!(cache.get_and_delete("c1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_drain_all_returns_every_agent_once() {
    let cache = ComputeAgentCache::new();
    cache.put("c1", agent("A1")).await.unwrap();
    cache.put("c2", agent("A2")).await.unwrap();

    let mut drained: Vec<String> = cache
        .drain_all()
        .await
        .unwrap()
        .iter()
        .map(|a| a.address().to_string())
        .collect();
    drained.sort();
    assert_eq!(drained, vec!["A1", "A2"]);

    assert_eq!(cache.drain_all().await.unwrap_err(), CacheError::Drained);
}

#[tokio::test]
async fn test_operations_after_drain_fail() {
    let cache = ComputeAgentCache::new();
    cache.drain_all().await.unwrap();

    assert_eq!(
        cache.put("c1", agent("A1")).await.unwrap_err(),
        CacheError::Drained
    );
    assert_eq!(cache.get("c1").await.unwrap_err(), CacheError::Drained);
    assert_eq!(
        cache.get_and_delete("c1").await.unwrap_err(),
        CacheError::Drained
    );
    assert!(cache.is_empty().await);
}

#[tokio::test]
async fn test_concurrent_puts() {
    let cache = Arc::new(ComputeAgentCache::new());
    let mut handles = Vec::new();

    for i in 0..32 {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move {
            cache
                .put(format!("c{i}"), agent(&format!("A{i}")))
                .await
                .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(cache.len().await, 32);
    assert_eq!(cache.get("c7").await.unwrap().unwrap().address(), "A7");
}

#[tokio::test]
async fn test_closed_mock_agent_rejects_calls() {
    let mock = Arc::new(MockAgent::new("A1"));
    mock.close().await.unwrap();

    let err = mock
        .remove_pci(crate::proto::computeagent::RemovePciInternalRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::Closed));
}
