//! Tests for the compute agent and networking stores

use super::*;
use crate::models::{CustomEndpoint, CustomNetwork, PciDeviceDetails};
use tempfile::TempDir;

fn open_db() -> (TempDir, Database) {
    let dir = TempDir::new().unwrap();
    let db = Database::open(dir.path().join("networkproxy.db")).unwrap();
    (dir, db)
}

fn endpoint(name: &str) -> CustomEndpoint {
    CustomEndpoint {
        name: name.to_string(),
        mac_address: "00-15-5D-52-C0-00".to_string(),
        ip_address: "192.168.0.4".to_string(),
        prefix_length: 24,
        network_name: "net0".to_string(),
        default_gateway: "192.168.0.1".to_string(),
        device_details: Some(PciDeviceDetails {
            device_id: "PCI\\VEN_15B3".to_string(),
            virtual_function_index: 1,
        }),
        namespace_id: String::new(),
    }
}

mod compute_agent_store_tests {
    use super::*;

    #[tokio::test]
    async fn test_update_then_get() {
        let (_dir, db) = open_db();
        let store = ComputeAgentStore::new(db);

        store.update("c1", "/run/agent-c1.sock").await.unwrap();
        assert_eq!(store.get("c1").await.unwrap(), "/run/agent-c1.sock");
    }

    #[tokio::test]
    async fn test_update_overwrites_address() {
        let (_dir, db) = open_db();
        let store = ComputeAgentStore::new(db);

        store.update("c1", "A1").await.unwrap();
        store.update("c1", "A2").await.unwrap();

        assert_eq!(store.get("c1").await.unwrap(), "A2");
        assert_eq!(store.list_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_then_get_is_not_found() {
        let (_dir, db) = open_db();
        let store = ComputeAgentStore::new(db);

        store.update("c1", "A1").await.unwrap();
        store.delete("c1").await.unwrap();

        let err = store.get("c1").await.unwrap_err();
        assert!(matches!(err, StoreError::KeyNotFound { .. }));
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_delete_missing_key_is_not_found() {
        let (_dir, db) = open_db();
        let store = ComputeAgentStore::new(db);
        store.update("c1", "A1").await.unwrap();

        let err = store.delete("c2").await.unwrap_err();
        assert!(matches!(err, StoreError::KeyNotFound { ref key, .. } if key == "c2"));
    }

    #[tokio::test]
    async fn test_list_all_without_namespace() {
        let (_dir, db) = open_db();
        let store = ComputeAgentStore::new(db);

        let err = store.list_all().await.unwrap_err();
        assert!(matches!(err, StoreError::NamespaceNotFound(ref ns) if ns == COMPUTE_AGENT_NAMESPACE));
    }

    #[tokio::test]
    async fn test_list_all_after_namespace_emptied() {
        let (_dir, db) = open_db();
        let store = ComputeAgentStore::new(db);

        store.update("c1", "A1").await.unwrap();
        store.delete("c1").await.unwrap();

        assert!(store.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_registrations_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("networkproxy.db");

        {
            let db = Database::open(&path).unwrap();
            let store = ComputeAgentStore::new(db.clone());
            store.update("c1", "A1").await.unwrap();
            store.update("c2", "A2").await.unwrap();
            drop(store);
            db.close().await.unwrap();
        }

        let store = ComputeAgentStore::new(Database::open(&path).unwrap());
        let agents = store.list_all().await.unwrap();
        assert_eq!(agents.len(), 2);
        assert_eq!(agents["c2"], "A2");
    }
}

mod networking_store_tests {
    use super::*;

    #[tokio::test]
    async fn test_network_round_trip() {
        let (_dir, db) = open_db();
        let store = NetworkingStore::new(db);
        let network = CustomNetwork {
            name: "net0".to_string(),
        };

        store.create_network(&network).await.unwrap();
        assert_eq!(store.get_network("net0").await.unwrap(), network);
        assert_eq!(store.list_networks().await.unwrap(), vec![network]);
    }

    #[tokio::test]
    async fn test_duplicate_network_is_rejected() {
        let (_dir, db) = open_db();
        let store = NetworkingStore::new(db);
        let network = CustomNetwork {
            name: "net0".to_string(),
        };

        store.create_network(&network).await.unwrap();
        let err = store.create_network(&network).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_missing_namespaces_are_reported() {
        let (_dir, db) = open_db();
        let store = NetworkingStore::new(db);

        assert!(matches!(
            store.get_endpoint("ep0").await,
            Err(StoreError::NamespaceNotFound(_))
        ));
        assert!(matches!(
            store.list_networks().await,
            Err(StoreError::NamespaceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_update_endpoint_namespace() {
        let (_dir, db) = open_db();
        let store = NetworkingStore::new(db);

        let mut ep = endpoint("ep0");
        store.create_endpoint(&ep).await.unwrap();

        ep.namespace_id = "ns-1".to_string();
        store.update_endpoint(&ep).await.unwrap();

        assert_eq!(store.get_endpoint("ep0").await.unwrap().namespace_id, "ns-1");
    }

    #[tokio::test]
    async fn test_update_deleted_endpoint_fails() {
        let (_dir, db) = open_db();
        let store = NetworkingStore::new(db);

        let ep = endpoint("ep0");
        store.create_endpoint(&ep).await.unwrap();
        store.delete_endpoint("ep0").await.unwrap();

        let err = store.update_endpoint(&ep).await.unwrap_err();
        assert!(matches!(err, StoreError::KeyNotFound { .. }));
    }

    #[tokio::test]
    async fn test_delete_missing_endpoint() {
        let (_dir, db) = open_db();
        let store = NetworkingStore::new(db);
        store.create_endpoint(&endpoint("ep0")).await.unwrap();

        assert!(store.delete_endpoint("ep1").await.unwrap_err().is_not_found());
        assert_eq!(store.list_endpoints().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stores_share_database() {
        let (_dir, db) = open_db();
        let agents = ComputeAgentStore::new(db.clone());
        let networking = NetworkingStore::new(db);

        agents.update("c1", "A1").await.unwrap();
        networking
            .create_network(&CustomNetwork {
                name: "c1".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(agents.get("c1").await.unwrap(), "A1");
        assert_eq!(networking.get_network("c1").await.unwrap().name, "c1");
    }
}
