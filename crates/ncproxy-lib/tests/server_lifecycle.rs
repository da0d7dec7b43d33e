//! End-to-end tests: a started proxy driven over its real listeners

mod common;

use common::{spawn_fake_agent, uds_channel};
use ncproxy_lib::agent::{AgentDialer, UdsDialer};
use ncproxy_lib::health::HealthRegistry;
use ncproxy_lib::hns::MemoryHostNetwork;
use ncproxy_lib::models::HOST_ENDPOINT_TYPE_URL;
use ncproxy_lib::observability::ProxyMetrics;
use ncproxy_lib::proto::ncproxygrpc::{v0, v1};
use ncproxy_lib::proto::ncproxyinternal::{
    network_config_proxy_internal_client::NetworkConfigProxyInternalClient,
    ConfigureNetworkingInternalRequest, RegisterComputeAgentRequest, RequestTypeInternal,
};
use ncproxy_lib::server::{ProxyServer, RunningServer, ServerConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tonic::Code;

struct Fixture {
    dir: TempDir,
    backend: Arc<MemoryHostNetwork>,
    health: HealthRegistry,
}

impl Fixture {
    fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
            backend: Arc::new(MemoryHostNetwork::new()),
            health: HealthRegistry::new(),
        }
    }

    async fn start(&self) -> RunningServer {
        let config = ServerConfig {
            grpc_addr: "127.0.0.1:0".to_string(),
            agent_socket: self.dir.path().join("run").join("ncproxy.sock"),
            database_path: self.dir.path().join("db").join("networkproxy.db"),
            node_net_svc_addr: None,
            node_net_timeout: Duration::ZERO,
            node_name: "test-node".to_string(),
        };
        let dialer: Arc<dyn AgentDialer> = Arc::new(UdsDialer::new(Duration::from_secs(2)));
        ProxyServer::new(
            config,
            self.backend.clone(),
            dialer,
            self.health.clone(),
            ProxyMetrics::new(),
        )
        .start()
        .await
        .unwrap()
    }
}

async fn control_client(
    addr: SocketAddr,
) -> v1::network_config_proxy_client::NetworkConfigProxyClient<tonic::transport::Channel> {
    v1::network_config_proxy_client::NetworkConfigProxyClient::connect(format!("http://{addr}"))
        .await
        .unwrap()
}

async fn create_host_endpoint(
    client: &mut v1::network_config_proxy_client::NetworkConfigProxyClient<tonic::transport::Channel>,
) {
    client
        .create_network(v1::CreateNetworkRequest {
            network: Some(v1::Network {
                settings: Some(v1::network::Settings::HcnNetwork(
                    v1::HostComputeNetworkSettings {
                        name: "net1".to_string(),
                        subnet_ipaddress_prefix: vec!["10.1.0.0/24".to_string()],
                        default_gateway: "10.1.0.1".to_string(),
                        ..Default::default()
                    },
                )),
            }),
        })
        .await
        .unwrap();

    client
        .create_endpoint(v1::CreateEndpointRequest {
            endpoint_settings: Some(v1::EndpointSettings {
                settings: Some(v1::endpoint_settings::Settings::HcnEndpoint(
                    v1::HcnEndpointSettings {
                        name: "ep1".to_string(),
                        macaddress: "00-15-5D-52-C0-20".to_string(),
                        ipaddress: "10.1.0.20".to_string(),
                        ipaddress_prefixlength: 24,
                        network_name: "net1".to_string(),
                        ..Default::default()
                    },
                )),
            }),
        })
        .await
        .unwrap();
}

fn add_nic(nic_id: &str) -> v1::AddNicRequest {
    v1::AddNicRequest {
        container_id: "c1".to_string(),
        nic_id: nic_id.to_string(),
        endpoint_name: "ep1".to_string(),
        endpoint_settings: None,
    }
}

#[tokio::test]
async fn test_register_and_add_nic_over_the_wire() {
    let fixture = Fixture::new();
    let agent_socket = fixture.dir.path().join("agent-c1.sock");
    let (fake, agent_server) = spawn_fake_agent(&agent_socket);

    let running = fixture.start().await;
    assert!(fixture.health.readiness().await.ready);
    assert!(running.agent_socket().exists());

    let mut internal =
        NetworkConfigProxyInternalClient::new(uds_channel(running.agent_socket()).await);
    internal
        .register_compute_agent(RegisterComputeAgentRequest {
            agent_address: agent_socket.display().to_string(),
            container_id: "c1".to_string(),
        })
        .await
        .unwrap();

    let mut control = control_client(running.control_addr()).await;
    let status = control.add_nic(add_nic("nic-1")).await.unwrap_err();
    assert_eq!(status.code(), Code::NotFound);

    create_host_endpoint(&mut control).await;
    control.add_nic(add_nic("nic-1")).await.unwrap();
    assert_eq!(
        fake.calls(),
        vec![format!("AddNIC c1 nic-1 {HOST_ENDPOINT_TYPE_URL}")]
    );

    let mut legacy = v0::network_config_proxy_client::NetworkConfigProxyClient::connect(format!(
        "http://{}",
        running.control_addr()
    ))
    .await
    .unwrap();
    let networks = legacy
        .get_networks(v0::GetNetworksRequest {})
        .await
        .unwrap()
        .into_inner()
        .networks;
    assert_eq!(networks.len(), 1);
    assert_eq!(networks[0].name, "net1");

    let status = internal
        .configure_networking(ConfigureNetworkingInternalRequest {
            container_id: "c1".to_string(),
            request_type: RequestTypeInternal::Setup as i32,
        })
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::FailedPrecondition);

    drop((control, legacy, internal));
    let socket = running.agent_socket().to_path_buf();
    running.shutdown("test finished").await.unwrap();
    assert!(!socket.exists());
    assert!(!fixture.health.readiness().await.ready);
    agent_server.abort();
}

#[tokio::test]
async fn test_registrations_survive_restart() {
    let fixture = Fixture::new();
    let agent_socket = fixture.dir.path().join("agent-c1.sock");
    let (fake, agent_server) = spawn_fake_agent(&agent_socket);

    let running = fixture.start().await;
    let mut internal =
        NetworkConfigProxyInternalClient::new(uds_channel(running.agent_socket()).await);
    internal
        .register_compute_agent(RegisterComputeAgentRequest {
            agent_address: agent_socket.display().to_string(),
            container_id: "c1".to_string(),
        })
        .await
        .unwrap();
    let mut control = control_client(running.control_addr()).await;
    create_host_endpoint(&mut control).await;
    drop(control);
    drop(internal);
    running.shutdown("restart").await.unwrap();

    // The agent is dialed again from the persisted registration.
    let running = fixture.start().await;
    let mut control = control_client(running.control_addr()).await;
    control.add_nic(add_nic("nic-2")).await.unwrap();
    assert_eq!(
        fake.calls(),
        vec![format!("AddNIC c1 nic-2 {HOST_ENDPOINT_TYPE_URL}")]
    );

    running.shutdown("test finished").await.unwrap();
    agent_server.abort();
}
