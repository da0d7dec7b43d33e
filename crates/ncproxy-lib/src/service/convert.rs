//! Conversions between wire messages and resource types

use crate::error::ProxyError;
use crate::hns::{Dns, EndpointPolicy, HostEndpoint, HostNetwork, IpamType, NetworkMode};
use crate::models::{CustomEndpoint, CustomNetwork, IovPolicy, PciDeviceDetails};
use crate::proto::computeagent::IovSettings;
use crate::proto::ncproxygrpc::v1::{
    self, endpoint_settings, host_compute_network_settings, ncproxy_endpoint_settings, network,
    DnsSetting, EndpointSettings, GetEndpointResponse, GetNetworkResponse, HcnEndpointPolicies,
    HcnEndpointSettings, HostComputeNetworkSettings, IovEndpointPolicySetting,
    NcproxyEndpointSettings, NcproxyNetworkSettings, PortNameEndpointPolicySetting,
};
use crate::resources::{HostEndpointSpec, HostNetworkSpec};
use std::net::IpAddr;
use tracing::warn;

pub(crate) fn iov_policy(setting: &IovEndpointPolicySetting) -> IovPolicy {
    IovPolicy {
        offload_weight: setting.iov_offload_weight,
        queue_pairs_requested: setting.queue_pairs_requested,
        interrupt_moderation: setting.interrupt_moderation,
    }
}

fn iov_setting(policy: &IovPolicy) -> IovEndpointPolicySetting {
    IovEndpointPolicySetting {
        iov_offload_weight: policy.offload_weight,
        queue_pairs_requested: policy.queue_pairs_requested,
        interrupt_moderation: policy.interrupt_moderation,
    }
}

pub(crate) fn agent_iov_settings(policy: &IovPolicy) -> IovSettings {
    IovSettings {
        iov_offload_weight: policy.offload_weight,
        queue_pairs_requested: policy.queue_pairs_requested,
        interrupt_moderation: policy.interrupt_moderation,
    }
}

/// IOV policy carried inline in host endpoint settings, if any.
pub(crate) fn inline_iov(settings: Option<&EndpointSettings>) -> Option<IovPolicy> {
    match settings?.settings.as_ref()? {
        endpoint_settings::Settings::HcnEndpoint(hcn) => hcn
            .policies
            .as_ref()?
            .iov_policy_settings
            .as_ref()
            .map(iov_policy),
        endpoint_settings::Settings::NcproxyEndpoint(_) => None,
    }
}

// -- requests --

pub(crate) fn host_network_spec(settings: &HostComputeNetworkSettings) -> HostNetworkSpec {
    HostNetworkSpec {
        name: settings.name.clone(),
        mode: match settings.mode() {
            host_compute_network_settings::NetworkMode::Transparent => NetworkMode::Transparent,
            host_compute_network_settings::NetworkMode::Nat => NetworkMode::Nat,
        },
        ipam_type: match settings.ipam_type() {
            host_compute_network_settings::IpamType::Static => IpamType::Static,
            host_compute_network_settings::IpamType::Dhcp => IpamType::Dhcp,
        },
        switch_name: settings.switch_name.clone(),
        subnet_prefixes: settings.subnet_ipaddress_prefix.clone(),
        default_gateway: settings.default_gateway.clone(),
        subnet_prefixes_v6: settings.subnet_ipaddress_prefix_ipv6.clone(),
        default_gateway_v6: settings.default_gateway_ipv6.clone(),
    }
}

pub(crate) fn host_endpoint_spec(settings: &HcnEndpointSettings) -> HostEndpointSpec {
    let policies = settings.policies.as_ref();
    HostEndpointSpec {
        name: settings.name.clone(),
        mac_address: settings.macaddress.clone(),
        ip_address: settings.ipaddress.clone(),
        prefix_length: settings.ipaddress_prefixlength,
        ipv6_address: settings.ipv6_address.clone(),
        ipv6_prefix_length: settings.ipv6_address_prefixlength,
        network_name: settings.network_name.clone(),
        port_name: policies
            .and_then(|p| p.portname_policy_setting.as_ref())
            .map(|p| p.port_name.clone()),
        iov: policies
            .and_then(|p| p.iov_policy_settings.as_ref())
            .map(iov_policy),
        dns: settings.dns_setting.as_ref().map(|d| Dns {
            server_list: d.server_ip_addrs.clone(),
            domain: d.domain.clone(),
            search: d.search.clone(),
        }),
    }
}

pub(crate) fn custom_endpoint(settings: &NcproxyEndpointSettings) -> CustomEndpoint {
    CustomEndpoint {
        name: settings.name.clone(),
        mac_address: settings.macaddress.clone(),
        ip_address: settings.ipaddress.clone(),
        prefix_length: settings.ipaddress_prefixlength,
        network_name: settings.network_name.clone(),
        default_gateway: settings.default_gateway.clone(),
        device_details: settings.device_details.as_ref().map(|d| match d {
            ncproxy_endpoint_settings::DeviceDetails::PciDeviceDetails(pci) => PciDeviceDetails {
                device_id: pci.device_id.clone(),
                virtual_function_index: pci.virtual_function_index,
            },
        }),
        namespace_id: String::new(),
    }
}

// -- responses --

pub(crate) fn custom_network_response(network: &CustomNetwork) -> GetNetworkResponse {
    GetNetworkResponse {
        id: network.name.clone(),
        network: Some(v1::Network {
            settings: Some(network::Settings::NcproxyNetwork(NcproxyNetworkSettings {
                name: network.name.clone(),
            })),
        }),
        mac_range: None,
    }
}

/// Describes a host network. `switch_name` is the name of the network it was
/// layered over, already resolved by the caller.
pub(crate) fn host_network_response(
    network: &HostNetwork,
    switch_name: Option<String>,
) -> Result<GetNetworkResponse, ProxyError> {
    let mut settings = HostComputeNetworkSettings {
        name: network.name.clone(),
        switch_name: switch_name.unwrap_or_default(),
        ..Default::default()
    };
    settings.set_mode(match network.mode {
        NetworkMode::Transparent => host_compute_network_settings::NetworkMode::Transparent,
        NetworkMode::Nat => host_compute_network_settings::NetworkMode::Nat,
    });
    settings.set_ipam_type(match network.ipam_type {
        IpamType::Static => host_compute_network_settings::IpamType::Static,
        IpamType::Dhcp => host_compute_network_settings::IpamType::Dhcp,
    });

    for subnet in &network.subnets {
        let address = subnet
            .ip_address_prefix
            .split('/')
            .next()
            .unwrap_or_default();
        let ip: IpAddr = address.parse().map_err(|e| {
            ProxyError::internal(format!("failed to parse IP address {address:?}"), e)
        })?;
        let gateway = subnet.routes.first().map(|r| r.next_hop.clone());
        if ip.is_ipv4() {
            settings
                .subnet_ipaddress_prefix
                .push(subnet.ip_address_prefix.clone());
            if let Some(gateway) = gateway {
                settings.default_gateway = gateway;
            }
        } else {
            settings
                .subnet_ipaddress_prefix_ipv6
                .push(subnet.ip_address_prefix.clone());
            if let Some(gateway) = gateway {
                settings.default_gateway_ipv6 = gateway;
            }
        }
    }

    let range = match network.mac_pool.as_slice() {
        [] => {
            return Err(ProxyError::internal(
                "failed to describe network",
                format!("network {}({}) MAC pool is empty", network.name, network.id),
            ))
        }
        [first] => first,
        [first, ..] => {
            warn!(network_name = %network.name, "Network has multiple MAC pools, only returning the first");
            first
        }
    };

    Ok(GetNetworkResponse {
        id: network.id.clone(),
        network: Some(v1::Network {
            settings: Some(network::Settings::HcnNetwork(settings)),
        }),
        mac_range: Some(v1::MacRange {
            start_mac_address: range.start_mac_address.clone(),
            end_mac_address: range.end_mac_address.clone(),
        }),
    })
}

pub(crate) fn custom_endpoint_response(endpoint: &CustomEndpoint) -> GetEndpointResponse {
    let settings = NcproxyEndpointSettings {
        name: endpoint.name.clone(),
        macaddress: endpoint.mac_address.clone(),
        ipaddress: endpoint.ip_address.clone(),
        ipaddress_prefixlength: endpoint.prefix_length,
        network_name: endpoint.network_name.clone(),
        default_gateway: endpoint.default_gateway.clone(),
        device_details: endpoint.device_details.as_ref().map(|d| {
            ncproxy_endpoint_settings::DeviceDetails::PciDeviceDetails(v1::PciDeviceDetails {
                device_id: d.device_id.clone(),
                virtual_function_index: d.virtual_function_index,
            })
        }),
    };

    GetEndpointResponse {
        namespace: endpoint.namespace_id.clone(),
        id: endpoint.name.clone(),
        endpoint: Some(EndpointSettings {
            settings: Some(endpoint_settings::Settings::NcproxyEndpoint(settings)),
        }),
    }
}

/// Describes a host endpoint. An endpoint carries one IPv4 and/or one IPv6
/// configuration; anything else is reported as an error.
pub(crate) fn host_endpoint_response(endpoint: &HostEndpoint) -> Result<GetEndpointResponse, ProxyError> {
    let count = endpoint.ip_configurations.len();
    if count == 0 || count > 2 {
        return Err(ProxyError::internal(
            "failed to describe endpoint",
            format!(
                "invalid number ({count}) of ip configuration information for endpoint {}",
                endpoint.name
            ),
        ));
    }

    let mut policies = HcnEndpointPolicies::default();
    for policy in &endpoint.policies {
        match policy {
            EndpointPolicy::PortName { name } => {
                policies.portname_policy_setting = Some(PortNameEndpointPolicySetting {
                    port_name: name.clone(),
                })
            }
            EndpointPolicy::Iov(iov) => policies.iov_policy_settings = Some(iov_setting(iov)),
        }
    }

    let mut settings = HcnEndpointSettings {
        name: endpoint.name.clone(),
        macaddress: endpoint.mac_address.clone(),
        network_name: endpoint.network_name.clone(),
        policies: Some(policies),
        dns_setting: Some(DnsSetting {
            server_ip_addrs: endpoint.dns.server_list.clone(),
            domain: endpoint.dns.domain.clone(),
            search: endpoint.dns.search.clone(),
        }),
        ..Default::default()
    };

    for config in &endpoint.ip_configurations {
        let ip: IpAddr = config.ip_address.parse().map_err(|e| {
            ProxyError::internal(format!("failed to parse IP address {:?}", config.ip_address), e)
        })?;
        if ip.is_ipv4() {
            settings.ipaddress = config.ip_address.clone();
            settings.ipaddress_prefixlength = u32::from(config.prefix_length);
        } else {
            settings.ipv6_address = config.ip_address.clone();
            settings.ipv6_address_prefixlength = u32::from(config.prefix_length);
        }
    }

    Ok(GetEndpointResponse {
        namespace: endpoint.namespace_id.clone(),
        id: endpoint.id.clone(),
        endpoint: Some(EndpointSettings {
            settings: Some(endpoint_settings::Settings::HcnEndpoint(settings)),
        }),
    })
}
