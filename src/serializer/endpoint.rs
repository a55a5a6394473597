//! Endpoint lifecycle: ReservePort, Join, Leave (spec §4.4).

use std::time::{SystemTime, UNIX_EPOCH};

use tracing::warn;

use crate::error::{DriverError, Result};
use crate::model::{ContainerState, OfPort, OfPortContainer};
use crate::naming;
use crate::notify::{NotifyDetails, NotifyMsg, NotifyMsgEnvelope, NotifyOperation, NotifyType};
use crate::options::{resolve_for_network, JoinOptions, LABEL_MAC_PREFIX, LABEL_MIRROR, LABEL_PORTACL};
use crate::ovs;
use crate::yaml;

use super::DriverState;

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

async fn notify(state: &DriverState, msg: NotifyMsg) {
    let envelope = NotifyMsgEnvelope::new(now_unix(), msg);
    let _ = state.notify_tx.send(envelope).await;
}

/// The container's own address on `network_name`, used as the portmap DNAT
/// target (the gateway address is only ever the `-d` match, not the
/// destination).
fn container_ip(
    container: &bollard::models::ContainerInspectResponse,
    network_name: &str,
) -> Option<String> {
    container
        .network_settings
        .as_ref()
        .and_then(|s| s.networks.as_ref())
        .and_then(|nets| nets.get(network_name))
        .and_then(|ep| ep.ip_address.clone())
        .filter(|ip| !ip.is_empty())
}

/// Add the host-side veth (already created transport-side in CreateEndpoint)
/// as an OVS port on the bridge, recording the OF port by endpoint-id (spec
/// §4.4 `reserveport`).
pub async fn handle_reserve_port(
    state: &mut DriverState,
    network_id: &str,
    endpoint_id: &str,
) -> Result<OfPort> {
    let ns = state
        .networks
        .get(network_id)
        .ok_or_else(|| DriverError::NetworkNotFound(network_id.to_string()))?;
    let bridge_name = ns.bridge_name.clone();

    let veth_name = naming::veth_host_name(endpoint_id);
    let lowest = ovs::port::lowest_free_port_on_bridge(&bridge_name).await?;
    let ofport_request = format!("ofport_request={}", lowest.0);
    ovs::vsctl(&[
        "add-port",
        &bridge_name,
        &veth_name,
        "--",
        "set",
        "Interface",
        &veth_name,
        &ofport_request,
    ])
    .await?;
    let of_port = ovs::port::get_of_port(&veth_name).await?;

    state.of_ports.insert(
        endpoint_id.to_string(),
        OfPortContainer {
            of_port,
            container: bollard::models::ContainerInspectResponse::default(),
            dhcp_child_pid: None,
            options: JoinOptions::default(),
        },
    );
    Ok(of_port)
}

/// Full join sequence (spec §4.4 `join` steps 1-10).
pub async fn handle_join(
    state: &mut DriverState,
    network_id: &str,
    endpoint_id: &str,
    join_options: JoinOptions,
) -> Result<()> {
    let ns = state
        .networks
        .get(network_id)
        .cloned()
        .ok_or_else(|| DriverError::NetworkNotFound(network_id.to_string()))?;

    let of_port = state
        .of_ports
        .get(endpoint_id)
        .map(|c| c.of_port)
        .ok_or_else(|| DriverError::EndpointNotJoined(endpoint_id.to_string()))?;

    // Step 1: fetch the container record (retries are internal to the runtime adapter).
    let container = state.runtime.container_for_endpoint(network_id, endpoint_id).await?;
    let container_id = container.id.clone().unwrap_or_default();
    let pid = container
        .state
        .as_ref()
        .and_then(|s| s.pid)
        .filter(|p| *p > 0)
        .ok_or_else(|| DriverError::EndpointNotJoined(endpoint_id.to_string()))?;
    let labels = container
        .config
        .as_ref()
        .and_then(|c| c.labels.clone())
        .unwrap_or_default();

    // Step 2: symlink the container's netns.
    crate::netns::create_ns_link(pid as u32, &container_id).await?;

    // Docker renames the container-side veth to `eth0` once it moves it into
    // the netns; all in-namespace operations below target that name, not the
    // `ethc<5>` name the veth had in the host namespace.
    let container_iface = naming::CONTAINER_INTERFACE_NAME;
    let mut mac_address = crate::netns::get_in_ns_mac(&container_id, container_iface)
        .await
        .unwrap_or_default();

    // Step 3: splice the MAC prefix label over the interface MAC, if present.
    if let Some(prefix) = labels.get(LABEL_MAC_PREFIX) {
        if !mac_address.is_empty() {
            let spliced = crate::netns::prefix_mac(prefix, &mac_address)?;
            crate::netns::set_in_ns_mac(&container_id, container_iface, &spliced).await?;
            mac_address = spliced;
        }
    }

    // Step 4: disable TX checksum offload for userspace-datapath networks.
    if ns.userspace {
        crate::netns::disable_tx_checksum_offload(&container_id, container_iface).await?;
    }

    // Step 5: install the 4-rule NAT forward for each portmap entry. DNAT
    // targets the container's own IP; the gateway IP is only the `-d` match.
    let host_ip = container_ip(&container, &ns.network_name).unwrap_or_default();
    if let Some(gateway_ip) = &ns.gateway_ip {
        if !host_ip.is_empty() {
            for entry in &join_options.portmap {
                crate::firewall::add_gateway_port_map(
                    &ns.bridge_name,
                    entry.proto,
                    gateway_ip,
                    &host_ip,
                    entry.host_port,
                    entry.container_port,
                )?;
            }
        }
    }

    // Step 6: resolve the effective port ACL.
    let port_acl = labels
        .get(LABEL_PORTACL)
        .map(|raw| resolve_for_network(raw, &ns.network_name))
        .filter(|s| !s.is_empty())
        .or_else(|| {
            ns.default_acl
                .as_deref()
                .map(|raw| resolve_for_network(raw, &ns.network_name))
        })
        .unwrap_or_default();

    // Step 7: push a merged single-interface YAML addition.
    let description = format!("Container port for endpoint {}", endpoint_id);
    let interface_yaml = yaml::vlan_interface_yaml(of_port.0, &description, ns.bridge_vlan, &port_acl);
    let config_yaml = yaml::merge_single_dp_minimal_yaml(&ns.network_name, &interface_yaml);
    state.controller.set_config_file(config_yaml).await?;

    // Step 8: mirror this port if labeled and a mirror target is configured.
    let mirror_requested = labels
        .get(LABEL_MIRROR)
        .map(|raw| resolve_for_network(raw, &ns.network_name))
        .map(|v| matches!(v.as_str(), "true" | "1" | "True" | "TRUE"))
        .unwrap_or(false);
    if mirror_requested && (state.topology.using_stack_mirroring() || state.topology.using_mirror_bridge()) {
        if let Some(mirror_config) = state.stack_mirror_configs.get(network_id) {
            state
                .controller
                .add_port_mirror(ns.network_name.clone(), of_port.0, mirror_config.lb_port.0)
                .await?;
        }
    }

    // Step 9: spawn the DHCP client child, if configured.
    let mut dhcp_child_pid = None;
    if ns.use_dhcp {
        let child = crate::netns::spawn_dhcp_client(&container_id, container_iface).await?;
        dhcp_child_pid = child.id();
        state.dhcp_children.insert(endpoint_id.to_string(), child);
    }

    // Step 10: populate ContainerState and emit CONTAINER JOIN.
    if let Some(entry) = state.of_ports.get_mut(endpoint_id) {
        entry.container = container;
        entry.dhcp_child_pid = dhcp_child_pid;
        entry.options = join_options;
    }

    if let Some(ns_mut) = state.networks.get_mut(network_id) {
        ns_mut.dynamic.containers.insert(
            endpoint_id.to_string(),
            ContainerState {
                name: container_id.clone(),
                id: container_id.clone(),
                of_port,
                mac_address: mac_address.clone(),
                host_ip: host_ip.clone(),
                labels,
                interface_name: container_iface.to_string(),
            },
        );
    }

    notify(
        state,
        NotifyMsg {
            msg_type: NotifyType::Container,
            operation: NotifyOperation::Join,
            network_name: ns.network_name.clone(),
            details: NotifyDetails {
                name: Some(container_id.clone()),
                id: Some(endpoint_id.to_string()),
                port: Some(of_port.0),
                mac: if mac_address.is_empty() { None } else { Some(mac_address) },
                ip: if host_ip.is_empty() { None } else { Some(host_ip) },
            },
        },
    )
    .await;

    Ok(())
}

/// Tear down an endpoint: kill the DHCP child, delete the host veth and OVS
/// port, call DelDpInterfaces, reverse the portmap, and drop the endpoint's
/// state (spec §4.4 `leave`).
pub async fn handle_leave(state: &mut DriverState, network_id: &str, endpoint_id: &str) -> Result<()> {
    let ns = state
        .networks
        .get(network_id)
        .cloned()
        .ok_or_else(|| DriverError::NetworkNotFound(network_id.to_string()))?;

    let entry = state
        .of_ports
        .remove(endpoint_id)
        .ok_or_else(|| DriverError::EndpointNotJoined(endpoint_id.to_string()))?;

    if let Some(mut child) = state.dhcp_children.remove(endpoint_id) {
        if let Err(e) = crate::netns::kill_dhcp_client(&mut child).await {
            warn!(%e, endpoint_id, "failed to kill dhcp client cleanly");
        }
    }

    let veth_name = naming::veth_host_name(endpoint_id);
    let _ = crate::netns::delete_link(&veth_name).await;
    let _ = ovs::port::delete_port(&ns.bridge_name, &veth_name).await;

    state
        .controller
        .del_dp_interfaces(ns.network_name.clone(), entry.of_port.0)
        .await?;

    let host_ip = container_ip(&entry.container, &ns.network_name).unwrap_or_default();
    if let Some(gateway_ip) = &ns.gateway_ip {
        if !host_ip.is_empty() {
            for portmap in &entry.options.portmap {
                let _ = crate::firewall::delete_gateway_port_map(
                    &ns.bridge_name,
                    portmap.proto,
                    gateway_ip,
                    &host_ip,
                    portmap.host_port,
                    portmap.container_port,
                );
            }
        }
    }

    if let Some(ns_mut) = state.networks.get_mut(network_id) {
        ns_mut.dynamic.containers.remove(endpoint_id);
    }

    notify(
        state,
        NotifyMsg {
            msg_type: NotifyType::Container,
            operation: NotifyOperation::Leave,
            network_name: ns.network_name.clone(),
            details: NotifyDetails {
                id: Some(endpoint_id.to_string()),
                port: Some(entry.of_port.0),
                ..Default::default()
            },
        },
    )
    .await;

    Ok(())
}
