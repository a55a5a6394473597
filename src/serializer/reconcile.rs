//! Reconciler (spec §4.6): runs on every 3-second idle tick and on any
//! inbound `networks` op. Two independent passes — DHCP IP reconciliation and
//! OVS port reconciliation.

use crate::error::Result;
use crate::model::OfPort;
use crate::naming::{PATCH_PREFIX, VETH_HOST_PREFIX};
use crate::yaml;

use super::DriverState;

const DHCP_UPDATED_PATH: &str = "/var/run/udhcpc.updated";

/// DHCP IP reconciliation: re-read `/var/run/<container-id>-ipv4.txt` for
/// every DHCP-enabled network's containers, but only when the shared marker
/// file's mtime has moved since the last tick.
async fn reconcile_dhcp(state: &mut DriverState) -> Result<()> {
    let mtime = match tokio::fs::metadata(DHCP_UPDATED_PATH).await {
        Ok(meta) => meta.modified().ok(),
        Err(_) => None,
    };
    if mtime.is_some() && mtime == state.dhcp_updated_mtime {
        return Ok(());
    }
    state.dhcp_updated_mtime = mtime;

    for ns in state.networks.values_mut() {
        if !ns.use_dhcp {
            continue;
        }
        for container in ns.dynamic.containers.values_mut() {
            let path = format!("/var/run/{}-ipv4.txt", container.id);
            if let Ok(contents) = tokio::fs::read_to_string(&path).await {
                container.host_ip = contents.trim().to_string();
            }
        }
    }
    Ok(())
}

/// OVS port reconciliation: diff the current `dump-ports-desc` snapshot
/// against the last-seen one per network, reflecting additions/removals to
/// the controller and to `ExternalPorts`.
async fn reconcile_ports(state: &mut DriverState) -> Result<()> {
    let network_ids: Vec<String> = state.networks.keys().cloned().collect();
    for network_id in network_ids {
        let Some(ns) = state.networks.get(&network_id).cloned() else {
            continue;
        };
        let current = crate::ovs::port::scrape_port_desc(&ns.bridge_name).await?;
        let previous = state
            .port_desc_snapshots
            .get(&network_id)
            .cloned()
            .unwrap_or_default();

        let loopback_port = state
            .stack_mirror_configs
            .get(&network_id)
            .map(|c| c.lb_port)
            .unwrap_or(OfPort(0));

        let creation_ports: std::collections::HashSet<&str> = ns
            .add_ports
            .iter()
            .chain(ns.add_copro_ports.iter())
            .map(|p| p.name.as_str())
            .collect();

        for (port, description) in &previous {
            if !current.contains_key(port) && !description.starts_with(VETH_HOST_PREFIX) {
                let _ = state
                    .controller
                    .del_dp_interfaces(ns.network_name.clone(), port.0)
                    .await;
                if let Some(ns_mut) = state.networks.get_mut(&network_id) {
                    ns_mut.dynamic.external_ports.retain(|_, p| p.of_port != *port);
                }
            }
        }

        let mut additions = String::new();
        for (port, description) in &current {
            if previous.contains_key(port) {
                continue;
            }
            if port.is_bridge_local() || *port == loopback_port {
                continue;
            }
            if description.starts_with(VETH_HOST_PREFIX) || description.starts_with(PATCH_PREFIX) {
                continue;
            }
            if creation_ports.contains(description.as_str()) {
                continue;
            }
            additions.push_str(&yaml::vlan_interface_yaml(port.0, description, ns.bridge_vlan, ""));
            if let Some(ns_mut) = state.networks.get_mut(&network_id) {
                ns_mut.dynamic.external_ports.insert(
                    description.clone(),
                    crate::model::ExternalPortState {
                        name: description.clone(),
                        of_port: *port,
                        mac_address: String::new(),
                    },
                );
            }
        }
        if !additions.is_empty() {
            let config_yaml = yaml::merge_single_dp_minimal_yaml(&ns.network_name, &additions);
            state.controller.set_config_file(config_yaml).await?;
        }

        state.port_desc_snapshots.insert(network_id, current);
    }
    Ok(())
}

pub async fn run(state: &mut DriverState) -> Result<()> {
    reconcile_dhcp(state).await?;
    reconcile_ports(state).await?;
    Ok(())
}
