//! CreateNetwork/ReCreate and DeleteNetwork handlers (spec §4.2, §4.3, §4.7).

use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::Result;
use crate::model::{AddPortSpec, BridgeMode, DynamicNetworkState, ExternalPortState, NetworkState, OfPort, OtherBridgePortState, StackMirrorConfig};
use crate::naming;
use crate::notify::{NotifyDetails, NotifyMsg, NotifyMsgEnvelope, NotifyOperation, NotifyType};
use crate::options::{resolve_for_network, CreateOptions};
use crate::ovs;
use crate::yaml;

use super::{CreateOperation, DriverState};

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn build_network_state(network_id: &str, opts: &CreateOptions) -> NetworkState {
    let bridge_name = opts
        .bridge_name
        .clone()
        .unwrap_or_else(|| naming::default_bridge_name(network_id));
    let bridge_dpid = opts.bridge_dpid.clone().unwrap_or_default();
    let bridge_dpid_uint = naming::dpid_to_uint(&bridge_dpid).unwrap_or(0);

    NetworkState {
        network_id: network_id.to_string(),
        network_name: String::new(),
        bridge_name,
        bridge_dpid,
        bridge_dpid_uint,
        bridge_vlan: opts.vlan,
        mtu: opts.mtu,
        preallocate_ports: opts.preallocate_ports,
        mode: opts.mode,
        add_ports: opts.add_ports.clone(),
        add_copro_ports: opts.add_copro_ports.clone(),
        gateway_ip: opts.gateway.as_ref().and_then(|g| g.split('/').next().map(str::to_string)),
        gateway_mask: opts.gateway.as_ref().and_then(|g| g.split('/').nth(1).map(str::to_string)),
        bind_interface: opts.bind_interface.clone(),
        use_dhcp: opts.use_dhcp,
        userspace: opts.userspace,
        nat_acl: opts.nat_acl.clone(),
        vlan_out_acl: opts.vlan_out_acl.clone(),
        default_acl: opts.default_acl.clone(),
        port_acl: None,
        ovs_local_mac: opts.ovs_local_mac.clone(),
        controller: opts.controller.clone().unwrap_or_default(),
        dynamic: DynamicNetworkState::default(),
    }
}

async fn notify(state: &DriverState, msg: NotifyMsg) {
    let envelope = NotifyMsgEnvelope::new(now_unix(), msg);
    let _ = state.notify_tx.send(envelope).await;
}

/// Resolve each physical add-port's already-assigned of-port (ports are added
/// to the bridge during `InitBridge`, on the transport side) and append its
/// YAML fragment (spec §4.2 step 3).
async fn add_physical_ports(
    ns: &mut NetworkState,
    specs: &[AddPortSpec],
    coprocessor: bool,
) -> Result<String> {
    let mut fragment = String::new();
    for spec in specs {
        let of_port = ovs::port::get_of_port(&spec.name).await?;
        let description = format!("Physical interface {}", spec.name);
        if coprocessor {
            fragment.push_str(&yaml::copro_interface_yaml(of_port.0, &description, "vlan_vid"));
        } else {
            fragment.push_str(&yaml::vlan_interface_yaml(of_port.0, &description, ns.bridge_vlan, ""));
        }
        ns.dynamic.external_ports.insert(
            spec.name.clone(),
            ExternalPortState {
                name: spec.name.clone(),
                of_port,
                mac_address: String::new(),
            },
        );
    }
    Ok(fragment)
}

/// Transport-side `InitBridge` plus patch-port attachment to the configured
/// mirror/stacking/loopback bridges (spec §4.2 steps 3-5). Runs before a
/// `create` op is enqueued. `RecreateBadBridge` first deletes the existing
/// bridge and its patch ports; `RecreateDownBridge` additionally best-effort
/// tears down the controller's datapath entry first, since start-up restore
/// has no prior in-memory `NetworkState` to drive a full delete handler.
pub async fn prepare_bridge(
    network_id: &str,
    network_name: &str,
    options: &CreateOptions,
    topology: &super::stack::Topology,
    controller: &dyn crate::controller::ControllerClient,
    operation: CreateOperation,
) -> Result<NetworkState> {
    let ns = build_network_state(network_id, options);

    let peer_bridges = [
        topology.mirror_bridge_name.as_deref(),
        topology.stack_dp_name.as_deref(),
        topology.loopback_bridge_name.as_deref(),
    ];

    if matches!(operation, CreateOperation::RecreateDownBridge) {
        let _ = controller.del_dps(network_name.to_string()).await;
    }
    if matches!(operation, CreateOperation::RecreateBadBridge | CreateOperation::RecreateDownBridge) {
        for peer_name in peer_bridges.into_iter().flatten() {
            let _ = ovs::port::delete_patch_port(&ns.bridge_name, peer_name).await;
        }
        let _ = ovs::bridge::delete_bridge(&ns.bridge_name).await;
    }

    let add_ports_raw = options
        .add_ports
        .iter()
        .map(|p| p.name.clone())
        .collect::<Vec<_>>()
        .join(",");
    let bridge_opts = ovs::bridge::CreateBridgeOpts {
        controller: options.controller.as_deref(),
        dpid: if ns.bridge_dpid.is_empty() { None } else { Some(ns.bridge_dpid.as_str()) },
        add_ports: &add_ports_raw,
        userspace: options.userspace,
        ovs_local_mac: options.ovs_local_mac.as_deref(),
    };
    ovs::bridge::init_bridge(&ns, &bridge_opts).await?;

    for peer_name in peer_bridges.into_iter().flatten() {
        ovs::port::add_patch_port(&ns.bridge_name, peer_name, None, None).await?;
    }

    Ok(ns)
}

/// Inside-the-serializer half of CreateNetwork/ReCreate (spec §4.2 "Inside
/// the serializer"). `InitBridge` and patch-port attachment already ran on
/// the transport side (`prepare_bridge`) before this op was enqueued; this
/// handler only assembles and pushes controller state.
pub async fn handle_create(
    state: &mut DriverState,
    network_id: String,
    options: CreateOptions,
    stack_mirror_config: StackMirrorConfig,
    _operation: CreateOperation,
) -> Result<()> {
    let true_name = state.runtime.inspect_network(&network_id).await?.name.unwrap_or_default();

    let mut ns = build_network_state(&network_id, &options);
    ns.network_name = true_name;
    ns.dynamic.short_engine_id =
        crate::naming::short_engine_id(&state.runtime.engine_id().await.unwrap_or_default());

    state.stack_mirror_configs.insert(network_id.clone(), stack_mirror_config.clone());

    let mut add_interfaces = String::new();
    add_interfaces.push_str(&add_physical_ports(&mut ns, &options.add_ports, false).await?);
    add_interfaces.push_str(&add_physical_ports(&mut ns, &options.add_copro_ports, true).await?);

    let default_acl = ns
        .default_acl
        .as_deref()
        .map(|raw| resolve_for_network(raw, &ns.network_name))
        .unwrap_or_default();
    if ns.preallocate_ports > 0 {
        let mut pre_port = ovs::port::lowest_free_port_on_bridge(&ns.bridge_name).await?.0;
        for _ in 0..ns.preallocate_ports {
            add_interfaces.push_str(&yaml::vlan_interface_yaml(pre_port, "preallocated port", ns.bridge_vlan, &default_acl));
            pre_port += 1;
        }
    }

    if matches!(ns.mode, BridgeMode::Nat | BridgeMode::Routed) {
        let nat_acl = ns
            .nat_acl
            .as_deref()
            .map(|raw| resolve_for_network(raw, &ns.network_name))
            .unwrap_or_default();
        add_interfaces.push_str(&yaml::local_vlan_interface_yaml(
            OfPort::BRIDGE_LOCAL.0,
            "OVS Port default gateway",
            ns.bridge_vlan,
            &nat_acl,
        ));
        ns.dynamic.external_ports.insert(
            ns.bridge_name.clone(),
            ExternalPortState {
                name: ns.bridge_name.clone(),
                of_port: OfPort::BRIDGE_LOCAL,
                mac_address: String::new(),
            },
        );
    }

    if state.topology.using_mirror_bridge() {
        let mirror_bridge_name = state.topology.mirror_bridge_name.clone().unwrap();
        let mirror_port_name = naming::patch_name(&ns.bridge_name, &mirror_bridge_name);
        let peer_mirror_port_name = naming::patch_name(&mirror_bridge_name, &ns.bridge_name);
        let local_of_port = ovs::port::get_of_port(&mirror_port_name).await.unwrap_or(stack_mirror_config.lb_port);
        let peer_of_port = ovs::port::get_of_port(&peer_mirror_port_name).await.unwrap_or(stack_mirror_config.lb_port);
        add_interfaces.push_str(&yaml::output_only_interface_yaml(local_of_port.0));
        ns.dynamic.other_bridge_ports.insert(
            mirror_port_name,
            OtherBridgePortState {
                local_of_port,
                peer_of_port,
                peer_bridge_name: mirror_bridge_name,
            },
        );
    }

    let egress_pipeline = ns.vlan_out_acl.is_some();
    let description = format!("OVS Bridge {}", ns.bridge_name);
    let mut config_yaml = yaml::merge_single_dp_yaml(
        &ns.network_name,
        ns.bridge_dpid_uint,
        &description,
        &add_interfaces,
        egress_pipeline,
    );

    if state.topology.using_stacking() {
        let stack_dp_name = state.topology.stack_dp_name.clone().unwrap();
        let of_port_name = naming::patch_name(&ns.bridge_name, &stack_dp_name);
        let peer_of_port_name = naming::patch_name(&stack_dp_name, &ns.bridge_name);
        let of_port = ovs::port::get_of_port(&of_port_name).await?;
        let peer_of_port = ovs::port::get_of_port(&peer_of_port_name).await?;
        ns.dynamic.other_bridge_ports.insert(
            of_port_name,
            OtherBridgePortState {
                local_of_port: of_port,
                peer_of_port,
                peer_bridge_name: stack_dp_name.clone(),
            },
        );
        let local_interfaces = format!(
            "{}{}",
            add_interfaces,
            yaml::stack_interface_yaml(of_port.0, &stack_dp_name, peer_of_port.0)
        );
        let local_dp_yaml = yaml::merge_dp_interfaces_yaml(
            &ns.network_name,
            ns.bridge_dpid_uint,
            &description,
            &local_interfaces,
            egress_pipeline,
        );
        let remote_dp_yaml = yaml::merge_dp_interfaces_minimal_yaml(
            &stack_dp_name,
            &yaml::stack_interface_yaml(peer_of_port.0, &ns.network_name, of_port.0),
        );
        config_yaml = format!("{{dps: {{{}{}}}}}", local_dp_yaml, remote_dp_yaml);
    }

    state.controller.set_config_file(config_yaml).await?;

    let vlan_out_acl = ns
        .vlan_out_acl
        .as_deref()
        .map(|raw| resolve_for_network(raw, &ns.network_name))
        .unwrap_or_default();
    if !vlan_out_acl.is_empty() {
        state
            .controller
            .set_vlan_out_acl(ns.bridge_vlan.to_string(), vlan_out_acl)
            .await?;
    }

    if state.topology.using_stack_mirroring() {
        state
            .controller
            .set_remote_mirror_port(
                ns.network_name.clone(),
                stack_mirror_config.lb_port.0,
                stack_mirror_config.tunnel_vid as u32,
                stack_mirror_config.remote_dp_name.clone(),
                stack_mirror_config.remote_mirror_of_port.0,
            )
            .await?;
    }

    for spec in options.add_ports.iter().chain(options.add_copro_ports.iter()) {
        if let Some(acls) = &spec.acls {
            if let Ok(of_port) = ovs::port::get_of_port(&spec.name).await {
                state
                    .controller
                    .set_port_acl(ns.network_name.clone(), of_port.0, resolve_for_network(acls, &ns.network_name))
                    .await?;
            }
        }
    }

    state.networks.insert(network_id.clone(), ns.clone());

    notify(
        state,
        NotifyMsg {
            msg_type: NotifyType::Network,
            operation: NotifyOperation::Create,
            network_name: ns.network_name.clone(),
            details: NotifyDetails {
                name: Some(ns.network_name),
                id: Some(network_id),
                ..Default::default()
            },
        },
    )
    .await;

    Ok(())
}

/// Reverse of `handle_create`'s controller/patch-port side effects (spec
/// §4.3). Shared by plain DeleteNetwork and the `RecreateDownBridge` repair
/// path, which runs this before re-creating from scratch.
async fn teardown_network(state: &mut DriverState, ns: &NetworkState) -> Result<()> {
    state.controller.del_dps(ns.network_name.clone()).await?;

    if ns.mode == BridgeMode::Nat {
        if let (Some(gw), Some(mask)) = (&ns.gateway_ip, &ns.gateway_mask) {
            let _ = crate::firewall::nat_out(&format!("{}/{}", gw, mask), false);
        }
    }

    for peer_name in [
        state.topology.mirror_bridge_name.clone(),
        state.topology.stack_dp_name.clone(),
        state.topology.loopback_bridge_name.clone(),
    ]
    .into_iter()
    .flatten()
    {
        let _ = ovs::port::delete_patch_port(&ns.bridge_name, &peer_name).await;
    }

    ovs::bridge::delete_bridge(&ns.bridge_name).await?;
    Ok(())
}

/// DeleteNetwork (spec §4.3).
pub async fn handle_delete(state: &mut DriverState, network_id: String) -> Result<()> {
    let ns = state
        .networks
        .get(&network_id)
        .cloned()
        .ok_or_else(|| crate::error::DriverError::NetworkNotFound(network_id.clone()))?;

    teardown_network(state, &ns).await?;

    state.networks.remove(&network_id);
    state.stack_mirror_configs.remove(&network_id);
    state.port_desc_snapshots.remove(&network_id);

    notify(
        state,
        NotifyMsg {
            msg_type: NotifyType::Network,
            operation: NotifyOperation::Delete,
            network_name: ns.network_name.clone(),
            details: NotifyDetails {
                name: Some(ns.network_name),
                id: Some(network_id),
                ..Default::default()
            },
        },
    )
    .await;

    Ok(())
}

/// Start-up enumeration of driver-owned networks still known to the runtime.
/// For each, reconstructs `CreateOptions`/`StackMirrorConfig` from the
/// runtime's own record of the network's options and IPAM gateway, selects
/// `RecreateBadBridge`/`RecreateDownBridge`/`Create` per bridge health (spec
/// §4.7), then waits for every enqueued op to drain before returning.
pub async fn restore(
    sender: &super::OpSender,
    runtime: &dyn crate::runtime::ContainerRuntime,
    controller: &dyn crate::controller::ControllerClient,
    topology: &super::stack::Topology,
    opts: &crate::config::DriverOpts,
) -> Result<()> {
    let (remote_dp_name, remote_mirror_of_port) =
        super::stack::parse_stack_mirror_target(opts).unwrap_or_default();

    let driver_networks = runtime.list_driver_networks().await?;
    for (network_id, network_name) in driver_networks {
        let network = runtime.inspect_network(&network_id).await?;

        let generic = network.options.clone().unwrap_or_default();
        let gateway = network
            .ipam
            .as_ref()
            .and_then(|ipam| ipam.config.as_ref())
            .and_then(|configs| configs.first())
            .and_then(|config| config.gateway.clone());
        let options = crate::options::extract_create_options(&generic, gateway)?;

        let stack_mirror_config = StackMirrorConfig {
            lb_port: OfPort(options.lbport),
            tunnel_vid: super::stack::default_tunnel_vid(options.vlan, options.mirror_tunnel_vid),
            remote_dp_name: remote_dp_name.clone(),
            remote_mirror_of_port,
        };

        let bridge_name = options
            .bridge_name
            .clone()
            .unwrap_or_else(|| naming::default_bridge_name(&network_id));
        let up = ovs::bridge::is_up(&bridge_name).await;
        let has_addr = up
            && crate::netns::get_interface_addr(&bridge_name)
                .await
                .unwrap_or(None)
                .is_some();
        let operation = if up && !has_addr {
            CreateOperation::RecreateBadBridge
        } else if !up {
            CreateOperation::RecreateDownBridge
        } else {
            CreateOperation::Create
        };

        if operation != CreateOperation::Create {
            prepare_bridge(&network_id, &network_name, &options, topology, controller, operation).await?;
        }

        sender
            .create(network_id, options, stack_mirror_config, operation)
            .await?;
    }
    sender.wait_drained().await;
    Ok(())
}
