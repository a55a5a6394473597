//! Stacking / mirror bridge setup (spec §4.5). Run once at start-up from
//! `main.rs`, before the serializer starts taking ops.

use std::collections::HashMap;

use crate::config::DriverOpts;
use crate::error::Result;
use crate::naming;
use crate::ovs::bridge::{make_loopback_bridge, make_mirror_bridge, CreateBridgeOpts};
use crate::ovs::port::get_of_port;
use crate::ovs::{ofctl, vsctl};

/// Three-way mode (spec §9 "Mutually exclusive mirror vs stacking"):
/// `usingStacking` requires an empty mirror-bridge-out, and
/// `usingStackMirroring` requires stacking.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    pub mirror_bridge_name: Option<String>,
    pub stack_dp_name: Option<String>,
    pub stack_dpid_uint: Option<u64>,
    pub loopback_bridge_name: Option<String>,
}

impl Topology {
    pub fn using_mirror_bridge(&self) -> bool {
        self.mirror_bridge_name.is_some()
    }

    pub fn using_stacking(&self) -> bool {
        self.stack_dp_name.is_some() && !self.using_mirror_bridge()
    }

    pub fn using_stack_mirroring(&self) -> bool {
        self.using_stacking() && self.loopback_bridge_name.is_some()
    }
}

/// Build the `Topology` from process-level flags and the short engine id
/// (spec §4.5). Pure: does not touch OVS.
pub fn plan_topology(opts: &DriverOpts, short_engine_id: &str) -> Topology {
    let mut topology = Topology::default();

    if opts.mirror_bridge_out.is_some() {
        topology.mirror_bridge_name = Some(naming::mirror_bridge_name(short_engine_id));
    }

    if topology.mirror_bridge_name.is_none()
        && !opts.stacking_interfaces.is_empty()
        && opts.default_controllers.is_some()
    {
        let dp_name = naming::stack_dp_name(short_engine_id);
        let dpid = naming::stack_dpid(short_engine_id);
        topology.stack_dpid_uint = naming::dpid_to_uint(&dpid);
        topology.stack_dp_name = Some(dp_name);
    }

    if topology.stack_dp_name.is_some() && opts.stack_mirror_interface.is_some() {
        topology.loopback_bridge_name = Some(naming::loopback_bridge_name(short_engine_id));
    }

    topology
}

/// Create the mirror bridge and, if configured, attach its in-interface
/// (spec §4.5 paragraph 1).
pub async fn setup_mirror_bridge(topology: &Topology, opts: &DriverOpts) -> Result<()> {
    let Some(bridge_name) = &topology.mirror_bridge_name else {
        return Ok(());
    };
    let mirror_out = opts.mirror_bridge_out.as_deref().unwrap_or_default();
    vsctl(&["add-br", bridge_name]).await.ok();
    vsctl(&[
        "add-port",
        bridge_name,
        mirror_out,
        "--",
        "set",
        "Interface",
        mirror_out,
        "ofport_request=1",
    ])
    .await?;
    let out_port = get_of_port(mirror_out).await.unwrap_or(crate::model::OfPort(1));
    make_mirror_bridge(bridge_name, out_port.0).await?;

    if let Some(mirror_in) = &opts.mirror_bridge_in {
        vsctl(&["add-port", bridge_name, mirror_in]).await?;
    }
    Ok(())
}

/// Create the stacking bridge and push the merged stack-link YAML for every
/// configured `dp:port:iface` triple (spec §4.5 paragraph 2).
pub async fn setup_stacking_bridge(
    topology: &Topology,
    opts: &DriverOpts,
    controller: &dyn crate::controller::ControllerClient,
) -> Result<()> {
    let (Some(dp_name), Some(dpid_uint)) = (&topology.stack_dp_name, topology.stack_dpid_uint) else {
        return Ok(());
    };
    let create_opts = CreateBridgeOpts {
        controller: opts.default_controllers.as_deref(),
        dpid: Some(&naming::stack_dpid(dp_name.trim_start_matches("dovesnap"))),
        add_ports: "",
        userspace: false,
        ovs_local_mac: None,
    };
    crate::ovs::bridge::create_bridge(dp_name, &create_opts).await?;

    let mut local_interfaces = String::new();
    let mut remote_dps: HashMap<String, (u32, String)> = HashMap::new();

    for triple in opts.stacking_interfaces.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let mut parts = triple.splitn(3, ':');
        let (Some(remote_dp), Some(remote_port), Some(iface)) = (parts.next(), parts.next(), parts.next()) else {
            continue;
        };
        let remote_port: u32 = remote_port.parse().unwrap_or(0);
        let local_port = crate::ovs::port::add_internal_port(dp_name, iface, None).await?;
        local_interfaces.push_str(&crate::yaml::stack_interface_yaml(local_port.0, remote_dp, remote_port));
        remote_dps.insert(remote_dp.to_string(), (local_port.0, iface.to_string()));
    }

    let local_dp_yaml = crate::yaml::merge_dp_interfaces_yaml(
        dp_name,
        dpid_uint,
        &format!("Dovesnap Stacking Bridge for {}", dp_name),
        &local_interfaces,
        false,
    );

    let mut remote_yaml = String::new();
    for (remote_dp, (local_port, _)) in &remote_dps {
        let stack_priority1 = opts
            .stack_priority1
            .as_deref()
            .is_some_and(|p| p == remote_dp);
        let mut interfaces = crate::yaml::stack_interface_yaml(*local_port, dp_name, *local_port);
        if stack_priority1 {
            interfaces.push_str(crate::yaml::STACK_PRIORITY_ONE);
        }
        remote_yaml.push_str(&crate::yaml::merge_dp_interfaces_minimal_yaml(remote_dp, &interfaces));
    }

    let config_yaml = format!("{{dps: {{{}{}}}}}", local_dp_yaml, remote_yaml);
    controller.set_config_file(config_yaml).await?;
    Ok(())
}

/// Create the loopback bridge for stack-mirroring (spec §4.5 paragraph 3).
pub async fn setup_loopback_bridge(topology: &Topology) -> Result<()> {
    let Some(bridge_name) = &topology.loopback_bridge_name else {
        return Ok(());
    };
    vsctl(&["add-br", bridge_name]).await.ok();
    make_loopback_bridge(bridge_name).await?;
    Ok(())
}

/// Per-network default tunnel VID: `bridge_vlan + 256` unless overridden
/// (spec §4.5 last sentence).
pub fn default_tunnel_vid(bridge_vlan: u16, override_vid: Option<u16>) -> u16 {
    override_vid.unwrap_or(bridge_vlan.wrapping_add(256))
}

/// Parse the single `remoteDpName:ofport` pair naming the far end of the
/// stack-mirror tunnel (spec §6 "stack-mirror-interface").
pub fn parse_stack_mirror_target(opts: &DriverOpts) -> Option<(String, crate::model::OfPort)> {
    let raw = opts.stack_mirror_interface.as_deref()?;
    let (dp_name, of_port) = raw.split_once(':')?;
    Some((dp_name.to_string(), crate::model::OfPort(of_port.parse().ok()?)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mirror_and_stacking_are_mutually_exclusive() {
        let mut topology = Topology {
            mirror_bridge_name: Some("odsmir000001".into()),
            stack_dp_name: Some("dovesnap000001".into()),
            ..Default::default()
        };
        assert!(topology.using_mirror_bridge());
        assert!(!topology.using_stacking());

        topology.mirror_bridge_name = None;
        assert!(topology.using_stacking());
    }

    #[test]
    fn default_tunnel_vid_adds_256() {
        assert_eq!(default_tunnel_vid(100, None), 356);
        assert_eq!(default_tunnel_vid(100, Some(900)), 900);
    }
}
