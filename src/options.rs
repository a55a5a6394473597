//! Option extraction and validation for CreateNetwork requests (spec §4.2
//! step 1, §4.8, §6 "Recognized network options"). Pure parsing — no I/O.

use std::collections::HashMap;

use crate::error::{DriverError, Result};
use crate::model::{AddPortSpec, BridgeMode, OfPort};

pub const OPT_BRIDGE_NAME: &str = "ovs.bridge.name";
pub const OPT_BRIDGE_DPID: &str = "ovs.bridge.dpid";
pub const OPT_BRIDGE_CONTROLLER: &str = "ovs.bridge.controller";
pub const OPT_BRIDGE_VLAN: &str = "ovs.bridge.vlan";
pub const OPT_BRIDGE_MTU: &str = "ovs.bridge.mtu";
pub const OPT_BRIDGE_MODE: &str = "ovs.bridge.mode";
pub const OPT_ADD_PORTS: &str = "ovs.bridge.add_ports";
pub const OPT_ADD_COPRO_PORTS: &str = "ovs.bridge.add_copro_ports";
pub const OPT_NAT_ACL: &str = "ovs.bridge.nat_acl";
pub const OPT_VLAN_OUT_ACL: &str = "ovs.bridge.vlan_out_acl";
pub const OPT_DEFAULT_ACL: &str = "ovs.bridge.default_acl";
pub const OPT_BIND_INTERFACE: &str = "ovs.bridge.bind_interface";
pub const OPT_DHCP: &str = "ovs.bridge.dhcp";
pub const OPT_USERSPACE: &str = "ovs.bridge.userspace";
pub const OPT_OVS_LOCAL_MAC: &str = "ovs.bridge.ovs_local_mac";
pub const OPT_LBPORT: &str = "ovs.bridge.lbport";
pub const OPT_MIRROR_TUNNEL_VID: &str = "ovs.bridge.mirror_tunnel_vid";
pub const OPT_PREALLOCATE_PORTS: &str = "ovs.bridge.preallocate_ports";
pub const OPT_INTERNAL: &str = "internal";
pub const OPT_PORTMAP: &str = "portmap";

pub const DEFAULT_VLAN: u16 = 100;
pub const DEFAULT_MTU: u32 = 1500;
pub const DEFAULT_LBPORT: u32 = 99;

pub const LABEL_MAC_PREFIX: &str = "dovesnap.faucet.mac_prefix";
pub const LABEL_PORTACL: &str = "dovesnap.faucet.portacl";
pub const LABEL_MIRROR: &str = "dovesnap.faucet.mirror";

/// The fully extracted/validated option surface of a CreateNetwork request.
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub bridge_name: Option<String>,
    pub bridge_dpid: Option<String>,
    pub controller: Option<String>,
    pub vlan: u16,
    pub mtu: u32,
    pub mode: BridgeMode,
    pub add_ports: Vec<AddPortSpec>,
    pub add_copro_ports: Vec<AddPortSpec>,
    pub nat_acl: Option<String>,
    pub vlan_out_acl: Option<String>,
    pub default_acl: Option<String>,
    pub bind_interface: Option<String>,
    pub use_dhcp: bool,
    pub userspace: bool,
    pub ovs_local_mac: Option<String>,
    pub lbport: u32,
    pub mirror_tunnel_vid: Option<u16>,
    pub preallocate_ports: u32,
    pub internal: bool,
    pub gateway: Option<String>,
}

/// Options carried on an OFPortContainer, replayed on Leave to reverse the
/// portmap (spec §3 "OFPortContainer").
#[derive(Debug, Clone, Default)]
pub struct JoinOptions {
    pub portmap: Vec<PortMapEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpProto {
    Tcp,
    Udp,
}

#[derive(Debug, Clone)]
pub struct PortMapEntry {
    pub host_port: u16,
    pub container_port: u16,
    pub proto: IpProto,
}

fn get<'a>(generic: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    generic.get(key).map(|s| s.as_str())
}

/// Parse one `name[/ofport[/acls]]` entry.
fn parse_add_port(entry: &str) -> Result<AddPortSpec> {
    let mut parts = entry.splitn(3, '/');
    let name = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| DriverError::ConfigInvalid(format!("empty add_ports entry {:?}", entry)))?
        .to_string();
    let of_port = match parts.next() {
        Some(p) if !p.is_empty() => Some(OfPort(p.parse::<u32>().map_err(|_| {
            DriverError::ConfigInvalid(format!("invalid ofport in add_ports entry {:?}", entry))
        })?)),
        _ => None,
    };
    let acls = parts.next().filter(|s| !s.is_empty()).map(str::to_string);
    Ok(AddPortSpec {
        name,
        of_port,
        acls,
    })
}

/// Parse a comma-separated `add_ports`/`add_copro_ports` option value.
pub fn parse_add_ports(raw: &str) -> Result<Vec<AddPortSpec>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(parse_add_port)
        .collect()
}

fn parse_bool(raw: &str) -> bool {
    matches!(raw, "true" | "1" | "True" | "TRUE")
}

fn parse_portmap(raw: &str) -> Result<Vec<PortMapEntry>> {
    // Docker's PortMap generic option is itself a JSON-ish list; the plugin
    // transport layer (`plugin.rs`) hands this module the already-decoded
    // `host:container/proto` triples.
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            let (ports, proto) = entry
                .split_once('/')
                .ok_or_else(|| DriverError::ConfigInvalid(format!("bad portmap entry {:?}", entry)))?;
            let (host, container) = ports
                .split_once(':')
                .ok_or_else(|| DriverError::ConfigInvalid(format!("bad portmap entry {:?}", entry)))?;
            let proto = match proto {
                "6" | "tcp" => IpProto::Tcp,
                "17" | "udp" => IpProto::Udp,
                other => {
                    return Err(DriverError::ConfigInvalid(format!(
                        "unrecognized ip proto {:?}",
                        other
                    )))
                }
            };
            Ok(PortMapEntry {
                host_port: host
                    .parse()
                    .map_err(|_| DriverError::ConfigInvalid(format!("bad host port in {:?}", entry)))?,
                container_port: container
                    .parse()
                    .map_err(|_| DriverError::ConfigInvalid(format!("bad container port in {:?}", entry)))?,
                proto,
            })
        })
        .collect()
}

/// Extract and validate the full `CreateOptions` surface from a CreateNetwork
/// request's generic option map (spec §4.2 step 1, §6).
pub fn extract_create_options(
    generic: &HashMap<String, String>,
    gateway: Option<String>,
) -> Result<CreateOptions> {
    let mode = match get(generic, OPT_BRIDGE_MODE) {
        Some(raw) => raw.parse()?,
        None => BridgeMode::Flat,
    };
    let use_dhcp = get(generic, OPT_DHCP).map(parse_bool).unwrap_or(false);
    let internal = get(generic, OPT_INTERNAL).map(parse_bool).unwrap_or(false);

    if use_dhcp {
        if mode != BridgeMode::Flat {
            return Err(DriverError::ConfigInvalid(
                "ovs.bridge.dhcp requires ovs.bridge.mode=flat".into(),
            ));
        }
        if gateway.is_some() {
            return Err(DriverError::ConfigInvalid(
                "ovs.bridge.dhcp is incompatible with a gateway".into(),
            ));
        }
        if !internal {
            return Err(DriverError::ConfigInvalid(
                "ovs.bridge.dhcp requires internal=true".into(),
            ));
        }
    }

    let add_ports = match get(generic, OPT_ADD_PORTS) {
        Some(raw) => parse_add_ports(raw)?,
        None => Vec::new(),
    };
    let add_copro_ports = match get(generic, OPT_ADD_COPRO_PORTS) {
        Some(raw) => parse_add_ports(raw)?,
        None => Vec::new(),
    };

    let vlan = match get(generic, OPT_BRIDGE_VLAN) {
        Some(raw) => raw
            .parse()
            .map_err(|_| DriverError::ConfigInvalid(format!("invalid {}: {:?}", OPT_BRIDGE_VLAN, raw)))?,
        None => DEFAULT_VLAN,
    };
    let mtu = match get(generic, OPT_BRIDGE_MTU) {
        Some(raw) => raw
            .parse()
            .map_err(|_| DriverError::ConfigInvalid(format!("invalid {}: {:?}", OPT_BRIDGE_MTU, raw)))?,
        None => DEFAULT_MTU,
    };
    let lbport = match get(generic, OPT_LBPORT) {
        Some(raw) => raw
            .parse()
            .map_err(|_| DriverError::ConfigInvalid(format!("invalid {}: {:?}", OPT_LBPORT, raw)))?,
        None => DEFAULT_LBPORT,
    };
    let mirror_tunnel_vid = match get(generic, OPT_MIRROR_TUNNEL_VID) {
        Some(raw) => Some(
            raw.parse()
                .map_err(|_| DriverError::ConfigInvalid(format!("invalid {}: {:?}", OPT_MIRROR_TUNNEL_VID, raw)))?,
        ),
        None => None,
    };
    let preallocate_ports = match get(generic, OPT_PREALLOCATE_PORTS) {
        Some(raw) => raw.parse().map_err(|_| {
            DriverError::ConfigInvalid(format!("invalid {}: {:?}", OPT_PREALLOCATE_PORTS, raw))
        })?,
        None => 0,
    };

    Ok(CreateOptions {
        bridge_name: get(generic, OPT_BRIDGE_NAME).map(str::to_string),
        bridge_dpid: get(generic, OPT_BRIDGE_DPID).map(str::to_string),
        controller: get(generic, OPT_BRIDGE_CONTROLLER).map(str::to_string),
        vlan,
        mtu,
        mode,
        add_ports,
        add_copro_ports,
        nat_acl: get(generic, OPT_NAT_ACL).map(str::to_string),
        vlan_out_acl: get(generic, OPT_VLAN_OUT_ACL).map(str::to_string),
        default_acl: get(generic, OPT_DEFAULT_ACL).map(str::to_string),
        bind_interface: get(generic, OPT_BIND_INTERFACE).map(str::to_string),
        use_dhcp,
        userspace: get(generic, OPT_USERSPACE).map(parse_bool).unwrap_or(false),
        ovs_local_mac: get(generic, OPT_OVS_LOCAL_MAC).map(str::to_string),
        lbport,
        mirror_tunnel_vid,
        preallocate_ports,
        internal,
        gateway,
    })
}

pub fn extract_join_options(generic: &HashMap<String, String>) -> Result<JoinOptions> {
    let portmap = match get(generic, OPT_PORTMAP) {
        Some(raw) => parse_portmap(raw)?,
        None => Vec::new(),
    };
    Ok(JoinOptions { portmap })
}

/// Per-network string selection (spec §4.8). Splits on `/` then `:`; a
/// 1-element pair sets the running default (last one wins), a 2-element pair
/// applies only when its first element equals `network_name`.
pub fn resolve_for_network(raw: &str, network_name: &str) -> String {
    let mut resolved = String::new();
    for entry in raw.split('/') {
        if entry.is_empty() {
            continue;
        }
        match entry.split_once(':') {
            None => resolved = entry.to_string(),
            Some((name, value)) if name == network_name => resolved = value.to_string(),
            Some(_) => {}
        }
    }
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolver_matches_named_entry() {
        assert_eq!(resolve_for_network("a:1/b:2/c:3", "b"), "2");
    }

    #[test]
    fn resolver_treats_bare_value_as_default() {
        assert_eq!(resolve_for_network("onlyvalue", "anything"), "onlyvalue");
    }

    #[test]
    fn resolver_returns_empty_when_nothing_matches_and_no_default() {
        assert_eq!(resolve_for_network("a:1", "b"), "");
    }

    #[test]
    fn resolver_last_bare_default_wins() {
        assert_eq!(resolve_for_network("one/two/c:3", "nomatch"), "two");
    }

    #[test]
    fn add_ports_parses_name_port_acl() {
        let parsed = parse_add_ports("eth1/5,eth2/6/myacl").unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].name, "eth1");
        assert_eq!(parsed[0].of_port, Some(OfPort(5)));
        assert_eq!(parsed[1].acls.as_deref(), Some("myacl"));
    }

    #[test]
    fn dhcp_requires_flat_no_gateway_and_internal() {
        let mut generic = HashMap::new();
        generic.insert(OPT_DHCP.to_string(), "true".to_string());
        generic.insert(OPT_INTERNAL.to_string(), "true".to_string());
        assert!(extract_create_options(&generic, None).is_ok());

        let mut bad = generic.clone();
        bad.insert(OPT_BRIDGE_MODE.to_string(), "nat".to_string());
        assert!(extract_create_options(&bad, None).is_err());

        assert!(extract_create_options(&generic, Some("10.0.0.1/24".to_string())).is_err());

        let mut not_internal = generic.clone();
        not_internal.insert(OPT_INTERNAL.to_string(), "false".to_string());
        assert!(extract_create_options(&not_internal, None).is_err());
    }
}
