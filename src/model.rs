//! In-memory state model owned exclusively by the serializer task (spec §3).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A 32-bit OpenFlow port number, scoped to one bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OfPort(pub u32);

impl OfPort {
    /// Reserved OF port denoting the bridge-local port (invariant 3).
    pub const BRIDGE_LOCAL: OfPort = OfPort(0xFFFF_FFFE);

    pub fn is_bridge_local(&self) -> bool {
        *self == Self::BRIDGE_LOCAL
    }
}

impl std::fmt::Display for OfPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for OfPort {
    fn default() -> Self {
        OfPort(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeMode {
    Flat,
    Nat,
    Routed,
}

impl Default for BridgeMode {
    fn default() -> Self {
        BridgeMode::Flat
    }
}

impl std::str::FromStr for BridgeMode {
    type Err = crate::error::DriverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "flat" => Ok(BridgeMode::Flat),
            "nat" => Ok(BridgeMode::Nat),
            "routed" => Ok(BridgeMode::Routed),
            other => Err(crate::error::DriverError::ConfigInvalid(format!(
                "unrecognized ovs.bridge.mode {:?}",
                other
            ))),
        }
    }
}

/// One parsed entry from `add_ports`/`add_copro_ports`: `name[/ofport[/acls]]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddPortSpec {
    pub name: String,
    pub of_port: Option<OfPort>,
    pub acls: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerState {
    pub name: String,
    pub id: String,
    pub of_port: OfPort,
    pub mac_address: String,
    pub host_ip: String,
    pub labels: HashMap<String, String>,
    pub interface_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExternalPortState {
    pub name: String,
    pub of_port: OfPort,
    pub mac_address: String,
}

/// A patch link to a mirror or stacking bridge: both ends' OF ports plus the
/// peer bridge name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OtherBridgePortState {
    pub local_of_port: OfPort,
    pub peer_of_port: OfPort,
    pub peer_bridge_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DynamicNetworkState {
    pub short_engine_id: String,
    pub containers: HashMap<String, ContainerState>,
    pub external_ports: HashMap<String, ExternalPortState>,
    pub other_bridge_ports: HashMap<String, OtherBridgePortState>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkState {
    pub network_id: String,
    pub network_name: String,
    pub bridge_name: String,
    pub bridge_dpid: String,
    pub bridge_dpid_uint: u64,
    pub bridge_vlan: u16,
    pub mtu: u32,
    pub preallocate_ports: u32,
    pub mode: BridgeMode,
    pub add_ports: Vec<AddPortSpec>,
    pub add_copro_ports: Vec<AddPortSpec>,
    pub gateway_ip: Option<String>,
    pub gateway_mask: Option<String>,
    pub bind_interface: Option<String>,
    pub use_dhcp: bool,
    pub userspace: bool,
    pub nat_acl: Option<String>,
    pub vlan_out_acl: Option<String>,
    pub default_acl: Option<String>,
    pub port_acl: Option<String>,
    pub ovs_local_mac: Option<String>,
    pub controller: String,
    pub dynamic: DynamicNetworkState,
}

/// One per network (spec §3). Lives co-terminously with its `NetworkState`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StackMirrorConfig {
    pub lb_port: OfPort,
    pub tunnel_vid: u16,
    pub remote_dp_name: String,
    pub remote_mirror_of_port: OfPort,
}

/// Internal, keyed by endpoint-id. Not part of `NetworkState` since it lives
/// in the serializer's own `OFPorts` table (spec §3).
#[derive(Debug, Clone)]
pub struct OfPortContainer {
    pub of_port: OfPort,
    pub container: bollard::models::ContainerInspectResponse,
    pub dhcp_child_pid: Option<u32>,
    pub options: crate::options::JoinOptions,
}
