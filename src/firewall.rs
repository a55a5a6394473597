//! NAT and port-forwarding rule management via the `iptables` crate, matching
//! the teacher's `iptables::new(false)` / `.append`/`.delete` usage
//! (`vmm/net.rs`). Grounded on `ovs_iptables.go`'s `natOut`/`mustPortMap`.

use crate::error::{DriverError, Result};
use crate::options::IpProto;

fn table() -> Result<iptables::IPTables> {
    iptables::new(false).map_err(|e| DriverError::Iptables(e.to_string()))
}

/// Whole-network MASQUERADE rule for NAT-mode networks (spec §4.2 step 5,
/// §4.3). `add` selects `-I`/insert vs. `-D`/delete.
pub fn nat_out(gateway_cidr: &str, add: bool) -> Result<()> {
    let ipt = table()?;
    let rule = format!("-s {} -j MASQUERADE", gateway_cidr);
    if add {
        ipt.insert("nat", "POSTROUTING", &rule, 1)
            .map_err(|e| DriverError::Iptables(e.to_string()))?;
    } else {
        ipt.delete("nat", "POSTROUTING", &rule)
            .map_err(|e| DriverError::Iptables(e.to_string()))?;
    }
    Ok(())
}

fn proto_str(proto: IpProto) -> &'static str {
    match proto {
        IpProto::Tcp => "tcp",
        IpProto::Udp => "udp",
    }
}

/// The 4-rule per-container portmap (spec §4.4 step 5, §0.5). The FILTER
/// DOCKER accept rule hardcodes `-p tcp` in the original regardless of
/// `ip_proto`; reproduced verbatim here for behavioral fidelity (see
/// DESIGN.md).
fn portmap_rules(
    bridge_name: &str,
    proto: IpProto,
    gateway_ip: &str,
    host_ip: &str,
    host_port: u16,
    port: u16,
) -> [(&'static str, &'static str, String); 4] {
    let proto = proto_str(proto);
    let dst = format!("{}:{}", host_ip, port);
    [
        (
            "nat",
            "DOCKER",
            format!(
                "-p {} -d {} --dport {} -j DNAT --to-destination {}",
                proto, gateway_ip, host_port, dst
            ),
        ),
        (
            "nat",
            "OUTPUT",
            format!(
                "-p {} -d {} --dport {} -j DNAT --to-destination {}",
                proto, gateway_ip, host_port, dst
            ),
        ),
        (
            "nat",
            "POSTROUTING",
            format!(
                "-p {} -s {} -d {} --dport {} -j MASQUERADE",
                proto, host_ip, host_ip, port
            ),
        ),
        (
            "filter",
            "DOCKER",
            format!(
                "! -i {} -o {} -p tcp -d {} --dport {} -j ACCEPT",
                bridge_name, bridge_name, host_ip, port
            ),
        ),
    ]
}

pub fn add_gateway_port_map(
    bridge_name: &str,
    proto: IpProto,
    gateway_ip: &str,
    host_ip: &str,
    host_port: u16,
    port: u16,
) -> Result<()> {
    let ipt = table()?;
    for (chain_table, chain, rule) in portmap_rules(bridge_name, proto, gateway_ip, host_ip, host_port, port) {
        ipt.append(chain_table, chain, &rule)
            .map_err(|e| DriverError::Iptables(e.to_string()))?;
    }
    Ok(())
}

pub fn delete_gateway_port_map(
    bridge_name: &str,
    proto: IpProto,
    gateway_ip: &str,
    host_ip: &str,
    host_port: u16,
    port: u16,
) -> Result<()> {
    let ipt = table()?;
    for (chain_table, chain, rule) in portmap_rules(bridge_name, proto, gateway_ip, host_ip, host_port, port) {
        ipt.delete(chain_table, chain, &rule)
            .map_err(|e| DriverError::Iptables(e.to_string()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn portmap_rules_hardcode_tcp_on_filter_accept() {
        let rules = portmap_rules("odsbr12345", IpProto::Udp, "10.0.0.1", "10.0.0.5", 8080, 80);
        let filter_rule = &rules[3];
        assert_eq!(filter_rule.0, "filter");
        assert!(filter_rule.2.contains("-p tcp"));
    }

    #[test]
    fn portmap_rules_use_given_proto_elsewhere() {
        let rules = portmap_rules("odsbr12345", IpProto::Udp, "10.0.0.1", "10.0.0.5", 8080, 80);
        assert!(rules[0].2.contains("-p udp"));
        assert!(rules[1].2.contains("-p udp"));
        assert!(rules[2].2.contains("-p udp"));
    }
}
