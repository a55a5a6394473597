//! Pure formatting of controller YAML fragments (spec §4.2, §4.5, §9 "Embedded
//! YAML assembly"). Field names and ordering are preserved bit-for-bit, since
//! the controller's config parser is sensitive to both.

pub const HARDWARE: &str = "Open vSwitch";

pub fn vlan_interface_yaml(of_port: u32, description: &str, vlan: u16, acls_in: &str) -> String {
    format!(
        "{}: {{description: {}, native_vlan: {}, acls_in: [{}]}},",
        of_port, description, vlan, acls_in
    )
}

/// The bridge-local port entry for NAT/routed networks, carrying
/// `opstatus_reconf: False` (spec §4.2 step 3).
pub fn local_vlan_interface_yaml(of_port: u32, description: &str, vlan: u16, acls_in: &str) -> String {
    format!(
        "{}: {{opstatus_reconf: False, description: {}, native_vlan: {}, acls_in: [{}]}},",
        of_port, description, vlan, acls_in
    )
}

pub fn copro_interface_yaml(of_port: u32, description: &str, strategy: &str) -> String {
    format!(
        "{}: {{description: {}, coprocessor: {{strategy: {}}}}},",
        of_port, description, strategy
    )
}

pub fn stack_interface_yaml(of_port: u32, remote_dp_name: &str, remote_of_port: u32) -> String {
    format!(
        "{}: {{description: stack link to {}, stack: {{dp: {}, port: {}}}}},",
        of_port, remote_dp_name, remote_dp_name, remote_of_port
    )
}

/// The mirror bridge's loopback-port entry (`driver.go`'s one-off inline
/// format, not a named helper in the original).
pub fn output_only_interface_yaml(of_port: u32) -> String {
    format!("{}: {{description: mirror, output_only: true}},", of_port)
}

pub fn merge_dp_interfaces_minimal_yaml(dp_name: &str, add_interfaces: &str) -> String {
    format!("{}: {{interfaces: {{{}}}}},", dp_name, add_interfaces)
}

pub fn merge_dp_interfaces_yaml(
    dp_name: &str,
    uint_dpid: u64,
    description: &str,
    add_interfaces: &str,
    egress_pipeline: bool,
) -> String {
    format!(
        "{}: {{dp_id: {}, description: {}, hardware: {}, egress_pipeline: {}, interfaces: {{{}}}}},",
        dp_name,
        uint_dpid,
        description,
        HARDWARE,
        egress_pipeline,
        add_interfaces
    )
}

pub fn merge_single_dp_minimal_yaml(dp_name: &str, add_interfaces: &str) -> String {
    format!(
        "{{dps: {{{}}}}}",
        merge_dp_interfaces_minimal_yaml(dp_name, add_interfaces)
    )
}

pub fn merge_single_dp_yaml(
    dp_name: &str,
    uint_dpid: u64,
    description: &str,
    add_interfaces: &str,
    egress_pipeline: bool,
) -> String {
    format!(
        "{{dps: {{{}}}}}",
        merge_dp_interfaces_yaml(dp_name, uint_dpid, description, add_interfaces, egress_pipeline)
    )
}

/// `stack: {priority: 1}` suffix, appended to the remote DP's own interfaces
/// block when `stack_priority1` names that DP (spec §4.5).
pub const STACK_PRIORITY_ONE: &str = "stack: {priority: 1},";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vlan_interface_matches_expected_layout() {
        assert_eq!(
            vlan_interface_yaml(5, "eth1", 200, "allow"),
            "5: {description: eth1, native_vlan: 200, acls_in: [allow]},"
        );
    }

    #[test]
    fn local_vlan_interface_carries_opstatus_reconf() {
        let s = local_vlan_interface_yaml(0xFFFFFFFE, "gateway", 100, "");
        assert!(s.starts_with("4294967294: {opstatus_reconf: False"));
    }

    #[test]
    fn merge_single_dp_wraps_dps() {
        let s = merge_single_dp_yaml("netname", 1, "desc", "5: {},", false);
        assert_eq!(
            s,
            "{dps: {netname: {dp_id: 1, description: desc, hardware: Open vSwitch, egress_pipeline: false, interfaces: {5: {},}},}}"
        );
    }

    #[test]
    fn stack_interface_references_both_ends() {
        let s = stack_interface_yaml(3, "dovesnap000001", 7);
        assert_eq!(
            s,
            "3: {description: stack link to dovesnap000001, stack: {dp: dovesnap000001, port: 7}},"
        );
    }
}
