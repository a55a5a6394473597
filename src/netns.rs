//! Kernel netlink / namespace filesystem adapters (spec §1 "Kernel netlink /
//! iptables / namespace filesystem"). Shell-outs to `ip`, matching the
//! teacher's own `Command::new("ip")` pattern for link/address management.

use std::path::Path;

use tokio::process::Command;
use tracing::debug;

use crate::error::{DriverError, Result};

const NETNS_PATH: &str = "/var/run/netns";

async fn run_ip(args: &[&str]) -> Result<String> {
    let output = Command::new("ip")
        .args(args)
        .output()
        .await
        .map_err(|e| DriverError::Netns(format!("exec ip failed: {}", e)))?;
    if !output.status.success() {
        return Err(DriverError::Netns(format!(
            "ip {:?} exited {}: {}",
            args,
            output.status,
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

pub async fn create_veth_pair(name: &str, peer_name: &str) -> Result<()> {
    run_ip(&["link", "add", name, "type", "veth", "peer", "name", peer_name]).await?;
    Ok(())
}

pub async fn delete_link(name: &str) -> Result<()> {
    run_ip(&["link", "del", name]).await?;
    Ok(())
}

pub async fn link_up(name: &str) -> Result<()> {
    run_ip(&["link", "set", name, "up"]).await?;
    Ok(())
}

pub async fn set_mtu(name: &str, mtu: u32) -> Result<()> {
    run_ip(&["link", "set", name, "mtu", &mtu.to_string()]).await?;
    Ok(())
}

pub async fn link_is_up(name: &str) -> Result<bool> {
    let output = run_ip(&["-o", "link", "show", name]).await?;
    Ok(output.contains("UP"))
}

pub async fn set_interface_ip(name: &str, cidr: &str) -> Result<()> {
    run_ip(&["addr", "add", cidr, "dev", name]).await?;
    Ok(())
}

pub async fn get_interface_addr(name: &str) -> Result<Option<String>> {
    let output = run_ip(&["-o", "-4", "addr", "show", name]).await?;
    Ok(output
        .split_whitespace()
        .skip_while(|tok| *tok != "inet")
        .nth(1)
        .map(str::to_string))
}

/// Read a host-side interface's MAC before it has been moved into any
/// namespace (spec §4.4 CreateEndpoint: "read back the peer's MAC").
pub async fn get_link_mac(name: &str) -> Result<String> {
    let output = run_ip(&["link", "show", name]).await?;
    output
        .split_whitespace()
        .skip_while(|tok| *tok != "link/ether")
        .nth(1)
        .map(str::to_string)
        .ok_or_else(|| DriverError::Netns(format!("no mac found for {}", name)))
}

pub async fn set_link_mac(name: &str, mac: &str) -> Result<()> {
    run_ip(&["link", "set", name, "address", mac]).await?;
    Ok(())
}

/// Symlink the container's `/proc/<pid>/ns/net` into `/var/run/netns/<id>`,
/// replacing any stale symlink left from a previous run (spec §4.4 step 2).
pub async fn create_ns_link(pid: u32, container_id: &str) -> Result<()> {
    let proc_path = format!("/proc/{}/ns/net", pid);
    let ns_path = Path::new(NETNS_PATH).join(container_id);

    if tokio::fs::symlink_metadata(&ns_path).await.is_ok() {
        debug!(path = %ns_path.display(), "removing stale netns symlink");
        tokio::fs::remove_file(&ns_path)
            .await
            .map_err(|e| DriverError::Netns(e.to_string()))?;
    }
    tokio::fs::create_dir_all(NETNS_PATH)
        .await
        .map_err(|e| DriverError::Netns(e.to_string()))?;
    #[cfg(unix)]
    tokio::fs::symlink(&proc_path, &ns_path)
        .await
        .map_err(|e| DriverError::Netns(e.to_string()))?;
    Ok(())
}

async fn run_in_ns(container_id: &str, args: &[&str]) -> Result<String> {
    let mut full = vec!["netns", "exec", container_id];
    full.extend_from_slice(args);
    run_ip(&full).await
}

pub async fn set_in_ns_mac(container_id: &str, interface: &str, mac: &str) -> Result<()> {
    run_in_ns(container_id, &["ip", "link", "set", interface, "address", mac]).await?;
    Ok(())
}

/// Read back an in-namespace interface's current MAC address.
pub async fn get_in_ns_mac(container_id: &str, interface: &str) -> Result<String> {
    let output = run_in_ns(container_id, &["ip", "link", "show", interface]).await?;
    output
        .split_whitespace()
        .skip_while(|tok| *tok != "link/ether")
        .nth(1)
        .map(str::to_string)
        .ok_or_else(|| DriverError::Netns(format!("no mac found for {} in {}", interface, container_id)))
}

/// Disable TX checksum offload in-namespace for userspace-datapath networks
/// (spec §4.4 step 4).
pub async fn disable_tx_checksum_offload(container_id: &str, interface: &str) -> Result<()> {
    let mut cmd = Command::new("ip");
    cmd.args(["netns", "exec", container_id, "/sbin/ethtool", "-K", interface, "tx", "off"]);
    let output = cmd
        .output()
        .await
        .map_err(|e| DriverError::Netns(format!("ethtool exec failed: {}", e)))?;
    if !output.status.success() {
        return Err(DriverError::Netns(format!(
            "ethtool -K {} tx off failed: {}",
            interface,
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(())
}

/// Splice `prefix` (colon-tolerant hex, ≤ 5 bytes) over the leading bytes of
/// `mac` (spec §4.4 step 3, grounded on `utils.go: mustPrefixMAC`).
pub fn prefix_mac(prefix: &str, mac: &str) -> Result<String> {
    let clean_prefix = prefix.replace(':', "");
    let prefix_bytes =
        hex::decode(&clean_prefix).map_err(|_| DriverError::ConfigInvalid(format!("invalid mac prefix: {}", prefix)))?;
    if prefix_bytes.len() > 5 {
        return Err(DriverError::ConfigInvalid(format!("mac prefix too long: {}", prefix)));
    }
    let mut mac_bytes: Vec<u8> = mac
        .split(':')
        .map(|b| u8::from_str_radix(b, 16))
        .collect::<std::result::Result<_, _>>()
        .map_err(|_| DriverError::ConfigInvalid(format!("invalid mac address: {}", mac)))?;
    if mac_bytes.len() != 6 {
        return Err(DriverError::ConfigInvalid(format!("invalid mac address: {}", mac)));
    }
    for (i, b) in prefix_bytes.iter().enumerate() {
        mac_bytes[i] = *b;
    }
    Ok(mac_bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":"))
}

/// Spawn the in-namespace DHCP client child process, returning its pid (spec
/// §4.4 step 9). `udhcpc`'s stdout/stderr are not collected (spec §9 open
/// question b).
pub async fn spawn_dhcp_client(container_id: &str, interface: &str) -> Result<tokio::process::Child> {
    let child = Command::new("ip")
        .args([
            "netns",
            "exec",
            container_id,
            "/sbin/udhcpc",
            "-f",
            "-R",
            "-i",
            interface,
            "-s",
            "/udhcpclog.sh",
        ])
        .env("CONTAINER_ID", container_id)
        .kill_on_drop(false)
        .spawn()
        .map_err(|e| DriverError::Netns(format!("spawning udhcpc failed: {}", e)))?;
    Ok(child)
}

pub async fn kill_dhcp_client(child: &mut tokio::process::Child) -> Result<()> {
    let _ = child.start_kill();
    let _ = child.wait().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_mac_splices_leading_bytes() {
        let result = prefix_mac("0e:00:00", "aa:bb:cc:dd:ee:ff").unwrap();
        assert_eq!(result, "0e:00:00:dd:ee:ff");
    }

    #[test]
    fn prefix_mac_rejects_oversized_prefix() {
        assert!(prefix_mac("00:00:00:00:00:00", "aa:bb:cc:dd:ee:ff").is_err());
    }

    #[test]
    fn prefix_mac_tolerates_missing_colons() {
        let result = prefix_mac("0e0000", "aa:bb:cc:dd:ee:ff").unwrap();
        assert_eq!(result, "0e:00:00:dd:ee:ff");
    }
}
