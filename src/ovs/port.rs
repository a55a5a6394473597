//! Port scraping, lowest-free-port allocation, and patch/internal port
//! management (spec §4.4, §4.6, §8 "lowest-free-port algorithm").

use std::collections::BTreeMap;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::error::{DriverError, Result};
use crate::model::OfPort;
use crate::naming::patch_name;

use super::{ofctl, vsctl};

const DUMP_PORTS_RETRIES: u32 = 4;

static PORT_DESC_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*(\d+)\((\S+)\).+$").unwrap());

pub const VETH_PREFIX: &str = crate::naming::VETH_HOST_PREFIX;
pub const PATCH_PREFIX: &str = crate::naming::PATCH_PREFIX;

/// Parse `ovs-ofctl dump-ports-desc` output into of-port -> interface-name.
pub fn parse_port_desc(output: &str) -> BTreeMap<OfPort, String> {
    let mut port_desc = BTreeMap::new();
    for line in output.lines() {
        if let Some(caps) = PORT_DESC_LINE.captures(line) {
            if let Ok(n) = caps[1].parse::<u32>() {
                port_desc.insert(OfPort(n), caps[2].to_string());
            }
        }
    }
    port_desc
}

/// Scrape `dump-ports-desc`, retrying with `(i+1)` second backoff to tolerate
/// the `is not a bridge` false negative (spec §0.5), up to
/// `DUMP_PORTS_RETRIES` extra attempts.
pub async fn scrape_port_desc(bridge_name: &str) -> Result<BTreeMap<OfPort, String>> {
    let mut last_err = None;
    for i in 0..=DUMP_PORTS_RETRIES {
        match ofctl(&["dump-ports-desc", bridge_name]).await {
            Ok(output) => return Ok(parse_port_desc(&output)),
            Err(e) => {
                last_err = Some(e);
                tokio::time::sleep(Duration::from_secs((i + 1) as u64)).await;
            }
        }
    }
    Err(last_err.unwrap_or_else(|| DriverError::Ovs("dump-ports-desc failed".into())))
}

/// The smallest positive integer not present in the bridge's current port set
/// (spec §8).
pub fn lowest_free_port(existing: &BTreeMap<OfPort, String>) -> OfPort {
    let mut lowest = 1u32;
    for port in existing.keys() {
        if port.0 != lowest {
            break;
        }
        lowest += 1;
    }
    OfPort(lowest)
}

pub async fn lowest_free_port_on_bridge(bridge_name: &str) -> Result<OfPort> {
    let desc = scrape_port_desc(bridge_name).await?;
    Ok(lowest_free_port(&desc))
}

/// Add an internal OVS port (used for stack-link and coprocessor-side
/// interfaces), optionally VLAN-tagged. The original's `tag=%u` format verb
/// is invalid Go and never actually applied a tag; here `tag=<n>` is applied
/// correctly when `tag` is non-zero.
pub async fn add_internal_port(bridge_name: &str, port_name: &str, tag: Option<u16>) -> Result<OfPort> {
    let lowest = lowest_free_port_on_bridge(bridge_name).await?;
    let ofport_request = format!("ofport_request={}", lowest.0);
    match tag {
        Some(tag) if tag != 0 => {
            let tag_arg = format!("tag={}", tag);
            vsctl(&[
                "add-port",
                bridge_name,
                port_name,
                &tag_arg,
                "--",
                "set",
                "Interface",
                port_name,
                &ofport_request,
            ])
            .await?;
        }
        _ => {
            vsctl(&[
                "add-port",
                bridge_name,
                port_name,
                "--",
                "set",
                "Interface",
                port_name,
                &ofport_request,
            ])
            .await?;
        }
    }
    Ok(lowest)
}

pub async fn delete_port(bridge_name: &str, port_name: &str) -> Result<()> {
    debug!(port_name, bridge_name, "removing ovs port");
    vsctl(&["del-port", bridge_name, port_name]).await?;
    Ok(())
}

pub async fn get_of_port(port_name: &str) -> Result<OfPort> {
    let raw = vsctl(&["get", "Interface", port_name, "ofport"]).await?;
    raw.parse::<u32>()
        .map(OfPort)
        .map_err(|_| DriverError::Ovs(format!("unparseable ofport for {}: {:?}", port_name, raw)))
}

/// Splice a patch-port veth pair between `bridge_name` and its peer, pinning
/// `ofport_request` on both ends. Port numbers of 0 mean "pick the lowest
/// free port on that bridge" (spec §4.5/§8 naming conventions).
pub async fn add_patch_port(
    bridge_name: &str,
    bridge_name_peer: &str,
    port: Option<OfPort>,
    port_peer: Option<OfPort>,
) -> Result<(OfPort, OfPort)> {
    let port = match port {
        Some(p) if p.0 != 0 => p,
        _ => lowest_free_port_on_bridge(bridge_name).await?,
    };
    let port_peer = match port_peer {
        Some(p) if p.0 != 0 => p,
        _ => lowest_free_port_on_bridge(bridge_name_peer).await?,
    };
    let port_name = patch_name(bridge_name, bridge_name_peer);
    let port_name_peer = patch_name(bridge_name_peer, bridge_name);

    crate::netns::create_veth_pair(&port_name, &port_name_peer).await?;
    crate::netns::link_up(&port_name).await?;
    crate::netns::link_up(&port_name_peer).await?;

    let req = format!("ofport_request={}", port.0);
    vsctl(&[
        "add-port",
        bridge_name,
        &port_name,
        "--",
        "set",
        "Interface",
        &port_name,
        &req,
    ])
    .await?;
    let req_peer = format!("ofport_request={}", port_peer.0);
    vsctl(&[
        "add-port",
        bridge_name_peer,
        &port_name_peer,
        "--",
        "set",
        "Interface",
        &port_name_peer,
        &req_peer,
    ])
    .await?;

    Ok((port, port_peer))
}

pub async fn delete_patch_port(bridge_name: &str, bridge_name_peer: &str) -> Result<()> {
    let port_name = patch_name(bridge_name, bridge_name_peer);
    let port_name_peer = patch_name(bridge_name_peer, bridge_name);
    delete_port(bridge_name, &port_name).await?;
    delete_port(bridge_name_peer, &port_name_peer).await?;
    crate::netns::delete_link(&port_name).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dump_ports_desc_lines() {
        let output = " 1(odsve12345): addr:aa:bb\n 3(eth0): addr:cc:dd\nnot a port line\n";
        let parsed = parse_port_desc(output);
        assert_eq!(parsed.get(&OfPort(1)).unwrap(), "odsve12345");
        assert_eq!(parsed.get(&OfPort(3)).unwrap(), "eth0");
        assert_eq!(parsed.len(), 2);
    }

    #[test]
    fn lowest_free_port_fills_gaps() {
        let mut existing = BTreeMap::new();
        existing.insert(OfPort(1), "a".to_string());
        existing.insert(OfPort(2), "b".to_string());
        existing.insert(OfPort(4), "c".to_string());
        assert_eq!(lowest_free_port(&existing), OfPort(3));
    }

    #[test]
    fn lowest_free_port_is_one_on_empty_bridge() {
        assert_eq!(lowest_free_port(&BTreeMap::new()), OfPort(1));
    }

    #[test]
    fn lowest_free_port_after_filling_gap() {
        let mut existing = BTreeMap::new();
        for p in [1, 2, 3, 4] {
            existing.insert(OfPort(p), format!("p{}", p));
        }
        assert_eq!(lowest_free_port(&existing), OfPort(5));
    }
}
