//! Local switch management CLI adapters (spec §1 "Local switch management
//! CLI"). Thin `ovs-vsctl`/`ovs-ofctl` shell-outs; the core logic lives in
//! `bridge` and `port`.

pub mod bridge;
pub mod port;

use tokio::process::Command;
use tracing::debug;

use crate::error::{DriverError, Result};

const OVS_STARTUP_RETRIES: u32 = 5;

async fn run(program: &str, args: &[&str]) -> Result<String> {
    debug!(program, ?args, "running ovs command");
    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| DriverError::Ovs(format!("exec {} failed: {}", program, e)))?;
    if !output.status.success() {
        return Err(DriverError::Ovs(format!(
            "{} {:?} exited {}: {}",
            program,
            args,
            output.status,
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

pub async fn vsctl(args: &[&str]) -> Result<String> {
    run("ovs-vsctl", args).await
}

pub async fn ofctl(args: &[&str]) -> Result<String> {
    run("ovs-ofctl", args).await
}

/// Block until `ovs-vsctl show` succeeds, retrying every 5 seconds (spec
/// §0.5 "waitForOvs-style startup retry loop"). Exhausting the retry budget
/// is start-up fatal (spec §7 kind 3).
pub async fn wait_for_ovs() -> Result<()> {
    for _ in 0..OVS_STARTUP_RETRIES {
        if vsctl(&["show"]).await.is_ok() {
            return Ok(());
        }
        tracing::info!("waiting for open vswitch");
        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
    }
    if vsctl(&["show"]).await.is_ok() {
        return Ok(());
    }
    Err(DriverError::Ovs("could not connect to open vswitch".into()))
}
