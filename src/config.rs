//! Process-level configuration (spec §0.3, §6 "Process-level configuration").
//! Entirely flag-driven, modeled the same way the teacher models
//! `LambdoOpts`: a `clap::Parser` struct parsed once in `main.rs`.

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "dovesnap", about = "OVS/OpenFlow container network driver plugin")]
pub struct DriverOpts {
    /// Basename of the client cert/key pair under --controller-keydir.
    #[arg(long, env = "DOVESNAP_CLIENT_CERT_NAME", default_value = "client")]
    pub client_cert_name: String,

    /// Controller RPC server hostname.
    #[arg(long, env = "DOVESNAP_CONTROLLER_HOST", default_value = "faucetconfrpc")]
    pub controller_host: String,

    /// Controller RPC server port.
    #[arg(long, env = "DOVESNAP_CONTROLLER_PORT", default_value_t = 59999)]
    pub controller_port: u16,

    /// Directory holding the TLS cert/key/CA material for the controller RPC.
    #[arg(long, env = "DOVESNAP_CONTROLLER_KEYDIR", default_value = "/tmp/dovesnap/")]
    pub controller_keydir: std::path::PathBuf,

    /// Controller RPC connect retries before treating start-up as fatal.
    #[arg(long, env = "DOVESNAP_CONTROLLER_RETRIES", default_value_t = 10)]
    pub controller_retries: u32,

    /// Comma-separated `dp:port:iface` stacking interfaces.
    #[arg(long, env = "DOVESNAP_STACKING_INTERFACES", default_value = "")]
    pub stacking_interfaces: String,

    /// Remote DP name that should receive `stack: {priority: 1}`.
    #[arg(long, env = "DOVESNAP_STACK_PRIORITY1")]
    pub stack_priority1: Option<String>,

    /// `remoteDp:ofport` for stack mirroring.
    #[arg(long, env = "DOVESNAP_STACK_MIRROR_INTERFACE")]
    pub stack_mirror_interface: Option<String>,

    /// Default controllers string applied when a network omits its own.
    #[arg(long, env = "DOVESNAP_DEFAULT_CONTROLLERS")]
    pub default_controllers: Option<String>,

    /// Local interface to mirror traffic out of.
    #[arg(long, env = "DOVESNAP_MIRROR_BRIDGE_OUT")]
    pub mirror_bridge_out: Option<String>,

    /// Local interface to also attach to the mirror bridge.
    #[arg(long, env = "DOVESNAP_MIRROR_BRIDGE_IN")]
    pub mirror_bridge_in: Option<String>,

    /// Status HTTP listen port.
    #[arg(long, env = "DOVESNAP_STATUS_PORT", default_value_t = 9401)]
    pub status_port: u16,

    /// Comma-separated CIDRs allowed to read the status endpoint.
    #[arg(long, env = "DOVESNAP_STATUS_AUTH_IPS", default_value = "127.0.0.0/8,::1/128")]
    pub status_auth_ips: String,

    /// Raise logging to `trace`.
    #[arg(long)]
    pub trace: bool,

    /// Raise logging to `debug`.
    #[arg(long)]
    pub debug: bool,
}

impl DriverOpts {
    pub fn log_filter(&self) -> &'static str {
        if self.trace {
            "trace"
        } else if self.debug {
            "debug"
        } else {
            "info"
        }
    }
}
