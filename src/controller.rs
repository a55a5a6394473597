//! Controller configuration RPC client (spec §6 "Controller configuration
//! RPC"). Wraps the `tonic`-generated `ControllerConfig` client behind a
//! mockable trait so the serializer's handlers never depend on a live
//! connection in tests.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Identity};
use tracing::{debug, warn};

use crate::error::{DriverError, Result};
use crate::proto::controller_config_client::ControllerConfigClient;
use crate::proto::{
    AddPortMirrorRequest, DelDpInterfacesRequest, DelDpsRequest, DpInfo, GetDpNamesRequest,
    InterfaceInfo, SetConfigFileRequest, SetPortAclRequest, SetRemoteMirrorPortRequest,
    SetVlanOutAclRequest,
};

/// The RPCs the serializer's handlers actually call, plus `get_dp_names` as
/// an ambient liveness capability (spec §0.5) not wired into any handler.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ControllerClient: Send + Sync {
    async fn set_config_file(&self, config_yaml: String) -> Result<()>;
    async fn set_port_acl(&self, dp_name: String, port_no: u32, acls: String) -> Result<()>;
    async fn set_vlan_out_acl(&self, vlan_name: String, acl_out: String) -> Result<()>;
    async fn del_dp_interfaces(&self, dp_name: String, of_port: u32) -> Result<()>;
    async fn del_dps(&self, dp_name: String) -> Result<()>;
    async fn add_port_mirror(&self, dp_name: String, of_port: u32, mirror_of_port: u32) -> Result<()>;
    async fn set_remote_mirror_port(
        &self,
        dp_name: String,
        of_port: u32,
        tunnel_vid: u32,
        remote_dp_name: String,
        remote_of_port: u32,
    ) -> Result<()>;
    async fn get_dp_names(&self) -> Result<Vec<String>>;
}

pub struct GrpcControllerClient {
    client: ControllerConfigClient<Channel>,
}

impl GrpcControllerClient {
    /// Connect over mutual TLS, retrying with `(i+1)*2` second backoff up to
    /// `retries` times (spec §5 "exponential ... seconds for initial
    /// controller RPC connect"). A fully exhausted retry budget is start-up
    /// fatal (spec §7 kind 3).
    pub async fn connect(
        client_cert_name: &str,
        server_name: &str,
        server_port: u16,
        keydir: &Path,
        retries: u32,
    ) -> Result<Self> {
        let crt_file = keydir.join(format!("{}.crt", client_cert_name));
        let key_file = keydir.join(format!("{}.key", client_cert_name));
        let ca_file = keydir.join(format!("{}-ca.crt", server_name));

        let cert = tokio::fs::read(&crt_file)
            .await
            .map_err(|e| DriverError::ConfigInvalid(format!("reading {:?}: {}", crt_file, e)))?;
        let key = tokio::fs::read(&key_file)
            .await
            .map_err(|e| DriverError::ConfigInvalid(format!("reading {:?}: {}", key_file, e)))?;
        let ca = tokio::fs::read(&ca_file)
            .await
            .map_err(|e| DriverError::ConfigInvalid(format!("reading {:?}: {}", ca_file, e)))?;

        let identity = Identity::from_pem(cert, key);
        let ca_cert = Certificate::from_pem(ca);
        let tls = ClientTlsConfig::new()
            .domain_name(server_name)
            .identity(identity)
            .ca_certificate(ca_cert);

        let endpoint_uri = format!("https://{}:{}", server_name, server_port);
        let mut timeout = 1u64;
        for attempt in 0..retries {
            timeout = (timeout + 1) * 2;
            debug!(attempt, addr = %endpoint_uri, "connecting to controller rpc server");
            let channel = Channel::from_shared(endpoint_uri.clone())
                .map_err(|e| DriverError::ConfigInvalid(e.to_string()))?
                .tls_config(tls.clone())?
                .timeout(Duration::from_secs(timeout))
                .connect()
                .await;
            match channel {
                Ok(channel) => {
                    debug!("connected to controller rpc server");
                    return Ok(Self {
                        client: ControllerConfigClient::new(channel),
                    });
                }
                Err(e) => {
                    warn!(error = %e, "controller rpc connect attempt failed");
                    tokio::time::sleep(Duration::from_secs(timeout)).await;
                }
            }
        }
        Err(DriverError::ConfigInvalid(
            "cannot connect to controller rpc server".into(),
        ))
    }
}

#[async_trait]
impl ControllerClient for GrpcControllerClient {
    async fn set_config_file(&self, config_yaml: String) -> Result<()> {
        let mut client = self.client.clone();
        client
            .set_config_file(SetConfigFileRequest {
                config_yaml,
                merge: true,
            })
            .await?;
        Ok(())
    }

    async fn set_port_acl(&self, dp_name: String, port_no: u32, acls: String) -> Result<()> {
        let mut client = self.client.clone();
        client
            .set_port_acl(SetPortAclRequest {
                dp_name,
                port_no,
                acls,
            })
            .await?;
        Ok(())
    }

    async fn set_vlan_out_acl(&self, vlan_name: String, acl_out: String) -> Result<()> {
        let mut client = self.client.clone();
        client
            .set_vlan_out_acl(SetVlanOutAclRequest { vlan_name, acl_out })
            .await?;
        Ok(())
    }

    async fn del_dp_interfaces(&self, dp_name: String, of_port: u32) -> Result<()> {
        let mut client = self.client.clone();
        client
            .del_dp_interfaces(DelDpInterfacesRequest {
                interfaces_config: vec![DpInfo {
                    name: dp_name,
                    interfaces: vec![InterfaceInfo { port_no: of_port }],
                }],
                delete_empty_dp: true,
            })
            .await?;
        Ok(())
    }

    async fn del_dps(&self, dp_name: String) -> Result<()> {
        let mut client = self.client.clone();
        client
            .del_dps(DelDpsRequest {
                interfaces_config: vec![DpInfo {
                    name: dp_name,
                    interfaces: Vec::new(),
                }],
            })
            .await?;
        Ok(())
    }

    async fn add_port_mirror(&self, dp_name: String, of_port: u32, mirror_of_port: u32) -> Result<()> {
        let mut client = self.client.clone();
        client
            .add_port_mirror(AddPortMirrorRequest {
                dp_name,
                port_no: of_port,
                mirror_port_no: mirror_of_port,
            })
            .await?;
        Ok(())
    }

    async fn set_remote_mirror_port(
        &self,
        dp_name: String,
        of_port: u32,
        tunnel_vid: u32,
        remote_dp_name: String,
        remote_of_port: u32,
    ) -> Result<()> {
        let mut client = self.client.clone();
        client
            .set_remote_mirror_port(SetRemoteMirrorPortRequest {
                dp_name,
                port_no: of_port,
                tunnel_vid,
                remote_dp_name,
                remote_port_no: remote_of_port,
            })
            .await?;
        Ok(())
    }

    async fn get_dp_names(&self) -> Result<Vec<String>> {
        let mut client = self.client.clone();
        let resp = client.get_dp_names(GetDpNamesRequest {}).await?;
        Ok(resp.into_inner().dp_name)
    }
}
