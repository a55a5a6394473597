//! Container runtime inspection API adapter (spec §1 "Container runtime
//! inspection API"), backed by `bollard`. Grounded on `ovs_docker.go`'s
//! `dockerer`, adapted to the teacher's `async-trait` + `mockall` collaborator
//! pattern (`VMManagerTrait`).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bollard::container::InspectContainerOptions;
use bollard::models::{ContainerInspectResponse, Network};
use bollard::network::{InspectNetworkOptions, ListNetworksOptions};
use bollard::Docker;
#[cfg(test)]
use mockall::automock;

use crate::error::{DriverError, Result};

pub const DRIVER_NAME: &str = "dovesnap";
const INSPECT_RETRIES: u32 = 5;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn engine_id(&self) -> Result<String>;
    async fn inspect_network(&self, network_id: &str) -> Result<Network>;
    /// Networks on this host whose driver is `dovesnap`, keyed by id.
    async fn list_driver_networks(&self) -> Result<HashMap<String, String>>;
    async fn container_for_endpoint(
        &self,
        network_id: &str,
        endpoint_id: &str,
    ) -> Result<ContainerInspectResponse>;
}

pub struct BollardRuntime {
    docker: Docker,
}

impl BollardRuntime {
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| DriverError::Runtime(format!("could not connect to docker: {}", e)))?;
        Ok(Self { docker })
    }
}

#[async_trait]
impl ContainerRuntime for BollardRuntime {
    async fn engine_id(&self) -> Result<String> {
        let info = self
            .docker
            .info()
            .await
            .map_err(|e| DriverError::Runtime(e.to_string()))?;
        info.id
            .ok_or_else(|| DriverError::Runtime("docker info missing engine id".into()))
    }

    async fn inspect_network(&self, network_id: &str) -> Result<Network> {
        for _ in 0..INSPECT_RETRIES {
            match self
                .docker
                .inspect_network(network_id, None::<InspectNetworkOptions<String>>)
                .await
            {
                Ok(net) => return Ok(net),
                Err(_) => tokio::time::sleep(Duration::from_secs(1)).await,
            }
        }
        Err(DriverError::NetworkNotFound(network_id.to_string()))
    }

    async fn list_driver_networks(&self) -> Result<HashMap<String, String>> {
        let networks = self
            .docker
            .list_networks(None::<ListNetworksOptions<String>>)
            .await
            .map_err(|e| DriverError::Runtime(format!("could not get docker networks: {}", e)))?;
        Ok(networks
            .into_iter()
            .filter(|n| n.driver.as_deref() == Some(DRIVER_NAME))
            .filter_map(|n| Some((n.id?, n.name.unwrap_or_default())))
            .collect())
    }

    async fn container_for_endpoint(
        &self,
        network_id: &str,
        endpoint_id: &str,
    ) -> Result<ContainerInspectResponse> {
        for _ in 0..INSPECT_RETRIES {
            let net = self.inspect_network(network_id).await?;
            let container_id = net
                .containers
                .unwrap_or_default()
                .into_iter()
                .find(|(_, info)| info.endpoint_id.as_deref() == Some(endpoint_id))
                .map(|(id, _)| id);
            if let Some(container_id) = container_id {
                if let Ok(inspect) = self
                    .docker
                    .inspect_container(&container_id, None::<InspectContainerOptions>)
                    .await
                {
                    return Ok(inspect);
                }
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        Err(DriverError::EndpointNotJoined(endpoint_id.to_string()))
    }
}
