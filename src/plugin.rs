//! Docker network-plugin HTTP surface (spec §6 "Plugin RPC surface"). Each
//! route does its transport-side synchronous work (option extraction, veth
//! creation, `InitBridge`) before handing the rest to the serializer via
//! `OpSender`, matching the split documented in §4.2/§4.4.

use std::collections::HashMap;
use std::sync::Arc;

use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::controller::ControllerClient;
use crate::naming;
use crate::options;
use crate::serializer::{stack::Topology, CreateOperation, OpSender};

const GENERIC_OPTION_KEY: &str = "com.docker.network.generic";

/// Shared handles every route needs, installed as `web::Data`.
pub struct PluginState {
    pub ops: OpSender,
    pub controller: Arc<dyn ControllerClient>,
    pub topology: Arc<Topology>,
    /// Process-level stack-mirror target (spec §6 `stack-mirror-interface`),
    /// resolved once at start-up since it never varies per network.
    pub remote_dp_name: String,
    pub remote_mirror_of_port: crate::model::OfPort,
}

fn ok() -> HttpResponse {
    HttpResponse::Ok().json(json!({}))
}

fn err(e: impl std::fmt::Display) -> HttpResponse {
    warn!(error = %e, "plugin request failed");
    HttpResponse::Ok().json(json!({ "Err": e.to_string() }))
}

fn extract_generic(options: &HashMap<String, serde_json::Value>) -> HashMap<String, String> {
    options
        .get(GENERIC_OPTION_KEY)
        .and_then(|v| v.as_object())
        .map(|obj| {
            obj.iter()
                .filter_map(|(k, v)| {
                    let value = match v {
                        serde_json::Value::String(s) => s.clone(),
                        serde_json::Value::Bool(b) => b.to_string(),
                        serde_json::Value::Number(n) => n.to_string(),
                        _ => return None,
                    };
                    Some((k.clone(), value))
                })
                .collect()
        })
        .unwrap_or_default()
}

#[derive(Debug, Deserialize)]
struct IpamData {
    #[serde(rename = "Gateway", default)]
    gateway: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreateNetworkRequest {
    #[serde(rename = "NetworkID")]
    network_id: String,
    #[serde(rename = "Options", default)]
    options: HashMap<String, serde_json::Value>,
    #[serde(rename = "IPv4Data", default)]
    ipv4_data: Vec<IpamData>,
}

pub async fn create_network(
    req: web::Json<CreateNetworkRequest>,
    state: web::Data<PluginState>,
) -> HttpResponse {
    let generic = extract_generic(&req.options);
    let gateway = req.ipv4_data.first().and_then(|d| d.gateway.clone());

    let create_options = match options::extract_create_options(&generic, gateway) {
        Ok(o) => o,
        Err(e) => return err(e),
    };

    if let Err(e) = crate::serializer::create::prepare_bridge(
        &req.network_id,
        "",
        &create_options,
        &state.topology,
        state.controller.as_ref(),
        CreateOperation::Create,
    )
    .await
    {
        return err(e);
    }

    let stack_mirror_config = crate::model::StackMirrorConfig {
        lb_port: crate::model::OfPort(create_options.lbport),
        tunnel_vid: crate::serializer::stack::default_tunnel_vid(
            create_options.vlan,
            create_options.mirror_tunnel_vid,
        ),
        remote_dp_name: state.remote_dp_name.clone(),
        remote_mirror_of_port: state.remote_mirror_of_port,
    };

    if let Err(e) = state
        .ops
        .create(
            req.network_id.clone(),
            create_options,
            stack_mirror_config,
            CreateOperation::Create,
        )
        .await
    {
        return err(e);
    }
    ok()
}

#[derive(Debug, Deserialize)]
struct DeleteNetworkRequest {
    #[serde(rename = "NetworkID")]
    network_id: String,
}

pub async fn delete_network(
    req: web::Json<DeleteNetworkRequest>,
    state: web::Data<PluginState>,
) -> HttpResponse {
    match state.ops.delete(req.network_id.clone()).await {
        Ok(()) => ok(),
        Err(e) => err(e),
    }
}

#[derive(Debug, Deserialize, Default)]
struct EndpointInterface {
    #[serde(rename = "MacAddress", default)]
    mac_address: String,
}

#[derive(Debug, Deserialize)]
struct CreateEndpointRequest {
    #[serde(rename = "NetworkID")]
    network_id: String,
    #[serde(rename = "EndpointID")]
    endpoint_id: String,
    #[serde(rename = "Interface", default)]
    interface: EndpointInterface,
}

#[derive(Debug, Serialize)]
struct CreateEndpointResponse {
    #[serde(rename = "Interface")]
    interface: EndpointInterface,
}

impl Serialize for EndpointInterface {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("EndpointInterface", 1)?;
        s.serialize_field("MacAddress", &self.mac_address)?;
        s.end()
    }
}

pub async fn create_endpoint(
    req: web::Json<CreateEndpointRequest>,
    state: web::Data<PluginState>,
) -> HttpResponse {
    let veth_host = naming::veth_host_name(&req.endpoint_id);
    let veth_container = naming::veth_container_name(&req.endpoint_id);

    if let Err(e) = crate::netns::create_veth_pair(&veth_host, &veth_container).await {
        return err(e);
    }
    let _ = crate::netns::link_up(&veth_host).await;
    let _ = crate::netns::link_up(&veth_container).await;

    let response_mac = if req.interface.mac_address.is_empty() {
        crate::netns::get_link_mac(&veth_container)
            .await
            .unwrap_or_default()
    } else {
        if let Err(e) = crate::netns::set_link_mac(&veth_container, &req.interface.mac_address).await {
            return err(e);
        }
        String::new()
    };

    if let Err(e) = state
        .ops
        .reserve_port(req.network_id.clone(), req.endpoint_id.clone())
        .await
    {
        return err(e);
    }

    HttpResponse::Ok().json(CreateEndpointResponse {
        interface: EndpointInterface {
            mac_address: response_mac,
        },
    })
}

#[derive(Debug, Deserialize)]
struct DeleteEndpointRequest {
    #[serde(rename = "NetworkID")]
    #[allow(dead_code)]
    network_id: String,
    #[serde(rename = "EndpointID")]
    #[allow(dead_code)]
    endpoint_id: String,
}

/// Matches the upstream driver: a deliberate no-op (spec §7 kind 4 analogue —
/// endpoint cleanup happens entirely in `leave`).
pub async fn delete_endpoint(_req: web::Json<DeleteEndpointRequest>) -> HttpResponse {
    ok()
}

#[derive(Debug, Deserialize)]
struct JoinRequest {
    #[serde(rename = "NetworkID")]
    network_id: String,
    #[serde(rename = "EndpointID")]
    endpoint_id: String,
    #[serde(rename = "Options", default)]
    options: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct JoinInterfaceName {
    #[serde(rename = "SrcName")]
    src_name: String,
    #[serde(rename = "DstPrefix")]
    dst_prefix: String,
}

#[derive(Debug, Serialize)]
struct JoinResponse {
    #[serde(rename = "InterfaceName")]
    interface_name: JoinInterfaceName,
    #[serde(rename = "Gateway")]
    gateway: String,
}

pub async fn join(req: web::Json<JoinRequest>, state: web::Data<PluginState>) -> HttpResponse {
    state.ops.wait_drained().await;
    let ns = match state.ops.get_network(req.network_id.clone()).await {
        Ok(Some(ns)) => ns,
        Ok(None) => return err(crate::error::DriverError::NetworkNotFound(req.network_id.clone())),
        Err(e) => return err(e),
    };

    let generic = extract_generic(&req.options);
    let join_options = match options::extract_join_options(&generic) {
        Ok(o) => o,
        Err(e) => return err(e),
    };

    debug!(network_id = %req.network_id, endpoint_id = %req.endpoint_id, "dispatching join");
    if let Err(e) = state
        .ops
        .join(req.network_id.clone(), req.endpoint_id.clone(), join_options)
        .await
    {
        return err(e);
    }

    HttpResponse::Ok().json(JoinResponse {
        interface_name: JoinInterfaceName {
            src_name: naming::veth_container_name(&req.endpoint_id),
            dst_prefix: naming::CONTAINER_ETH_NAME.to_string(),
        },
        gateway: ns.gateway_ip.unwrap_or_default(),
    })
}

#[derive(Debug, Deserialize)]
struct LeaveRequest {
    #[serde(rename = "NetworkID")]
    network_id: String,
    #[serde(rename = "EndpointID")]
    endpoint_id: String,
}

pub async fn leave(req: web::Json<LeaveRequest>, state: web::Data<PluginState>) -> HttpResponse {
    match state.ops.leave(req.network_id.clone(), req.endpoint_id.clone()).await {
        Ok(()) => ok(),
        Err(e) => err(e),
    }
}

pub async fn get_capabilities() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "Scope": "local" }))
}

pub async fn allocate_network() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "Options": {} }))
}

pub async fn endpoint_info() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "Value": {} }))
}

/// The remaining plugin RPCs are deliberate no-ops (spec §6): the datapath
/// never needs external connectivity programmed, network-level allocation
/// beyond `CreateNetwork`, or discovery notifications.
pub async fn noop() -> HttpResponse {
    ok()
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/NetworkDriver.CreateNetwork", web::post().to(create_network))
        .route("/NetworkDriver.DeleteNetwork", web::post().to(delete_network))
        .route("/NetworkDriver.CreateEndpoint", web::post().to(create_endpoint))
        .route("/NetworkDriver.DeleteEndpoint", web::post().to(delete_endpoint))
        .route("/NetworkDriver.Join", web::post().to(join))
        .route("/NetworkDriver.Leave", web::post().to(leave))
        .route("/NetworkDriver.GetCapabilities", web::post().to(get_capabilities))
        .route(
            "/NetworkDriver.ProgramExternalConnectivity",
            web::post().to(noop),
        )
        .route(
            "/NetworkDriver.RevokeExternalConnectivity",
            web::post().to(noop),
        )
        .route("/NetworkDriver.FreeNetwork", web::post().to(noop))
        .route("/NetworkDriver.AllocateNetwork", web::post().to(allocate_network))
        .route("/NetworkDriver.DiscoverNew", web::post().to(noop))
        .route("/NetworkDriver.DiscoverDelete", web::post().to(noop))
        .route("/NetworkDriver.EndpointInfo", web::post().to(endpoint_info));
}
