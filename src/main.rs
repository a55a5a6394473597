use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use dovesnap::config::DriverOpts;
use dovesnap::controller::GrpcControllerClient;
use dovesnap::naming;
use dovesnap::plugin::{self, PluginState};
use dovesnap::runtime::{BollardRuntime, ContainerRuntime};
use dovesnap::serializer::{self, stack, DriverState};
use dovesnap::status::{self, StatusConfig};

const DRIVER_SOCKET_DIR: &str = "/run/docker/plugins";

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let opts = DriverOpts::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(opts.log_filter())))
        .init();

    info!(?opts, "starting up");

    if let Err(e) = dovesnap::ovs::wait_for_ovs().await {
        error!(%e, "could not connect to open vswitch");
        std::process::exit(1);
    }

    let runtime: Arc<dyn ContainerRuntime> = match BollardRuntime::connect() {
        Ok(r) => Arc::new(r),
        Err(e) => {
            error!(%e, "could not connect to container runtime");
            std::process::exit(1);
        }
    };
    let engine_id = match runtime.engine_id().await {
        Ok(id) => id,
        Err(e) => {
            error!(%e, "could not obtain engine id");
            std::process::exit(1);
        }
    };
    let short_engine_id = naming::short_engine_id(&engine_id);
    info!(engine_id, short_engine_id, "connected to container runtime");

    let topology = Arc::new(stack::plan_topology(&opts, &short_engine_id));

    let controller: Arc<dyn dovesnap::controller::ControllerClient> =
        match GrpcControllerClient::connect(
            &opts.client_cert_name,
            &opts.controller_host,
            opts.controller_port,
            &opts.controller_keydir,
            opts.controller_retries,
        )
        .await
        {
            Ok(c) => Arc::new(c),
            Err(e) => {
                error!(%e, "could not connect to controller rpc server");
                std::process::exit(1);
            }
        };

    if let Err(e) = stack::setup_mirror_bridge(&topology, &opts).await {
        error!(%e, "failed to set up mirror bridge");
        std::process::exit(1);
    }
    if let Err(e) = stack::setup_stacking_bridge(&topology, &opts, controller.as_ref()).await {
        error!(%e, "failed to set up stacking bridge");
        std::process::exit(1);
    }
    if let Err(e) = stack::setup_loopback_bridge(&topology).await {
        error!(%e, "failed to set up loopback bridge");
        std::process::exit(1);
    }

    let (notify_tx, notify_rx) = tokio::sync::mpsc::channel(dovesnap::notify::CHANNEL_CAPACITY);
    tokio::spawn(dovesnap::notify::run(notify_rx));

    let driver_state = DriverState {
        networks: Default::default(),
        stack_mirror_configs: Default::default(),
        of_ports: Default::default(),
        dhcp_children: Default::default(),
        port_desc_snapshots: Default::default(),
        dhcp_updated_mtime: None,
        controller: controller.clone(),
        runtime: runtime.clone(),
        notify_tx,
        topology: topology.clone(),
        opts: Arc::new(opts.clone()),
    };
    let (ops, serializer_handle) = serializer::spawn(driver_state);

    info!("restoring networks from container runtime state");
    if let Err(e) = serializer::create::restore(&ops, runtime.as_ref(), controller.as_ref(), &topology, &opts).await {
        error!(%e, "start-up restore failed");
    }

    let (remote_dp_name, remote_mirror_of_port) = stack::parse_stack_mirror_target(&opts)
        .unwrap_or_else(|| (String::new(), dovesnap::model::OfPort(0)));

    let plugin_state = web::Data::new(PluginState {
        ops: ops.clone(),
        controller: controller.clone(),
        topology: topology.clone(),
        remote_dp_name,
        remote_mirror_of_port,
    });

    let status_config = match StatusConfig::parse(&opts.status_auth_ips) {
        Ok(c) => web::Data::new(c),
        Err(e) => {
            error!(error = %e, "invalid status_auth_ips, falling back to defaults");
            web::Data::new(StatusConfig::default_cidrs())
        }
    };
    let status_ops = web::Data::new(ops.clone());

    tokio::fs::create_dir_all(DRIVER_SOCKET_DIR).await.ok();
    let socket_path = format!("{}/{}.sock", DRIVER_SOCKET_DIR, dovesnap::runtime::DRIVER_NAME);
    let _ = std::fs::remove_file(&socket_path);

    info!(socket = %socket_path, "starting plugin listener");
    let plugin_server = HttpServer::new(move || {
        App::new()
            .app_data(plugin_state.clone())
            .configure(plugin::configure)
    })
    .bind_uds(&socket_path)?
    .run();

    info!(port = opts.status_port, "starting status listener");
    let status_server = HttpServer::new(move || {
        App::new()
            .app_data(status_config.clone())
            .app_data(status_ops.clone())
            .route("/networks", web::get().to(status::networks_handler))
    })
    .bind(("0.0.0.0", opts.status_port))?
    .run();

    let plugin_handle = tokio::spawn(plugin_server);
    let status_handle = tokio::spawn(status_server);

    // spec §9 open question (c): in-flight ops before `quit` are processed,
    // but a transport thread blocked awaiting a reply may never be
    // unblocked. Flagged to the operator rather than silently "fixed".
    let mut sigterm = signal(SignalKind::terminate())?;
    sigterm.recv().await;
    info!("caught SIGTERM, shutting down");
    let _ = ops.quit().await;
    let _ = serializer_handle.await;
    plugin_handle.abort();
    status_handle.abort();
    Ok(())
}
