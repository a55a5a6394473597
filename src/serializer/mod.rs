//! Operation queue & serializer (spec §4.1): a single task owns all mutable
//! network state and drives every mutation in response to a typed command
//! stream.

pub mod create;
pub mod endpoint;
pub mod reconcile;
pub mod stack;

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};

use crate::controller::ControllerClient;
use crate::error::Result;
use crate::model::{NetworkState, OfPortContainer, StackMirrorConfig};
use crate::notify::NotifyMsgEnvelope;
use crate::options::{CreateOptions, JoinOptions};
use crate::runtime::ContainerRuntime;

const RECONCILE_INTERVAL: Duration = Duration::from_secs(3);

#[derive(Debug)]
pub enum OpKind {
    Create {
        network_id: String,
        options: CreateOptions,
        stack_mirror_config: StackMirrorConfig,
        operation: CreateOperation,
    },
    Delete {
        network_id: String,
    },
    ReservePort {
        network_id: String,
        endpoint_id: String,
    },
    Join {
        network_id: String,
        endpoint_id: String,
        join_options: JoinOptions,
    },
    Leave {
        network_id: String,
        endpoint_id: String,
    },
    GetNetwork {
        network_id: String,
    },
    Networks,
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOperation {
    Create,
    RecreateBadBridge,
    RecreateDownBridge,
}

/// What a handler hands back over the op-private reply channel.
#[derive(Debug, Clone)]
pub enum OpReply {
    Empty,
    Network(Option<NetworkState>),
    Networks(HashMap<String, NetworkState>),
    OfPort(Option<crate::model::OfPort>),
}

struct Op {
    kind: OpKind,
    reply: Option<mpsc::Sender<OpReply>>,
}

/// The create/delete wait-group (spec §4.1, §5): rises on enqueue, falls on
/// handler completion. `Join` waits for it to reach zero before reading
/// network state, guaranteeing it never observes a partial `NetworkState`.
#[derive(Default)]
struct CreateDeleteGate {
    counter: AtomicI64,
    notify: Notify,
}

impl CreateDeleteGate {
    fn enter(&self) {
        self.counter.fetch_add(1, Ordering::SeqCst);
    }

    fn leave(&self) {
        if self.counter.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.notify.notify_waiters();
        }
    }

    async fn wait_drained(&self) {
        loop {
            if self.counter.load(Ordering::SeqCst) <= 0 {
                return;
            }
            self.notify.notified().await;
        }
    }
}

/// Handle given to transport-side code (plugin routes, status route) for
/// enqueuing ops and awaiting replies. Cheap to clone.
#[derive(Clone)]
pub struct OpSender {
    tx: mpsc::Sender<Op>,
    gate: Arc<CreateDeleteGate>,
}

const REPLY_CHANNEL_CAPACITY: usize = 2;

impl OpSender {
    async fn call(&self, kind: OpKind) -> Result<OpReply> {
        let (reply_tx, mut reply_rx) = mpsc::channel(REPLY_CHANNEL_CAPACITY);
        self.tx
            .send(Op {
                kind,
                reply: Some(reply_tx),
            })
            .await
            .map_err(|_| crate::error::DriverError::Runtime("serializer task gone".into()))?;
        Ok(reply_rx.recv().await.unwrap_or(OpReply::Empty))
    }

    async fn cast(&self, kind: OpKind) -> Result<()> {
        self.tx
            .send(Op { kind, reply: None })
            .await
            .map_err(|_| crate::error::DriverError::Runtime("serializer task gone".into()))
    }

    pub async fn create(
        &self,
        network_id: String,
        options: CreateOptions,
        stack_mirror_config: StackMirrorConfig,
        operation: CreateOperation,
    ) -> Result<()> {
        self.gate.enter();
        self.cast(OpKind::Create {
            network_id,
            options,
            stack_mirror_config,
            operation,
        })
        .await
    }

    pub async fn delete(&self, network_id: String) -> Result<()> {
        self.gate.enter();
        self.cast(OpKind::Delete { network_id }).await
    }

    pub async fn reserve_port(
        &self,
        network_id: String,
        endpoint_id: String,
    ) -> Result<Option<crate::model::OfPort>> {
        match self
            .call(OpKind::ReservePort {
                network_id,
                endpoint_id,
            })
            .await?
        {
            OpReply::OfPort(p) => Ok(p),
            _ => Ok(None),
        }
    }

    /// Waits for the create/delete gate to drain before enqueuing (spec §5
    /// "Ordering").
    pub async fn join(
        &self,
        network_id: String,
        endpoint_id: String,
        join_options: JoinOptions,
    ) -> Result<()> {
        self.gate.wait_drained().await;
        self.cast(OpKind::Join {
            network_id,
            endpoint_id,
            join_options,
        })
        .await
    }

    /// Blocks until the leave handler completes, matching the runtime's
    /// expectation that endpoint teardown is finished before `Leave` returns.
    pub async fn leave(&self, network_id: String, endpoint_id: String) -> Result<()> {
        self.call(OpKind::Leave {
            network_id,
            endpoint_id,
        })
        .await?;
        Ok(())
    }

    pub async fn get_network(&self, network_id: String) -> Result<Option<NetworkState>> {
        match self.call(OpKind::GetNetwork { network_id }).await? {
            OpReply::Network(ns) => Ok(ns),
            _ => Ok(None),
        }
    }

    pub async fn networks(&self) -> Result<HashMap<String, NetworkState>> {
        match self.call(OpKind::Networks).await? {
            OpReply::Networks(n) => Ok(n),
            _ => Ok(HashMap::new()),
        }
    }

    pub async fn quit(&self) -> Result<()> {
        self.cast(OpKind::Quit).await
    }

    /// Blocks until every enqueued create/delete has finished its handler
    /// (spec §4.7 "block until the create/delete wait-group drains").
    pub async fn wait_drained(&self) {
        self.gate.wait_drained().await;
    }
}

/// All state owned exclusively by the serializer task.
pub struct DriverState {
    pub networks: HashMap<String, NetworkState>,
    pub stack_mirror_configs: HashMap<String, StackMirrorConfig>,
    pub of_ports: HashMap<String, OfPortContainer>,
    pub dhcp_children: HashMap<String, tokio::process::Child>,
    pub port_desc_snapshots: HashMap<String, std::collections::BTreeMap<crate::model::OfPort, String>>,
    pub dhcp_updated_mtime: Option<std::time::SystemTime>,
    pub controller: Arc<dyn ControllerClient>,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub notify_tx: mpsc::Sender<NotifyMsgEnvelope>,
    pub topology: Arc<stack::Topology>,
    pub opts: Arc<crate::config::DriverOpts>,
}

/// Spawn the serializer task, returning the handle transport code uses to
/// enqueue ops and a join handle confirming full drain on `quit`.
pub fn spawn(mut state: DriverState) -> (OpSender, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<Op>(64);
    let gate = Arc::new(CreateDeleteGate::default());
    let sender = OpSender {
        tx,
        gate: gate.clone(),
    };

    let handle = tokio::spawn(async move {
        let mut serial: u64 = 0;
        let mut ticker = tokio::time::interval(RECONCILE_INTERVAL);
        loop {
            tokio::select! {
                maybe_op = rx.recv() => {
                    let Some(op) = maybe_op else { break };
                    serial += 1;
                    debug!(serial, "processing op");
                    let is_create_or_delete = matches!(op.kind, OpKind::Create { .. } | OpKind::Delete { .. });
                    if let OpKind::Quit = op.kind {
                        if let Some(reply) = op.reply {
                            let _ = reply.send(OpReply::Empty).await;
                        }
                        break;
                    }
                    dispatch(&mut state, op).await;
                    if is_create_or_delete {
                        gate.leave();
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = reconcile::run(&mut state).await {
                        warn!(%e, "reconciler tick failed");
                    }
                }
            }
        }
    });

    (sender, handle)
}

async fn dispatch(state: &mut DriverState, op: Op) {
    let Op { kind, reply } = op;
    let result = match kind {
        OpKind::Create {
            network_id,
            options,
            stack_mirror_config,
            operation,
        } => create::handle_create(state, network_id, options, stack_mirror_config, operation).await,
        OpKind::Delete { network_id } => create::handle_delete(state, network_id).await,
        OpKind::ReservePort {
            network_id,
            endpoint_id,
        } => {
            let result = endpoint::handle_reserve_port(state, &network_id, &endpoint_id).await;
            if let Err(e) = &result {
                warn!(%e, "reserveport handler failed");
            }
            if let Some(reply) = reply {
                let value = result.ok();
                let _ = reply.send(OpReply::OfPort(value)).await;
            }
            return;
        }
        OpKind::Join {
            network_id,
            endpoint_id,
            join_options,
        } => endpoint::handle_join(state, &network_id, &endpoint_id, join_options).await,
        OpKind::Leave {
            network_id,
            endpoint_id,
        } => endpoint::handle_leave(state, &network_id, &endpoint_id).await,
        OpKind::GetNetwork { network_id } => {
            let ns = state.networks.get(&network_id).cloned();
            if let Some(reply) = reply {
                let _ = reply.send(OpReply::Network(ns)).await;
            }
            return;
        }
        OpKind::Networks => {
            if let Some(reply) = reply {
                let _ = reply.send(OpReply::Networks(state.networks.clone())).await;
            }
            return;
        }
        OpKind::Quit => unreachable!("quit handled before dispatch"),
    };

    if let Err(e) = result {
        warn!(%e, "op handler failed");
    }
    if let Some(reply) = reply {
        let _ = reply.send(OpReply::Empty).await;
    }
}
