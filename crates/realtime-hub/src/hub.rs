//! The Hub reactor (C3): a single task that owns the registry of live
//! sessions and serializes every register/unregister/direct/room/broadcast
//! decision, plus inbound fan-out arriving from the cluster fabric.
//!
//! Modeled on the request-enum-over-a-channel shape of
//! `ForwarderCommand`/`oneshot::Sender` in the teacher's `AppState`, but
//! generalized from request/response RPCs to the fire-and-forget routing
//! commands this spec calls for.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch, RwLock};
use tracing::{debug, info, warn};

use hub_protocol::{BroadcastBusEnvelope, RoomBusEnvelope};

use futures_util::future::BoxFuture;

use crate::client::{new_session, spawn_session_tasks, Client};
use crate::cluster::{ClusterFabric, ClusterTransport};
use crate::config::HubConfig;
use crate::error::HubError;
use crate::socket::Socket;

/// Default bound of the command channel feeding the reactor. Submitting a
/// command suspends the caller until the reactor accepts it — the
/// "unbuffered rendezvous" suspension point called out in the concurrency
/// model, approximated here with a small bound rather than a literal
/// zero-capacity channel (tokio's mpsc requires capacity >= 1).
pub const COMMAND_CHANNEL_CAPACITY: usize = 1;

/// Default outbox capacity per spec §3.
pub const DEFAULT_OUTBOX_CAPACITY: usize = 256;

#[derive(Debug)]
pub(crate) enum HubCommand {
    Register(RegisteredClient),
    Unregister(String),
    Direct {
        client_id: String,
        frame: String,
    },
    Broadcast {
        frame: String,
    },
    Room {
        room_id: String,
        frame: String,
        exclude_ids: Vec<String>,
    },
    /// Closes bus subscriptions, evicts every registered session and stops
    /// the reactor loop. Acked through the oneshot once the eviction pass
    /// has completed, so `Hub::shutdown` can await full drain.
    Shutdown(oneshot::Sender<()>),
}

/// The reactor's view of a registered session: just enough to deliver to
/// it and to query its room membership. Never exposes the session's own
/// handler/metadata state — those remain owned by the session's tasks.
#[derive(Debug)]
pub(crate) struct RegisteredClient {
    pub id: String,
    pub outbox: mpsc::Sender<String>,
    pub rooms: Arc<RwLock<HashSet<String>>>,
    pub shutdown: watch::Sender<bool>,
}

/// Clone-able front door into the reactor. Held by every session and by
/// the acceptor; submitting through it is the sole way to mutate the
/// client registry.
#[derive(Clone)]
pub struct HubHandle {
    pub(crate) tx: mpsc::Sender<HubCommand>,
    pub(crate) node_id: String,
    pub(crate) namespace: String,
}

impl HubHandle {
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub(crate) async fn register(&self, client: RegisteredClient) {
        let _ = self.tx.send(HubCommand::Register(client)).await;
    }

    pub async fn unregister(&self, client_id: impl Into<String>) {
        let _ = self.tx.send(HubCommand::Unregister(client_id.into())).await;
    }

    pub async fn direct(&self, client_id: impl Into<String>, frame: impl Into<String>) {
        let _ = self
            .tx
            .send(HubCommand::Direct {
                client_id: client_id.into(),
                frame: frame.into(),
            })
            .await;
    }

    pub async fn broadcast(&self, frame: impl Into<String>) {
        let _ = self
            .tx
            .send(HubCommand::Broadcast {
                frame: frame.into(),
            })
            .await;
    }

    pub async fn room(&self, room_id: impl Into<String>, frame: impl Into<String>, exclude_ids: Vec<String>) {
        let _ = self
            .tx
            .send(HubCommand::Room {
                room_id: room_id.into(),
                frame: frame.into(),
                exclude_ids,
            })
            .await;
    }
}

/// Owns the live-session set. Constructed once per namespace; `run`
/// drives the reactor to completion (only returns once `shutdown` has
/// drained every command and evicted every session).
///
/// Kept distinct from [`Hub`], the small clone-able facade the
/// application actually holds: the reactor is moved into its own
/// `tokio::spawn`ed task by [`Hub::new`] and is never touched again
/// from outside this module.
struct Reactor {
    #[allow(dead_code)]
    namespace: String,
    node_id: String,
    clients: HashMap<String, RegisteredClient>,
    cluster: Option<Box<dyn ClusterTransport>>,
    commands: mpsc::Receiver<HubCommand>,
    bus_room_rx: Option<mpsc::Receiver<RoomBusEnvelope>>,
    bus_broadcast_rx: Option<mpsc::Receiver<BroadcastBusEnvelope>>,
}

struct HubChannels {
    commands: mpsc::Receiver<HubCommand>,
    bus_room_rx: Option<mpsc::Receiver<RoomBusEnvelope>>,
    bus_broadcast_rx: Option<mpsc::Receiver<BroadcastBusEnvelope>>,
}

/// Awaits the next item on an optionally-present channel. When `rx` is
/// `None` (single-node mode, no cluster fabric configured) this never
/// resolves, so the corresponding `select!` arm simply never fires rather
/// than spinning on a channel that was never created. When the channel
/// *is* present but has been closed (its sender dropped), the receiver is
/// cleared so the arm falls back to never-resolving instead of busy-
/// looping on a stream of `None`s.
async fn recv_optional<T>(rx: &mut Option<mpsc::Receiver<T>>) -> T {
    loop {
        match rx {
            Some(r) => match r.recv().await {
                Some(v) => return v,
                None => *rx = None,
            },
            None => std::future::pending().await,
        }
    }
}

impl Reactor {
    fn new(namespace: String, node_id: String, cluster: Option<Box<dyn ClusterTransport>>, channels: HubChannels) -> Self {
        Self {
            namespace,
            node_id,
            clients: HashMap::new(),
            cluster,
            commands: channels.commands,
            bus_room_rx: channels.bus_room_rx,
            bus_broadcast_rx: channels.bus_broadcast_rx,
        }
    }

    /// Drives the reactor loop. Runs until the command channel is closed
    /// or a `Shutdown` command is processed.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                cmd = self.commands.recv() => {
                    match cmd {
                        Some(cmd) => {
                            if !self.handle_command(cmd).await {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                env = recv_optional(&mut self.bus_room_rx) => {
                    self.handle_bus_room(env).await;
                }
                env = recv_optional(&mut self.bus_broadcast_rx) => {
                    self.handle_bus_broadcast(env).await;
                }
            }
        }
    }

    /// Processes one command. Returns `false` when the reactor should stop
    /// running (only ever on `Shutdown`).
    async fn handle_command(&mut self, cmd: HubCommand) -> bool {
        match cmd {
            HubCommand::Register(client) => {
                debug!(client_id = %client.id, "registering client");
                self.clients.insert(client.id.clone(), client);
            }
            HubCommand::Unregister(id) => {
                self.evict(&id);
            }
            HubCommand::Direct { client_id, frame } => {
                self.push_to(&client_id, frame);
            }
            HubCommand::Broadcast { frame } => {
                if let Some(cluster) = &self.cluster {
                    if let Err(e) = cluster.publish_broadcast(&self.node_id, &frame).await {
                        warn!(error = %e, "broadcast publish failed; continuing with local fan-out");
                    }
                }
                self.fan_out_broadcast(&frame);
            }
            HubCommand::Room {
                room_id,
                frame,
                exclude_ids,
            } => {
                if let Some(cluster) = &self.cluster {
                    if let Err(e) = cluster
                        .publish_room(&self.node_id, &room_id, &frame, &exclude_ids)
                        .await
                    {
                        warn!(error = %e, "room publish failed; continuing with local fan-out");
                    }
                }
                self.fan_out_room(&room_id, &frame, &exclude_ids).await;
            }
            HubCommand::Shutdown(ack) => {
                info!("hub shutdown: closing bus subscriptions and evicting every session");
                if let Some(cluster) = &self.cluster {
                    cluster.shutdown();
                }
                let ids: Vec<String> = self.clients.keys().cloned().collect();
                for id in ids {
                    self.evict(&id);
                }
                let _ = ack.send(());
                return false;
            }
        }
        true
    }

    async fn handle_bus_room(&mut self, env: RoomBusEnvelope) {
        if env.node_id == self.node_id {
            return;
        }
        self.fan_out_room(&env.room_id, &env.message, &env.exclude_ids)
            .await;
    }

    async fn handle_bus_broadcast(&mut self, env: BroadcastBusEnvelope) {
        if env.node_id == self.node_id {
            return;
        }
        self.fan_out_broadcast(&env.message);
    }

    fn fan_out_broadcast(&mut self, frame: &str) {
        let ids: Vec<String> = self.clients.keys().cloned().collect();
        for id in ids {
            self.push_to(&id, frame.to_owned());
        }
    }

    async fn fan_out_room(&mut self, room_id: &str, frame: &str, exclude_ids: &[String]) {
        let mut members = Vec::new();
        for (id, client) in &self.clients {
            if exclude_ids.iter().any(|x| x == id) {
                continue;
            }
            if client.rooms.read().await.contains(room_id) {
                members.push(id.clone());
            }
        }
        for id in members {
            self.push_to(&id, frame.to_owned());
        }
    }

    /// Non-blocking push into a session's outbox. A full outbox (or an
    /// already-unregistered session) evicts the session — the sole place
    /// backpressure becomes eviction.
    fn push_to(&mut self, client_id: &str, frame: String) {
        let Some(client) = self.clients.get(client_id) else {
            return;
        };
        if client.outbox.try_send(frame).is_err() {
            warn!(client_id = %client_id, "outbox full or closed; evicting");
            self.evict(client_id);
        }
    }

    fn evict(&mut self, client_id: &str) {
        if let Some(client) = self.clients.remove(client_id) {
            // Signals the reader/writer/room-applier tasks to stop and
            // drops the outbox sender, closing it from the writer's point
            // of view — together these are the "spawn a cleanup task"
            // step from the spec, collapsed here since removal from the
            // registry is itself synchronous within the reactor.
            let _ = client.shutdown.send(true);
        }
    }
}

pub type OnNewClientFn = Arc<dyn Fn(Client) -> BoxFuture<'static, ()> + Send + Sync>;

/// The application-facing Hub: a cheap-to-clone handle combining the
/// reactor's [`HubHandle`] with the list of `onNewClient` callbacks the
/// acceptor invokes after every successful upgrade.
///
/// Constructing one (`Hub::new`) spawns the reactor task and, when a
/// broker URL is configured, the two cluster bus-forwarder tasks; the
/// caller never drives the reactor loop directly.
#[derive(Clone)]
pub struct Hub {
    handle: HubHandle,
    config: Arc<HubConfig>,
    on_new_client: Arc<RwLock<Vec<OnNewClientFn>>>,
}

impl Hub {
    /// Builds the reactor (and, if `config.broker_url` is set, the
    /// cluster fabric) and spawns it onto its own task. A broker that is
    /// configured but unreachable is a construction-time failure per
    /// spec — there is no degraded "retry forever before serving"
    /// option.
    pub async fn new(config: HubConfig) -> Result<Self, HubError> {
        // The bus channels only exist when a cluster is actually
        // configured. Creating them unconditionally and dropping their
        // senders in the `None` arm would close the reactor's receivers
        // immediately, and `mpsc::Receiver::recv` on a closed, empty
        // channel resolves `None` on every poll — a busy spin for the
        // Hub's entire lifetime in the (default) single-node case.
        let cluster = match &config.broker_url {
            Some(url) => {
                info!(namespace = %config.namespace, "connecting cluster fabric");
                let (bus_room_tx, bus_room_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
                let (bus_broadcast_tx, bus_broadcast_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
                let fabric = ClusterFabric::connect(url, &config.namespace, bus_room_tx, bus_broadcast_tx).await?;
                let transport: Box<dyn ClusterTransport> = Box::new(fabric);
                Some((transport, bus_room_rx, bus_broadcast_rx))
            }
            None => None,
        };

        Ok(Self::with_transport(config, cluster))
    }

    /// Builds a Hub against an already-connected cluster transport (or
    /// `None`, for single-node mode), skipping the Redis-specific connect
    /// step `new` performs. This is the seam `hub-test-utils`'s
    /// `MockBroker` uses to stand a two-`Hub` test up against an
    /// in-process broker instead of a reachable Redis instance.
    pub fn with_transport(
        config: HubConfig,
        cluster: Option<(
            Box<dyn ClusterTransport>,
            mpsc::Receiver<RoomBusEnvelope>,
            mpsc::Receiver<BroadcastBusEnvelope>,
        )>,
    ) -> Self {
        let node_id = uuid::Uuid::new_v4().to_string();
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);

        let (cluster, bus_room_rx, bus_broadcast_rx) = match cluster {
            Some((transport, bus_room_rx, bus_broadcast_rx)) => (Some(transport), Some(bus_room_rx), Some(bus_broadcast_rx)),
            None => (None, None, None),
        };

        let reactor = Reactor::new(
            config.namespace.clone(),
            node_id.clone(),
            cluster,
            HubChannels {
                commands: commands_rx,
                bus_room_rx,
                bus_broadcast_rx,
            },
        );
        tokio::spawn(reactor.run());

        let handle = HubHandle {
            tx: commands_tx,
            node_id,
            namespace: config.namespace.clone(),
        };

        Self {
            handle,
            config: Arc::new(config),
            on_new_client: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn handle(&self) -> HubHandle {
        self.handle.clone()
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Closes the cluster bus subscriptions (if any), evicts every
    /// currently registered session, and stops the reactor task.
    ///
    /// The shutdown request travels through the same command channel as
    /// every other reactor command, so it is processed only after
    /// everything already queued ahead of it has drained. Returns once
    /// the reactor has acknowledged the eviction pass; a second call
    /// after the reactor has already stopped is a no-op.
    pub async fn shutdown(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.handle.tx.send(HubCommand::Shutdown(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// Registers a callback invoked, in registration order, after every
    /// successful accept (spec §4.5/§6). Safe to call at any point; a
    /// callback registered mid-flight only misses accepts that already
    /// completed before it was added.
    pub async fn on_new_client(&self, f: OnNewClientFn) {
        self.on_new_client.write().await.push(f);
    }

    /// Accepts one freshly upgraded socket: builds the session, registers
    /// it with the reactor, spawns its three tasks, sends the identity
    /// frame and fires every `onNewClient` callback. Never blocks waiting
    /// on a callback to finish (spec §4.5) — each is fired via
    /// `tokio::spawn`.
    pub async fn accept<S>(&self, socket: S)
    where
        S: Socket + 'static,
    {
        let session = new_session(self.handle(), self.config.outbox_capacity, self.config.room_cmd_capacity);
        let client = session.client.clone();

        self.handle.register(session.registered).await;
        spawn_session_tasks(
            session.client,
            socket,
            session.outbox_rx,
            session.room_cmds_rx,
            session.shutdown_rx,
            self.config.max_frame_size,
            self.config.keepalive_interval,
        );

        client.send_id().await;

        let callbacks: Vec<OnNewClientFn> = self.on_new_client.read().await.clone();
        for f in callbacks {
            let client = client.clone();
            tokio::spawn(async move { f(client).await });
        }
    }
}
