//! Connection session (C2): the per-connection state and its three
//! cooperating tasks (reader, writer, room-applier).
//!
//! The three-task split and the `watch`-channel shutdown signal are
//! grounded directly in `receiver::session::run_session_loop`'s shape
//! (a single socket loop selecting over inbound frames and a
//! `watch::Receiver<bool>` shutdown signal); here it is split across
//! three tasks because the spec requires join/leave application to be
//! independent of the hot read/write path.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use hub_protocol::Message;

use crate::error::SocketError;
use crate::hub::{HubHandle, RegisteredClient};
use crate::socket::{Socket, SocketFrame};

/// Initial/refreshed read deadline (spec §4.2.1 / §5). Not one of the
/// spec's configurable knobs — unlike the frame-size limit and keepalive
/// interval, which come from `HubConfig` and are threaded into
/// `spawn_session_tasks` by the caller instead of living here as consts.
pub const READ_DEADLINE: Duration = Duration::from_secs(60);
/// Per-frame write deadline (spec §4.2.2).
pub const WRITE_DEADLINE: Duration = Duration::from_secs(10);

pub(crate) enum RoomCommand {
    Join(Vec<String>),
    Leave(Vec<String>),
}

pub type HandlerFn = Arc<dyn Fn(Client, Message) -> BoxFuture<'static, ()> + Send + Sync>;
pub type CloseHandlerFn = Arc<dyn Fn(Option<String>) -> BoxFuture<'static, ()> + Send + Sync>;

struct HandlerEntry {
    event: String,
    handler_id: String,
    f: HandlerFn,
}

/// Type-keyed per-connection storage, in the style of `http::Extensions`.
#[derive(Default)]
struct Metadata(HashMap<TypeId, Box<dyn Any + Send + Sync>>);

impl Metadata {
    fn set<T: Send + Sync + 'static>(&mut self, value: T) {
        self.0.insert(TypeId::of::<T>(), Box::new(value));
    }

    fn get<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.0
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref::<T>())
            .cloned()
    }
}

/// The application-facing handle to a connected session. Cheap to clone;
/// every clone refers to the same underlying connection.
#[derive(Clone)]
pub struct Client {
    id: String,
    hub: HubHandle,
    room_cmds: mpsc::Sender<RoomCommand>,
    rooms: Arc<RwLock<HashSet<String>>>,
    handlers: Arc<RwLock<Vec<HandlerEntry>>>,
    close_handlers: Arc<RwLock<Vec<CloseHandlerFn>>>,
    metadata: Arc<RwLock<Metadata>>,
}

impl Client {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Enqueues a join command. Suspends only if the room-command queue
    /// (capacity 100) is full — the queue is the backpressure mechanism.
    pub async fn join(&self, room_id: impl Into<String>) {
        let _ = self.room_cmds.send(RoomCommand::Join(vec![room_id.into()])).await;
    }

    pub async fn leave(&self, room_id: impl Into<String>) {
        let _ = self.room_cmds.send(RoomCommand::Leave(vec![room_id.into()])).await;
    }

    /// Best-effort snapshot of current room membership (e.g. for tests).
    pub async fn is_in_room(&self, room_id: &str) -> bool {
        self.rooms.read().await.contains(room_id)
    }

    pub async fn send_msg(&self, msg: Message) {
        let Ok(frame) = msg.encode() else {
            warn!(client_id = %self.id, "dropping message with unencodable payload");
            return;
        };
        self.hub.direct(self.id.clone(), frame).await;
    }

    pub async fn send_msg_to_room(&self, room_id: impl Into<String>, msg: Message) {
        self.send_msg_except(room_id, Vec::new(), msg).await;
    }

    pub async fn send_msg_except(&self, room_id: impl Into<String>, exclude_ids: Vec<String>, msg: Message) {
        let Ok(frame) = msg.encode() else {
            warn!(client_id = %self.id, "dropping message with unencodable payload");
            return;
        };
        self.hub.room(room_id.into(), frame, exclude_ids).await;
    }

    pub async fn broadcast_msg(&self, msg: Message) {
        let Ok(frame) = msg.encode() else {
            warn!(client_id = %self.id, "dropping message with unencodable payload");
            return;
        };
        self.hub.broadcast(frame).await;
    }

    /// Sends the one unsolicited `identity` frame a freshly accepted peer
    /// receives, per spec §6.
    pub(crate) async fn send_id(&self) {
        let payload = serde_json::json!({ "clientId": self.id }).to_string();
        self.send_msg(Message::new("identity", payload)).await;
    }

    pub async fn on(&self, event: impl Into<String>, handler_id: impl Into<String>, f: HandlerFn) {
        self.handlers.write().await.push(HandlerEntry {
            event: event.into(),
            handler_id: handler_id.into(),
            f,
        });
    }

    /// Removes exactly the entries whose event and handler id both match.
    /// A predecessor of this protocol had an inverted filter here
    /// (`id != h && event != e`) that kept anything differing in *either*
    /// field, so `off` typically removed nothing; the contract is an
    /// exact-pair match.
    pub async fn off(&self, event: &str, handler_id: &str) {
        self.handlers
            .write()
            .await
            .retain(|h| !(h.event == event && h.handler_id == handler_id));
    }

    pub async fn on_close(&self, f: CloseHandlerFn) {
        self.close_handlers.write().await.push(f);
    }

    pub async fn set<T: Send + Sync + 'static>(&self, value: T) {
        self.metadata.write().await.set(value);
    }

    pub async fn get<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.metadata.read().await.get::<T>()
    }

    async fn dispatch(&self, msg: Message) {
        let handlers: Vec<HandlerFn> = {
            let guard = self.handlers.read().await;
            guard
                .iter()
                .filter(|h| h.event == msg.event)
                .map(|h| h.f.clone())
                .collect()
        };
        for f in handlers {
            let client = self.clone();
            let msg = msg.clone();
            // Fire-and-forget: tokio::spawn isolates a panicking handler
            // to its own task, so one bad handler can't tear down the
            // session's reader loop.
            tokio::spawn(async move {
                f(client, msg).await;
            });
        }
    }
}

/// Freshly created session plumbing, ready to be registered with the Hub
/// and have its tasks spawned.
pub(crate) struct NewSession {
    pub client: Client,
    pub registered: RegisteredClient,
    pub outbox_rx: mpsc::Receiver<String>,
    pub room_cmds_rx: mpsc::Receiver<RoomCommand>,
    pub shutdown_rx: watch::Receiver<bool>,
}

pub(crate) fn new_session(hub: HubHandle, outbox_capacity: usize, room_cmd_capacity: usize) -> NewSession {
    let id = Uuid::new_v4().to_string();
    let (outbox_tx, outbox_rx) = mpsc::channel(outbox_capacity);
    let (room_cmds_tx, room_cmds_rx) = mpsc::channel(room_cmd_capacity);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut initial_rooms = HashSet::new();
    initial_rooms.insert(id.clone());
    let rooms = Arc::new(RwLock::new(initial_rooms));

    let client = Client {
        id: id.clone(),
        hub,
        room_cmds: room_cmds_tx,
        rooms: rooms.clone(),
        handlers: Arc::new(RwLock::new(Vec::new())),
        close_handlers: Arc::new(RwLock::new(Vec::new())),
        metadata: Arc::new(RwLock::new(Metadata::default())),
    };

    let registered = RegisteredClient {
        id,
        outbox: outbox_tx,
        rooms,
        shutdown: shutdown_tx,
    };

    NewSession {
        client,
        registered,
        outbox_rx,
        room_cmds_rx,
        shutdown_rx,
    }
}

/// Spawns the reader, writer and room-applier tasks for a registered
/// session. Call after `HubHandle::register` has completed.
#[allow(clippy::too_many_arguments)]
pub(crate) fn spawn_session_tasks<S>(
    client: Client,
    socket: S,
    outbox_rx: mpsc::Receiver<String>,
    room_cmds_rx: mpsc::Receiver<RoomCommand>,
    shutdown_rx: watch::Receiver<bool>,
    max_frame_size: usize,
    keepalive_interval: Duration,
) where
    S: Socket + 'static,
{
    let (write_half, read_half) = socket.split();

    tokio::spawn(room_applier_loop(client.rooms.clone(), room_cmds_rx, shutdown_rx.clone()));
    tokio::spawn(writer_loop(
        write_half,
        outbox_rx,
        client.id.clone(),
        shutdown_rx.clone(),
        keepalive_interval,
    ));
    tokio::spawn(reader_loop(read_half, client, shutdown_rx, max_frame_size));
}

async fn room_applier_loop(
    rooms: Arc<RwLock<HashSet<String>>>,
    mut room_cmds_rx: mpsc::Receiver<RoomCommand>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
            cmd = room_cmds_rx.recv() => {
                match cmd {
                    Some(RoomCommand::Join(ids)) => {
                        let mut guard = rooms.write().await;
                        for id in ids {
                            guard.insert(id);
                        }
                    }
                    Some(RoomCommand::Leave(ids)) => {
                        let mut guard = rooms.write().await;
                        for id in &ids {
                            guard.remove(id);
                        }
                    }
                    None => break,
                }
            }
        }
    }
    rooms.write().await.clear();
}

async fn writer_loop<W>(
    mut write_half: W,
    mut outbox_rx: mpsc::Receiver<String>,
    client_id: String,
    mut shutdown_rx: watch::Receiver<bool>,
    keepalive_interval: Duration,
) where
    W: futures_util::Sink<SocketFrame, Error = SocketError> + Unpin,
{
    let mut keepalive = tokio::time::interval(keepalive_interval);
    keepalive.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
            frame = outbox_rx.recv() => {
                match frame {
                    Some(frame) => {
                        let send = write_half.send(SocketFrame::Text(frame));
                        if tokio::time::timeout(WRITE_DEADLINE, send).await.is_err() {
                            warn!(client_id = %client_id, "write deadline exceeded");
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = keepalive.tick() => {
                if write_half.send(SocketFrame::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }
    let _ = write_half.send(SocketFrame::Close).await;
    let _ = write_half.close().await;
}

async fn reader_loop<R>(
    mut read_half: R,
    client: Client,
    mut shutdown_rx: watch::Receiver<bool>,
    max_frame_size: usize,
) where
    R: futures_util::Stream<Item = Result<SocketFrame, SocketError>> + Unpin,
{
    let mut close_reason: Option<String> = None;
    'outer: loop {
        let recv = tokio::time::timeout(READ_DEADLINE, read_half.next());
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
            res = recv => {
                match res {
                    Ok(Some(Ok(SocketFrame::Text(text)))) => {
                        if text.len() > max_frame_size {
                            warn!(client_id = %client.id, "frame exceeds size limit, dropping");
                            continue;
                        }
                        match Message::decode(&text) {
                            Ok(msg) => client.dispatch(msg).await,
                            Err(e) => debug!(client_id = %client.id, error = %e, "dropping undecodable frame"),
                        }
                    }
                    Ok(Some(Ok(SocketFrame::Pong(_)))) => {
                        // Keepalive response: nothing to extend here since
                        // `tokio::time::timeout` is re-armed on every loop
                        // iteration from the current instant.
                    }
                    Ok(Some(Ok(SocketFrame::Ping(_)))) => {}
                    Ok(Some(Ok(SocketFrame::Close))) => {
                        info!(client_id = %client.id, "peer closed connection");
                        break 'outer;
                    }
                    Ok(Some(Err(e))) => {
                        error!(client_id = %client.id, error = %e, "read error");
                        close_reason = Some(e.to_string());
                        break 'outer;
                    }
                    Ok(None) => {
                        info!(client_id = %client.id, "connection stream ended");
                        break 'outer;
                    }
                    Err(_) => {
                        warn!(client_id = %client.id, "read deadline exceeded");
                        close_reason = Some("read deadline exceeded".to_owned());
                        break 'outer;
                    }
                }
            }
        }
    }
    // A normal close (peer close frame, clean EOF, Hub-initiated eviction)
    // exits silently; close-handlers fire only for an abnormal read error,
    // exactly once each, per spec §4.2.1.
    if let Some(reason) = close_reason {
        notify_close_handlers(&client, reason).await;
    }
    client.hub.unregister(client.id.clone()).await;
}

async fn notify_close_handlers(client: &Client, error_text: String) {
    let handlers = client.close_handlers.read().await;
    for f in handlers.iter() {
        let fut = f(Some(error_text.clone()));
        tokio::spawn(fut);
    }
}
