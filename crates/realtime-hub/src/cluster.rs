//! Cluster fabric (C4): wraps a Redis-compatible pub/sub broker with two
//! logical channels per namespace and relays inbound bus traffic into the
//! Hub's bus queues.
//!
//! Grounded in the teacher's "one tokio task per long-lived channel"
//! shape (`services/server::ws_forwarder`'s heartbeat/command select
//! arms), generalized here to a pair of subscription-forwarding loops.

use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use std::time::Duration;

use redis::aio::ConnectionManager;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use hub_protocol::{broadcast_channel, room_channel, BroadcastBusEnvelope, RoomBusEnvelope};

use crate::error::ClusterError;

/// What the reactor needs from a cluster bus: publish a room/broadcast
/// envelope, and stop listening on shutdown. `ClusterFabric` is the
/// production implementation, over a real Redis-compatible broker;
/// `hub-test-utils`'s `MockBroker` implements the same trait in-process,
/// so a two-`Hub` test can exercise cross-node fan-out and loop
/// suppression without a reachable broker.
pub trait ClusterTransport: Send + Sync {
    fn publish_room<'a>(
        &'a self,
        node_id: &'a str,
        room_id: &'a str,
        message: &'a str,
        exclude_ids: &'a [String],
    ) -> BoxFuture<'a, Result<(), ClusterError>>;

    fn publish_broadcast<'a>(&'a self, node_id: &'a str, message: &'a str) -> BoxFuture<'a, Result<(), ClusterError>>;

    fn shutdown(&self);
}

/// Owns the publish-side connection and the channel names for a single
/// namespace. Subscription forwarding happens in two background tasks
/// spawned by `connect`, both watching `shutdown` alongside their pub/sub
/// stream — the same `watch::Sender<bool>` shape the session tasks use
/// to learn about Hub-initiated teardown.
pub struct ClusterFabric {
    conn: ConnectionManager,
    room_channel: String,
    broadcast_channel: String,
    shutdown: watch::Sender<bool>,
}

impl ClusterFabric {
    /// Connects to `broker_url` and starts the two bus-forwarder tasks.
    /// A connect failure here is fatal per spec §7 — the Hub refuses to
    /// construct when the broker is configured but unreachable.
    pub async fn connect(
        broker_url: &str,
        namespace: &str,
        bus_room_tx: mpsc::Sender<RoomBusEnvelope>,
        bus_broadcast_tx: mpsc::Sender<BroadcastBusEnvelope>,
    ) -> Result<Self, ClusterError> {
        let client = redis::Client::open(broker_url)?;
        let conn = client.get_connection_manager().await?;

        let room_channel = room_channel(namespace);
        let broadcast_channel = broadcast_channel(namespace);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        spawn_room_subscriber(client.clone(), room_channel.clone(), bus_room_tx, shutdown_rx.clone());
        spawn_broadcast_subscriber(client, broadcast_channel.clone(), bus_broadcast_tx, shutdown_rx);

        Ok(Self {
            conn,
            room_channel,
            broadcast_channel,
            shutdown: shutdown_tx,
        })
    }

    /// Signals both bus-forwarder tasks to drop their subscription and
    /// return. Called once, from the reactor's `Shutdown` handler.
    pub fn shutdown(&self) {
        info!("closing cluster bus subscriptions");
        let _ = self.shutdown.send(true);
    }

    pub async fn publish_room(
        &self,
        node_id: &str,
        room_id: &str,
        message: &str,
        exclude_ids: &[String],
    ) -> Result<(), ClusterError> {
        let env = RoomBusEnvelope {
            node_id: node_id.to_owned(),
            room_id: room_id.to_owned(),
            message: message.to_owned(),
            exclude_ids: exclude_ids.to_vec(),
        };
        let Ok(payload) = env.encode() else {
            warn!("failed to encode room bus envelope");
            return Ok(());
        };
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("PUBLISH")
            .arg(&self.room_channel)
            .arg(payload)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    pub async fn publish_broadcast(&self, node_id: &str, message: &str) -> Result<(), ClusterError> {
        let env = BroadcastBusEnvelope {
            node_id: node_id.to_owned(),
            message: message.to_owned(),
        };
        let Ok(payload) = env.encode() else {
            warn!("failed to encode broadcast bus envelope");
            return Ok(());
        };
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("PUBLISH")
            .arg(&self.broadcast_channel)
            .arg(payload)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}

impl ClusterTransport for ClusterFabric {
    fn publish_room<'a>(
        &'a self,
        node_id: &'a str,
        room_id: &'a str,
        message: &'a str,
        exclude_ids: &'a [String],
    ) -> BoxFuture<'a, Result<(), ClusterError>> {
        Box::pin(self.publish_room(node_id, room_id, message, exclude_ids))
    }

    fn publish_broadcast<'a>(&'a self, node_id: &'a str, message: &'a str) -> BoxFuture<'a, Result<(), ClusterError>> {
        Box::pin(self.publish_broadcast(node_id, message))
    }

    fn shutdown(&self) {
        ClusterFabric::shutdown(self)
    }
}

fn spawn_room_subscriber(
    client: redis::Client,
    channel: String,
    tx: mpsc::Sender<RoomBusEnvelope>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        'reconnect: loop {
            if *shutdown_rx.borrow() {
                return;
            }
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        return;
                    }
                }
                pubsub = client.get_async_pubsub() => {
                    match pubsub {
                        Ok(mut pubsub) => {
                            if pubsub.subscribe(&channel).await.is_err() {
                                warn!(channel = %channel, "failed to subscribe to room channel, retrying");
                                tokio::time::sleep(Duration::from_secs(1)).await;
                                continue 'reconnect;
                            }
                            let mut stream = pubsub.on_message();
                            loop {
                                tokio::select! {
                                    biased;
                                    _ = shutdown_rx.changed() => {
                                        if *shutdown_rx.borrow() {
                                            return;
                                        }
                                    }
                                    msg = stream.next() => {
                                        let Some(msg) = msg else { break };
                                        let Ok(payload) = msg.get_payload::<String>() else {
                                            continue;
                                        };
                                        match RoomBusEnvelope::decode(&payload) {
                                            Ok(env) => {
                                                if tx.send(env).await.is_err() {
                                                    return;
                                                }
                                            }
                                            Err(e) => debug!(error = %e, "dropping undecodable room bus envelope"),
                                        }
                                    }
                                }
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "room subscription connect failed, retrying");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
            }
        }
    });
}

fn spawn_broadcast_subscriber(
    client: redis::Client,
    channel: String,
    tx: mpsc::Sender<BroadcastBusEnvelope>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        'reconnect: loop {
            if *shutdown_rx.borrow() {
                return;
            }
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        return;
                    }
                }
                pubsub = client.get_async_pubsub() => {
                    match pubsub {
                        Ok(mut pubsub) => {
                            if pubsub.subscribe(&channel).await.is_err() {
                                warn!(channel = %channel, "failed to subscribe to broadcast channel, retrying");
                                tokio::time::sleep(Duration::from_secs(1)).await;
                                continue 'reconnect;
                            }
                            let mut stream = pubsub.on_message();
                            loop {
                                tokio::select! {
                                    biased;
                                    _ = shutdown_rx.changed() => {
                                        if *shutdown_rx.borrow() {
                                            return;
                                        }
                                    }
                                    msg = stream.next() => {
                                        let Some(msg) = msg else { break };
                                        let Ok(payload) = msg.get_payload::<String>() else {
                                            continue;
                                        };
                                        match BroadcastBusEnvelope::decode(&payload) {
                                            Ok(env) => {
                                                if tx.send(env).await.is_err() {
                                                    return;
                                                }
                                            }
                                            Err(e) => debug!(error = %e, "dropping undecodable broadcast bus envelope"),
                                        }
                                    }
                                }
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "broadcast subscription connect failed, retrying");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
            }
        }
    });
}
