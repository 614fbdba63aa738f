//! In-process, channel-backed stand-in for a Redis pub/sub broker.
//!
//! Grounded on `realtime_hub::cluster`'s subscribe-and-forward task shape
//! (one tokio task per channel, decoding and handing envelopes to the
//! Hub's bus queue), minus the actual Redis connection: publishing here
//! is a `tokio::sync::broadcast::Sender::send`, and subscribing is a
//! `broadcast::Receiver` forwarded into an `mpsc` the same way the real
//! `ClusterFabric` forwarder tasks do.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use tokio::sync::{broadcast, mpsc};

use hub_protocol::{broadcast_channel, room_channel, BroadcastBusEnvelope, RoomBusEnvelope};
use realtime_hub::{ClusterError, ClusterTransport};

const CHANNEL_CAPACITY: usize = 64;

#[derive(Clone, Default)]
struct Registry {
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<String>>>>,
}

impl Registry {
    fn channel(&self, name: &str) -> broadcast::Sender<String> {
        let mut guard = self.channels.lock().expect("mock broker registry poisoned");
        guard
            .entry(name.to_owned())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

/// A broker shared by every `Hub` that calls `connect` against a clone of
/// it. Two `Hub`s connected to clones of the same `MockBroker` observe
/// each other's publishes exactly as two nodes sharing a real Redis
/// instance would — including a node seeing its own publish echoed back,
/// which is what exercises the Reactor's node-id loop suppression in a
/// plain `cargo test` run without a reachable broker.
#[derive(Clone, Default)]
pub struct MockBroker {
    registry: Registry,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connects a namespace to this broker: spawns the two forwarding
    /// tasks that decode published envelopes into the Hub's bus queues,
    /// and returns the `ClusterTransport` + receiver pair `Hub::
    /// with_transport` expects.
    #[allow(clippy::type_complexity)]
    pub fn connect(
        &self,
        namespace: &str,
    ) -> (
        Box<dyn ClusterTransport>,
        mpsc::Receiver<RoomBusEnvelope>,
        mpsc::Receiver<BroadcastBusEnvelope>,
    ) {
        let room_tx = self.registry.channel(&room_channel(namespace));
        let broadcast_tx = self.registry.channel(&broadcast_channel(namespace));

        let (bus_room_tx, bus_room_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (bus_broadcast_tx, bus_broadcast_rx) = mpsc::channel(CHANNEL_CAPACITY);

        spawn_room_forwarder(room_tx.subscribe(), bus_room_tx);
        spawn_broadcast_forwarder(broadcast_tx.subscribe(), bus_broadcast_tx);

        let transport: Box<dyn ClusterTransport> = Box::new(MockTransport { room_tx, broadcast_tx });
        (transport, bus_room_rx, bus_broadcast_rx)
    }
}

struct MockTransport {
    room_tx: broadcast::Sender<String>,
    broadcast_tx: broadcast::Sender<String>,
}

impl ClusterTransport for MockTransport {
    fn publish_room<'a>(
        &'a self,
        node_id: &'a str,
        room_id: &'a str,
        message: &'a str,
        exclude_ids: &'a [String],
    ) -> BoxFuture<'a, Result<(), ClusterError>> {
        let env = RoomBusEnvelope {
            node_id: node_id.to_owned(),
            room_id: room_id.to_owned(),
            message: message.to_owned(),
            exclude_ids: exclude_ids.to_vec(),
        };
        Box::pin(async move {
            if let Ok(payload) = env.encode() {
                let _ = self.room_tx.send(payload);
            }
            Ok(())
        })
    }

    fn publish_broadcast<'a>(&'a self, node_id: &'a str, message: &'a str) -> BoxFuture<'a, Result<(), ClusterError>> {
        let env = BroadcastBusEnvelope {
            node_id: node_id.to_owned(),
            message: message.to_owned(),
        };
        Box::pin(async move {
            if let Ok(payload) = env.encode() {
                let _ = self.broadcast_tx.send(payload);
            }
            Ok(())
        })
    }

    fn shutdown(&self) {}
}

fn spawn_room_forwarder(mut rx: broadcast::Receiver<String>, tx: mpsc::Sender<RoomBusEnvelope>) {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(payload) => {
                    if let Ok(env) = RoomBusEnvelope::decode(&payload) {
                        if tx.send(env).await.is_err() {
                            return;
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    });
}

fn spawn_broadcast_forwarder(mut rx: broadcast::Receiver<String>, tx: mpsc::Sender<BroadcastBusEnvelope>) {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(payload) => {
                    if let Ok(env) = BroadcastBusEnvelope::decode(&payload) {
                        if tx.send(env).await.is_err() {
                            return;
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    });
}
