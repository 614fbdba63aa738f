//! Horizontally scalable realtime message hub.
//!
//! A [`Hub`] owns one reactor task serializing registration, direct
//! delivery, room fan-out and broadcast across every session accepted on
//! this node, and — when configured with a broker URL — relays room and
//! broadcast traffic to every other node sharing the same namespace over
//! a Redis-compatible pub/sub channel pair.
//!
//! Sessions are represented to the application as a [`Client`]: a
//! cheap-to-clone handle for sending messages, joining/leaving rooms,
//! registering event and close handlers, and stashing per-connection
//! metadata.
//!
//! ```ignore
//! let hub = Hub::new(HubConfig::from_env()).await?;
//! hub.on_new_client(Arc::new(|client| Box::pin(async move {
//!     client.on("ping", "default", Arc::new(|client, _msg| Box::pin(async move {
//!         client.send_msg(Message::new("pong", "null".to_owned())).await;
//!     }))).await;
//! }))).await;
//! ```

mod client;
mod cluster;
mod config;
mod error;
mod hub;
mod socket;

pub use client::{Client, CloseHandlerFn, HandlerFn};
pub use cluster::{ClusterFabric, ClusterTransport};
pub use config::{HubConfig, DEFAULT_ROOM_CMD_CAPACITY};
pub use error::{ClusterError, HubError, SocketError};
pub use hub::{Hub, HubHandle, OnNewClientFn, DEFAULT_OUTBOX_CAPACITY};
pub use socket::{AxumSocket, Socket, SocketFrame};

pub mod acceptor;

pub use hub_protocol::{BroadcastBusEnvelope, CodecError, Message, RoomBusEnvelope};
