// A real Hub bound to a random local port, for integration tests that
// drive a session end to end over an actual WebSocket upgrade.
// Shaped after the forwarding suite's `MockWsServer`: bind to port 0,
// hand back the resolved address, run the accept loop in a background
// task tied to the returned handle's lifetime.

use std::net::SocketAddr;

use realtime_hub::{Hub, HubConfig};
use tokio::net::TcpListener;

use crate::mock_broker::MockBroker;

pub struct TestHubServer {
    addr: SocketAddr,
    hub: Hub,
    _task: tokio::task::JoinHandle<()>,
}

impl TestHubServer {
    /// Starts a Hub using `config` (namespace, capacities, optional
    /// broker url) but ignoring `config.address`, binding instead to a
    /// random port on loopback so concurrent tests never collide.
    pub async fn start(mut config: HubConfig) -> Result<Self, Box<dyn std::error::Error>> {
        config.address = "127.0.0.1:0".to_owned();
        let hub = Hub::new(config.clone()).await?;
        Self::serve(config, hub).await
    }

    /// Starts a Hub connected to `broker` instead of a real Redis broker —
    /// two servers started against clones of the same `MockBroker` see
    /// each other's room/broadcast traffic exactly as two nodes sharing a
    /// real broker would, without needing one reachable.
    pub async fn start_with_broker(mut config: HubConfig, broker: &MockBroker) -> Result<Self, Box<dyn std::error::Error>> {
        config.address = "127.0.0.1:0".to_owned();
        let (transport, bus_room_rx, bus_broadcast_rx) = broker.connect(&config.namespace);
        let hub = Hub::with_transport(config.clone(), Some((transport, bus_room_rx, bus_broadcast_rx)));
        Self::serve(config, hub).await
    }

    async fn serve(config: HubConfig, hub: Hub) -> Result<Self, Box<dyn std::error::Error>> {
        let router = realtime_hub::acceptor::router(hub.clone(), &config.path);

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        Ok(Self {
            addr,
            hub,
            _task: task,
        })
    }

    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }
}
