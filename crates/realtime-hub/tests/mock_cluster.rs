//! Cross-node scenario (spec end-to-end scenario 4), exercised against
//! `hub-test-utils`'s in-process `MockBroker` instead of a reachable
//! Redis broker — this is what actually drives the Reactor's node-id
//! loop suppression (`handle_bus_room`/`handle_bus_broadcast`) under
//! plain `cargo test`, since `tests/cluster.rs` is `#[ignore]`d behind a
//! real broker.

use std::sync::Arc;
use std::time::Duration;

use hub_protocol::Message;
use hub_test_utils::{MockBroker, TestClient, TestHubServer};
use realtime_hub::HubConfig;

async fn start_broadcast_echo(namespace: &str, broker: &MockBroker) -> TestHubServer {
    let config = HubConfig {
        namespace: namespace.to_owned(),
        path: "/ws".to_owned(),
        ..HubConfig::default()
    };
    let server = TestHubServer::start_with_broker(config, broker).await.unwrap();
    server
        .hub()
        .on_new_client(Arc::new(|client| {
            Box::pin(async move {
                client
                    .on(
                        "broadcast",
                        "echo",
                        Arc::new(move |client, _msg| {
                            Box::pin(async move {
                                client.broadcast_msg(Message::new("hi", "\"x\"".to_owned())).await;
                            })
                        }),
                    )
                    .await;
            })
        }))
        .await;
    server
}

#[tokio::test]
async fn cross_node_broadcast_delivers_exactly_once() {
    let broker = MockBroker::new();
    let node1 = start_broadcast_echo("cluster-test", &broker).await;
    let node2 = start_broadcast_echo("cluster-test", &broker).await;

    let mut c1 = TestClient::connect(&node1.ws_url("/ws")).await.unwrap();
    c1.recv_client_id().await.unwrap();
    let mut c2 = TestClient::connect(&node2.ws_url("/ws")).await.unwrap();
    c2.recv_client_id().await.unwrap();

    // Let both forwarder tasks finish subscribing.
    tokio::time::sleep(Duration::from_millis(50)).await;

    c1.send(&Message::new("broadcast", "null".to_owned())).await.unwrap();

    let c1_msg = tokio::time::timeout(Duration::from_secs(2), c1.recv()).await.unwrap().unwrap();
    assert_eq!(c1_msg.event, "hi");
    let c2_msg = tokio::time::timeout(Duration::from_secs(2), c2.recv()).await.unwrap().unwrap();
    assert_eq!(c2_msg.event, "hi");

    // Node1's own client never sees the bus echo of its own broadcast
    // (the Reactor's node-id loop suppression) and node2's client
    // receives it exactly once (no duplicate from a second forward).
    let c1_dup = tokio::time::timeout(Duration::from_millis(200), c1.recv()).await;
    assert!(c1_dup.is_err(), "node1's own client must not see the bus echo of its own broadcast");
    let c2_dup = tokio::time::timeout(Duration::from_millis(200), c2.recv()).await;
    assert!(c2_dup.is_err(), "node2's client must receive the broadcast exactly once");
}

#[tokio::test]
async fn namespaces_do_not_cross_talk_on_a_shared_broker() {
    let broker = MockBroker::new();
    let node_x = start_broadcast_echo("ns-x", &broker).await;
    let node_y = start_broadcast_echo("ns-y", &broker).await;

    let mut cx = TestClient::connect(&node_x.ws_url("/ws")).await.unwrap();
    cx.recv_client_id().await.unwrap();
    let mut cy = TestClient::connect(&node_y.ws_url("/ws")).await.unwrap();
    cy.recv_client_id().await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;

    cx.send(&Message::new("broadcast", "null".to_owned())).await.unwrap();

    let cx_msg = tokio::time::timeout(Duration::from_secs(1), cx.recv()).await.unwrap().unwrap();
    assert_eq!(cx_msg.event, "hi");

    let late = tokio::time::timeout(Duration::from_millis(200), cy.recv()).await;
    assert!(late.is_err(), "a differently-namespaced node sharing the same broker must not see the traffic");
}
