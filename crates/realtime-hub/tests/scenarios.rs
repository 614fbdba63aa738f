//! End-to-end scenarios (spec-style) driven over a real WebSocket upgrade
//! against a Hub bound to a loopback port, using `hub-test-utils`'s
//! `TestHubServer`/`TestClient` the way the forwarding suite's own
//! integration tests drove `MockWsServer`/`MockWsClient`.
//!
//! Every test wires the same tiny test application on top of the raw
//! `Client` API via `on_new_client`/`on`: a `join`/`leave` event carrying
//! a room id, and a `send_to_room` event that echoes a fixed `hi`
//! message to the room, optionally excluding the sender. This exercises
//! the library surface exactly the way a real application would, rather
//! than asserting on reactor internals.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hub_protocol::Message;
use hub_test_utils::{TestClient, TestHubServer};
use realtime_hub::HubConfig;

fn config_with_path(path: &str) -> HubConfig {
    HubConfig {
        path: path.to_owned(),
        ..HubConfig::default()
    }
}

async fn start_echo_server(config: HubConfig) -> TestHubServer {
    let server = TestHubServer::start(config).await.unwrap();
    server
        .hub()
        .on_new_client(Arc::new(|client| {
            Box::pin(async move {
                let c = client.clone();
                client
                    .on(
                        "join",
                        "echo",
                        Arc::new(move |client, msg| {
                            let room: String = serde_json::from_str(&msg.payload).unwrap_or_default();
                            Box::pin(async move { client.join(room).await })
                        }),
                    )
                    .await;
                client
                    .on(
                        "send_to_room",
                        "echo",
                        Arc::new(move |client, msg| {
                            let room: String = serde_json::from_str(&msg.payload).unwrap_or_default();
                            Box::pin(async move {
                                client
                                    .send_msg_to_room(room, Message::new("hi", "\"x\"".to_owned()))
                                    .await;
                            })
                        }),
                    )
                    .await;
                client
                    .on(
                        "send_except_self",
                        "echo",
                        Arc::new(move |client, msg| {
                            let room: String = serde_json::from_str(&msg.payload).unwrap_or_default();
                            Box::pin(async move {
                                let self_id = client.id().to_owned();
                                client
                                    .send_msg_except(room, vec![self_id], Message::new("hi", "\"x\"".to_owned()))
                                    .await;
                            })
                        }),
                    )
                    .await;
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
                let _ = c;
            })
        }))
        .await;
    server
}

#[tokio::test]
async fn identity_frame_is_sent_on_connect() {
    let server = start_echo_server(config_with_path("/ws")).await;
    let mut client = TestClient::connect(&server.ws_url("/ws")).await.unwrap();

    let id = tokio::time::timeout(Duration::from_secs(1), client.recv_client_id())
        .await
        .expect("identity frame within 1s")
        .unwrap();
    assert!(!id.is_empty());
}

#[tokio::test]
async fn same_node_room_fan_out_includes_sender() {
    let server = start_echo_server(config_with_path("/ws")).await;
    let mut a = TestClient::connect(&server.ws_url("/ws")).await.unwrap();
    let mut b = TestClient::connect(&server.ws_url("/ws")).await.unwrap();
    a.recv_client_id().await.unwrap();
    b.recv_client_id().await.unwrap();

    a.send(&Message::new("join", "\"r1\"".to_owned())).await.unwrap();
    b.send(&Message::new("join", "\"r1\"".to_owned())).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    a.send(&Message::new("send_to_room", "\"r1\"".to_owned())).await.unwrap();

    let b_msg = tokio::time::timeout(Duration::from_secs(1), b.recv()).await.unwrap().unwrap();
    assert_eq!(b_msg.event, "hi");
    let a_msg = tokio::time::timeout(Duration::from_secs(1), a.recv()).await.unwrap().unwrap();
    assert_eq!(a_msg.event, "hi");
}

#[tokio::test]
async fn exclusion_skips_the_excluded_sender() {
    let server = start_echo_server(config_with_path("/ws")).await;
    let mut a = TestClient::connect(&server.ws_url("/ws")).await.unwrap();
    let mut b = TestClient::connect(&server.ws_url("/ws")).await.unwrap();
    a.recv_client_id().await.unwrap();
    b.recv_client_id().await.unwrap();

    a.send(&Message::new("join", "\"r1\"".to_owned())).await.unwrap();
    b.send(&Message::new("join", "\"r1\"".to_owned())).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    a.send(&Message::new("send_except_self", "\"r1\"".to_owned()))
        .await
        .unwrap();

    let b_msg = tokio::time::timeout(Duration::from_secs(1), b.recv()).await.unwrap().unwrap();
    assert_eq!(b_msg.event, "hi");

    // A sent the exclude-self command but never receives `hi` itself.
    let late = tokio::time::timeout(Duration::from_millis(200), a.recv()).await;
    assert!(late.is_err(), "excluded sender must not receive the room message");
}

#[tokio::test]
async fn backpressure_evicts_the_slow_reader_without_affecting_others() {
    let mut config = config_with_path("/ws");
    config.outbox_capacity = 8;
    let server = start_echo_server(config).await;

    let mut a = TestClient::connect(&server.ws_url("/ws")).await.unwrap();
    a.recv_client_id().await.unwrap();
    let mut b = TestClient::connect(&server.ws_url("/ws")).await.unwrap();
    b.recv_client_id().await.unwrap();

    a.send(&Message::new("join", "\"r1\"".to_owned())).await.unwrap();
    b.send(&Message::new("join", "\"r1\"".to_owned())).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // B never reads again; flood the room well past its 8-frame outbox.
    for _ in 0..100 {
        a.send(&Message::new("send_to_room", "\"r1\"".to_owned())).await.unwrap();
    }

    // A keeps receiving its own echoes even though B has fallen behind
    // and is being evicted by the reactor's non-blocking push.
    let a_msg = tokio::time::timeout(Duration::from_secs(2), a.recv()).await.unwrap().unwrap();
    assert_eq!(a_msg.event, "hi");
}

#[tokio::test]
async fn close_handler_is_not_invoked_on_a_clean_peer_close() {
    let server = TestHubServer::start(config_with_path("/ws")).await.unwrap();
    let invoked = Arc::new(AtomicBool::new(false));
    let invoked_in_handler = invoked.clone();
    server
        .hub()
        .on_new_client(Arc::new(move |client| {
            let invoked = invoked_in_handler.clone();
            Box::pin(async move {
                client
                    .on_close(Arc::new(move |_reason| {
                        let invoked = invoked.clone();
                        Box::pin(async move {
                            invoked.store(true, Ordering::SeqCst);
                        })
                    }))
                    .await;
            })
        }))
        .await;

    let mut c = TestClient::connect(&server.ws_url("/ws")).await.unwrap();
    c.recv_client_id().await.unwrap();
    c.close().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(
        !invoked.load(Ordering::SeqCst),
        "a normal close must exit silently per spec §4.2.1"
    );
}

#[tokio::test]
async fn namespace_isolation_keeps_separate_hubs_apart() {
    let mut config_x = config_with_path("/ws");
    config_x.namespace = "x".to_owned();
    let server_x = start_echo_server(config_x).await;

    let mut config_y = config_with_path("/ws");
    config_y.namespace = "y".to_owned();
    let server_y = start_echo_server(config_y).await;

    let mut cx = TestClient::connect(&server_x.ws_url("/ws")).await.unwrap();
    cx.recv_client_id().await.unwrap();
    let mut cy = TestClient::connect(&server_y.ws_url("/ws")).await.unwrap();
    cy.recv_client_id().await.unwrap();

    cx.send(&Message::new("broadcast", "null".to_owned())).await.unwrap();

    // cx observes its own broadcast.
    let cx_msg = tokio::time::timeout(Duration::from_secs(1), cx.recv()).await.unwrap().unwrap();
    assert_eq!(cx_msg.event, "hi");

    // cy, on an entirely separate in-process Hub, never sees it (no
    // shared broker is configured in this test, which is itself the
    // strongest form of isolation).
    let late = tokio::time::timeout(Duration::from_millis(200), cy.recv()).await;
    assert!(late.is_err());
}
