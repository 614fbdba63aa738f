//! A minimal chat room built on `realtime-hub`: peers `join`/`leave` a
//! room by name and `chat` messages are fanned out to every other member.
//!
//! Wiring mirrors the teacher's own binary: `LOG_LEVEL`-driven
//! `tracing_subscriber`, a plain `axum::serve` with graceful shutdown on
//! Ctrl+C/SIGTERM.

use std::env;
use std::sync::Arc;

use hub_protocol::Message;
use realtime_hub::{acceptor, Hub, HubConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());
    tracing_subscriber::fmt().with_env_filter(EnvFilter::new(log_level)).init();

    let config = HubConfig::from_env();
    let bind_addr = config.address.clone();
    let path = config.path.clone();

    let hub = Hub::new(config).await.expect("failed to construct hub");
    wire_chat_handlers(&hub).await;

    let router = acceptor::router(hub, &path);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await.expect("failed to bind");
    info!(addr = %bind_addr, path = %path, "chat demo listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
    info!("server shut down gracefully");
}

/// Registers the demo's event handlers on every freshly accepted client:
/// `join`/`leave` take a bare room-name string payload, `chat` takes
/// `{"room": "...", "text": "..."}` and is echoed to the room (including
/// the sender) wrapped with the sender's id.
async fn wire_chat_handlers(hub: &Hub) {
    hub.on_new_client(Arc::new(|client| {
        Box::pin(async move {
            client
                .on(
                    "join",
                    "chat-demo",
                    Arc::new(|client, msg| {
                        Box::pin(async move {
                            let Ok(room) = serde_json::from_str::<String>(&msg.payload) else {
                                return;
                            };
                            client.join(room).await;
                        })
                    }),
                )
                .await;

            client
                .on(
                    "leave",
                    "chat-demo",
                    Arc::new(|client, msg| {
                        Box::pin(async move {
                            let Ok(room) = serde_json::from_str::<String>(&msg.payload) else {
                                return;
                            };
                            client.leave(room).await;
                        })
                    }),
                )
                .await;

            client
                .on(
                    "chat",
                    "chat-demo",
                    Arc::new(|client, msg| {
                        Box::pin(async move {
                            let Ok(body) = serde_json::from_str::<serde_json::Value>(&msg.payload) else {
                                return;
                            };
                            let (Some(room), Some(text)) = (body["room"].as_str(), body["text"].as_str()) else {
                                return;
                            };
                            let payload = serde_json::json!({ "from": client.id(), "text": text }).to_string();
                            client.send_msg_to_room(room.to_owned(), Message::new("chat", payload)).await;
                        })
                    }),
                )
                .await;

            client.on_close(Arc::new(|reason| {
                Box::pin(async move {
                    info!(?reason, "chat client disconnected");
                })
            }))
            .await;
        })
    }))
    .await;
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        _ = terminate => { info!("received SIGTERM, shutting down"); },
    }
}
