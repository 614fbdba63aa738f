//! HTTP acceptor (C5): the `axum` upgrade handler applications route
//! their WebSocket path to.
//!
//! Grounded in the teacher's upgrade-then-spawn shape (an `axum` handler
//! that calls `.on_upgrade` and hands the resulting socket straight to a
//! task-spawning session constructor) but now generic over a single
//! [`Hub`], since this spec has no per-connection routing decision left
//! to make once an upgrade has succeeded.

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;

use crate::hub::Hub;
use crate::socket::AxumSocket;

/// Builds a single-route router mounting the upgrade handler at `path`
/// with `hub` as shared state. Application routers can `.merge` this in,
/// or applications can call [`upgrade`] directly from their own handler.
pub fn router(hub: Hub, path: &str) -> Router {
    Router::new().route(path, get(upgrade)).with_state(hub)
}

/// The upgrade handler itself: on success it never blocks past the
/// upgrade. [`Hub::accept`] registers the session, spawns its three
/// tasks, sends the identity frame and fires the `onNewClient`
/// callbacks — none of that delays the HTTP response.
pub async fn upgrade(State(hub): State<Hub>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        hub.accept(AxumSocket::new(socket)).await;
    })
}
