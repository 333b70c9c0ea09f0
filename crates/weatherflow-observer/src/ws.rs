//! `WebSocket` handler for real-time snapshot streaming.
//!
//! Clients connect to `GET /ws/snapshots`, immediately receive the current
//! snapshot, and then a JSON-encoded [`AggregateSnapshot`] each time the
//! render loop publishes one. A client that falls behind skips straight to
//! the newest snapshot; since each snapshot is a full state, nothing is lost.
//!
//! [`AggregateSnapshot`]: weatherflow_types::AggregateSnapshot

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::state::AppState;

/// Upgrade an HTTP request to a `WebSocket` connection and begin
/// streaming snapshots.
///
/// # Route
///
/// `GET /ws/snapshots`
pub async fn ws_snapshots(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_ws(socket, state))
}

/// Encode `value` as a text frame and send it. `false` once the client is
/// gone.
async fn send_json<T: Serialize>(socket: &mut WebSocket, value: &T) -> bool {
    let json = match serde_json::to_string(value) {
        Ok(j) => j,
        Err(e) => {
            warn!("Failed to serialize snapshot: {e}");
            return true;
        }
    };
    socket.send(Message::Text(json.into())).await.is_ok()
}

/// Handle the `WebSocket` lifecycle: send the current snapshot, then
/// forward every broadcast until the client leaves or the server stops.
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>) {
    debug!("WebSocket client connected");

    // Subscribe first so nothing published after the initial snapshot is missed.
    let mut rx = state.subscribe();

    match state.store.snapshot() {
        Ok(snapshot) => {
            if !send_json(&mut socket, &snapshot).await {
                debug!("WebSocket client disconnected (initial send failed)");
                return;
            }
        }
        Err(e) => {
            warn!(error = %e, "Cannot snapshot store for new WebSocket client");
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    }

    loop {
        tokio::select! {
            () = state.stop.wait() => {
                debug!("Server stopping, closing WebSocket");
                let _ = socket.send(Message::Close(None)).await;
                return;
            }
            // Receive a snapshot from the render loop.
            result = rx.recv() => {
                match result {
                    Ok(snapshot) => {
                        if !send_json(&mut socket, &snapshot).await {
                            debug!("WebSocket client disconnected (send failed)");
                            return;
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        debug!(skipped = n, "WebSocket client lagged, skipping ahead");
                    }
                    Err(RecvError::Closed) => {
                        debug!("Broadcast channel closed, shutting down WebSocket");
                        return;
                    }
                }
            }
            // Check if the client sent a close frame or disconnected.
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("WebSocket client disconnected");
                        return;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            debug!("WebSocket client disconnected (pong failed)");
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        debug!("WebSocket error: {e}");
                        return;
                    }
                    _ => {}
                }
            }
        }
    }
}
