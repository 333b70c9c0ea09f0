//! Axum router construction for the Observer API.
//!
//! Assembles all routes (REST + `WebSocket`) into a single [`Router`]
//! with CORS middleware enabled for cross-origin dashboard access.

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;
use crate::ws;

/// Build the complete Axum router for the Observer server.
///
/// The router includes:
/// - `GET /` -- minimal HTML status page
/// - `GET /ws/snapshots` -- `WebSocket` snapshot stream
/// - `GET /api/snapshot` -- current aggregate snapshot
/// - `GET /api/snapshot/long` -- long-format rows
/// - `GET /api/categories/{name}` -- single category
/// - `GET /api/health` -- health and counters
///
/// CORS allows any origin so a dashboard served elsewhere can poll.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Status page
        .route("/", get(handlers::index))
        // WebSocket
        .route("/ws/snapshots", get(ws::ws_snapshots))
        // REST API
        .route("/api/snapshot", get(handlers::get_snapshot))
        .route("/api/snapshot/long", get(handlers::get_snapshot_long))
        .route("/api/categories/{name}", get(handlers::get_category))
        .route("/api/health", get(handlers::health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
