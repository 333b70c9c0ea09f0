//! Observer API server for Weatherflow.
//!
//! This crate provides an Axum HTTP server that exposes:
//!
//! - **`WebSocket` endpoint** (`/ws/snapshots`) streaming each rendered
//!   aggregate snapshot via [`tokio::sync::broadcast`]
//! - **REST endpoints** for the current snapshot, its long-format
//!   projection, single categories and health
//! - **Minimal HTML page** (`GET /`) with the per-category table
//!
//! # Architecture
//!
//! The observer holds a read-only `Arc` of the core
//! [`AggregateStore`](weatherflow_core::AggregateStore). REST reads take
//! their own snapshot per request. The render loop pushes snapshots to
//! `WebSocket` clients through [`BroadcastRenderer`]. The server shuts down
//! gracefully when the shared stop signal fires.

pub mod error;
pub mod handlers;
pub mod renderer;
pub mod router;
pub mod server;
pub mod startup;
pub mod state;
pub mod ws;

// Re-export primary types for convenience.
pub use error::ObserverError;
pub use renderer::BroadcastRenderer;
pub use router::build_router;
pub use server::{ServerConfig, ServerError, start_server};
pub use startup::{StartupError, spawn_observer};
pub use state::AppState;
