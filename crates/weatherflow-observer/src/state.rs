//! Shared application state for the Observer API server.
//!
//! [`AppState`] holds a read handle on the [`AggregateStore`], the broadcast
//! channel that fans rendered snapshots out to `WebSocket` clients, and the
//! process-wide [`StopSignal`] so long-lived connections end with the server.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use weatherflow_core::{AggregateStore, StopSignal};
use weatherflow_types::AggregateSnapshot;

/// Capacity of the broadcast channel for snapshots.
///
/// If a subscriber falls behind by more than this many messages it will
/// receive a [`broadcast::error::RecvError::Lagged`] and skip to the
/// newest snapshot.
const BROADCAST_CAPACITY: usize = 256;

/// Shared state for the Axum application.
///
/// Wrapped in [`Arc`] and injected via Axum's `State` extractor. Handlers
/// only ever read from the store; the ingest loop is its sole writer.
pub struct AppState {
    /// The live aggregate store.
    pub store: Arc<AggregateStore>,
    /// Broadcast sender for rendered snapshots.
    pub tx: broadcast::Sender<AggregateSnapshot>,
    /// Process-wide stop signal.
    pub stop: Arc<StopSignal>,
    /// When the observer state was created, for uptime reporting.
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Create application state around an existing store and stop signal.
    pub fn new(store: Arc<AggregateStore>, stop: Arc<StopSignal>) -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            store,
            tx,
            stop,
            started_at: Utc::now(),
        }
    }

    /// Subscribe to the snapshot broadcast channel.
    pub fn subscribe(&self) -> broadcast::Receiver<AggregateSnapshot> {
        self.tx.subscribe()
    }

    /// Publish a snapshot to all connected clients.
    ///
    /// Returns the number of receivers that got the message; 0 when no
    /// client is connected.
    pub fn broadcast(&self, snapshot: &AggregateSnapshot) -> usize {
        self.tx.send(snapshot.clone()).unwrap_or(0)
    }

    /// Seconds since the state was created.
    pub fn uptime_seconds(&self) -> i64 {
        Utc::now()
            .signed_duration_since(self.started_at)
            .num_seconds()
    }
}
