//! Hand-off from the render loop to the observer.

use std::sync::Arc;

use tracing::trace;
use weatherflow_core::SnapshotRenderer;
use weatherflow_types::AggregateSnapshot;

use crate::state::AppState;

/// Publishes every rendered snapshot to the `WebSocket` broadcast channel.
pub struct BroadcastRenderer {
    state: Arc<AppState>,
}

impl BroadcastRenderer {
    /// Create a renderer publishing into `state`'s channel.
    pub const fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }
}

impl SnapshotRenderer for BroadcastRenderer {
    fn render(&mut self, snapshot: &AggregateSnapshot) {
        let receivers = self.state.broadcast(snapshot);
        trace!(
            receivers,
            events_folded = snapshot.events_folded,
            "snapshot broadcast"
        );
    }
}
