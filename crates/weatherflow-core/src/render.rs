//! Periodic snapshot rendering.
//!
//! [`run_render_loop`] is the reader side of the store: on a fixed cadence
//! it takes a snapshot and hands it to a [`SnapshotRenderer`]. Ticks where
//! nothing new was folded are skipped. When the stop signal fires, one last
//! snapshot is rendered so the final state is always shown.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, info};
use weatherflow_types::AggregateSnapshot;

use crate::control::StopSignal;
use crate::store::{AggregateStore, StoreError};

/// Consumer of aggregate snapshots (a log table, a chart, a websocket feed).
///
/// Rendering is synchronous and must not block for long; it runs on the
/// render task between ticks.
pub trait SnapshotRenderer: Send {
    /// Present one snapshot.
    fn render(&mut self, snapshot: &AggregateSnapshot);
}

/// A renderer that discards every snapshot.
pub struct NoOpRenderer;

impl SnapshotRenderer for NoOpRenderer {
    fn render(&mut self, _snapshot: &AggregateSnapshot) {}
}

/// Fan a snapshot out to several renderers in order.
impl SnapshotRenderer for Vec<Box<dyn SnapshotRenderer>> {
    fn render(&mut self, snapshot: &AggregateSnapshot) {
        for renderer in self.iter_mut() {
            renderer.render(snapshot);
        }
    }
}

/// What the render loop did before it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderSummary {
    /// Snapshots handed to the renderer, the final one included.
    pub renders: u64,
    /// `events_folded` of the last rendered snapshot.
    pub last_events_folded: u64,
}

/// Render snapshots every `interval` until `stop` fires.
///
/// The first tick fires immediately. A tick renders only when the store has
/// folded events since the previous render; the first render always
/// happens, so consumers start from an (empty) chart.
///
/// # Errors
///
/// Returns [`StoreError`] if taking a snapshot fails. That indicates a
/// broken store, so the loop stops instead of rendering stale data.
pub async fn run_render_loop<R: SnapshotRenderer>(
    store: Arc<AggregateStore>,
    mut renderer: R,
    interval: Duration,
    stop: Arc<StopSignal>,
) -> Result<RenderSummary, StoreError> {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut renders: u64 = 0;
    let mut last_rendered: Option<u64> = None;

    info!(
        interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
        "render loop starting"
    );

    loop {
        tokio::select! {
            biased;
            () = stop.wait() => break,
            _ = ticker.tick() => {}
        }

        let snapshot = store.snapshot()?;
        if last_rendered == Some(snapshot.events_folded) {
            continue;
        }
        debug!(
            events_folded = snapshot.events_folded,
            categories = snapshot.categories.len(),
            "rendering snapshot"
        );
        renderer.render(&snapshot);
        renders = renders.saturating_add(1);
        last_rendered = Some(snapshot.events_folded);
    }

    let snapshot = store.snapshot()?;
    renderer.render(&snapshot);
    renders = renders.saturating_add(1);

    info!(
        renders,
        events_folded = snapshot.events_folded,
        categories = snapshot.categories.len(),
        "render loop stopped after final render"
    );

    Ok(RenderSummary {
        renders,
        last_events_folded: snapshot.events_folded,
    })
}
