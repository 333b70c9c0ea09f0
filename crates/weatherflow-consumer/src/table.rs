//! Log-table rendering of aggregate snapshots.
//!
//! The terminal counterpart of the observer's bar chart: one row per
//! category, in the same lexicographic order the chart uses for its axis.

use std::fmt::Write as _;

use tracing::info;
use weatherflow_core::SnapshotRenderer;
use weatherflow_types::AggregateSnapshot;

/// Logs every rendered snapshot as a fixed-width table.
pub struct TableRenderer;

impl SnapshotRenderer for TableRenderer {
    fn render(&mut self, snapshot: &AggregateSnapshot) {
        info!(
            events_folded = snapshot.events_folded,
            categories = snapshot.categories.len(),
            "aggregate snapshot\n{}",
            format_table(snapshot)
        );
    }
}

/// Format `snapshot` as a table with a header row.
pub fn format_table(snapshot: &AggregateSnapshot) -> String {
    let width = snapshot
        .categories
        .iter()
        .map(|c| c.category.chars().count())
        .chain(std::iter::once("weather".len()))
        .max()
        .unwrap_or(0);

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<width$}  {:>12}  {:>13}  {:>7}",
        "weather", "avg_pressure", "avg_windspeed", "count"
    );
    for avg in &snapshot.categories {
        let _ = writeln!(
            out,
            "{:<width$}  {:>12.2}  {:>13.2}  {:>7}",
            avg.category, avg.avg_pressure, avg.avg_windspeed, avg.count
        );
    }
    if snapshot.categories.is_empty() {
        out.push_str("(no observations yet)\n");
    }
    out
}
