//! REST API endpoint handlers for the Observer server.
//!
//! Every handler takes a fresh snapshot from the [`AggregateStore`] through
//! the shared [`AppState`]. Snapshots are cheap and never block the ingest
//! loop for longer than one map copy.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/` | Minimal HTML page with the per-category table |
//! | `GET` | `/api/snapshot` | Full aggregate snapshot |
//! | `GET` | `/api/snapshot/long` | Snapshot in long (category, metric, value) format |
//! | `GET` | `/api/categories/{name}` | One category's averages |
//! | `GET` | `/api/health` | Liveness, uptime and volume counters |
//!
//! [`AggregateStore`]: weatherflow_core::AggregateStore

use std::fmt::Write as _;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::response::{Html, IntoResponse};

use crate::error::ObserverError;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// GET / -- minimal HTML page
// ---------------------------------------------------------------------------

/// Serve a minimal HTML page with the current averages per category.
pub async fn index(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ObserverError> {
    let snapshot = state.store.snapshot()?;

    let mut rows = String::new();
    for avg in &snapshot.categories {
        let _ = write!(
            rows,
            "<tr><td>{}</td><td>{:.2}</td><td>{:.2}</td><td>{}</td></tr>",
            escape_html(&avg.category),
            avg.avg_pressure,
            avg.avg_windspeed,
            avg.count,
        );
    }
    if rows.is_empty() {
        rows.push_str(r#"<tr><td colspan="4" class="empty">No observations yet</td></tr>"#);
    }

    let events = snapshot.events_folded;
    let categories = snapshot.categories.len();
    let taken_at = snapshot.taken_at.format("%Y-%m-%d %H:%M:%S UTC");

    Ok(Html(format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="utf-8">
    <title>Weatherflow Observer</title>
    <style>
        body {{
            background: #0d1117;
            color: #c9d1d9;
            font-family: 'Cascadia Code', 'Fira Code', 'Consolas', monospace;
            padding: 2rem;
            max-width: 800px;
            margin: 0 auto;
        }}
        h1 {{ color: #58a6ff; margin-bottom: 0.25rem; }}
        .subtitle {{ color: #8b949e; margin-top: 0; }}
        table {{ border-collapse: collapse; width: 100%; }}
        th, td {{ border-bottom: 1px solid #30363d; padding: 0.4rem 0.8rem; text-align: right; }}
        th:first-child, td:first-child {{ text-align: left; }}
        th {{ color: #8b949e; }}
        .empty {{ color: #8b949e; text-align: center; }}
        a {{ color: #58a6ff; text-decoration: none; }}
        ul {{ list-style: none; padding: 0; }}
        li::before {{ content: "GET "; color: #7ee787; font-weight: bold; }}
    </style>
</head>
<body>
    <h1>Weatherflow Observer</h1>
    <p class="subtitle">{events} events across {categories} categories, as of {taken_at}</p>

    <table>
        <tr><th>Weather</th><th>Avg pressure (hPa)</th><th>Avg wind (km/h)</th><th>Count</th></tr>
        {rows}
    </table>

    <h2>API Endpoints</h2>
    <ul>
        <li><a href="/api/snapshot">/api/snapshot</a> -- Current aggregate snapshot</li>
        <li><a href="/api/snapshot/long">/api/snapshot/long</a> -- Long-format rows for charting</li>
        <li><a href="/api/health">/api/health</a> -- Health and counters</li>
        <li>/api/categories/{{name}} -- Single category</li>
    </ul>

    <h2>WebSocket</h2>
    <p><code>ws://host:port/ws/snapshots</code> -- Live snapshot stream</p>
</body>
</html>"#
    )))
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// GET /api/snapshot
// ---------------------------------------------------------------------------

/// Return the full aggregate snapshot, categories in lexicographic order.
pub async fn get_snapshot(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ObserverError> {
    Ok(Json(state.store.snapshot()?))
}

// ---------------------------------------------------------------------------
// GET /api/snapshot/long
// ---------------------------------------------------------------------------

/// Return the snapshot as one row per (category, metric) pair, the shape a
/// grouped bar chart consumes.
pub async fn get_snapshot_long(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ObserverError> {
    let snapshot = state.store.snapshot()?;
    let rows = serde_json::to_value(snapshot.to_long_format())?;

    Ok(Json(serde_json::json!({
        "taken_at": snapshot.taken_at,
        "events_folded": snapshot.events_folded,
        "rows": rows,
    })))
}

// ---------------------------------------------------------------------------
// GET /api/categories/{name}
// ---------------------------------------------------------------------------

/// Return the averages for one category.
pub async fn get_category(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ObserverError> {
    let average = state
        .store
        .category(&name)?
        .ok_or_else(|| ObserverError::NotFound(format!("category {name}")))?;
    Ok(Json(average))
}

// ---------------------------------------------------------------------------
// GET /api/health
// ---------------------------------------------------------------------------

/// Report liveness plus basic volume counters.
pub async fn health(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ObserverError> {
    let status = if state.stop.is_stop_requested() {
        "stopping"
    } else {
        "ok"
    };

    Ok(Json(serde_json::json!({
        "status": status,
        "uptime_seconds": state.uptime_seconds(),
        "events_folded": state.store.events_folded()?,
        "categories": state.store.category_count()?,
        "ws_subscribers": state.tx.receiver_count(),
    })))
}
