//! Integration tests for the Observer API endpoints.
//!
//! Tests use Axum's `Router` directly via `tower::ServiceExt` without
//! starting a TCP server. This validates handler logic and routing
//! without needing a live network connection.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use serde_json::Value;
use tower::ServiceExt;
use weatherflow_core::{AggregateStore, StopSignal};
use weatherflow_observer::router::build_router;
use weatherflow_observer::server::ServerConfig;
use weatherflow_observer::spawn_observer;
use weatherflow_observer::state::AppState;
use weatherflow_types::WeatherEvent;

fn make_test_state() -> Arc<AppState> {
    let store = Arc::new(AggregateStore::new());
    for (pressure, windspeed, category) in [
        (1000.0, 10.0, "Rain"),
        (1010.0, 5.0, "Rain"),
        (990.0, 20.0, "Clear"),
    ] {
        store
            .update(&WeatherEvent::new(Utc::now(), pressure, windspeed, category))
            .unwrap();
    }
    Arc::new(AppState::new(store, Arc::new(StopSignal::new())))
}

async fn get(state: Arc<AppState>, uri: &str) -> axum::response::Response {
    build_router(state)
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn body_to_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn close(value: &Value, expected: f64) -> bool {
    value.as_f64().is_some_and(|v| (v - expected).abs() < 1e-9)
}

// =========================================================================
// Tests
// =========================================================================

#[tokio::test]
async fn test_index_returns_html() {
    let response = get(make_test_state(), "/").await;

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap();
    assert!(content_type.contains("text/html"));

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let html = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(html.contains("<td>Rain</td>"));
    assert!(html.contains("1005.00"));
}

#[tokio::test]
async fn test_get_snapshot() {
    let response = get(make_test_state(), "/api/snapshot").await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["events_folded"], 3);

    let categories = json["categories"].as_array().unwrap();
    assert_eq!(categories.len(), 2);
    // Lexicographic order.
    assert_eq!(categories[0]["category"], "Clear");
    assert_eq!(categories[1]["category"], "Rain");
    assert!(close(&categories[1]["avg_pressure"], 1005.0));
    assert!(close(&categories[1]["avg_windspeed"], 7.5));
    assert_eq!(categories[1]["count"], 2);
}

#[tokio::test]
async fn test_get_snapshot_empty_store() {
    let state = Arc::new(AppState::new(
        Arc::new(AggregateStore::new()),
        Arc::new(StopSignal::new()),
    ));
    let response = get(state, "/api/snapshot").await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["events_folded"], 0);
    assert!(json["categories"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_get_snapshot_long() {
    let response = get(make_test_state(), "/api/snapshot/long").await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    let rows = json["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 4);
    assert_eq!(rows[0]["category"], "Clear");
    assert_eq!(rows[0]["metric"], "avg_pressure");
    assert!(close(&rows[0]["value"], 990.0));
    assert_eq!(rows[1]["metric"], "avg_windspeed");
    assert!(close(&rows[1]["value"], 20.0));
}

#[tokio::test]
async fn test_get_category() {
    let response = get(make_test_state(), "/api/categories/Rain").await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["category"], "Rain");
    assert_eq!(json["count"], 2);
}

#[tokio::test]
async fn test_get_category_not_found() {
    let response = get(make_test_state(), "/api/categories/Snow").await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["status"], 404);
    assert!(json["error"].as_str().unwrap().contains("Snow"));
}

#[tokio::test]
async fn test_health() {
    let state = make_test_state();
    let response = get(Arc::clone(&state), "/api/health").await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["events_folded"], 3);
    assert_eq!(json["categories"], 2);

    state.stop.request_stop();
    let response = get(state, "/api/health").await;
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["status"], "stopping");
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let response = get(make_test_state(), "/api/nothing").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_server_stops_on_signal() {
    let state = make_test_state();
    let stop = Arc::clone(&state.stop);
    let config = ServerConfig {
        host: String::from("127.0.0.1"),
        port: 0,
    };

    let (addr, handle) = spawn_observer(&config, state, Arc::clone(&stop))
        .await
        .unwrap();
    assert_ne!(addr.port(), 0);

    stop.request_stop();
    let joined = tokio::time::timeout(Duration::from_secs(5), handle).await;
    assert!(matches!(joined, Ok(Ok(()))));
}
