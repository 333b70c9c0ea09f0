//! End-to-end pipeline tests: channel source -> ingest loop -> store ->
//! render loop.

#![allow(clippy::unwrap_used)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use weatherflow_core::{
    AggregateStore, BackoffConfig, ChannelSource, EventParser, IngestEndReason, IngestLoop,
    RawMessage, SnapshotRenderer, StopSignal, run_render_loop,
};
use weatherflow_types::{AggregateSnapshot, Metric};

struct LastSnapshot(Arc<Mutex<Option<AggregateSnapshot>>>);

impl SnapshotRenderer for LastSnapshot {
    fn render(&mut self, snapshot: &AggregateSnapshot) {
        *self.0.lock().unwrap() = Some(snapshot.clone());
    }
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

#[tokio::test]
async fn producer_records_flow_into_rendered_snapshot() {
    let store = Arc::new(AggregateStore::new());
    let stop = Arc::new(StopSignal::new());
    let last = Arc::new(Mutex::new(None));

    let render = tokio::spawn(run_render_loop(
        Arc::clone(&store),
        LastSnapshot(Arc::clone(&last)),
        Duration::from_millis(10),
        Arc::clone(&stop),
    ));

    let (tx, source) = ChannelSource::bounded(16);
    let ingest = tokio::spawn(
        IngestLoop::new(
            source,
            EventParser::default(),
            Arc::clone(&store),
            Arc::clone(&stop),
            BackoffConfig::default(),
        )
        .run(),
    );

    // Records shaped like the upstream producer's, mixed with bad input.
    let records = [
        r#"{"datetime": "1/1/2012 0:00", "temperature_C": -1.8, "wind_speed_km/h": 4, "pressure_kPa": 101.24, "weather": "Fog"}"#,
        r#"{"datetime": "1/1/2012 1:00", "temperature_C": -1.8, "wind_speed_km/h": 6, "pressure_kPa": 101.26, "weather": "Fog"}"#,
        r#"{"datetime": "1/1/2012 2:00", "temperature_C": -1.5, "wind_speed_km/h": null, "pressure_kPa": 101.3, "weather": "Fog"}"#,
        r#"{"datetime": "1/1/2012 3:00", "temperature_C": -1.5, "wind_speed_km/h": 7, "pressure_kPa": 101.0, "weather": "Clear"}"#,
        "garbage",
    ];
    for record in records {
        tx.send(RawMessage::new(record)).await.unwrap();
    }
    drop(tx);

    let summary = ingest.await.unwrap().unwrap();
    assert_eq!(summary.end_reason, IngestEndReason::SourceExhausted);
    assert_eq!(summary.messages_received, 5);
    assert_eq!(summary.events_applied, 3);
    assert_eq!(summary.parse_failures, 2);

    stop.request_stop();
    let render_summary = render.await.unwrap().unwrap();
    assert_eq!(render_summary.last_events_folded, 3);

    let snapshot = last.lock().unwrap().clone().unwrap();
    let labels: Vec<&str> = snapshot
        .categories
        .iter()
        .map(|c| c.category.as_str())
        .collect();
    assert_eq!(labels, vec!["Clear", "Fog"]);

    let fog = snapshot.category("Fog").unwrap();
    assert_eq!(fog.count, 2);
    assert!(close(fog.avg_pressure, 1012.5));
    assert!(close(fog.avg_windspeed, 5.0));

    let long = snapshot.to_long_format();
    assert_eq!(long.len(), 4);
    assert_eq!(long[0].category, "Clear");
    assert_eq!(long[0].metric, Metric::AvgPressure);
    assert!(close(long[0].value, 1010.0));
}

#[tokio::test]
async fn direct_pushes_and_stop_leave_consistent_state() {
    let store = Arc::new(AggregateStore::new());
    let stop = Arc::new(StopSignal::new());
    let (tx, source) = ChannelSource::bounded(1);

    let ingest = tokio::spawn(
        IngestLoop::new(
            source,
            EventParser::default(),
            Arc::clone(&store),
            Arc::clone(&stop),
            BackoffConfig::default(),
        )
        .run(),
    );

    for i in 0..50_u32 {
        let json = format!(
            r#"{{"pressure": {}, "windspeed": 1, "weather_type": "Rain"}}"#,
            1000 + i
        );
        tx.send(RawMessage::new(json)).await.unwrap();
    }
    while store.events_folded().unwrap() < 50 {
        tokio::task::yield_now().await;
    }
    stop.request_stop();

    let summary = ingest.await.unwrap().unwrap();
    assert_eq!(summary.end_reason, IngestEndReason::StopRequested);
    assert_eq!(summary.events_applied, 50);

    let snapshot = store.snapshot().unwrap();
    let rain = snapshot.category("Rain").unwrap();
    assert_eq!(rain.count, 50);
    assert!(close(rain.avg_pressure, 1024.5));
}
