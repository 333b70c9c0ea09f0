//! The ingest loop: source -> parser -> store.
//!
//! [`IngestLoop::run`] is the only writer of the [`AggregateStore`]. It keeps
//! the source connected (reconnecting with [`ExponentialBackoff`] when the
//! transport drops), parses each message, and folds valid events into the
//! store. A malformed message is logged and skipped; it never stops the
//! loop. A store invariant violation always does.
//!
//! The stop signal is checked between messages. A message that has already
//! been received is applied in full before the loop notices the stop.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};
use weatherflow_types::WeatherEvent;

use crate::backoff::{BackoffConfig, ExponentialBackoff};
use crate::control::StopSignal;
use crate::parse::{EventParser, ParseError};
use crate::source::{MessageSource, RawMessage, SourceError};
use crate::store::{AggregateStore, StoreError};

/// Errors that end the ingest loop.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// The aggregate store reported an invariant violation.
    #[error("store error: {source}")]
    Store {
        /// The underlying store error.
        #[from]
        source: StoreError,
    },

    /// The transport stayed unreachable for the whole retry budget.
    #[error("gave up reconnecting after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// Retries taken before giving up.
        attempts: u32,
        /// The last transport error seen.
        last_error: String,
    },

    /// The source failed in a way reconnecting cannot fix.
    #[error("source error: {source}")]
    Source {
        /// The underlying source error.
        #[from]
        source: SourceError,
    },
}

/// Why the ingest loop returned normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestEndReason {
    /// The stop signal fired.
    StopRequested,
    /// The source reported the end of its input.
    SourceExhausted,
}

/// Counters reported when the loop ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestSummary {
    /// Messages pulled from the source, valid or not.
    pub messages_received: u64,
    /// Events folded into the store.
    pub events_applied: u64,
    /// Messages skipped because they could not be parsed or decoded.
    pub parse_failures: u64,
    /// Events whose timestamp was earlier than one already applied.
    pub out_of_order: u64,
    /// Successful reconnections after a transport drop.
    pub reconnects: u64,
    /// Why the loop stopped.
    pub end_reason: IngestEndReason,
}

/// What [`apply_message`] did with a message.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// The message parsed and was folded into the store.
    Applied(WeatherEvent),
    /// The message was rejected by the parser; the store is untouched.
    Skipped(ParseError),
}

/// Parse one raw message and fold it into the store.
///
/// This is the whole per-message path of the ingest loop, exposed so that
/// events pushed in by direct call reach [`AggregateStore::update`] the same
/// way as events from a transport.
///
/// # Errors
///
/// Returns [`StoreError`] if the store rejects the update. Parse failures are
/// not errors; they come back as [`ApplyOutcome::Skipped`].
pub fn apply_message(
    parser: &EventParser,
    store: &AggregateStore,
    raw: &RawMessage,
) -> Result<ApplyOutcome, StoreError> {
    match parser.parse(&raw.payload, raw.received_at) {
        Ok(event) => {
            store.update(&event)?;
            Ok(ApplyOutcome::Applied(event))
        }
        Err(err) => {
            warn!(
                error = %err,
                payload = %String::from_utf8_lossy(&raw.payload),
                "skipping malformed message"
            );
            Ok(ApplyOutcome::Skipped(err))
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    messages_received: u64,
    events_applied: u64,
    parse_failures: u64,
    out_of_order: u64,
    reconnects: u64,
}

impl Counters {
    const fn finish(self, end_reason: IngestEndReason) -> IngestSummary {
        IngestSummary {
            messages_received: self.messages_received,
            events_applied: self.events_applied,
            parse_failures: self.parse_failures,
            out_of_order: self.out_of_order,
            reconnects: self.reconnects,
            end_reason,
        }
    }
}

enum Connection {
    Up,
    Stopped,
}

enum Pause {
    Elapsed,
    Stopped,
}

/// Drives one [`MessageSource`] into one [`AggregateStore`].
pub struct IngestLoop<S> {
    source: S,
    parser: EventParser,
    store: Arc<AggregateStore>,
    stop: Arc<StopSignal>,
    backoff: ExponentialBackoff,
    connected: bool,
    ever_connected: bool,
    latest_timestamp: Option<DateTime<Utc>>,
}

impl<S: MessageSource> IngestLoop<S> {
    /// Assemble a loop. Nothing runs until [`run`](Self::run).
    pub const fn new(
        source: S,
        parser: EventParser,
        store: Arc<AggregateStore>,
        stop: Arc<StopSignal>,
        backoff: BackoffConfig,
    ) -> Self {
        Self {
            source,
            parser,
            store,
            stop,
            backoff: ExponentialBackoff::new(backoff),
            connected: false,
            ever_connected: false,
            latest_timestamp: None,
        }
    }

    /// Run until the stop signal fires, the source runs dry, or a fatal
    /// error occurs. The source is closed on every exit path.
    ///
    /// # Errors
    ///
    /// - [`IngestError::Store`] on a store invariant violation
    /// - [`IngestError::RetriesExhausted`] when the reconnect budget runs out
    /// - [`IngestError::Source`] on a non-transport source failure
    pub async fn run(mut self) -> Result<IngestSummary, IngestError> {
        info!(source = self.source.name(), "ingest loop starting");

        let mut counters = Counters::default();
        let result = self.drive(&mut counters).await;
        self.source.close().await;

        match &result {
            Ok(reason) => info!(
                source = self.source.name(),
                end_reason = ?reason,
                messages_received = counters.messages_received,
                events_applied = counters.events_applied,
                parse_failures = counters.parse_failures,
                reconnects = counters.reconnects,
                "ingest loop finished"
            ),
            Err(err) => error!(
                source = self.source.name(),
                error = %err,
                events_applied = counters.events_applied,
                "ingest loop failed"
            ),
        }

        result.map(|reason| counters.finish(reason))
    }

    async fn drive(&mut self, counters: &mut Counters) -> Result<IngestEndReason, IngestError> {
        loop {
            if self.stop.is_stop_requested() {
                return Ok(IngestEndReason::StopRequested);
            }

            if !self.connected {
                match self.connect(counters).await? {
                    Connection::Up => {}
                    Connection::Stopped => return Ok(IngestEndReason::StopRequested),
                }
            }

            let stop = Arc::clone(&self.stop);
            let next = tokio::select! {
                biased;
                () = stop.wait() => return Ok(IngestEndReason::StopRequested),
                next = self.source.next_message() => next,
            };

            match next {
                Ok(Some(raw)) => {
                    self.backoff.reset();
                    counters.messages_received = counters.messages_received.saturating_add(1);
                    self.handle(&raw, counters)?;
                }
                Ok(None) => {
                    info!(source = self.source.name(), "source exhausted");
                    return Ok(IngestEndReason::SourceExhausted);
                }
                Err(SourceError::TransportUnavailable(reason)) => {
                    self.connected = false;
                    match self.pause(reason, "transport lost, backing off").await? {
                        Pause::Elapsed => {}
                        Pause::Stopped => return Ok(IngestEndReason::StopRequested),
                    }
                }
                Err(SourceError::Decode(reason)) => {
                    warn!(source = self.source.name(), %reason, "skipping undecodable frame");
                    counters.parse_failures = counters.parse_failures.saturating_add(1);
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn handle(&mut self, raw: &RawMessage, counters: &mut Counters) -> Result<(), IngestError> {
        match apply_message(&self.parser, &self.store, raw)? {
            ApplyOutcome::Applied(event) => {
                counters.events_applied = counters.events_applied.saturating_add(1);
                match self.latest_timestamp {
                    Some(latest) if event.timestamp < latest => {
                        counters.out_of_order = counters.out_of_order.saturating_add(1);
                        debug!(
                            timestamp = %event.timestamp,
                            latest = %latest,
                            "event arrived out of order"
                        );
                    }
                    _ => self.latest_timestamp = Some(event.timestamp),
                }
            }
            ApplyOutcome::Skipped(_) => {
                counters.parse_failures = counters.parse_failures.saturating_add(1);
            }
        }
        Ok(())
    }

    /// Connect, retrying transport failures with backoff until connected,
    /// stopped, or out of retries.
    ///
    /// The backoff is not reset here. A transport that accepts and then
    /// drops the connection keeps growing its delay until a message arrives.
    async fn connect(&mut self, counters: &mut Counters) -> Result<Connection, IngestError> {
        loop {
            let stop = Arc::clone(&self.stop);
            let attempt = tokio::select! {
                biased;
                () = stop.wait() => return Ok(Connection::Stopped),
                attempt = self.source.connect() => attempt,
            };

            let reason = match attempt {
                Ok(()) => {
                    if self.ever_connected {
                        counters.reconnects = counters.reconnects.saturating_add(1);
                        info!(
                            source = self.source.name(),
                            attempts = self.backoff.attempt(),
                            "reconnected"
                        );
                    } else {
                        info!(source = self.source.name(), "connected");
                    }
                    self.connected = true;
                    self.ever_connected = true;
                    return Ok(Connection::Up);
                }
                Err(SourceError::TransportUnavailable(reason)) => reason,
                Err(err) => return Err(err.into()),
            };

            match self.pause(reason, "connect failed, backing off").await? {
                Pause::Elapsed => {}
                Pause::Stopped => return Ok(Connection::Stopped),
            }
        }
    }

    /// Sleep for the next backoff delay, or fail once the budget is spent.
    async fn pause(&mut self, reason: String, what: &'static str) -> Result<Pause, IngestError> {
        let Some(delay) = self.backoff.next_delay() else {
            return Err(IngestError::RetriesExhausted {
                attempts: self.backoff.attempt(),
                last_error: reason,
            });
        };
        warn!(
            source = self.source.name(),
            %reason,
            attempt = self.backoff.attempt(),
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "{what}"
        );

        let stop = Arc::clone(&self.stop);
        tokio::select! {
            biased;
            () = stop.wait() => Ok(Pause::Stopped),
            () = tokio::time::sleep(delay) => Ok(Pause::Elapsed),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::source::ChannelSource;

    /// Source that plays back a fixed script, then waits forever.
    struct ScriptedSource {
        connect_failures: u32,
        script: VecDeque<Result<Option<RawMessage>, SourceError>>,
        closed: Arc<AtomicBool>,
    }

    impl ScriptedSource {
        fn new(
            connect_failures: u32,
            script: Vec<Result<Option<RawMessage>, SourceError>>,
        ) -> (Self, Arc<AtomicBool>) {
            let closed = Arc::new(AtomicBool::new(false));
            let source = Self {
                connect_failures,
                script: script.into(),
                closed: Arc::clone(&closed),
            };
            (source, closed)
        }
    }

    impl MessageSource for ScriptedSource {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn connect(&mut self) -> Result<(), SourceError> {
            if self.connect_failures > 0 {
                self.connect_failures = self.connect_failures.saturating_sub(1);
                return Err(SourceError::TransportUnavailable("refused".into()));
            }
            Ok(())
        }

        async fn next_message(&mut self) -> Result<Option<RawMessage>, SourceError> {
            match self.script.pop_front() {
                Some(step) => step,
                None => std::future::pending().await,
            }
        }

        async fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn msg(json: &str) -> Result<Option<RawMessage>, SourceError> {
        Ok(Some(RawMessage::new(json)))
    }

    fn fast_backoff(max_retries: u32) -> BackoffConfig {
        BackoffConfig {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(1),
            max_retries,
        }
    }

    fn ingest<S: MessageSource>(source: S, store: &Arc<AggregateStore>) -> IngestLoop<S> {
        IngestLoop::new(
            source,
            EventParser::default(),
            Arc::clone(store),
            Arc::new(StopSignal::new()),
            fast_backoff(0),
        )
    }

    #[tokio::test]
    async fn folds_channel_messages_until_exhausted() {
        let store = Arc::new(AggregateStore::new());
        let (tx, source) = ChannelSource::bounded(8);
        for json in [
            r#"{"pressure": 1000, "windspeed": 10, "weather_type": "Rain"}"#,
            r#"{"pressure": 1010, "windspeed": 5, "weather_type": "Rain"}"#,
            r#"{"pressure": 990, "windspeed": 20, "weather_type": "Clear"}"#,
        ] {
            tx.send(RawMessage::new(json)).await.unwrap();
        }
        drop(tx);

        let summary = ingest(source, &store).run().await.unwrap();
        assert_eq!(summary.end_reason, IngestEndReason::SourceExhausted);
        assert_eq!(summary.messages_received, 3);
        assert_eq!(summary.events_applied, 3);

        let rain = store.category("Rain").unwrap().unwrap();
        assert!((rain.avg_pressure - 1005.0).abs() < 1e-9);
        assert!((rain.avg_windspeed - 7.5).abs() < 1e-9);
        assert_eq!(rain.count, 2);
        let clear = store.category("Clear").unwrap().unwrap();
        assert!((clear.avg_pressure - 990.0).abs() < 1e-9);
        assert_eq!(clear.count, 1);
    }

    #[tokio::test]
    async fn malformed_message_is_skipped() {
        let store = Arc::new(AggregateStore::new());
        let (source, closed) = ScriptedSource::new(
            0,
            vec![
                msg(r#"{"pressure": 1000, "weather_type": "Rain"}"#),
                msg("not json"),
                Err(SourceError::Decode("bad frame".into())),
                Ok(None),
            ],
        );

        let summary = ingest(source, &store).run().await.unwrap();
        assert_eq!(summary.messages_received, 2);
        assert_eq!(summary.events_applied, 0);
        assert_eq!(summary.parse_failures, 3);
        assert!(store.is_empty().unwrap());
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn apply_message_matches_loop_path() {
        let store = AggregateStore::new();
        let parser = EventParser::default();

        let outcome = apply_message(
            &parser,
            &store,
            &RawMessage::new(r#"{"pressure": 1000, "windspeed": 10, "weather_type": "Rain"}"#),
        )
        .unwrap();
        assert!(matches!(outcome, ApplyOutcome::Applied(ref e) if e.category.as_str() == "Rain"));

        let outcome = apply_message(
            &parser,
            &store,
            &RawMessage::new(r#"{"pressure": 1000, "weather_type": "Rain"}"#),
        )
        .unwrap();
        assert_eq!(
            outcome,
            ApplyOutcome::Skipped(ParseError::MissingField("windspeed"))
        );
        assert_eq!(store.events_folded().unwrap(), 1);
    }

    #[tokio::test]
    async fn counts_out_of_order_events() {
        let store = Arc::new(AggregateStore::new());
        let (source, _) = ScriptedSource::new(
            0,
            vec![
                msg(r#"{"pressure": 1, "windspeed": 1, "weather": "Fog", "datetime": "1/1/2012 2:00"}"#),
                msg(r#"{"pressure": 1, "windspeed": 1, "weather": "Fog", "datetime": "1/1/2012 1:00"}"#),
                msg(r#"{"pressure": 1, "windspeed": 1, "weather": "Fog", "datetime": "1/1/2012 3:00"}"#),
                Ok(None),
            ],
        );

        let summary = ingest(source, &store).run().await.unwrap();
        assert_eq!(summary.events_applied, 3);
        assert_eq!(summary.out_of_order, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_after_transport_loss() {
        let store = Arc::new(AggregateStore::new());
        let (source, closed) = ScriptedSource::new(
            2,
            vec![
                msg(r#"{"pressure": 1000, "windspeed": 10, "weather_type": "Rain"}"#),
                Err(SourceError::TransportUnavailable("connection reset".into())),
                msg(r#"{"pressure": 1010, "windspeed": 5, "weather_type": "Rain"}"#),
                Ok(None),
            ],
        );

        let summary = ingest(source, &store).run().await.unwrap();
        assert_eq!(summary.events_applied, 2);
        assert_eq!(summary.reconnects, 1);
        assert_eq!(store.category_count().unwrap(), 1);
        assert!(closed.load(Ordering::SeqCst));
    }

    /// Accepts every connection and drops it on the first read.
    struct DroppingSource {
        connects: Arc<AtomicU32>,
    }

    impl MessageSource for DroppingSource {
        fn name(&self) -> &str {
            "dropping"
        }

        async fn connect(&mut self) -> Result<(), SourceError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn next_message(&mut self) -> Result<Option<RawMessage>, SourceError> {
            Err(SourceError::TransportUnavailable("subscription ended".into()))
        }

        async fn close(&mut self) {}
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_connections_back_off() {
        let store = Arc::new(AggregateStore::new());
        let connects = Arc::new(AtomicU32::new(0));
        let source = DroppingSource {
            connects: Arc::clone(&connects),
        };
        let ingest = IngestLoop::new(
            source,
            EventParser::default(),
            Arc::clone(&store),
            Arc::new(StopSignal::new()),
            fast_backoff(5),
        );

        let started = tokio::time::Instant::now();
        let err = ingest.run().await.unwrap_err();

        assert!(matches!(
            err,
            IngestError::RetriesExhausted { attempts: 5, .. }
        ));
        // Initial connect plus one per retry.
        assert_eq!(connects.load(Ordering::SeqCst), 6);
        // 100 + 200 + 400 + 800 + 1000 ms before jitter.
        assert!(started.elapsed() >= Duration::from_millis(2500));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_when_retry_budget_is_spent() {
        let store = Arc::new(AggregateStore::new());
        let (source, closed) = ScriptedSource::new(u32::MAX, vec![]);
        let ingest = IngestLoop::new(
            source,
            EventParser::default(),
            Arc::clone(&store),
            Arc::new(StopSignal::new()),
            fast_backoff(3),
        );

        let err = ingest.run().await.unwrap_err();
        assert!(matches!(
            err,
            IngestError::RetriesExhausted { attempts: 3, .. }
        ));
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_interrupts_backoff() {
        let store = Arc::new(AggregateStore::new());
        let stop = Arc::new(StopSignal::new());
        let (source, closed) = ScriptedSource::new(u32::MAX, vec![]);
        let ingest = IngestLoop::new(
            source,
            EventParser::default(),
            Arc::clone(&store),
            Arc::clone(&stop),
            fast_backoff(0),
        );

        let stopper = Arc::clone(&stop);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            stopper.request_stop();
        });

        let summary = ingest.run().await.unwrap();
        assert_eq!(summary.end_reason, IngestEndReason::StopRequested);
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn stop_interrupts_idle_source() {
        let store = Arc::new(AggregateStore::new());
        let stop = Arc::new(StopSignal::new());
        let (source, closed) = ScriptedSource::new(
            0,
            vec![msg(r#"{"pressure": 1000, "windspeed": 10, "weather_type": "Rain"}"#)],
        );
        let ingest = IngestLoop::new(
            source,
            EventParser::default(),
            Arc::clone(&store),
            Arc::clone(&stop),
            fast_backoff(0),
        );
        let handle = tokio::spawn(ingest.run());

        while store.events_folded().unwrap() == 0 {
            tokio::task::yield_now().await;
        }
        stop.request_stop();

        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.end_reason, IngestEndReason::StopRequested);
        assert_eq!(summary.events_applied, 1);
        assert!(closed.load(Ordering::SeqCst));
    }
}
