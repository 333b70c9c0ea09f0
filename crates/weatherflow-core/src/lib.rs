//! Core pipeline for the Weatherflow streaming aggregator.
//!
//! Raw weather observations arrive from a [`MessageSource`], are decoded by
//! the [`EventParser`], and are folded into the [`AggregateStore`], which
//! keeps a running count and sums per weather category. A render loop reads
//! consistent snapshots on its own cadence and hands them to any number of
//! [`SnapshotRenderer`]s.
//!
//! # Modules
//!
//! - [`parse`] -- raw payload to [`WeatherEvent`](weatherflow_types::WeatherEvent)
//! - [`store`] -- per-category running aggregates
//! - [`source`] -- the transport seam and an in-process channel source
//! - [`ingest`] -- the source -> parser -> store loop with reconnects
//! - [`render`] -- the periodic snapshot reader
//! - [`control`] -- the shared stop signal
//! - [`backoff`] -- reconnect delays
//! - [`config`] -- YAML configuration with env overrides

pub mod backoff;
pub mod config;
pub mod control;
pub mod ingest;
pub mod parse;
pub mod render;
pub mod source;
pub mod store;

pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use config::{ConfigError, IngestMode, LogFormat, WeatherflowConfig};
pub use control::StopSignal;
pub use ingest::{
    ApplyOutcome, IngestEndReason, IngestError, IngestLoop, IngestSummary, apply_message,
};
pub use parse::{EventParser, FieldAlias, FieldMapping, ParseError};
pub use render::{NoOpRenderer, RenderSummary, SnapshotRenderer, run_render_loop};
pub use source::{ChannelSource, MessageSource, RawMessage, SourceError};
pub use store::{AggregateStore, CategoryAggregate, StoreError};
