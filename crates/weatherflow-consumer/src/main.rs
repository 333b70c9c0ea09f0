//! Weatherflow consumer binary.
//!
//! Subscribes to the weather observation stream (or replays a JSON-lines
//! file), keeps running per-category averages of pressure and wind speed,
//! and renders them periodically to the log and to the observer's
//! `WebSocket` clients.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `weatherflow-config.yaml` (or the path given
//!    as the first argument)
//! 2. Initialize structured logging (tracing)
//! 3. Create the aggregate store and the stop signal
//! 4. Install the Ctrl-C handler
//! 5. Start the Observer API server (when enabled)
//! 6. Start the render loop
//! 7. Run the ingest loop for the configured mode
//! 8. Raise the stop signal, wait for the final render, log the summaries

mod error;
mod nats;
mod replay;
mod table;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use weatherflow_core::config::LoggingConfig;
use weatherflow_core::{
    AggregateStore, EventParser, IngestError, IngestLoop, IngestMode, IngestSummary, LogFormat,
    MessageSource, SnapshotRenderer, StopSignal, WeatherflowConfig, run_render_loop,
};
use weatherflow_observer::server::ServerConfig;
use weatherflow_observer::{AppState, BroadcastRenderer, spawn_observer};

use crate::error::ConsumerError;
use crate::nats::NatsSource;
use crate::replay::ReplaySource;
use crate::table::TableRenderer;

/// Default configuration file, relative to the working directory.
const DEFAULT_CONFIG_PATH: &str = "weatherflow-config.yaml";

/// Application entry point for the consumer.
///
/// # Errors
///
/// Returns an error if configuration is invalid, the observer cannot bind,
/// or ingestion ends with a fatal error.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::args_os()
        .nth(1)
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);

    // 1. Load configuration.
    let config = load_config(&config_path)?;

    // 2. Initialize structured logging.
    init_logging(&config.logging);
    info!(
        config = %config_path.display(),
        mode = ?config.ingest.mode,
        "weatherflow-consumer starting"
    );

    run(config).await?;
    Ok(())
}

/// Load, override from the environment, and validate the configuration.
///
/// A missing file gives the defaults.
fn load_config(path: &Path) -> Result<WeatherflowConfig, ConsumerError> {
    let config = WeatherflowConfig::load(path)?;
    Ok(config)
}

/// Install the global tracing subscriber. `RUST_LOG` takes precedence over
/// the configured level.
fn init_logging(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    match config.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

/// Wire the pipeline together and run it to completion.
async fn run(config: WeatherflowConfig) -> Result<(), ConsumerError> {
    // 3. Shared state.
    let store = Arc::new(AggregateStore::new());
    let stop = Arc::new(StopSignal::new());

    // 4. Ctrl-C requests a cooperative stop.
    {
        let stop = Arc::clone(&stop);
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Ctrl-C received, stopping");
                    stop.request_stop();
                }
                Err(e) => warn!(error = %e, "failed to listen for Ctrl-C"),
            }
        });
    }

    let mut renderers: Vec<Box<dyn SnapshotRenderer>> = Vec::new();
    if config.render.log_table {
        renderers.push(Box::new(TableRenderer));
    }

    // 5. Observer API server.
    let observer = if config.observer.enabled {
        let state = Arc::new(AppState::new(Arc::clone(&store), Arc::clone(&stop)));
        renderers.push(Box::new(BroadcastRenderer::new(Arc::clone(&state))));

        let server_config = ServerConfig {
            host: config.observer.host.clone(),
            port: config.observer.port,
        };
        let (addr, handle) = spawn_observer(&server_config, state, Arc::clone(&stop)).await?;
        info!(%addr, "Observer API server started");
        Some(handle)
    } else {
        info!("Observer disabled");
        None
    };

    // 6. Render loop.
    let render = tokio::spawn(run_render_loop(
        Arc::clone(&store),
        renderers,
        config.render_interval(),
        Arc::clone(&stop),
    ));

    // 7. Ingest until stopped, exhausted, or failed.
    let parser = EventParser::new(config.parser.clone());
    let ingest_result = match config.ingest.mode {
        IngestMode::Nats => {
            let source = NatsSource::new(&config.transport);
            ingest(source, parser, &store, &stop, &config).await
        }
        IngestMode::Replay => {
            let path = config.ingest.replay_path.clone().unwrap_or_default();
            let source = ReplaySource::new(path, config.replay_interval());
            ingest(source, parser, &store, &stop, &config).await
        }
    };

    // 8. Shut everything down and report.
    stop.request_stop();
    let render_summary = render.await??;
    if let Some(handle) = observer {
        handle.await?;
    }

    let ingest_summary = ingest_result?;

    info!(
        end_reason = ?ingest_summary.end_reason,
        messages_received = ingest_summary.messages_received,
        events_applied = ingest_summary.events_applied,
        parse_failures = ingest_summary.parse_failures,
        out_of_order = ingest_summary.out_of_order,
        reconnects = ingest_summary.reconnects,
        renders = render_summary.renders,
        categories = store.category_count()?,
        "weatherflow-consumer shutdown complete"
    );

    Ok(())
}

async fn ingest<S: MessageSource>(
    source: S,
    parser: EventParser,
    store: &Arc<AggregateStore>,
    stop: &Arc<StopSignal>,
    config: &WeatherflowConfig,
) -> Result<IngestSummary, IngestError> {
    IngestLoop::new(
        source,
        parser,
        Arc::clone(store),
        Arc::clone(stop),
        config.backoff(),
    )
    .run()
    .await
}
