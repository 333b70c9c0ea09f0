//! Error types for the consumer binary.
//!
//! [`ConsumerError`] is the top-level error type that wraps all possible
//! failure modes during startup and ingestion.

/// Top-level error for the consumer binary.
///
/// Each variant wraps a specific subsystem error, providing a single
/// error type that `main` can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: weatherflow_core::ConfigError,
    },

    /// The ingest loop ended with an error.
    #[error("ingest error: {source}")]
    Ingest {
        /// The underlying ingest error.
        #[from]
        source: weatherflow_core::IngestError,
    },

    /// The render loop could not read the store.
    #[error("render error: {source}")]
    Render {
        /// The underlying store error.
        #[from]
        source: weatherflow_core::StoreError,
    },

    /// Observer API server failed to start.
    #[error("observer error: {source}")]
    Observer {
        /// The underlying startup error.
        #[from]
        source: weatherflow_observer::StartupError,
    },

    /// A background task panicked or was cancelled.
    #[error("task error: {source}")]
    Task {
        /// The underlying join error.
        #[from]
        source: tokio::task::JoinError,
    },
}
