//! Observer startup helper for embedding in the consumer binary.
//!
//! [`spawn_observer`] binds the socket on the caller's task, so an occupied
//! port is reported at startup, and then serves on a background task.
//!
//! ```rust,ignore
//! let state = Arc::new(AppState::new(Arc::clone(&store), Arc::clone(&stop)));
//! let (addr, handle) = spawn_observer(&ServerConfig::default(), state, stop).await?;
//! // ... later, after the stop signal fired:
//! handle.await?;
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::task::JoinHandle;
use weatherflow_core::StopSignal;

use crate::server::{self, ServerConfig, ServerError};
use crate::state::AppState;

/// Errors that can occur when spawning the Observer server.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    /// The server failed to bind or start.
    #[error("server start error: {0}")]
    Server(#[from] ServerError),
}

/// Bind the Observer server and run it on a background Tokio task.
///
/// Returns the bound address (useful with port 0) and a [`JoinHandle`] that
/// resolves once the server has shut down after `stop` fired.
///
/// # Errors
///
/// Returns [`StartupError::Server`] if the address cannot be bound.
pub async fn spawn_observer(
    config: &ServerConfig,
    state: Arc<AppState>,
    stop: Arc<StopSignal>,
) -> Result<(SocketAddr, JoinHandle<()>), StartupError> {
    let listener = server::bind(config).await?;
    let addr = listener
        .local_addr()
        .map_err(|e| ServerError::Bind(format!("listener has no address: {e}")))?;

    let handle = tokio::spawn(async move {
        if let Err(e) = server::serve(listener, state, stop).await {
            tracing::error!(error = %e, "Observer server exited with error");
        }
    });

    tracing::info!(%addr, "Observer server spawned on background task");

    Ok((addr, handle))
}
