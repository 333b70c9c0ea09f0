//! Cooperative stop signal shared by every long-running task.
//!
//! The ingest loop, the render loop, the observer server and the Ctrl-C
//! handler all hold an `Arc<StopSignal>`. Raising it never aborts work in
//! progress; each task checks it between units of work and winds down on
//! its own.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// One-shot, shareable stop request.
#[derive(Debug, Default)]
pub struct StopSignal {
    /// Whether a stop has been requested.
    stop_requested: AtomicBool,

    /// Wakes every task parked in [`wait`](Self::wait).
    notify: Notify,
}

impl StopSignal {
    /// Create a signal that has not fired.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop and wake all waiters. Idempotent.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Check whether a stop has been requested.
    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    /// Wait until a stop is requested.
    ///
    /// Returns immediately if the signal already fired. Cancel safe.
    pub async fn wait(&self) {
        loop {
            // Register before checking the flag so a concurrent
            // `request_stop` cannot slip between the check and the await.
            let notified = self.notify.notified();
            if self.is_stop_requested() {
                return;
            }
            notified.await;
        }
    }
}
