//! The seam between the ingest loop and whatever delivers raw messages.
//!
//! A [`MessageSource`] hides the transport (a NATS subscription, a replay
//! file, an in-process channel). The ingest loop only needs four things from
//! it: connect, pull the next payload, learn that the input is exhausted,
//! and release its resources.

use std::future::Future;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

/// One undecoded message as delivered by a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// The message body, expected to be a JSON object.
    pub payload: Vec<u8>,
    /// When the source handed the message over.
    pub received_at: DateTime<Utc>,
}

impl RawMessage {
    /// Wrap a payload, stamping it with the current time.
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            received_at: Utc::now(),
        }
    }
}

/// Failures a source can report.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The transport is unreachable or the connection dropped. Retryable.
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    /// One frame could not be turned into a message. The frame is skipped;
    /// the source stays usable.
    #[error("undecodable frame: {0}")]
    Decode(String),

    /// Reading local input failed.
    #[error("source I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },
}

/// A pull-based supplier of raw messages.
///
/// `next_message` resolving to `Ok(None)` means the input is finished (a
/// bounded replay reached its end). An unbounded transport never returns
/// `Ok(None)`; losing its connection is a
/// [`SourceError::TransportUnavailable`].
///
/// `next_message` must be cancel safe: the ingest loop races it against the
/// stop signal and drops it when the stop wins.
pub trait MessageSource: Send {
    /// Short label for logs (`"nats"`, `"replay"`, ...).
    fn name(&self) -> &str;

    /// Establish (or re-establish) the underlying connection.
    fn connect(&mut self) -> impl Future<Output = Result<(), SourceError>> + Send;

    /// Pull the next message.
    fn next_message(&mut self) -> impl Future<Output = Result<Option<RawMessage>, SourceError>> + Send;

    /// Release the connection. Called exactly once, on every exit path of
    /// the ingest loop. Must not fail.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// In-process source fed through a Tokio channel.
///
/// Lets producers inside the same process (tests, an embedded generator)
/// push messages without a broker. The input is exhausted once every
/// [`mpsc::Sender`] is dropped.
#[derive(Debug)]
pub struct ChannelSource {
    receiver: mpsc::Receiver<RawMessage>,
}

impl ChannelSource {
    /// Create a bounded channel and return its sending half with the source.
    pub fn bounded(capacity: usize) -> (mpsc::Sender<RawMessage>, Self) {
        let (tx, receiver) = mpsc::channel(capacity);
        (tx, Self { receiver })
    }

    /// Wrap an existing receiver.
    pub const fn new(receiver: mpsc::Receiver<RawMessage>) -> Self {
        Self { receiver }
    }
}

impl MessageSource for ChannelSource {
    fn name(&self) -> &str {
        "channel"
    }

    async fn connect(&mut self) -> Result<(), SourceError> {
        Ok(())
    }

    async fn next_message(&mut self) -> Result<Option<RawMessage>, SourceError> {
        Ok(self.receiver.recv().await)
    }

    async fn close(&mut self) {
        self.receiver.close();
    }
}
