//! JSON-lines replay as a [`MessageSource`].
//!
//! Stands in for the broker when none is available: each non-blank line of
//! the file is one observation, emitted at a fixed interval (the first one
//! immediately). The source reports exhaustion after the last line, which
//! ends the ingest loop.

use std::path::PathBuf;
use std::time::Duration;

use tokio::time::{Interval, MissedTickBehavior};
use tracing::info;
use weatherflow_core::{MessageSource, RawMessage, SourceError};

/// Replays a JSON-lines file at a fixed pace.
pub struct ReplaySource {
    path: PathBuf,
    interval: Duration,
    lines: Option<std::vec::IntoIter<(usize, Vec<u8>)>>,
    ticker: Option<Interval>,
}

impl ReplaySource {
    /// Create a source for `path`. The file is read on [`connect`].
    ///
    /// [`connect`]: MessageSource::connect
    pub const fn new(path: PathBuf, interval: Duration) -> Self {
        Self {
            path,
            interval,
            lines: None,
            ticker: None,
        }
    }
}

/// Split a file into non-blank, trimmed lines with 1-based line numbers.
fn split_lines(contents: &[u8]) -> Vec<(usize, Vec<u8>)> {
    contents
        .split(|b| *b == b'\n')
        .enumerate()
        .filter_map(|(idx, line)| {
            let line = line.trim_ascii();
            (!line.is_empty()).then(|| (idx.saturating_add(1), line.to_vec()))
        })
        .collect()
}

impl MessageSource for ReplaySource {
    fn name(&self) -> &str {
        "replay"
    }

    async fn connect(&mut self) -> Result<(), SourceError> {
        if self.lines.is_some() {
            return Ok(());
        }

        let contents = tokio::fs::read(&self.path).await?;
        let lines = split_lines(&contents);
        info!(
            path = %self.path.display(),
            records = lines.len(),
            interval_ms = u64::try_from(self.interval.as_millis()).unwrap_or(u64::MAX),
            "replay file loaded"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.ticker = Some(ticker);
        self.lines = Some(lines.into_iter());
        Ok(())
    }

    async fn next_message(&mut self) -> Result<Option<RawMessage>, SourceError> {
        let (Some(lines), Some(ticker)) = (self.lines.as_mut(), self.ticker.as_mut()) else {
            return Err(SourceError::TransportUnavailable(String::from(
                "replay file not loaded",
            )));
        };
        if lines.as_slice().is_empty() {
            return Ok(None);
        }

        // Wait before taking the line so a cancelled wait loses nothing.
        ticker.tick().await;
        let Some((line_no, line)) = lines.next() else {
            return Ok(None);
        };

        if std::str::from_utf8(&line).is_err() {
            return Err(SourceError::Decode(format!(
                "line {line_no} is not valid UTF-8"
            )));
        }
        Ok(Some(RawMessage::new(line)))
    }

    async fn close(&mut self) {
        let remaining = self.lines.take().map_or(0, |lines| lines.len());
        self.ticker = None;
        info!(path = %self.path.display(), remaining, "replay source closed");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::path::Path;

    use uuid::Uuid;

    use super::*;

    struct TempFile(PathBuf);

    impl TempFile {
        fn with_contents(contents: &[u8]) -> Self {
            let path = std::env::temp_dir().join(format!("weatherflow-replay-{}.jsonl", Uuid::new_v4()));
            std::fs::write(&path, contents).unwrap();
            Self(path)
        }

        fn path(&self) -> &Path {
            &self.0
        }
    }

    impl Drop for TempFile {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.0);
        }
    }

    #[test]
    fn split_skips_blank_lines_and_numbers_from_one() {
        let lines = split_lines(b"{\"a\":1}\n\n  \r\n{\"b\":2}\r\n");
        assert_eq!(
            lines,
            vec![(1, b"{\"a\":1}".to_vec()), (4, b"{\"b\":2}".to_vec())]
        );
    }

    #[tokio::test]
    async fn replays_every_line_then_ends() {
        let file = TempFile::with_contents(b"{\"n\":1}\n\n{\"n\":2}\n");
        let mut source = ReplaySource::new(file.path().to_path_buf(), Duration::from_millis(1));
        source.connect().await.unwrap();

        let first = source.next_message().await.unwrap().unwrap();
        assert_eq!(first.payload, b"{\"n\":1}");
        let second = source.next_message().await.unwrap().unwrap();
        assert_eq!(second.payload, b"{\"n\":2}");
        assert!(source.next_message().await.unwrap().is_none());
        source.close().await;
    }

    #[tokio::test]
    async fn invalid_utf8_is_a_decode_error() {
        let file = TempFile::with_contents(b"\xff\xfe\n{\"n\":2}\n");
        let mut source = ReplaySource::new(file.path().to_path_buf(), Duration::from_millis(1));
        source.connect().await.unwrap();

        let err = source.next_message().await.unwrap_err();
        assert!(matches!(err, SourceError::Decode(ref msg) if msg.contains("line 1")));
        assert!(source.next_message().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn missing_file_is_an_io_error() {
        let mut source = ReplaySource::new(
            std::env::temp_dir().join(format!("missing-{}.jsonl", Uuid::new_v4())),
            Duration::from_millis(1),
        );
        let err = source.connect().await.unwrap_err();
        assert!(matches!(err, SourceError::Io { .. }));
    }
}
