//! Playback sinks.

use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Sink errors.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Sink is not open")]
    NotOpen,

    #[error("Sink I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Append-only consumer of encoded audio segments. One per process.
#[async_trait]
pub trait PlaybackSink: Send {
    /// Attach a new stream of `mime_type`. Replaces any previous stream.
    async fn open(&mut self, mime_type: &str) -> Result<(), SinkError>;

    /// Append one segment; returns once the sink can take the next.
    async fn commit(&mut self, segment: Bytes) -> Result<(), SinkError>;

    fn is_open(&self) -> bool;

    /// Stop playback and detach the current stream.
    async fn reset(&mut self);
}

/// Writes the stream to a file, one file per opened stream.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    file: Option<File>,
    written: u64,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
            written: 0,
        }
    }
}

#[async_trait]
impl PlaybackSink for FileSink {
    async fn open(&mut self, mime_type: &str) -> Result<(), SinkError> {
        self.reset().await;
        self.file = Some(File::create(&self.path).await?);
        self.written = 0;
        debug!(path = %self.path.display(), mime_type, "Audio sink opened");
        Ok(())
    }

    async fn commit(&mut self, segment: Bytes) -> Result<(), SinkError> {
        let file = self.file.as_mut().ok_or(SinkError::NotOpen)?;
        file.write_all(&segment).await?;
        file.flush().await?;
        self.written += segment.len() as u64;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.file.is_some()
    }

    async fn reset(&mut self) {
        if let Some(mut file) = self.file.take() {
            let _ = file.flush().await;
            debug!(path = %self.path.display(), bytes = self.written, "Audio sink closed");
        }
    }
}

/// Discards audio. Used when no output is configured.
#[derive(Debug, Default)]
pub struct NullSink {
    open: bool,
}

#[async_trait]
impl PlaybackSink for NullSink {
    async fn open(&mut self, _mime_type: &str) -> Result<(), SinkError> {
        self.open = true;
        Ok(())
    }

    async fn commit(&mut self, _segment: Bytes) -> Result<(), SinkError> {
        if self.open {
            Ok(())
        } else {
            Err(SinkError::NotOpen)
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }

    async fn reset(&mut self) {
        self.open = false;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_sink_appends_segments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audio.webm");
        let mut sink = FileSink::new(&path);

        assert!(matches!(
            sink.commit(Bytes::from_static(b"x")).await,
            Err(SinkError::NotOpen)
        ));

        sink.open("audio/webm").await.unwrap();
        sink.commit(Bytes::from_static(b"ab")).await.unwrap();
        sink.commit(Bytes::from_static(b"cd")).await.unwrap();
        sink.reset().await;
        assert!(!sink.is_open());

        assert_eq!(std::fs::read(&path).unwrap(), b"abcd");
    }

    #[tokio::test]
    async fn reopening_starts_a_new_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audio.webm");
        let mut sink = FileSink::new(&path);

        sink.open("audio/webm").await.unwrap();
        sink.commit(Bytes::from_static(b"old")).await.unwrap();
        sink.open("audio/webm").await.unwrap();
        sink.commit(Bytes::from_static(b"new")).await.unwrap();
        sink.reset().await;

        assert_eq!(std::fs::read(&path).unwrap(), b"new");
    }
}
