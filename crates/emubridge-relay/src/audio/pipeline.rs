//! Audio channel to playback sink.
//!
//! One reader task moves binary segments from the channel into a
//! [`SegmentQueue`]; one drain task commits them to the sink, strictly one
//! at a time. Both are tagged with the session epoch and stop touching the
//! sink once it is superseded.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::queue::{AudioStats, SegmentQueue};
use super::sink::{PlaybackSink, SinkError};
use crate::channel::{ChannelError, ChannelMessage, Connector, RealtimeChannel};
use crate::epoch::{Epoch, SessionEpochGuard};

/// The process-wide playback sink.
pub type SharedSink = Arc<Mutex<Box<dyn PlaybackSink>>>;

/// Audio errors. None of them is fatal to a launch.
#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("Audio connection to {endpoint} timed out after {}ms", .after.as_millis())]
    Timeout { endpoint: String, after: Duration },

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("Audio stream superseded by a newer launch")]
    Superseded,
}

struct ActiveStream {
    epoch: Epoch,
    queue: Arc<Mutex<SegmentQueue>>,
    reader: JoinHandle<()>,
    drain: JoinHandle<()>,
}

pub struct AudioPipeline {
    connector: Arc<dyn Connector>,
    sink: SharedSink,
    guard: Arc<SessionEpochGuard>,
    mime_type: String,
    active: Mutex<Option<ActiveStream>>,
}

impl AudioPipeline {
    pub fn new(
        connector: Arc<dyn Connector>,
        sink: Box<dyn PlaybackSink>,
        guard: Arc<SessionEpochGuard>,
        mime_type: impl Into<String>,
    ) -> Self {
        Self {
            connector,
            sink: Arc::new(Mutex::new(sink)),
            guard,
            mime_type: mime_type.into(),
            active: Mutex::new(None),
        }
    }

    /// Close any older stream, then connect `endpoint` and attach it to the
    /// sink. Both the connection and the sink must be up within `timeout`.
    ///
    /// A superseded `epoch` leaves the active stream and the sink untouched.
    pub async fn connect(
        &self,
        epoch: Epoch,
        endpoint: &str,
        timeout: Duration,
    ) -> Result<(), AudioError> {
        if !self.guard.is_current(epoch) {
            return Err(AudioError::Superseded);
        }
        self.close_older(epoch).await;

        let deadline = Instant::now() + timeout;
        let timed_out = || AudioError::Timeout {
            endpoint: endpoint.to_string(),
            after: timeout,
        };

        let channel = tokio::time::timeout_at(deadline, self.connector.connect(endpoint))
            .await
            .map_err(|_| timed_out())??;
        if !self.guard.is_current(epoch) {
            return Err(AudioError::Superseded);
        }
        debug!(%epoch, endpoint, "Audio channel connected");

        // Segments arriving while the sink opens are queued, not lost.
        let queue = Arc::new(Mutex::new(SegmentQueue::new()));
        let notify = Arc::new(Notify::new());
        let reader = tokio::spawn(read_segments(
            epoch,
            channel,
            Arc::clone(&queue),
            Arc::clone(&notify),
            Arc::clone(&self.guard),
        ));

        let opened = tokio::time::timeout_at(deadline, async {
            let mut sink = self.sink.lock().await;
            if !self.guard.is_current(epoch) {
                return Err(AudioError::Superseded);
            }
            sink.open(&self.mime_type).await.map_err(AudioError::from)
        })
        .await;
        let opened = match opened {
            Ok(result) => result,
            Err(_) => Err(timed_out()),
        };
        if let Err(e) = opened {
            reader.abort();
            return Err(e);
        }

        let drain = tokio::spawn(drain_segments(
            epoch,
            Arc::clone(&queue),
            Arc::clone(&notify),
            Arc::clone(&self.sink),
            Arc::clone(&self.guard),
        ));

        let mut active = self.active.lock().await;
        if !self.guard.is_current(epoch) {
            reader.abort();
            drain.abort();
            return Err(AudioError::Superseded);
        }
        if let Some(previous) = active.take_if(|a| a.epoch < epoch) {
            self.stop(previous).await;
        }
        *active = Some(ActiveStream {
            epoch,
            queue,
            reader,
            drain,
        });
        info!(%epoch, endpoint, "Audio stream attached");
        Ok(())
    }

    /// Close the active stream, if any, and reset the sink.
    pub async fn close(&self) -> Option<AudioStats> {
        let active = self.active.lock().await.take()?;
        Some(self.stop(active).await)
    }

    /// Close the active stream only if it belongs to `epoch`.
    pub async fn release(&self, epoch: Epoch) -> Option<AudioStats> {
        let active = {
            let mut active = self.active.lock().await;
            if active.as_ref().is_some_and(|a| a.epoch == epoch) {
                active.take()
            } else {
                None
            }
        }?;
        Some(self.stop(active).await)
    }

    async fn close_older(&self, epoch: Epoch) -> Option<AudioStats> {
        let older = self.active.lock().await.take_if(|a| a.epoch < epoch)?;
        Some(self.stop(older).await)
    }

    pub async fn active_epoch(&self) -> Option<Epoch> {
        self.active.lock().await.as_ref().map(|a| a.epoch)
    }

    pub async fn stats(&self) -> Option<AudioStats> {
        let queue = {
            let active = self.active.lock().await;
            Arc::clone(&active.as_ref()?.queue)
        };
        let stats = queue.lock().await.stats();
        Some(stats)
    }

    async fn stop(&self, active: ActiveStream) -> AudioStats {
        active.reader.abort();
        active.drain.abort();
        let _ = active.reader.await;
        let _ = active.drain.await;

        let stats = {
            let mut queue = active.queue.lock().await;
            queue.close();
            queue.stats()
        };
        self.sink.lock().await.reset().await;
        info!(
            epoch = %active.epoch,
            received = stats.received,
            committed = stats.committed,
            dropped = stats.dropped,
            "Audio stream closed"
        );
        stats
    }
}

/// Owns the audio channel; dropping it closes the connection.
async fn read_segments(
    epoch: Epoch,
    mut channel: RealtimeChannel,
    queue: Arc<Mutex<SegmentQueue>>,
    notify: Arc<Notify>,
    guard: Arc<SessionEpochGuard>,
) {
    while let Some(message) = channel.recv().await {
        match message {
            ChannelMessage::Binary(segment) => {
                if !guard.is_current(epoch) {
                    break;
                }
                queue.lock().await.push(segment);
                notify.notify_one();
            }
            ChannelMessage::Text(text) => {
                debug!(%epoch, len = text.len(), "Ignoring text message on audio channel");
            }
        }
    }
    queue.lock().await.end();
    notify.notify_one();
    debug!(%epoch, endpoint = channel.endpoint(), "Audio channel ended");
}

async fn drain_segments(
    epoch: Epoch,
    queue: Arc<Mutex<SegmentQueue>>,
    notify: Arc<Notify>,
    sink: SharedSink,
    guard: Arc<SessionEpochGuard>,
) {
    loop {
        if !guard.is_current(epoch) {
            break;
        }

        let mut sink = sink.lock().await;
        let next = queue.lock().await.begin_commit(sink.is_open());
        let Some(segment) = next else {
            drop(sink);
            if queue.lock().await.is_drained() {
                break;
            }
            notify.notified().await;
            continue;
        };

        if !guard.is_current(epoch) {
            queue.lock().await.finish_commit(false);
            break;
        }
        let result = sink.commit(segment).await;
        drop(sink);
        queue.lock().await.finish_commit(result.is_ok());
        if let Err(e) = result {
            warn!(%epoch, error = %e, "Audio sink rejected segment");
            break;
        }
    }
    debug!(%epoch, "Audio drain stopped");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::channel::MemoryConnector;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct Recorded {
        opens: usize,
        resets: usize,
        segments: Vec<Bytes>,
        in_commit: bool,
        overlapped: bool,
    }

    #[derive(Clone, Default)]
    struct RecordingSink {
        log: Arc<StdMutex<Recorded>>,
        open_delay: Duration,
        commit_delay: Duration,
        open: bool,
    }

    #[async_trait]
    impl PlaybackSink for RecordingSink {
        async fn open(&mut self, _mime_type: &str) -> Result<(), SinkError> {
            tokio::time::sleep(self.open_delay).await;
            self.open = true;
            self.log.lock().unwrap().opens += 1;
            Ok(())
        }

        async fn commit(&mut self, segment: Bytes) -> Result<(), SinkError> {
            {
                let mut log = self.log.lock().unwrap();
                log.overlapped |= log.in_commit;
                log.in_commit = true;
            }
            tokio::time::sleep(self.commit_delay).await;
            let mut log = self.log.lock().unwrap();
            log.in_commit = false;
            log.segments.push(segment);
            Ok(())
        }

        fn is_open(&self) -> bool {
            self.open
        }

        async fn reset(&mut self) {
            self.open = false;
            self.log.lock().unwrap().resets += 1;
        }
    }

    fn pipeline(
        sink: RecordingSink,
    ) -> (Arc<AudioPipeline>, Arc<SessionEpochGuard>, MemoryConnector) {
        let guard = Arc::new(SessionEpochGuard::new());
        let connector = MemoryConnector::new();
        let pipeline = Arc::new(AudioPipeline::new(
            Arc::new(connector.clone()),
            Box::new(sink),
            guard.clone(),
            "audio/webm",
        ));
        (pipeline, guard, connector)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn commits_in_order_without_overlap() {
        let sink = RecordingSink {
            commit_delay: Duration::from_millis(20),
            ..RecordingSink::default()
        };
        let log = sink.log.clone();
        let (pipeline, guard, connector) = pipeline(sink);
        let epoch = guard.new_epoch();

        pipeline
            .connect(epoch, "ws://audio", Duration::from_secs(10))
            .await
            .unwrap();
        let peer = connector.take_peer("ws://audio").await.unwrap();
        for n in 0..5u8 {
            assert!(peer.send_binary(vec![n]).await);
        }
        assert!(peer.send_text("stats").await);
        settle().await;

        let log = log.lock().unwrap();
        let order: Vec<u8> = log.segments.iter().map(|s| s[0]).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
        assert!(!log.overlapped);
    }

    #[tokio::test(start_paused = true)]
    async fn segments_before_sink_open_are_kept() {
        let sink = RecordingSink {
            open_delay: Duration::from_millis(300),
            ..RecordingSink::default()
        };
        let log = sink.log.clone();
        let (pipeline, guard, connector) = pipeline(sink);
        let epoch = guard.new_epoch();

        let task = {
            let pipeline = pipeline.clone();
            tokio::spawn(async move {
                pipeline
                    .connect(epoch, "ws://audio", Duration::from_secs(10))
                    .await
            })
        };
        let peer = loop {
            if let Some(peer) = connector.take_peer("ws://audio").await {
                break peer;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        };
        peer.send_binary(vec![1u8]).await;
        peer.send_binary(vec![2u8]).await;
        assert!(log.lock().unwrap().segments.is_empty());

        task.await.unwrap().unwrap();
        settle().await;
        assert_eq!(log.lock().unwrap().segments.len(), 2);
        assert_eq!(pipeline.stats().await.unwrap().committed, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_connection_times_out() {
        let (pipeline, guard, connector) = pipeline(RecordingSink::default());
        connector
            .set_delay("ws://slow", Duration::from_secs(12))
            .await;
        let epoch = guard.new_epoch();

        let started = Instant::now();
        let err = pipeline
            .connect(epoch, "ws://slow", Duration::from_secs(10))
            .await
            .unwrap_err();
        assert!(matches!(err, AudioError::Timeout { .. }));
        assert_eq!(started.elapsed(), Duration::from_secs(10));
        assert_eq!(pipeline.active_epoch().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn refused_connection_is_reported() {
        let (pipeline, guard, connector) = pipeline(RecordingSink::default());
        connector.refuse("ws://down").await;
        let epoch = guard.new_epoch();
        let err = pipeline
            .connect(epoch, "ws://down", Duration::from_secs(10))
            .await
            .unwrap_err();
        assert!(matches!(err, AudioError::Channel(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn new_session_closes_previous_stream() {
        let sink = RecordingSink::default();
        let log = sink.log.clone();
        let (pipeline, guard, connector) = pipeline(sink);

        let first = guard.new_epoch();
        pipeline
            .connect(first, "ws://audio/1", Duration::from_secs(10))
            .await
            .unwrap();
        let old_peer = connector.take_peer("ws://audio/1").await.unwrap();

        let second = guard.new_epoch();
        pipeline
            .connect(second, "ws://audio/2", Duration::from_secs(10))
            .await
            .unwrap();
        assert!(!old_peer.is_client_open());
        assert!(!old_peer.send_binary(vec![9u8]).await);

        let new_peer = connector.take_peer("ws://audio/2").await.unwrap();
        new_peer.send_binary(vec![2u8]).await;
        settle().await;

        let log = log.lock().unwrap();
        assert_eq!(log.opens, 2);
        assert_eq!(log.resets, 1);
        assert_eq!(log.segments, vec![Bytes::from_static(&[2])]);
    }

    #[tokio::test(start_paused = true)]
    async fn superseded_stream_stops_committing() {
        let sink = RecordingSink {
            commit_delay: Duration::from_millis(10),
            ..RecordingSink::default()
        };
        let log = sink.log.clone();
        let (pipeline, guard, connector) = pipeline(sink);
        let epoch = guard.new_epoch();
        pipeline
            .connect(epoch, "ws://audio", Duration::from_secs(10))
            .await
            .unwrap();
        let peer = connector.take_peer("ws://audio").await.unwrap();
        peer.send_binary(vec![1u8]).await;
        settle().await;

        guard.new_epoch();
        peer.send_binary(vec![2u8]).await;
        settle().await;
        assert_eq!(log.lock().unwrap().segments.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_connect_leaves_current_stream_alone() {
        let sink = RecordingSink::default();
        let log = sink.log.clone();
        let (pipeline, guard, connector) = pipeline(sink);
        let stale = guard.new_epoch();
        let current = guard.new_epoch();

        pipeline
            .connect(current, "ws://audio/2", Duration::from_secs(10))
            .await
            .unwrap();
        let peer = connector.take_peer("ws://audio/2").await.unwrap();

        let err = pipeline
            .connect(stale, "ws://audio/1", Duration::from_secs(10))
            .await
            .unwrap_err();
        assert!(matches!(err, AudioError::Superseded));
        assert_eq!(pipeline.active_epoch().await, Some(current));
        assert!(peer.is_client_open());
        assert_eq!(connector.attempts("ws://audio/1").await, 0);

        assert!(peer.send_binary(vec![7u8]).await);
        settle().await;
        let log = log.lock().unwrap();
        assert_eq!(log.resets, 0);
        assert_eq!(log.segments, vec![Bytes::from_static(&[7])]);
    }

    #[tokio::test(start_paused = true)]
    async fn release_ignores_other_epochs() {
        let (pipeline, guard, _connector) = pipeline(RecordingSink::default());
        let epoch = guard.new_epoch();
        pipeline
            .connect(epoch, "ws://audio", Duration::from_secs(10))
            .await
            .unwrap();

        assert!(pipeline.release(Epoch::new(99)).await.is_none());
        assert_eq!(pipeline.active_epoch().await, Some(epoch));
        assert!(pipeline.release(epoch).await.is_some());
        assert_eq!(pipeline.active_epoch().await, None);
    }
}
