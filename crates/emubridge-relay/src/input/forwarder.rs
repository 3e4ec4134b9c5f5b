//! Controlling-context side of the input relay.
//!
//! At most one forwarder is bound at a time. Binding a new one unbinds the
//! previous forwarder and closes its backend channel.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::frame::InputFrame;
use crate::channel::{CHANNEL_CAPACITY, ChannelMessage, RealtimeChannel};
use crate::epoch::{Epoch, SessionEpochGuard};
use crate::surface::SurfaceId;

/// What happened to one posted frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardDecision {
    Relayed,
    NotBound,
    WrongSource,
    StaleEpoch,
    ChannelClosed,
    Backlogged,
}

struct Binding {
    epoch: Epoch,
    source: SurfaceId,
    frames: Option<mpsc::Sender<InputFrame>>,
    task: Option<JoinHandle<u64>>,
}

impl Binding {
    fn channel_open(&self) -> bool {
        self.frames.as_ref().is_some_and(|tx| !tx.is_closed())
    }
}

/// Relays frames from the tracked surface to the session's input channel.
pub struct InputRelay {
    guard: Arc<SessionEpochGuard>,
    binding: Mutex<Option<Binding>>,
}

impl InputRelay {
    pub fn new(guard: Arc<SessionEpochGuard>) -> Self {
        Self {
            guard,
            binding: Mutex::new(None),
        }
    }

    /// Bind the forwarder for `epoch`. `channel` is `None` when the input
    /// channel could not be opened; frames are then dropped. Refused (and
    /// the channel closed) when `epoch` is no longer current.
    pub async fn bind(
        &self,
        epoch: Epoch,
        source: SurfaceId,
        channel: Option<RealtimeChannel>,
    ) -> bool {
        let mut binding = self.binding.lock().await;
        if !self.guard.is_current(epoch) {
            debug!(%epoch, "Refusing to bind stale input forwarder");
            return false;
        }
        if let Some(previous) = binding.take() {
            release_binding(previous).await;
        }

        let (frames, task) = match channel {
            Some(channel) => {
                let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
                (Some(tx), Some(tokio::spawn(relay_frames(epoch, channel, rx))))
            }
            None => (None, None),
        };
        debug!(%epoch, %source, connected = frames.is_some(), "Input forwarder bound");
        *binding = Some(Binding {
            epoch,
            source,
            frames,
            task,
        });
        true
    }

    /// Unbind only if the forwarder belongs to `epoch`.
    pub async fn release(&self, epoch: Epoch) -> bool {
        let mut binding = self.binding.lock().await;
        if binding.as_ref().is_some_and(|b| b.epoch == epoch) {
            if let Some(previous) = binding.take() {
                release_binding(previous).await;
            }
            true
        } else {
            false
        }
    }

    pub async fn bound_epoch(&self) -> Option<Epoch> {
        self.binding.lock().await.as_ref().map(|b| b.epoch)
    }

    pub async fn is_channel_open(&self) -> bool {
        self.binding
            .lock()
            .await
            .as_ref()
            .is_some_and(Binding::channel_open)
    }

    /// Relay `frame` iff it comes from the bound surface, carries the
    /// current epoch, and the channel is open.
    pub async fn accept(&self, source: SurfaceId, epoch: Epoch, frame: InputFrame) -> ForwardDecision {
        let binding = self.binding.lock().await;
        let decision = match binding.as_ref() {
            None => ForwardDecision::NotBound,
            Some(b) if b.source != source => ForwardDecision::WrongSource,
            Some(b) if b.epoch != epoch || !self.guard.is_current(epoch) => {
                ForwardDecision::StaleEpoch
            }
            Some(b) => match &b.frames {
                Some(tx) if !tx.is_closed() => match tx.try_send(frame) {
                    Ok(()) => ForwardDecision::Relayed,
                    Err(mpsc::error::TrySendError::Full(_)) => ForwardDecision::Backlogged,
                    Err(mpsc::error::TrySendError::Closed(_)) => ForwardDecision::ChannelClosed,
                },
                _ => ForwardDecision::ChannelClosed,
            },
        };
        if decision != ForwardDecision::Relayed {
            debug!(%source, %epoch, ?decision, "Input frame dropped");
        }
        decision
    }
}

async fn release_binding(binding: Binding) {
    drop(binding.frames);
    if let Some(task) = binding.task {
        task.abort();
        let _ = task.await;
    }
    debug!(epoch = %binding.epoch, "Input forwarder unbound");
}

/// Owns the input channel for one binding; dropping it closes the channel.
async fn relay_frames(
    epoch: Epoch,
    mut channel: RealtimeChannel,
    mut frames: mpsc::Receiver<InputFrame>,
) -> u64 {
    let mut relayed = 0u64;
    loop {
        tokio::select! {
            frame = frames.recv() => {
                let Some(frame) = frame else { break };
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(%epoch, error = %e, "Failed to encode input frame");
                        continue;
                    }
                };
                if channel.send(ChannelMessage::Text(text)).await.is_err() {
                    break;
                }
                relayed += 1;
            }
            inbound = channel.recv() => {
                if inbound.is_none() {
                    info!(%epoch, endpoint = channel.endpoint(), "Input channel closed by peer");
                    break;
                }
            }
        }
    }
    channel.close();
    relayed
}
