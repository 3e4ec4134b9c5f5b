//! Realtime channels: persistent connections carrying discrete messages.
//!
//! A [`RealtimeChannel`] is a pair of bounded queues pumped by a transport
//! task. Dropping or closing the channel stops the pump, which closes the
//! underlying connection.

mod memory;
mod websocket;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub use memory::{MemoryConnector, MemoryPeer};
pub use websocket::WebSocketConnector;

/// Capacity of the per-direction message queues.
pub const CHANNEL_CAPACITY: usize = 256;

/// One message on a realtime channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelMessage {
    Binary(Bytes),
    Text(String),
}

/// Realtime channel errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Failed to connect to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    #[error("Channel closed: {endpoint}")]
    Closed { endpoint: String },
}

/// Opens realtime channels to endpoints.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &str) -> Result<RealtimeChannel, ChannelError>;
}

/// An open realtime channel.
#[derive(Debug)]
pub struct RealtimeChannel {
    endpoint: String,
    outbound: Option<mpsc::Sender<ChannelMessage>>,
    inbound: mpsc::Receiver<ChannelMessage>,
    pump: Option<JoinHandle<()>>,
}

impl RealtimeChannel {
    /// Assemble a channel from its queues and the task pumping them.
    pub fn new(
        endpoint: impl Into<String>,
        outbound: mpsc::Sender<ChannelMessage>,
        inbound: mpsc::Receiver<ChannelMessage>,
        pump: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            outbound: Some(outbound),
            inbound,
            pump,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Whether the transport still accepts outbound messages.
    pub fn is_open(&self) -> bool {
        self.outbound.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    pub async fn send(&self, msg: ChannelMessage) -> Result<(), ChannelError> {
        let closed = || ChannelError::Closed {
            endpoint: self.endpoint.clone(),
        };
        let tx = self.outbound.as_ref().ok_or_else(closed)?;
        tx.send(msg).await.map_err(|_| closed())
    }

    /// Next inbound message; `None` once the remote end closed.
    pub async fn recv(&mut self) -> Option<ChannelMessage> {
        self.inbound.recv().await
    }

    /// Stop the transport. Buffered inbound messages are discarded.
    pub fn close(&mut self) {
        self.outbound = None;
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        self.inbound.close();
    }
}

impl Drop for RealtimeChannel {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}
