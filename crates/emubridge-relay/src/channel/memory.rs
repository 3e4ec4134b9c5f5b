//! In-process connector: channels whose remote end lives in the same process.
//!
//! Used by embedding hosts that serve audio/input themselves, and by tests to
//! stand in for the backend's realtime endpoints.
//!
//! Unclaimed peers whose client already closed are dropped on the next
//! connect. Attempt counters are kept per endpoint for the connector's life.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{Mutex, mpsc};

use super::{CHANNEL_CAPACITY, ChannelError, ChannelMessage, Connector, RealtimeChannel};

/// The remote end of an in-process channel.
#[derive(Debug)]
pub struct MemoryPeer {
    pub endpoint: String,
    to_client: mpsc::Sender<ChannelMessage>,
    from_client: mpsc::Receiver<ChannelMessage>,
}

impl MemoryPeer {
    /// Push a binary message to the connected client.
    pub async fn send_binary(&self, data: impl Into<Bytes>) -> bool {
        self.to_client
            .send(ChannelMessage::Binary(data.into()))
            .await
            .is_ok()
    }

    pub async fn send_text(&self, text: impl Into<String>) -> bool {
        self.to_client
            .send(ChannelMessage::Text(text.into()))
            .await
            .is_ok()
    }

    /// Next message sent by the client; `None` once the client closed.
    pub async fn recv(&mut self) -> Option<ChannelMessage> {
        self.from_client.recv().await
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<ChannelMessage> {
        self.from_client.try_recv().ok()
    }

    /// Whether the client side still holds the channel open.
    pub fn is_client_open(&self) -> bool {
        !self.to_client.is_closed()
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    delays: HashMap<String, Duration>,
    refused: HashSet<String>,
    peers: HashMap<String, Vec<MemoryPeer>>,
    attempts: HashMap<String, usize>,
}

/// Connector handing out in-process channels.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay connection establishment to `endpoint`.
    pub async fn set_delay(&self, endpoint: &str, delay: Duration) {
        self.state
            .lock()
            .await
            .delays
            .insert(endpoint.to_string(), delay);
    }

    /// Make connections to `endpoint` fail.
    pub async fn refuse(&self, endpoint: &str) {
        self.state.lock().await.refused.insert(endpoint.to_string());
    }

    /// Take the oldest not-yet-claimed peer connected at `endpoint`.
    pub async fn take_peer(&self, endpoint: &str) -> Option<MemoryPeer> {
        let mut state = self.state.lock().await;
        let peers = state.peers.get_mut(endpoint)?;
        if peers.is_empty() {
            None
        } else {
            Some(peers.remove(0))
        }
    }

    /// Number of connection attempts made to `endpoint`.
    pub async fn attempts(&self, endpoint: &str) -> usize {
        self.state
            .lock()
            .await
            .attempts
            .get(endpoint)
            .copied()
            .unwrap_or(0)
    }

    /// Total connection attempts across all endpoints.
    pub async fn total_attempts(&self) -> usize {
        self.state.lock().await.attempts.values().sum()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, endpoint: &str) -> Result<RealtimeChannel, ChannelError> {
        let delay = {
            let mut state = self.state.lock().await;
            *state.attempts.entry(endpoint.to_string()).or_default() += 1;
            if state.refused.contains(endpoint) {
                return Err(ChannelError::Connect {
                    endpoint: endpoint.to_string(),
                    reason: "connection refused".to_string(),
                });
            }
            state.delays.get(endpoint).copied()
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let (to_client, client_inbound) = mpsc::channel(CHANNEL_CAPACITY);
        let (client_outbound, from_client) = mpsc::channel(CHANNEL_CAPACITY);
        let peer = MemoryPeer {
            endpoint: endpoint.to_string(),
            to_client,
            from_client,
        };
        let mut state = self.state.lock().await;
        state.peers.retain(|_, peers| {
            peers.retain(MemoryPeer::is_client_open);
            !peers.is_empty()
        });
        state
            .peers
            .entry(endpoint.to_string())
            .or_default()
            .push(peer);
        drop(state);

        Ok(RealtimeChannel::new(
            endpoint,
            client_outbound,
            client_inbound,
            None,
        ))
    }
}
