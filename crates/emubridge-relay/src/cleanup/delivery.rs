//! Best-effort delivery of cleanup requests.
//!
//! Cleanup is usually requested while the session (or the whole host) is
//! going away, so delivery never retries: it tries a fire-and-forget
//! [`Beacon`] first and falls back to one direct request.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Body of a `cleanup` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupRequest {
    pub port: u16,
}

/// Cleanup delivery errors.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Cleanup transport error: {0}")]
    Transport(String),

    #[error("Cleanup rejected: HTTP {0}")]
    Status(u16),
}

/// Sends one cleanup request and waits for the outcome.
#[async_trait]
pub trait CleanupSender: Send + Sync {
    async fn send_cleanup(&self, request: CleanupRequest) -> Result<(), DeliveryError>;
}

/// Which path carried a cleanup request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryPath {
    Beacon,
    Direct,
}

/// Fire-and-forget queue drained by a worker that outlives the sessions
/// queueing onto it.
#[derive(Debug, Clone)]
pub struct Beacon {
    tx: mpsc::UnboundedSender<CleanupRequest>,
}

impl Beacon {
    /// Spawn the delivery worker. It exits once every `Beacon` clone is
    /// dropped and the queue is drained, so awaiting the handle flushes
    /// pending requests.
    pub fn spawn(sender: Arc<dyn CleanupSender>) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<CleanupRequest>();
        let handle = tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                match sender.send_cleanup(request).await {
                    Ok(()) => debug!(port = request.port, "Cleanup beacon delivered"),
                    Err(e) => warn!(port = request.port, error = %e, "Cleanup beacon failed"),
                }
            }
        });
        (Self { tx }, handle)
    }

    /// Queue `request`; `false` when the worker is gone.
    pub fn queue(&self, request: CleanupRequest) -> bool {
        self.tx.send(request).is_ok()
    }
}

/// Try the beacon, then one direct request. Never retries; failure is
/// logged and reported as `None`.
pub async fn deliver_best_effort(
    beacon: Option<&Beacon>,
    fallback: &dyn CleanupSender,
    request: CleanupRequest,
) -> Option<DeliveryPath> {
    if beacon.is_some_and(|b| b.queue(request)) {
        debug!(port = request.port, "Cleanup queued on beacon");
        return Some(DeliveryPath::Beacon);
    }

    match fallback.send_cleanup(request).await {
        Ok(()) => {
            debug!(port = request.port, "Cleanup delivered directly");
            Some(DeliveryPath::Direct)
        }
        Err(e) => {
            warn!(port = request.port, error = %e, "Cleanup delivery failed");
            None
        }
    }
}
