//! Surface contracts shared by the controller, hosts and the session.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::epoch::Epoch;
use crate::input::InputFrame;

/// Identity of one opened surface. The controlling context compares message
/// sources against the surface it currently tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SurfaceId(u64);

impl SurfaceId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "surface-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurfaceState {
    Opening,
    Ready,
    Mounted,
    Closed,
}

/// Requested geometry and identity of the child surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceOptions {
    /// Named target; opening the same name again reuses the live surface.
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub resizable: bool,
    pub scrollable: bool,
}

impl SurfaceOptions {
    pub fn from_config(config: &emubridge_core::config::SurfaceConfig) -> Self {
        Self {
            name: "emuPopup".to_string(),
            width: config.width,
            height: config.height,
            resizable: true,
            scrollable: true,
        }
    }
}

/// Session state handed to the surface's mount entry point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountState {
    pub display_endpoint: String,
    pub input_endpoint: String,
    pub port: u16,
    pub epoch: Epoch,
}

/// Messages a surface posts back to its controlling context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SurfaceMessage {
    Input { epoch: Epoch, payload: InputFrame },
    Unload { epoch: Epoch },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceEnvelope {
    pub source: SurfaceId,
    pub message: SurfaceMessage,
}

/// A surface's reference back to the context that opened it.
#[derive(Debug, Clone)]
pub struct SurfaceLink {
    source: SurfaceId,
    tx: mpsc::Sender<SurfaceEnvelope>,
}

impl SurfaceLink {
    pub const fn new(source: SurfaceId, tx: mpsc::Sender<SurfaceEnvelope>) -> Self {
        Self { source, tx }
    }

    pub const fn source(&self) -> SurfaceId {
        self.source
    }

    /// `false` once the controlling context is gone.
    pub fn is_reachable(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Post without waiting; dropped when the context is backlogged or gone.
    pub fn try_post(&self, message: SurfaceMessage) -> bool {
        self.tx
            .try_send(SurfaceEnvelope {
                source: self.source,
                message,
            })
            .is_ok()
    }

    pub async fn post(&self, message: SurfaceMessage) -> bool {
        self.tx
            .send(SurfaceEnvelope {
                source: self.source,
                message,
            })
            .await
            .is_ok()
    }
}

/// Surface errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SurfaceError {
    #[error("Popup blocked. Please allow popups for this site and try again.")]
    Blocked,

    #[error("Surface closed before the emulator could start")]
    Closed,

    #[error("Surface bootstrap not ready after {attempts} checks")]
    BootstrapTimeout { attempts: u32 },

    #[error("Mount failed: {0}")]
    Mount(String),

    #[error("Surface superseded by a newer launch")]
    Superseded,
}

/// A child surface as the platform exposes it.
pub trait Surface: Send + Sync {
    fn id(&self) -> SurfaceId;

    fn state(&self) -> SurfaceState;

    fn is_closed(&self) -> bool {
        self.state() == SurfaceState::Closed
    }

    /// Bring the surface to the front.
    fn focus(&self);

    /// Drop the current content (navigate to blank).
    fn reset(&self);

    fn render_placeholder(&self, rom: &str);

    fn set_status(&self, message: &str);

    /// Install the mount entry point. May complete asynchronously; see
    /// [`is_mount_ready`](Self::is_mount_ready).
    fn install_bootstrap(&self);

    fn is_mount_ready(&self) -> bool;

    fn mount(&self, state: MountState) -> Result<(), SurfaceError>;

    fn show_error(&self, rom: &str, message: &str);

    fn close(&self);
}

/// Opens child surfaces.
pub trait SurfaceHost: Send + Sync {
    /// Open (or reuse) the surface named in `options`. A reused surface keeps
    /// its original link.
    fn open(
        &self,
        options: &SurfaceOptions,
        link: SurfaceLink,
    ) -> Result<Arc<dyn Surface>, SurfaceError>;

    /// Host-level notice, used when no surface is usable.
    fn alert(&self, message: &str);
}
