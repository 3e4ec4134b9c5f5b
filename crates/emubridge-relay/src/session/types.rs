use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

use crate::backend::{BackendError, SessionEndpoints};
use crate::epoch::Epoch;
use crate::surface::SurfaceError;

/// A mounted session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub epoch: Epoch,
    pub endpoints: SessionEndpoints,
    pub created_at: SystemTime,
    pub audio: AudioStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchOutcome {
    Mounted(SessionInfo),
    /// A newer launch (or a close) overtook this one.
    Superseded,
    /// The launch control was busy.
    Ignored,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AudioStatus {
    #[default]
    Pending,
    Connected,
    /// Connection failed or timed out; the session runs without sound.
    Unavailable,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LaunchPhase {
    #[default]
    Idle,
    Contacting,
    StartingAudio,
    Mounting,
    Running,
    Failed(String),
    Closed,
}

/// Status indicator of the context, published on every phase change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchStatus {
    pub epoch: Epoch,
    pub phase: LaunchPhase,
    pub audio: AudioStatus,
}

impl LaunchStatus {
    pub const fn new(epoch: Epoch, phase: LaunchPhase, audio: AudioStatus) -> Self {
        Self {
            epoch,
            phase,
            audio,
        }
    }
}

impl fmt::Display for LaunchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.phase, self.audio) {
            (LaunchPhase::Idle, _) => f.write_str("Idle"),
            (LaunchPhase::Contacting, _) => f.write_str("Contacting server…"),
            (LaunchPhase::StartingAudio, _) => f.write_str("Starting audio…"),
            (LaunchPhase::Mounting | LaunchPhase::Running, AudioStatus::Unavailable) => {
                f.write_str("Audio error — continuing without sound…")
            }
            (LaunchPhase::Mounting, AudioStatus::Connected) => {
                f.write_str("Audio connected! Loading game…")
            }
            (LaunchPhase::Mounting, AudioStatus::Pending) => f.write_str("Loading game…"),
            (LaunchPhase::Running, _) => f.write_str("Running"),
            (LaunchPhase::Failed(message), _) => f.write_str(message),
            (LaunchPhase::Closed, _) => f.write_str("Session closed"),
        }
    }
}

/// Launch errors that reach the caller.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("No ROM given")]
    EmptyRom,

    #[error(transparent)]
    Surface(#[from] SurfaceError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// The control that triggers launches (a button, a key binding).
#[derive(Debug, Default)]
pub struct LaunchControl {
    busy: AtomicBool,
}

impl LaunchControl {
    pub const fn new() -> Self {
        Self {
            busy: AtomicBool::new(false),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Mark the control busy until the returned guard is dropped.
    pub fn try_begin(&self) -> Option<LaunchControlGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| LaunchControlGuard { control: self })
    }
}

/// Resets its [`LaunchControl`] to ready on drop.
#[derive(Debug)]
pub struct LaunchControlGuard<'a> {
    control: &'a LaunchControl,
}

impl Drop for LaunchControlGuard<'_> {
    fn drop(&mut self) {
        self.control.busy.store(false, Ordering::Release);
    }
}
