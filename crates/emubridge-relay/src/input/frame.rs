//! Controller input frames, equivalence and the forward gate.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Number of buttons carried by a frame: A, B, X, Y, LB, RB, SELECT, START, L3, R3.
pub const FRAME_BUTTONS: usize = 10;

/// Maximum number of axes carried by a frame.
pub const MAX_AXES: usize = 4;

/// D-pad direction, each component in {-1, 0, 1}.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hat {
    #[serde(rename = "hatx")]
    pub dx: i8,
    #[serde(rename = "haty")]
    pub dy: i8,
}

/// One sample of controller state, as relayed to the backend.
///
/// Field names on the wire match what the backend's gamepad endpoint reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputFrame {
    /// Milliseconds since the Unix epoch.
    #[serde(rename = "t")]
    pub timestamp: u64,
    /// Surface-local device id (e.g. `gp-0`).
    #[serde(rename = "id")]
    pub device_id: String,
    pub axes: Vec<f32>,
    pub buttons: [u8; FRAME_BUTTONS],
    #[serde(flatten)]
    pub hat: Hat,
    #[serde(rename = "trigL")]
    pub trigger_l: f32,
    #[serde(rename = "trigR")]
    pub trigger_r: f32,
    #[serde(rename = "map")]
    pub mapping: String,
}

/// Per-field tolerances used to decide whether two frames differ.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameTolerance {
    /// Axes and triggers.
    pub axis: f32,
    /// Buttons are 0/1; 0.5 absorbs debounce noise.
    pub button: f32,
}

impl Default for FrameTolerance {
    fn default() -> Self {
        Self {
            axis: 0.02,
            button: 0.5,
        }
    }
}

fn approx_eq(a: f32, b: f32, eps: f32) -> bool {
    (a - b).abs() <= eps
}

impl FrameTolerance {
    /// Whether `a` and `b` carry the same controller state within tolerance.
    /// Symmetric in its arguments.
    pub fn equivalent(&self, a: &InputFrame, b: &InputFrame) -> bool {
        a.hat == b.hat
            && a.axes.len() == b.axes.len()
            && a
                .axes
                .iter()
                .zip(&b.axes)
                .all(|(x, y)| approx_eq(*x, *y, self.axis))
            && a
                .buttons
                .iter()
                .zip(&b.buttons)
                .all(|(x, y)| approx_eq(f32::from(*x), f32::from(*y), self.button))
            && approx_eq(a.trigger_l, b.trigger_l, self.axis)
            && approx_eq(a.trigger_r, b.trigger_r, self.axis)
    }
}

/// [`FrameTolerance::equivalent`] with the default tolerances.
pub fn equivalent(a: &InputFrame, b: &InputFrame) -> bool {
    FrameTolerance::default().equivalent(a, b)
}

/// Decides which sampled frames are forwarded: changed frames, plus a
/// heartbeat when nothing changed for `heartbeat`.
#[derive(Debug, Clone)]
pub struct ForwardGate {
    tolerance: FrameTolerance,
    heartbeat: Duration,
    last: Option<(InputFrame, Instant)>,
}

impl ForwardGate {
    pub const fn new(tolerance: FrameTolerance, heartbeat: Duration) -> Self {
        Self {
            tolerance,
            heartbeat,
            last: None,
        }
    }

    pub fn should_forward(&self, frame: &InputFrame, now: Instant) -> bool {
        match &self.last {
            None => true,
            Some((prev, at)) => {
                !self.tolerance.equivalent(frame, prev)
                    || now.saturating_duration_since(*at) >= self.heartbeat
            }
        }
    }

    /// Remember `frame` as the last forwarded one.
    pub fn record(&mut self, frame: InputFrame, now: Instant) {
        self.last = Some((frame, now));
    }

    /// [`should_forward`](Self::should_forward) and, if so, [`record`](Self::record).
    pub fn offer(&mut self, frame: &InputFrame, now: Instant) -> bool {
        if self.should_forward(frame, now) {
            self.record(frame.clone(), now);
            true
        } else {
            false
        }
    }

    pub fn last_forwarded_at(&self) -> Option<Instant> {
        self.last.as_ref().map(|(_, at)| *at)
    }
}

impl Default for ForwardGate {
    fn default() -> Self {
        Self::new(FrameTolerance::default(), Duration::from_millis(200))
    }
}
