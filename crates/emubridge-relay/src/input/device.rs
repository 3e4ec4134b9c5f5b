//! Controller devices and raw-state mapping.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize, de};
use tokio::sync::mpsc;

use super::frame::{FRAME_BUTTONS, Hat, InputFrame, MAX_AXES};

/// Standard-layout indices of the buttons carried by a frame.
const FRAME_BUTTON_INDICES: [usize; FRAME_BUTTONS] = [0, 1, 2, 3, 4, 5, 8, 9, 10, 11];
const BUTTON_LT: usize = 6;
const BUTTON_RT: usize = 7;
const DPAD_UP: usize = 12;
const DPAD_DOWN: usize = 13;
const DPAD_LEFT: usize = 14;
const DPAD_RIGHT: usize = 15;

/// Device id carried by every frame. The backend exposes one virtual pad.
const DEVICE_ID: &str = "gp-0";

/// Deadzone applied to stick axes unless configured otherwise.
pub const DEFAULT_DEADZONE: f32 = 0.12;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ButtonState {
    #[serde(default)]
    pub pressed: bool,
    #[serde(default)]
    pub value: f32,
}

/// Pad slots a platform exposes.
pub const MAX_PADS: usize = 4;

/// Raw state of one connected pad, as the platform reports it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PadSnapshot {
    pub index: usize,
    #[serde(default)]
    pub axes: Vec<f32>,
    #[serde(default)]
    pub buttons: Vec<ButtonState>,
    /// Platform mapping name; `None` when the platform reports none.
    #[serde(default)]
    pub mapping: Option<String>,
}

/// Hotplug notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    Connected(usize),
    Disconnected(usize),
}

/// A platform controller API.
pub trait ControllerDevice: Send {
    /// Current pad slots; empty slots are `None`.
    fn pads(&mut self) -> Vec<Option<PadSnapshot>>;

    /// Hotplug notifications, for devices that report them. Taken once.
    fn events(&mut self) -> Option<mpsc::Receiver<DeviceEvent>> {
        None
    }
}

/// Tracks which pad slot is active.
#[derive(Debug, Clone, Default)]
pub struct DeviceTracker {
    active: Option<usize>,
}

impl DeviceTracker {
    pub const fn active(&self) -> Option<usize> {
        self.active
    }

    /// Pick the first connected pad.
    pub fn seed(&mut self, pads: &[Option<PadSnapshot>]) {
        self.active = pads.iter().flatten().next().map(|p| p.index);
    }

    pub fn apply(&mut self, event: DeviceEvent) {
        match event {
            DeviceEvent::Connected(index) => self.active = Some(index),
            DeviceEvent::Disconnected(index) if self.active == Some(index) => self.active = None,
            DeviceEvent::Disconnected(_) => {}
        }
    }

    /// The active pad, falling back to a fresh scan when it is gone.
    pub fn select<'a>(&mut self, pads: &'a [Option<PadSnapshot>]) -> Option<&'a PadSnapshot> {
        if let Some(pad) = self.active.and_then(|i| find_pad(pads, i)) {
            return Some(pad);
        }
        self.seed(pads);
        self.active.and_then(|i| find_pad(pads, i))
    }
}

fn find_pad(pads: &[Option<PadSnapshot>], index: usize) -> Option<&PadSnapshot> {
    pads.iter().flatten().find(|p| p.index == index)
}

fn dead(value: f32, deadzone: f32) -> f32 {
    if value.abs() < deadzone { 0.0 } else { value }
}

fn button(pad: &PadSnapshot, index: usize) -> Option<&ButtonState> {
    pad.buttons.get(index)
}

fn pressed(pad: &PadSnapshot, index: usize) -> bool {
    button(pad, index).is_some_and(|b| b.pressed || b.value > 0.5)
}

fn trigger(pad: &PadSnapshot, index: usize) -> f32 {
    button(pad, index).map_or(0.0, |b| {
        if b.value > 0.0 {
            b.value
        } else if b.pressed {
            1.0
        } else {
            0.0
        }
    })
}

fn direction(negative: bool, positive: bool) -> i8 {
    match (negative, positive) {
        (true, false) => -1,
        (false, true) => 1,
        _ => 0,
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Map a raw pad into a frame.
///
/// Up to four axes, deadzoned. Ten buttons in standard-layout order. Hat
/// from the d-pad buttons. Triggers take the analog value when present,
/// otherwise 1.0 while pressed.
pub fn build_frame(pad: &PadSnapshot, deadzone: f32, timestamp: u64) -> InputFrame {
    let axes = pad
        .axes
        .iter()
        .take(MAX_AXES)
        .map(|v| dead(*v, deadzone))
        .collect();

    let mut buttons = [0u8; FRAME_BUTTONS];
    for (slot, index) in buttons.iter_mut().zip(FRAME_BUTTON_INDICES) {
        *slot = u8::from(pressed(pad, index));
    }

    InputFrame {
        timestamp,
        device_id: DEVICE_ID.to_string(),
        axes,
        buttons,
        hat: Hat {
            dx: direction(pressed(pad, DPAD_LEFT), pressed(pad, DPAD_RIGHT)),
            dy: direction(pressed(pad, DPAD_UP), pressed(pad, DPAD_DOWN)),
        },
        trigger_l: trigger(pad, BUTTON_LT),
        trigger_r: trigger(pad, BUTTON_RT),
        mapping: pad
            .mapping
            .clone()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| "unknown".to_string()),
    }
}

/// No controller attached.
#[derive(Debug, Default)]
pub struct NoDevice;

impl ControllerDevice for NoDevice {
    fn pads(&mut self) -> Vec<Option<PadSnapshot>> {
        Vec::new()
    }
}

/// Replays recorded pad snapshots, one per sample, holding the last one.
#[derive(Debug, Clone, Default)]
pub struct ReplayDevice {
    snapshots: Vec<PadSnapshot>,
    cursor: usize,
}

impl ReplayDevice {
    pub const fn new(snapshots: Vec<PadSnapshot>) -> Self {
        Self {
            snapshots,
            cursor: 0,
        }
    }

    /// Parse newline-delimited JSON snapshots. Blank lines are skipped.
    ///
    /// Snapshots must name a slot below [`MAX_PADS`].
    pub fn parse(ndjson: &str) -> Result<Self, serde_json::Error> {
        let snapshots = ndjson
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|line| -> Result<PadSnapshot, serde_json::Error> {
                let snapshot: PadSnapshot = serde_json::from_str(line)?;
                if snapshot.index >= MAX_PADS {
                    return Err(de::Error::custom(format!(
                        "pad index {} out of range (max {})",
                        snapshot.index,
                        MAX_PADS - 1
                    )));
                }
                Ok(snapshot)
            })
            .collect::<Result<Vec<PadSnapshot>, _>>()?;
        Ok(Self::new(snapshots))
    }

    pub fn load(path: &Path) -> emubridge_core::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::parse(&content)?)
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

impl ControllerDevice for ReplayDevice {
    fn pads(&mut self) -> Vec<Option<PadSnapshot>> {
        let Some(last) = self.snapshots.len().checked_sub(1) else {
            return Vec::new();
        };
        let snapshot = self.snapshots[self.cursor.min(last)].clone();
        self.cursor = self.cursor.saturating_add(1);
        if snapshot.index >= MAX_PADS {
            return Vec::new();
        }
        let mut slots = vec![None; snapshot.index + 1];
        let index = snapshot.index;
        slots[index] = Some(snapshot);
        slots
    }
}
