//! Surface-side controller sampling loop.
//!
//! Samples the active pad every tick, builds a frame, and posts it to the
//! controlling context when it changed or the heartbeat elapsed. Stops on
//! shutdown or once the controlling context becomes unreachable.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use emubridge_core::config::InputConfig;

use super::device::{ControllerDevice, DeviceEvent, DeviceTracker, build_frame, now_millis};
use super::frame::{ForwardGate, FrameTolerance};
use crate::epoch::Epoch;
use crate::surface::{SurfaceLink, SurfaceMessage};

/// Producer timing and thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProducerConfig {
    pub sample_interval: Duration,
    pub heartbeat: Duration,
    pub liveness_interval: Duration,
    /// Re-pick the active pad when nothing was forwarded for this long.
    pub rescan_after: Duration,
    pub tolerance: FrameTolerance,
    pub deadzone: f32,
}

impl From<&InputConfig> for ProducerConfig {
    fn from(config: &InputConfig) -> Self {
        Self {
            sample_interval: config.sample_interval(),
            heartbeat: config.heartbeat(),
            liveness_interval: config.liveness_interval(),
            rescan_after: config.rescan_after(),
            tolerance: FrameTolerance {
                axis: config.axis_epsilon,
                button: config.button_epsilon,
            },
            deadzone: config.deadzone,
        }
    }
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self::from(&InputConfig::default())
    }
}

/// Counters reported when the producer stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProducerStats {
    pub sampled: u64,
    pub forwarded: u64,
}

async fn next_event(events: &mut Option<mpsc::Receiver<DeviceEvent>>) -> Option<DeviceEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Spawn the sampling loop for one mounted session.
pub fn spawn_input_producer(
    epoch: Epoch,
    mut device: Box<dyn ControllerDevice>,
    link: SurfaceLink,
    config: ProducerConfig,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<ProducerStats> {
    tokio::spawn(async move {
        let mut events = device.events();
        let mut tracker = DeviceTracker::default();
        tracker.seed(&device.pads());
        let mut gate = ForwardGate::new(config.tolerance, config.heartbeat);
        let mut stats = ProducerStats::default();

        let mut sample = tokio::time::interval(config.sample_interval);
        sample.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let start = Instant::now() + config.liveness_interval;
        let mut liveness = tokio::time::interval_at(start, config.liveness_interval);

        debug!(%epoch, source = %link.source(), "Input producer started");

        loop {
            tokio::select! {
                _ = sample.tick() => {
                    let pads = device.pads();
                    let Some(pad) = tracker.select(&pads) else {
                        continue;
                    };
                    stats.sampled += 1;
                    let now = Instant::now();
                    let frame = build_frame(pad, config.deadzone, now_millis());

                    if gate
                        .last_forwarded_at()
                        .is_some_and(|at| now.saturating_duration_since(at) > config.rescan_after)
                    {
                        tracker.seed(&pads);
                    }

                    if gate.should_forward(&frame, now)
                        && link.try_post(SurfaceMessage::Input { epoch, payload: frame.clone() })
                    {
                        gate.record(frame, now);
                        stats.forwarded += 1;
                    }
                }
                event = next_event(&mut events) => match event {
                    Some(event) => {
                        debug!(?event, "Controller hotplug");
                        tracker.apply(event);
                    }
                    None => events = None,
                },
                _ = liveness.tick() => {
                    if !link.is_reachable() {
                        info!(%epoch, "Controlling context unreachable, stopping input producer");
                        break;
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        debug!(%epoch, sampled = stats.sampled, forwarded = stats.forwarded, "Input producer stopped");
        stats
    })
}
