//! Controller input relay.
//!
//! The surface side samples the controller and posts frames to its
//! controlling context ([`spawn_input_producer`]). The controlling context
//! validates each frame and relays it to the session's input channel
//! ([`InputRelay`]).

mod device;
mod forwarder;
mod frame;
mod producer;

pub use device::{
    ButtonState, ControllerDevice, DEFAULT_DEADZONE, DeviceEvent, DeviceTracker, MAX_PADS,
    NoDevice, PadSnapshot, ReplayDevice, build_frame, now_millis,
};
pub use forwarder::{ForwardDecision, InputRelay};
pub use frame::{
    FRAME_BUTTONS, ForwardGate, FrameTolerance, Hat, InputFrame, MAX_AXES, equivalent,
};
pub use producer::{ProducerConfig, ProducerStats, spawn_input_producer};
