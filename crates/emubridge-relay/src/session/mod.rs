//! Launch orchestration.
//!
//! A launch allocates a new epoch, opens (or reuses) the child surface,
//! asks the backend for the session's endpoints, attaches audio and input,
//! mounts the surface and arms cleanup. Every step re-checks the epoch, so a
//! newer launch silently overtakes an older one.

mod context;
mod types;

pub use context::{SessionContext, SessionParts};
pub use types::{
    AudioStatus, LaunchControl, LaunchControlGuard, LaunchError, LaunchOutcome, LaunchPhase,
    LaunchStatus, SessionInfo,
};
