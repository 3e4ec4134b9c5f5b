//! emubridge relay: session lifecycle for remote emulator sessions.
//!
//! Each launch stands up a remote display session, streams its audio into a
//! playback sink, relays controller input to it, and tears it all down once
//! the session ends, however it ends.

pub mod audio;
pub mod backend;
pub mod channel;
pub mod cleanup;
pub mod epoch;
pub mod input;
pub mod session;
pub mod surface;

pub use epoch::{Epoch, SessionEpochGuard};
pub use session::{LaunchControl, LaunchError, LaunchOutcome, SessionContext, SessionParts};
