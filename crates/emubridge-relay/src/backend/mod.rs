//! Dashboard backend integration.
//!
//! The backend starts an emulator container for a ROM and answers with the
//! session's display, audio and input endpoints. It is also told to release
//! the session's port on teardown (see [`crate::cleanup`]).

mod http;
mod types;

use async_trait::async_trait;

pub use http::HttpBackend;
pub use types::{BackendError, LaunchResponse, SessionEndpoints, extract_port};

/// Starts emulator sessions.
#[async_trait]
pub trait LaunchBackend: Send + Sync {
    /// Launch `rom`; succeeds only when all three endpoints are present.
    async fn launch(&self, rom: &str) -> Result<SessionEndpoints, BackendError>;
}
