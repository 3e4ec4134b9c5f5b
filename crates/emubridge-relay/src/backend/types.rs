//! Launch response types and validation.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

/// Raw body of a `launch` response.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchResponse {
    #[serde(default)]
    pub vnc_url: Option<String>,
    #[serde(default)]
    pub audio_url: Option<String>,
    #[serde(default)]
    pub gamepad_url: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub error: Option<String>,
}

/// The three realtime endpoints of one session plus the backend port that
/// identifies it for cleanup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEndpoints {
    pub display: String,
    pub audio: String,
    pub input: String,
    /// 0 when the backend neither reported nor encoded a port.
    pub port: u16,
}

/// Errors talking to the dashboard backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Launch failed: HTTP {status}")]
    Status { status: u16 },

    #[error("{0}")]
    Rejected(String),

    #[error("Backend returned no {0}")]
    MissingEndpoint(&'static str),

    #[error("Invalid backend response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl LaunchResponse {
    /// Validate the response: an explicit error or any missing endpoint
    /// aborts the launch.
    pub fn into_endpoints(self) -> Result<SessionEndpoints, BackendError> {
        if let Some(error) = non_empty(self.error) {
            return Err(BackendError::Rejected(error));
        }
        let display = non_empty(self.vnc_url).ok_or(BackendError::MissingEndpoint("vncUrl"))?;
        let audio = non_empty(self.audio_url).ok_or(BackendError::MissingEndpoint("audioUrl"))?;
        let input =
            non_empty(self.gamepad_url).ok_or(BackendError::MissingEndpoint("gamepadUrl"))?;
        let port = self
            .port
            .filter(|p| *p != 0)
            .or_else(|| extract_port(&display))
            .unwrap_or(0);

        Ok(SessionEndpoints {
            display,
            audio,
            input,
            port,
        })
    }
}

static PATH_PORT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"[:/](\d{2,5})(?:/|$)").ok());
static RAW_PORT: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r":(\d{2,5})").ok());
static DIGITS: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"^\d{2,5}$").ok());

fn first_capture(re: &LazyLock<Option<Regex>>, haystack: &str) -> Option<u16> {
    let re = re.as_ref()?;
    re.captures(haystack)?.get(1)?.as_str().parse().ok()
}

/// Recover the session port from a display URL.
///
/// Tries, in order: an explicit URL port, a `port`/`vnc`/`p` query value,
/// then a numeric path segment such as `/novnc/52300/`.
pub fn extract_port(url: &str) -> Option<u16> {
    let Ok(parsed) = reqwest::Url::parse(url) else {
        return first_capture(&RAW_PORT, url);
    };

    if let Some(port) = parsed.port() {
        return Some(port);
    }

    for key in ["port", "vnc", "p"] {
        let value = parsed
            .query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned());
        if let Some(value) = value
            && DIGITS.as_ref().is_some_and(|re| re.is_match(&value))
            && let Ok(port) = value.parse()
        {
            return Some(port);
        }
    }

    first_capture(&PATH_PORT, parsed.as_str())
}
