//! Configuration resolution for emubridge.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (`<config dir>/emubridge/settings.json`)
//! 3. Explicit config file (`--config`)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binary)

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Complete emubridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub surface: SurfaceConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            surface: SurfaceConfig::default(),
            audio: AudioConfig::default(),
            input: InputConfig::default(),
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Dashboard backend that launches emulator containers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the dashboard (e.g. "http://127.0.0.1:8080").
    pub base_url: String,
    pub launch_path: String,
    pub cleanup_path: String,
    /// Timeout for the launch request (seconds).
    pub request_timeout_secs: u64,
    /// Value for the `X-XSRF-TOKEN` header, when the dashboard enforces CSRF.
    pub xsrf_token: Option<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            launch_path: "/emulator/launch".to_string(),
            cleanup_path: "/emulator/cleanup".to_string(),
            request_timeout_secs: 30,
            xsrf_token: None,
        }
    }
}

/// Child display surface settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurfaceConfig {
    pub width: u32,
    pub height: u32,
    /// How many times to poll for the mount entry point.
    pub ready_retries: u32,
    pub ready_interval_ms: u64,
    /// Delay before re-rendering the placeholder into a reused surface.
    pub reuse_settle_ms: u64,
    /// Interval of the closed-surface watch.
    pub close_poll_ms: u64,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            width: 1200,
            height: 800,
            ready_retries: 30,
            ready_interval_ms: 200,
            reuse_settle_ms: 50,
            close_poll_ms: 1000,
        }
    }
}

impl SurfaceConfig {
    pub const fn ready_interval(&self) -> Duration {
        Duration::from_millis(self.ready_interval_ms)
    }

    pub const fn reuse_settle(&self) -> Duration {
        Duration::from_millis(self.reuse_settle_ms)
    }

    pub const fn close_poll(&self) -> Duration {
        Duration::from_millis(self.close_poll_ms)
    }
}

/// Audio channel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub connect_timeout_ms: u64,
    /// Container/codec the backend streams.
    pub mime_type: String,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            mime_type: "audio/webm; codecs=\"opus\"".to_string(),
        }
    }
}

impl AudioConfig {
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Controller sampling and relay settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    /// Sampling tick (~30 Hz).
    pub sample_interval_ms: u64,
    /// Maximum gap between forwarded frames.
    pub heartbeat_ms: u64,
    /// Interval of the controlling-context liveness check.
    pub liveness_interval_ms: u64,
    /// Re-seed the tracked device when no frame went out for this long.
    pub rescan_after_ms: u64,
    pub axis_epsilon: f32,
    pub button_epsilon: f32,
    pub deadzone: f32,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: 33,
            heartbeat_ms: 200,
            liveness_interval_ms: 1000,
            rescan_after_ms: 2000,
            axis_epsilon: 0.02,
            button_epsilon: 0.5,
            deadzone: 0.12,
        }
    }
}

impl InputConfig {
    pub const fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub const fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms)
    }

    pub const fn liveness_interval(&self) -> Duration {
        Duration::from_millis(self.liveness_interval_ms)
    }

    pub const fn rescan_after(&self) -> Duration {
        Duration::from_millis(self.rescan_after_ms)
    }
}

/// Load configuration with hierarchical resolution.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let mut layers = Vec::new();
    if let Some(global_path) = global_config_path()
        && global_path.exists()
    {
        layers.push(global_path);
    }
    if let Some(path) = explicit {
        if !path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        layers.push(path.to_path_buf());
    }

    let mut config = resolve_files(&layers)?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Get the global config file path (`<config dir>/emubridge/settings.json`).
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("emubridge").join("settings.json"))
}

/// Layer `paths` over the defaults, later files winning. Only the keys a
/// file actually sets are applied.
fn resolve_files(paths: &[PathBuf]) -> Result<Config> {
    let mut merged = serde_json::to_value(Config::default())?;
    for path in paths {
        merge_layer(&mut merged, load_layer(path)?);
    }
    serde_json::from_value(merged)
        .map_err(|e| Error::Config(format!("Invalid configuration: {e}")))
}

fn load_layer(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    let layer: Value = serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })?;
    if !layer.is_object() {
        return Err(Error::Config(format!(
            "Config file {} must contain a JSON object",
            path.display()
        )));
    }
    Ok(layer)
}

/// Nested objects merge key by key; any other value replaces.
fn merge_layer(base: &mut Value, layer: Value) {
    match (base, layer) {
        (Value::Object(base), Value::Object(layer)) => {
            for (key, value) in layer {
                match base.get_mut(&key) {
                    Some(slot) => merge_layer(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, layer) => *base = layer,
    }
}

/// Apply `EMUBRIDGE_*` overrides read through `lookup`.
pub fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(val) = lookup("EMUBRIDGE_BACKEND_URL") {
        config.backend.base_url = val;
    }
    if let Some(val) = lookup("EMUBRIDGE_XSRF_TOKEN") {
        config.backend.xsrf_token = Some(val);
    }
    if let Some(val) = lookup("EMUBRIDGE_AUDIO_TIMEOUT_MS")
        && let Ok(n) = val.parse()
    {
        config.audio.connect_timeout_ms = n;
    }
    if let Some(val) = lookup("EMUBRIDGE_LOG_LEVEL") {
        config.log_level = val;
    }
}
