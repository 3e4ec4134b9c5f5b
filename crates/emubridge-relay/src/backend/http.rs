//! HTTP client for the dashboard's emulator endpoints.
//!
//! Uses reqwest to call `launch` and `cleanup`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CACHE_CONTROL, HeaderMap, HeaderName, HeaderValue};
use tracing::debug;

use emubridge_core::config::BackendConfig;

use super::LaunchBackend;
use super::types::{BackendError, LaunchResponse, SessionEndpoints};
use crate::cleanup::{CleanupRequest, CleanupSender, DeliveryError};

const XSRF_HEADER: HeaderName = HeaderName::from_static("x-xsrf-token");

/// Short deadline for cleanup posts; the caller is usually tearing down.
const CLEANUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Dashboard backend reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    http: reqwest::Client,
    base_url: String,
    launch_path: String,
    cleanup_path: String,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        if config.base_url.is_empty() {
            return Err(BackendError::Config("base_url is empty".into()));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
        if let Some(token) = &config.xsrf_token {
            let value = HeaderValue::from_str(token)
                .map_err(|_| BackendError::Config("Invalid XSRF token".into()))?;
            headers.insert(XSRF_HEADER, value);
        }

        // reqwest is built with rustls-no-provider; Err means already installed.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            launch_path: config.launch_path.clone(),
            cleanup_path: config.cleanup_path.clone(),
        })
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub(crate) fn launch_url(&self, rom: &str) -> Result<reqwest::Url, BackendError> {
        let mut url = reqwest::Url::parse(&self.url(&self.launch_path))
            .map_err(|e| BackendError::Config(format!("Invalid launch URL: {e}")))?;
        url.query_pairs_mut().append_pair("rom", rom);
        Ok(url)
    }
}

#[async_trait]
impl LaunchBackend for HttpBackend {
    async fn launch(&self, rom: &str) -> Result<SessionEndpoints, BackendError> {
        let url = self.launch_url(rom)?;
        debug!(%url, "Requesting emulator launch");

        let resp = self.http.post(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(BackendError::Status {
                status: status.as_u16(),
            });
        }

        let body = resp.text().await?;
        let parsed: LaunchResponse = serde_json::from_str(&body)
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;
        parsed.into_endpoints()
    }
}

#[async_trait]
impl CleanupSender for HttpBackend {
    async fn send_cleanup(&self, request: CleanupRequest) -> Result<(), DeliveryError> {
        let resp = self
            .http
            .post(self.url(&self.cleanup_path))
            .timeout(CLEANUP_TIMEOUT)
            .json(&request)
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(DeliveryError::Status(status.as_u16()))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn config(base_url: &str) -> BackendConfig {
        BackendConfig {
            base_url: base_url.into(),
            ..BackendConfig::default()
        }
    }

    #[test]
    fn empty_base_url_is_config_error() {
        let err = HttpBackend::new(&config("")).unwrap_err();
        assert!(matches!(err, BackendError::Config(_)));
    }

    #[test]
    fn invalid_xsrf_token_is_config_error() {
        let cfg = BackendConfig {
            xsrf_token: Some("bad\ntoken".into()),
            ..config("http://media.local")
        };
        assert!(matches!(
            HttpBackend::new(&cfg),
            Err(BackendError::Config(_))
        ));
    }

    #[test]
    fn trailing_slash_stripped_from_base_url() {
        let backend = HttpBackend::new(&config("http://media.local:8080/")).unwrap();
        assert_eq!(
            backend.url("/emulator/cleanup"),
            "http://media.local:8080/emulator/cleanup"
        );
    }

    #[test]
    fn launch_url_encodes_rom() {
        let backend = HttpBackend::new(&config("http://media.local")).unwrap();
        let url = backend.launch_url("Pokemon Red & Blue.gb").unwrap();
        assert_eq!(url.path(), "/emulator/launch");
        let rom = url
            .query_pairs()
            .find(|(k, _)| k == "rom")
            .map(|(_, v)| v.into_owned());
        assert_eq!(rom.as_deref(), Some("Pokemon Red & Blue.gb"));
        assert!(!url.as_str().contains(' '));
    }
}
