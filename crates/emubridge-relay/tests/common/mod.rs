//! Fakes shared by the integration tests.

#![allow(dead_code, clippy::unwrap_used)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use emubridge_core::Config;
use emubridge_relay::audio::{PlaybackSink, SinkError};
use emubridge_relay::backend::{BackendError, LaunchBackend, LaunchResponse, SessionEndpoints};
use emubridge_relay::channel::MemoryConnector;
use emubridge_relay::cleanup::{CleanupRequest, CleanupSender, DeliveryError};
use emubridge_relay::surface::{
    MountState, Surface, SurfaceError, SurfaceHost, SurfaceId, SurfaceLink, SurfaceOptions,
    SurfaceState,
};
use emubridge_relay::{SessionContext, SessionParts};

// =========================================================================
// Backend
// =========================================================================

/// One scripted `launch` answer.
pub struct Scripted {
    pub delay: Duration,
    pub response: LaunchResponse,
}

/// Launch response with all endpoints for session `n` on port `5900 + n`.
pub fn response(n: u16) -> LaunchResponse {
    LaunchResponse {
        vnc_url: Some(format!("ws://display/{n}")),
        audio_url: Some(format!("ws://audio/{n}")),
        gamepad_url: Some(format!("ws://pad/{n}")),
        port: Some(5900 + n),
        error: None,
    }
}

#[derive(Default)]
pub struct FakeBackend {
    script: Mutex<VecDeque<Scripted>>,
    calls: AtomicUsize,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, delay: Duration, response: LaunchResponse) {
        self.script
            .lock()
            .unwrap()
            .push_back(Scripted { delay, response });
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LaunchBackend for FakeBackend {
    async fn launch(&self, _rom: &str) -> Result<SessionEndpoints, BackendError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let next = self.script.lock().unwrap().pop_front();
        let scripted = next.unwrap_or_else(|| Scripted {
            delay: Duration::ZERO,
            response: response(u16::try_from(n).unwrap()),
        });
        tokio::time::sleep(scripted.delay).await;
        scripted.response.into_endpoints()
    }
}

// =========================================================================
// Cleanup
// =========================================================================

#[derive(Default)]
pub struct RecordingCleanup {
    ports: Mutex<Vec<u16>>,
    slow: Mutex<Option<(u16, Duration)>>,
}

impl RecordingCleanup {
    pub fn ports(&self) -> Vec<u16> {
        self.ports.lock().unwrap().clone()
    }

    /// Deliveries for `port` take `delay` before they are recorded.
    pub fn slow_port(&self, port: u16, delay: Duration) {
        *self.slow.lock().unwrap() = Some((port, delay));
    }
}

#[async_trait]
impl CleanupSender for RecordingCleanup {
    async fn send_cleanup(&self, request: CleanupRequest) -> Result<(), DeliveryError> {
        let slow = *self.slow.lock().unwrap();
        if let Some((port, delay)) = slow
            && port == request.port
        {
            tokio::time::sleep(delay).await;
        }
        self.ports.lock().unwrap().push(request.port);
        Ok(())
    }
}

// =========================================================================
// Surfaces
// =========================================================================

#[derive(Default)]
struct SurfaceLog {
    state: Option<SurfaceState>,
    bootstrapped: bool,
    statuses: Vec<String>,
    errors: Vec<String>,
    mounts: Vec<MountState>,
    resets: usize,
}

pub struct FakeSurface {
    link: SurfaceLink,
    /// When false the mount entry point never becomes callable.
    boots: bool,
    log: Mutex<SurfaceLog>,
}

impl FakeSurface {
    pub fn link(&self) -> &SurfaceLink {
        &self.link
    }

    pub fn statuses(&self) -> Vec<String> {
        self.log.lock().unwrap().statuses.clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.log.lock().unwrap().errors.clone()
    }

    pub fn mounts(&self) -> Vec<MountState> {
        self.log.lock().unwrap().mounts.clone()
    }

    pub fn resets(&self) -> usize {
        self.log.lock().unwrap().resets
    }

    /// The user closes the surface without it announcing an unload.
    pub fn close_silently(&self) {
        self.log.lock().unwrap().state = Some(SurfaceState::Closed);
    }
}

impl Surface for FakeSurface {
    fn id(&self) -> SurfaceId {
        self.link.source()
    }

    fn state(&self) -> SurfaceState {
        self.log
            .lock()
            .unwrap()
            .state
            .unwrap_or(SurfaceState::Opening)
    }

    fn focus(&self) {}

    fn reset(&self) {
        let mut log = self.log.lock().unwrap();
        log.resets += 1;
        log.bootstrapped = false;
    }

    fn render_placeholder(&self, _rom: &str) {}

    fn set_status(&self, message: &str) {
        self.log.lock().unwrap().statuses.push(message.to_string());
    }

    fn install_bootstrap(&self) {
        let mut log = self.log.lock().unwrap();
        log.bootstrapped = self.boots;
        log.state = Some(SurfaceState::Ready);
    }

    fn is_mount_ready(&self) -> bool {
        self.log.lock().unwrap().bootstrapped
    }

    fn mount(&self, state: MountState) -> Result<(), SurfaceError> {
        let mut log = self.log.lock().unwrap();
        log.mounts.push(state);
        log.state = Some(SurfaceState::Mounted);
        Ok(())
    }

    fn show_error(&self, _rom: &str, message: &str) {
        self.log.lock().unwrap().errors.push(message.to_string());
    }

    fn close(&self) {
        self.close_silently();
    }
}

#[derive(Default)]
pub struct FakeHost {
    surfaces: Mutex<Vec<Arc<FakeSurface>>>,
    alerts: Mutex<Vec<String>>,
    blocked: AtomicBool,
    broken_bootstrap: AtomicBool,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block(&self) {
        self.blocked.store(true, Ordering::SeqCst);
    }

    /// Surfaces opened from now on never become mount-ready.
    pub fn break_bootstrap(&self) {
        self.broken_bootstrap.store(true, Ordering::SeqCst);
    }

    pub fn opened(&self) -> usize {
        self.surfaces.lock().unwrap().len()
    }

    pub fn surface(&self, index: usize) -> Arc<FakeSurface> {
        Arc::clone(&self.surfaces.lock().unwrap()[index])
    }

    pub fn alerts(&self) -> Vec<String> {
        self.alerts.lock().unwrap().clone()
    }
}

impl SurfaceHost for FakeHost {
    fn open(
        &self,
        _options: &SurfaceOptions,
        link: SurfaceLink,
    ) -> Result<Arc<dyn Surface>, SurfaceError> {
        if self.blocked.load(Ordering::SeqCst) {
            return Err(SurfaceError::Blocked);
        }
        let surface = Arc::new(FakeSurface {
            link,
            boots: !self.broken_bootstrap.load(Ordering::SeqCst),
            log: Mutex::new(SurfaceLog::default()),
        });
        self.surfaces.lock().unwrap().push(Arc::clone(&surface));
        Ok(surface)
    }

    fn alert(&self, message: &str) {
        self.alerts.lock().unwrap().push(message.to_string());
    }
}

// =========================================================================
// Audio sink
// =========================================================================

#[derive(Default)]
pub struct SinkLog {
    pub opens: usize,
    pub resets: usize,
    pub segments: Vec<Bytes>,
    pub overlapped: bool,
    in_commit: bool,
}

#[derive(Clone, Default)]
pub struct RecordingSink {
    pub log: Arc<Mutex<SinkLog>>,
    open: bool,
}

#[async_trait]
impl PlaybackSink for RecordingSink {
    async fn open(&mut self, _mime_type: &str) -> Result<(), SinkError> {
        self.open = true;
        self.log.lock().unwrap().opens += 1;
        Ok(())
    }

    async fn commit(&mut self, segment: Bytes) -> Result<(), SinkError> {
        if !self.open {
            return Err(SinkError::NotOpen);
        }
        {
            let mut log = self.log.lock().unwrap();
            log.overlapped |= log.in_commit;
            log.in_commit = true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
        let mut log = self.log.lock().unwrap();
        log.in_commit = false;
        log.segments.push(segment);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    async fn reset(&mut self) {
        self.open = false;
        self.log.lock().unwrap().resets += 1;
    }
}

// =========================================================================
// Harness
// =========================================================================

pub struct Harness {
    pub context: Arc<SessionContext>,
    pub backend: Arc<FakeBackend>,
    pub cleanup: Arc<RecordingCleanup>,
    pub host: Arc<FakeHost>,
    pub connector: MemoryConnector,
    pub sink: Arc<Mutex<SinkLog>>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(&Config::default())
    }

    pub fn with_config(config: &Config) -> Self {
        let backend = Arc::new(FakeBackend::new());
        let cleanup = Arc::new(RecordingCleanup::default());
        let host = Arc::new(FakeHost::new());
        let connector = MemoryConnector::new();
        let sink = RecordingSink::default();
        let log = Arc::clone(&sink.log);

        let context = SessionContext::new(
            SessionParts {
                backend: Arc::clone(&backend) as _,
                cleanup_sender: Arc::clone(&cleanup) as _,
                beacon: None,
                host: Arc::clone(&host) as _,
                connector: Arc::new(connector.clone()),
                sink: Box::new(sink),
            },
            config,
        );

        Self {
            context: Arc::new(context),
            backend,
            cleanup,
            host,
            connector,
            sink: log,
        }
    }
}

/// Let spawned tasks run; with paused time this also advances the clock.
pub async fn settle(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}
