//! Owns the single child surface of the controlling context.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

use emubridge_core::config::SurfaceConfig;

use super::types::{
    MountState, Surface, SurfaceEnvelope, SurfaceError, SurfaceHost, SurfaceId, SurfaceLink,
    SurfaceOptions,
};
use crate::epoch::{Epoch, SessionEpochGuard};

/// Result of [`ChildSurfaceController::open`].
#[derive(Clone)]
pub struct OpenedSurface {
    pub surface: Arc<dyn Surface>,
    /// An already-open surface was focused and cleared instead of opening a new one.
    pub reused: bool,
}

impl std::fmt::Debug for OpenedSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenedSurface")
            .field("surface", &self.surface.id())
            .field("reused", &self.reused)
            .finish()
    }
}

pub struct ChildSurfaceController {
    host: Arc<dyn SurfaceHost>,
    options: SurfaceOptions,
    ready_retries: u32,
    ready_interval: Duration,
    reuse_settle: Duration,
    guard: Arc<SessionEpochGuard>,
    link_tx: mpsc::Sender<SurfaceEnvelope>,
    next_id: AtomicU64,
    current: Mutex<Option<Arc<dyn Surface>>>,
}

impl ChildSurfaceController {
    pub fn new(
        host: Arc<dyn SurfaceHost>,
        config: &SurfaceConfig,
        guard: Arc<SessionEpochGuard>,
        link_tx: mpsc::Sender<SurfaceEnvelope>,
    ) -> Self {
        Self {
            host,
            options: SurfaceOptions::from_config(config),
            ready_retries: config.ready_retries,
            ready_interval: config.ready_interval(),
            reuse_settle: config.reuse_settle(),
            guard,
            link_tx,
            next_id: AtomicU64::new(0),
            current: Mutex::new(None),
        }
    }

    /// Open the child surface, or focus and clear the live one.
    ///
    /// A blocked open is fatal and reported through the host.
    pub async fn open(&self) -> Result<OpenedSurface, SurfaceError> {
        let mut current = self.current.lock().await;

        if let Some(surface) = current.as_ref().filter(|s| !s.is_closed()) {
            surface.focus();
            surface.reset();
            debug!(surface = %surface.id(), "Reusing open surface");
            return Ok(OpenedSurface {
                surface: Arc::clone(surface),
                reused: true,
            });
        }

        let id = SurfaceId::new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let link = SurfaceLink::new(id, self.link_tx.clone());
        let surface = match self.host.open(&self.options, link) {
            Ok(surface) => surface,
            Err(e) => {
                warn!(error = %e, "Failed to open surface");
                self.host.alert(&e.to_string());
                return Err(e);
            }
        };
        surface.focus();
        info!(
            surface = %surface.id(),
            width = self.options.width,
            height = self.options.height,
            "Surface opened"
        );
        *current = Some(Arc::clone(&surface));

        Ok(OpenedSurface {
            surface,
            reused: false,
        })
    }

    /// Render the placeholder and install the mount entry point.
    ///
    /// A reused surface is given a moment to settle after being cleared.
    /// Returns `false` when `epoch` was superseded or the surface closed.
    pub async fn inject_bootstrap(
        &self,
        epoch: Epoch,
        opened: &OpenedSurface,
        rom: &str,
    ) -> bool {
        if opened.reused {
            tokio::time::sleep(self.reuse_settle).await;
        }
        let surface = &opened.surface;
        if !self.guard.is_current(epoch) || surface.is_closed() {
            return false;
        }
        surface.render_placeholder(rom);
        surface.install_bootstrap();
        true
    }

    /// Poll until the mount entry point is callable.
    pub async fn wait_for_ready(
        &self,
        epoch: Epoch,
        surface: &Arc<dyn Surface>,
    ) -> Result<(), SurfaceError> {
        for attempt in 0..=self.ready_retries {
            if !self.guard.is_current(epoch) {
                return Err(SurfaceError::Superseded);
            }
            if surface.is_closed() {
                return Err(SurfaceError::Closed);
            }
            if surface.is_mount_ready() {
                debug!(%epoch, attempt, "Surface bootstrap ready");
                return Ok(());
            }
            if attempt < self.ready_retries {
                tokio::time::sleep(self.ready_interval).await;
            }
        }
        Err(SurfaceError::BootstrapTimeout {
            attempts: self.ready_retries,
        })
    }

    /// Hand `state` to the surface. `Ok(false)` when `epoch` is no longer current.
    pub fn mount(
        &self,
        epoch: Epoch,
        surface: &Arc<dyn Surface>,
        state: MountState,
    ) -> Result<bool, SurfaceError> {
        if !self.guard.is_current(epoch) {
            return Ok(false);
        }
        surface.mount(state)?;
        info!(%epoch, surface = %surface.id(), "Session mounted");
        Ok(true)
    }

    pub fn set_status(&self, epoch: Epoch, surface: &Arc<dyn Surface>, message: &str) {
        if self.guard.is_current(epoch) && !surface.is_closed() {
            surface.set_status(message);
        }
    }

    /// Show a fatal error in the surface, or through the host when the
    /// surface is unusable.
    pub fn report_failure(
        &self,
        epoch: Epoch,
        surface: Option<&Arc<dyn Surface>>,
        rom: &str,
        message: &str,
    ) {
        if !self.guard.is_current(epoch) {
            return;
        }
        match surface {
            Some(surface) if !surface.is_closed() => surface.show_error(rom, message),
            _ => self.host.alert(message),
        }
    }

    pub async fn current(&self) -> Option<Arc<dyn Surface>> {
        self.current.lock().await.clone()
    }

    /// Id of the tracked surface, if one is open.
    pub async fn tracked_id(&self) -> Option<SurfaceId> {
        self.current
            .lock()
            .await
            .as_ref()
            .filter(|s| !s.is_closed())
            .map(|s| s.id())
    }

    /// Whether `id` is the tracked surface, open or not.
    pub async fn is_tracked(&self, id: SurfaceId) -> bool {
        self.current
            .lock()
            .await
            .as_ref()
            .is_some_and(|s| s.id() == id)
    }

    /// Close and forget the tracked surface.
    pub async fn close(&self) {
        if let Some(surface) = self.current.lock().await.take() {
            surface.close();
            info!(surface = %surface.id(), "Surface closed");
        }
    }
}
