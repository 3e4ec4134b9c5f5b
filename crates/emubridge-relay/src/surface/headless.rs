//! Terminal surface host for the `emubridge` binary.
//!
//! There is no window: status and errors go to the log, and mounting starts
//! the controller producer in-process against the configured device.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::types::{
    MountState, Surface, SurfaceError, SurfaceHost, SurfaceId, SurfaceLink, SurfaceMessage,
    SurfaceOptions, SurfaceState,
};
use crate::input::{ControllerDevice, ProducerConfig, ProducerStats, spawn_input_producer};

type DeviceFactory = dyn Fn() -> Box<dyn ControllerDevice> + Send + Sync;

pub struct HeadlessSurfaceHost {
    devices: Arc<DeviceFactory>,
    producer: ProducerConfig,
}

impl HeadlessSurfaceHost {
    pub fn new(
        producer: ProducerConfig,
        devices: impl Fn() -> Box<dyn ControllerDevice> + Send + Sync + 'static,
    ) -> Self {
        Self {
            devices: Arc::new(devices),
            producer,
        }
    }
}

impl SurfaceHost for HeadlessSurfaceHost {
    fn open(
        &self,
        options: &SurfaceOptions,
        link: SurfaceLink,
    ) -> Result<Arc<dyn Surface>, SurfaceError> {
        debug!(name = %options.name, source = %link.source(), "Opening headless surface");
        Ok(Arc::new(HeadlessSurface {
            link,
            devices: Arc::clone(&self.devices),
            producer: self.producer,
            inner: Mutex::new(Inner::default()),
        }))
    }

    fn alert(&self, message: &str) {
        error!("{message}");
    }
}

struct Inner {
    state: SurfaceState,
    bootstrapped: bool,
    mounted: Option<MountState>,
    producer: Option<(watch::Sender<bool>, JoinHandle<ProducerStats>)>,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            state: SurfaceState::Opening,
            bootstrapped: false,
            mounted: None,
            producer: None,
        }
    }
}

impl Inner {
    fn stop_producer(&mut self) {
        if let Some((stop, _handle)) = self.producer.take() {
            let _ = stop.send(true);
        }
    }
}

pub struct HeadlessSurface {
    link: SurfaceLink,
    devices: Arc<DeviceFactory>,
    producer: ProducerConfig,
    inner: Mutex<Inner>,
}

impl HeadlessSurface {
    fn inner(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Surface for HeadlessSurface {
    fn id(&self) -> SurfaceId {
        self.link.source()
    }

    fn state(&self) -> SurfaceState {
        self.inner().state
    }

    fn focus(&self) {}

    fn reset(&self) {
        let mut inner = self.inner();
        if inner.state == SurfaceState::Closed {
            return;
        }
        inner.stop_producer();
        inner.bootstrapped = false;
        inner.mounted = None;
        inner.state = SurfaceState::Opening;
    }

    fn render_placeholder(&self, rom: &str) {
        info!(surface = %self.id(), rom, "Starting emulator");
    }

    fn set_status(&self, message: &str) {
        info!(surface = %self.id(), "{message}");
    }

    fn install_bootstrap(&self) {
        let mut inner = self.inner();
        if inner.state != SurfaceState::Closed {
            inner.bootstrapped = true;
            inner.state = SurfaceState::Ready;
        }
    }

    fn is_mount_ready(&self) -> bool {
        let inner = self.inner();
        inner.bootstrapped && inner.state != SurfaceState::Closed
    }

    fn mount(&self, state: MountState) -> Result<(), SurfaceError> {
        let mut inner = self.inner();
        if inner.state == SurfaceState::Closed {
            return Err(SurfaceError::Closed);
        }
        if !inner.bootstrapped {
            return Err(SurfaceError::Mount("bootstrap not installed".into()));
        }
        inner.stop_producer();

        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = spawn_input_producer(
            state.epoch,
            (self.devices)(),
            self.link.clone(),
            self.producer,
            stop_rx,
        );
        info!(
            surface = %self.id(),
            epoch = %state.epoch,
            display = %state.display_endpoint,
            port = state.port,
            "Display ready"
        );
        inner.producer = Some((stop_tx, handle));
        inner.mounted = Some(state);
        inner.state = SurfaceState::Mounted;
        Ok(())
    }

    fn show_error(&self, rom: &str, message: &str) {
        error!(surface = %self.id(), rom, "{message}");
    }

    fn close(&self) {
        let mounted = {
            let mut inner = self.inner();
            if inner.state == SurfaceState::Closed {
                return;
            }
            inner.stop_producer();
            inner.state = SurfaceState::Closed;
            inner.mounted.take()
        };
        if let Some(mounted) = mounted {
            self.link.try_post(SurfaceMessage::Unload {
                epoch: mounted.epoch,
            });
        }
    }
}
