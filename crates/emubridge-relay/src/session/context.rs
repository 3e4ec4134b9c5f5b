//! The controlling context: one owned struct wiring the epoch guard, the
//! surface controller, the audio pipeline, the input relay and cleanup.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use emubridge_core::Config;

use super::types::{
    AudioStatus, LaunchControl, LaunchError, LaunchOutcome, LaunchPhase, LaunchStatus,
    SessionInfo,
};
use crate::audio::{AudioError, AudioPipeline, AudioStats, PlaybackSink};
use crate::backend::{LaunchBackend, SessionEndpoints};
use crate::channel::{CHANNEL_CAPACITY, Connector};
use crate::cleanup::{Beacon, CleanupCoordinator, CleanupSender, CleanupTrigger, LocalRelease};
use crate::epoch::{Epoch, SessionEpochGuard};
use crate::input::InputRelay;
use crate::surface::{
    ChildSurfaceController, MountState, Surface, SurfaceEnvelope, SurfaceError, SurfaceHost,
    SurfaceMessage,
};

/// External collaborators of a [`SessionContext`].
pub struct SessionParts {
    pub backend: Arc<dyn LaunchBackend>,
    pub cleanup_sender: Arc<dyn CleanupSender>,
    /// Fire-and-forget cleanup path, preferred over `cleanup_sender`.
    pub beacon: Option<Beacon>,
    pub host: Arc<dyn SurfaceHost>,
    pub connector: Arc<dyn Connector>,
    pub sink: Box<dyn PlaybackSink>,
}

/// Local resources of a session, released by epoch.
struct SessionResources {
    guard: Arc<SessionEpochGuard>,
    audio: Arc<AudioPipeline>,
    input: Arc<InputRelay>,
}

#[async_trait]
impl LocalRelease for SessionResources {
    async fn release(&self, epoch: Epoch) {
        self.audio.release(epoch).await;
        self.input.release(epoch).await;
        if self.guard.retire(epoch) {
            debug!(%epoch, "Session retired");
        }
    }
}

pub struct SessionContext {
    guard: Arc<SessionEpochGuard>,
    surfaces: Arc<ChildSurfaceController>,
    audio: Arc<AudioPipeline>,
    input: Arc<InputRelay>,
    cleanup: Arc<CleanupCoordinator>,
    resources: Arc<SessionResources>,
    backend: Arc<dyn LaunchBackend>,
    connector: Arc<dyn Connector>,
    connect_timeout: Duration,
    status: watch::Sender<LaunchStatus>,
    inbox: JoinHandle<()>,
}

impl SessionContext {
    /// Wire the components and start the surface inbox. Needs a running
    /// tokio runtime.
    pub fn new(parts: SessionParts, config: &Config) -> Self {
        let guard = Arc::new(SessionEpochGuard::new());
        let (link_tx, link_rx) = mpsc::channel(CHANNEL_CAPACITY);

        let surfaces = Arc::new(ChildSurfaceController::new(
            parts.host,
            &config.surface,
            Arc::clone(&guard),
            link_tx,
        ));
        let audio = Arc::new(AudioPipeline::new(
            Arc::clone(&parts.connector),
            parts.sink,
            Arc::clone(&guard),
            config.audio.mime_type.clone(),
        ));
        let input = Arc::new(InputRelay::new(Arc::clone(&guard)));
        let resources = Arc::new(SessionResources {
            guard: Arc::clone(&guard),
            audio: Arc::clone(&audio),
            input: Arc::clone(&input),
        });
        let cleanup = Arc::new(CleanupCoordinator::new(
            parts.beacon,
            parts.cleanup_sender,
            Arc::clone(&resources) as Arc<dyn LocalRelease>,
            config.surface.close_poll(),
        ));

        let inbox = tokio::spawn(route_surface_messages(
            link_rx,
            Arc::clone(&surfaces),
            Arc::clone(&input),
            Arc::clone(&cleanup),
        ));
        let (status, _) = watch::channel(LaunchStatus::default());

        Self {
            guard,
            surfaces,
            audio,
            input,
            cleanup,
            resources,
            backend: parts.backend,
            connector: parts.connector,
            connect_timeout: config.audio.connect_timeout(),
            status,
            inbox,
        }
    }

    pub fn guard(&self) -> &Arc<SessionEpochGuard> {
        &self.guard
    }

    pub fn status(&self) -> watch::Receiver<LaunchStatus> {
        self.status.subscribe()
    }

    pub async fn current_surface(&self) -> Option<Arc<dyn Surface>> {
        self.surfaces.current().await
    }

    pub async fn audio_stats(&self) -> Option<AudioStats> {
        self.audio.stats().await
    }

    pub async fn input_connected(&self) -> bool {
        self.input.is_channel_open().await
    }

    /// Launch `rom` as a new session, superseding any session in flight.
    ///
    /// Surface and backend failures are fatal and shown to the user. Audio
    /// and input channel failures only degrade the session.
    pub async fn launch(
        &self,
        rom: &str,
        control: Option<&LaunchControl>,
    ) -> Result<LaunchOutcome, LaunchError> {
        let rom = rom.trim();
        if rom.is_empty() {
            return Err(LaunchError::EmptyRom);
        }
        let _busy = match control {
            Some(control) => match control.try_begin() {
                Some(busy) => Some(busy),
                None => {
                    debug!(rom, "Launch control busy, ignoring");
                    return Ok(LaunchOutcome::Ignored);
                }
            },
            None => None,
        };

        let epoch = self.guard.new_epoch();
        info!(%epoch, rom, "Launching emulator");

        let opened = match self.surfaces.open().await {
            Ok(opened) => opened,
            Err(e) => {
                self.publish_failure(epoch, &e.to_string());
                self.resources.release(epoch).await;
                return Err(e.into());
            }
        };
        let surface = Arc::clone(&opened.surface);

        let result = if self.surfaces.inject_bootstrap(epoch, &opened, rom).await {
            self.publish(epoch, &surface, LaunchPhase::Contacting, AudioStatus::Pending);
            self.attach(epoch, rom, &surface).await
        } else if self.guard.is_current(epoch) {
            Err(SurfaceError::Closed.into())
        } else {
            Ok(LaunchOutcome::Superseded)
        };

        match result {
            Ok(LaunchOutcome::Superseded) => {
                debug!(%epoch, "Launch superseded");
                Ok(LaunchOutcome::Superseded)
            }
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                warn!(%epoch, error = %e, "Launch failed");
                self.surfaces
                    .report_failure(epoch, Some(&surface), rom, &e.to_string());
                self.publish_failure(epoch, &e.to_string());
                if !self.cleanup.fire(epoch, CleanupTrigger::LaunchFailed).await {
                    self.resources.release(epoch).await;
                }
                Err(e)
            }
        }
    }

    async fn attach(
        &self,
        epoch: Epoch,
        rom: &str,
        surface: &Arc<dyn Surface>,
    ) -> Result<LaunchOutcome, LaunchError> {
        let endpoints = self.backend.launch(rom).await?;
        if !self.guard.is_current(epoch) {
            self.cleanup.abandon(epoch, endpoints.port).await;
            return Ok(LaunchOutcome::Superseded);
        }
        info!(
            %epoch,
            port = endpoints.port,
            display = %endpoints.display,
            "Backend session allocated"
        );

        if endpoints.port == 0 {
            warn!(%epoch, "Backend reported no session port; cleanup disabled");
        } else if !self
            .cleanup
            .arm(epoch, endpoints.port, Arc::clone(surface))
            .await
        {
            self.cleanup.abandon(epoch, endpoints.port).await;
            return Ok(LaunchOutcome::Superseded);
        }

        self.publish(epoch, surface, LaunchPhase::StartingAudio, AudioStatus::Pending);
        let audio = match self
            .audio
            .connect(epoch, &endpoints.audio, self.connect_timeout)
            .await
        {
            Ok(()) => AudioStatus::Connected,
            Err(AudioError::Superseded) => return Ok(LaunchOutcome::Superseded),
            Err(e) => {
                warn!(%epoch, error = %e, "Audio unavailable, continuing without sound");
                AudioStatus::Unavailable
            }
        };
        if !self.guard.is_current(epoch) {
            return Ok(LaunchOutcome::Superseded);
        }
        self.publish(epoch, surface, LaunchPhase::Mounting, audio);

        let connect = self.connector.connect(&endpoints.input);
        let channel = match tokio::time::timeout(self.connect_timeout, connect).await {
            Ok(Ok(channel)) => Some(channel),
            Ok(Err(e)) => {
                warn!(%epoch, error = %e, "Input channel unavailable");
                None
            }
            Err(_) => {
                warn!(%epoch, endpoint = %endpoints.input, "Input channel connect timed out");
                None
            }
        };
        if !self.input.bind(epoch, surface.id(), channel).await {
            return Ok(LaunchOutcome::Superseded);
        }

        match self.surfaces.wait_for_ready(epoch, surface).await {
            Ok(()) => {}
            Err(SurfaceError::Superseded) => return Ok(LaunchOutcome::Superseded),
            Err(e) => return Err(e.into()),
        }
        let state = mount_state(epoch, &endpoints);
        if !self.surfaces.mount(epoch, surface, state)? {
            return Ok(LaunchOutcome::Superseded);
        }
        self.publish(epoch, surface, LaunchPhase::Running, audio);

        Ok(LaunchOutcome::Mounted(SessionInfo {
            epoch,
            endpoints,
            created_at: SystemTime::now(),
            audio,
        }))
    }

    /// Explicit user close: stop the session's tasks, close the surface and
    /// clean up.
    pub async fn close(&self) {
        let epoch = self.guard.current();
        info!(%epoch, "Closing session");
        self.resources.release(epoch).await;
        self.surfaces.close().await;
        self.cleanup.fire_current(CleanupTrigger::UserClose).await;
        self.status.send_replace(LaunchStatus::new(
            epoch,
            LaunchPhase::Closed,
            AudioStatus::Pending,
        ));
    }

    /// The controlling context is going away.
    pub async fn host_unload(&self) -> bool {
        let epoch = self.guard.current();
        self.resources.release(epoch).await;
        self.cleanup.fire_current(CleanupTrigger::HostUnload).await
    }

    fn publish(
        &self,
        epoch: Epoch,
        surface: &Arc<dyn Surface>,
        phase: LaunchPhase,
        audio: AudioStatus,
    ) {
        if !self.guard.is_current(epoch) {
            return;
        }
        let status = LaunchStatus::new(epoch, phase, audio);
        self.surfaces.set_status(epoch, surface, &status.to_string());
        self.status.send_replace(status);
    }

    fn publish_failure(&self, epoch: Epoch, message: &str) {
        if self.guard.is_current(epoch) {
            self.status.send_replace(LaunchStatus::new(
                epoch,
                LaunchPhase::Failed(message.to_string()),
                AudioStatus::Pending,
            ));
        }
    }
}

impl Drop for SessionContext {
    fn drop(&mut self) {
        self.inbox.abort();
    }
}

fn mount_state(epoch: Epoch, endpoints: &SessionEndpoints) -> MountState {
    MountState {
        display_endpoint: endpoints.display.clone(),
        input_endpoint: endpoints.input.clone(),
        port: endpoints.port,
        epoch,
    }
}

/// Routes messages posted by surfaces: input to the relay, unload to cleanup.
async fn route_surface_messages(
    mut rx: mpsc::Receiver<SurfaceEnvelope>,
    surfaces: Arc<ChildSurfaceController>,
    input: Arc<InputRelay>,
    cleanup: Arc<CleanupCoordinator>,
) {
    while let Some(envelope) = rx.recv().await {
        match envelope.message {
            SurfaceMessage::Input { epoch, payload } => {
                input.accept(envelope.source, epoch, payload).await;
            }
            SurfaceMessage::Unload { epoch } => {
                if !surfaces.is_tracked(envelope.source).await {
                    debug!(source = %envelope.source, %epoch, "Unload from untracked surface");
                    continue;
                }
                let cleanup = Arc::clone(&cleanup);
                tokio::spawn(async move {
                    cleanup.fire(epoch, CleanupTrigger::SurfaceUnload).await;
                });
            }
        }
    }
}
