//! Single-fire session teardown.
//!
//! Several triggers can end a session at nearly the same moment (the surface
//! closes and unloads, the host shuts down, the user closes it). Whichever
//! arrives first releases the session's local resources and notifies the
//! backend; the rest are no-ops.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::delivery::{Beacon, CleanupRequest, CleanupSender, DeliveryPath, deliver_best_effort};
use crate::epoch::Epoch;
use crate::surface::Surface;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupTrigger {
    /// The closed-surface watch saw the surface gone.
    SurfaceClosed,
    /// The surface announced it is unloading.
    SurfaceUnload,
    /// The controlling context itself is going away.
    HostUnload,
    UserClose,
    /// The launch failed after the backend had allocated the session.
    LaunchFailed,
    /// A newer session was armed before this one was cleaned up.
    Superseded,
}

impl fmt::Display for CleanupTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SurfaceClosed => "surface_closed",
            Self::SurfaceUnload => "surface_unload",
            Self::HostUnload => "host_unload",
            Self::UserClose => "user_close",
            Self::LaunchFailed => "launch_failed",
            Self::Superseded => "superseded",
        };
        f.write_str(name)
    }
}

/// Releases the local resources tagged with an epoch.
#[async_trait]
pub trait LocalRelease: Send + Sync {
    async fn release(&self, epoch: Epoch);
}

struct Armed {
    epoch: Epoch,
    port: u16,
    fired: Arc<AtomicBool>,
    watch: Option<JoinHandle<()>>,
}

pub struct CleanupCoordinator {
    beacon: Option<Beacon>,
    fallback: Arc<dyn CleanupSender>,
    release: Arc<dyn LocalRelease>,
    poll_interval: Duration,
    armed: Mutex<Option<Armed>>,
    delivered: AtomicU64,
}

impl CleanupCoordinator {
    pub fn new(
        beacon: Option<Beacon>,
        fallback: Arc<dyn CleanupSender>,
        release: Arc<dyn LocalRelease>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            beacon,
            fallback,
            release,
            poll_interval,
            armed: Mutex::new(None),
            delivered: AtomicU64::new(0),
        }
    }

    /// Watch `surface` for session `epoch`, identified by `port` on the
    /// backend. Replaces any previously armed session; if that one never
    /// fired and used another port, the backend is told to release it.
    ///
    /// Returns `false`, arming nothing, when a newer session is already armed.
    pub async fn arm(
        self: &Arc<Self>,
        epoch: Epoch,
        port: u16,
        surface: Arc<dyn Surface>,
    ) -> bool {
        let previous = {
            let mut armed = self.armed.lock().await;
            if let Some(newer) = armed.as_ref().filter(|a| a.epoch > epoch) {
                debug!(%epoch, armed = %newer.epoch, "Newer session already armed");
                return false;
            }
            let watch = tokio::spawn(watch_surface(
                Arc::downgrade(self),
                epoch,
                surface,
                self.poll_interval,
            ));
            armed.replace(Armed {
                epoch,
                port,
                fired: Arc::new(AtomicBool::new(false)),
                watch: Some(watch),
            })
        };
        debug!(%epoch, port, "Cleanup armed");

        if let Some(mut previous) = previous {
            if let Some(watch) = previous.watch.take() {
                watch.abort();
            }
            if !previous.fired.swap(true, Ordering::AcqRel) && previous.port != port {
                info!(
                    epoch = %previous.epoch,
                    port = previous.port,
                    trigger = %CleanupTrigger::Superseded,
                    "Session cleanup"
                );
                self.deliver(previous.port).await;
            }
        }
        true
    }

    /// Tear down session `epoch`. Returns `true` only for the first trigger
    /// of an armed session.
    pub async fn fire(&self, epoch: Epoch, trigger: CleanupTrigger) -> bool {
        let (port, fired) = {
            let armed = self.armed.lock().await;
            match armed.as_ref() {
                Some(a) if a.epoch == epoch => (a.port, Arc::clone(&a.fired)),
                _ => {
                    debug!(%epoch, %trigger, "Cleanup trigger for unarmed session");
                    return false;
                }
            }
        };
        if fired.swap(true, Ordering::AcqRel) {
            debug!(%epoch, %trigger, "Cleanup already done");
            return false;
        }

        // The watch is the caller for SurfaceClosed; it exits on its own.
        if trigger != CleanupTrigger::SurfaceClosed
            && let Some(armed) = self.armed.lock().await.as_mut()
            && armed.epoch == epoch
            && let Some(watch) = armed.watch.take()
        {
            watch.abort();
        }

        info!(%epoch, port, %trigger, "Session cleanup");
        self.release.release(epoch).await;
        self.deliver(port).await;
        true
    }

    /// Notify the backend about a session that was allocated but never
    /// armed (it was overtaken before its surface was watched).
    pub async fn abandon(&self, epoch: Epoch, port: u16) -> bool {
        if port == 0 {
            return false;
        }
        info!(%epoch, port, trigger = %CleanupTrigger::Superseded, "Session cleanup");
        self.deliver(port).await.is_some()
    }

    /// [`fire`](Self::fire) for whichever session is armed.
    pub async fn fire_current(&self, trigger: CleanupTrigger) -> bool {
        let epoch = self.armed.lock().await.as_ref().map(|a| a.epoch);
        match epoch {
            Some(epoch) => self.fire(epoch, trigger).await,
            None => false,
        }
    }

    pub async fn armed_epoch(&self) -> Option<Epoch> {
        self.armed.lock().await.as_ref().map(|a| a.epoch)
    }

    /// Whether `epoch` is armed and has not fired yet.
    pub async fn is_pending(&self, epoch: Epoch) -> bool {
        self.armed
            .lock()
            .await
            .as_ref()
            .is_some_and(|a| a.epoch == epoch && !a.fired.load(Ordering::Acquire))
    }

    /// Number of cleanup requests handed to a delivery path.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    async fn deliver(&self, port: u16) -> Option<DeliveryPath> {
        let path = deliver_best_effort(
            self.beacon.as_ref(),
            self.fallback.as_ref(),
            CleanupRequest { port },
        )
        .await;
        if path.is_some() {
            self.delivered.fetch_add(1, Ordering::Relaxed);
        }
        path
    }
}

async fn watch_surface(
    coordinator: Weak<CleanupCoordinator>,
    epoch: Epoch,
    surface: Arc<dyn Surface>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if !surface.is_closed() {
            continue;
        }
        debug!(%epoch, surface = %surface.id(), "Watched surface closed");
        if let Some(coordinator) = coordinator.upgrade() {
            coordinator.fire(epoch, CleanupTrigger::SurfaceClosed).await;
        }
        break;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::cleanup::DeliveryError;
    use crate::surface::{MountState, SurfaceError, SurfaceId, SurfaceState};
    use std::sync::Mutex as StdMutex;

    type Log = Arc<StdMutex<Vec<String>>>;

    struct Sender(Log);

    #[async_trait]
    impl CleanupSender for Sender {
        async fn send_cleanup(&self, request: CleanupRequest) -> Result<(), DeliveryError> {
            self.0.lock().unwrap().push(format!("cleanup:{}", request.port));
            Ok(())
        }
    }

    struct Release(Log);

    #[async_trait]
    impl LocalRelease for Release {
        async fn release(&self, epoch: Epoch) {
            self.0.lock().unwrap().push(format!("release:{epoch}"));
        }
    }

    #[derive(Default)]
    struct Window(AtomicBool);

    impl Surface for Window {
        fn id(&self) -> SurfaceId {
            SurfaceId::new(1)
        }
        fn state(&self) -> SurfaceState {
            if self.0.load(Ordering::SeqCst) {
                SurfaceState::Closed
            } else {
                SurfaceState::Mounted
            }
        }
        fn focus(&self) {}
        fn reset(&self) {}
        fn render_placeholder(&self, _rom: &str) {}
        fn set_status(&self, _message: &str) {}
        fn install_bootstrap(&self) {}
        fn is_mount_ready(&self) -> bool {
            true
        }
        fn mount(&self, _state: MountState) -> Result<(), SurfaceError> {
            Ok(())
        }
        fn show_error(&self, _rom: &str, _message: &str) {}
        fn close(&self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    fn coordinator() -> (Arc<CleanupCoordinator>, Log) {
        let log: Log = Arc::default();
        let coordinator = Arc::new(CleanupCoordinator::new(
            None,
            Arc::new(Sender(log.clone())),
            Arc::new(Release(log.clone())),
            Duration::from_secs(1),
        ));
        (coordinator, log)
    }

    fn entries(log: &Log) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    #[tokio::test(start_paused = true)]
    async fn close_and_unload_clean_up_once() {
        let (coordinator, log) = coordinator();
        let window = Arc::new(Window::default());
        let epoch = Epoch::new(1);
        coordinator.arm(epoch, 33001, window.clone()).await;

        window.close();
        assert!(coordinator.fire(epoch, CleanupTrigger::SurfaceUnload).await);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!coordinator.fire(epoch, CleanupTrigger::HostUnload).await);

        assert_eq!(entries(&log), vec!["release:1", "cleanup:33001"]);
        assert_eq!(coordinator.delivered(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn watch_fires_when_surface_closes() {
        let (coordinator, log) = coordinator();
        let window = Arc::new(Window::default());
        coordinator.arm(Epoch::new(4), 40000, window.clone()).await;

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(entries(&log).is_empty());

        window.close();
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(entries(&log), vec!["release:4", "cleanup:40000"]);
        assert!(!coordinator.is_pending(Epoch::new(4)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_epoch_is_ignored() {
        let (coordinator, log) = coordinator();
        coordinator
            .arm(Epoch::new(2), 1234, Arc::new(Window::default()))
            .await;
        assert!(!coordinator.fire(Epoch::new(1), CleanupTrigger::SurfaceUnload).await);
        assert!(entries(&log).is_empty());
        assert!(coordinator.fire_current(CleanupTrigger::UserClose).await);
        assert_eq!(entries(&log), vec!["release:2", "cleanup:1234"]);
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_cancels_previous_watch() {
        let (coordinator, log) = coordinator();
        let old_window = Arc::new(Window::default());
        coordinator.arm(Epoch::new(1), 1111, old_window.clone()).await;
        coordinator
            .arm(Epoch::new(2), 2222, Arc::new(Window::default()))
            .await;
        // The abandoned session's port is released without touching local state.
        assert_eq!(entries(&log), vec!["cleanup:1111"]);

        old_window.close();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(entries(&log), vec!["cleanup:1111"]);
        assert_eq!(coordinator.armed_epoch().await, Some(Epoch::new(2)));
        assert!(coordinator.is_pending(Epoch::new(2)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_arm_keeps_newer_session_watched() {
        let (coordinator, log) = coordinator();
        let window = Arc::new(Window::default());
        assert!(coordinator.arm(Epoch::new(2), 2222, window.clone()).await);
        assert!(
            !coordinator
                .arm(Epoch::new(1), 1111, Arc::new(Window::default()))
                .await
        );
        assert!(entries(&log).is_empty());
        assert_eq!(coordinator.armed_epoch().await, Some(Epoch::new(2)));

        window.close();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(entries(&log), vec!["release:2", "cleanup:2222"]);
    }

    #[tokio::test(start_paused = true)]
    async fn simultaneous_triggers_clean_up_once() {
        let (coordinator, log) = coordinator();
        let window = Arc::new(Window::default());
        let epoch = Epoch::new(3);
        coordinator.arm(epoch, 3333, window.clone()).await;

        window.close();
        let fired = tokio::join!(
            coordinator.fire(epoch, CleanupTrigger::SurfaceUnload),
            coordinator.fire_current(CleanupTrigger::HostUnload),
            coordinator.fire(epoch, CleanupTrigger::SurfaceClosed),
        );
        assert_eq!(
            [fired.0, fired.1, fired.2].iter().filter(|f| **f).count(),
            1
        );
        // The watch sees the closed surface afterwards and finds nothing to do.
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(entries(&log), vec!["release:3", "cleanup:3333"]);
        assert_eq!(coordinator.delivered(), 1);
    }

    #[tokio::test]
    async fn abandon_skips_unknown_port() {
        let (coordinator, log) = coordinator();
        assert!(!coordinator.abandon(Epoch::new(1), 0).await);
        assert!(coordinator.abandon(Epoch::new(1), 5000).await);
        assert_eq!(entries(&log), vec!["cleanup:5000"]);
    }

    #[tokio::test]
    async fn unarmed_coordinator_does_nothing() {
        let (coordinator, log) = coordinator();
        assert!(!coordinator.fire_current(CleanupTrigger::HostUnload).await);
        assert!(entries(&log).is_empty());
    }
}
