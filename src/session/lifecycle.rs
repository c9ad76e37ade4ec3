use super::poll_loop::{CloseReason, PollLoop};
use super::{LifecycleError, SessionNotice, SessionSettings, SessionState};
use crate::controller::{DeviceError, DeviceProvider};
use crate::mapping::{EventDispatcher, KeyInjector, MappingTable};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// A running (or just finished) poll worker
struct ActiveSession {
    cancel: CancellationToken,
    worker: JoinHandle<Option<CloseReason>>,
}

/// Starts and stops remapper sessions.
///
/// At most one session exists at a time. State changes are published through
/// [`LifecycleController::subscribe`].
pub struct LifecycleController {
    state: Arc<watch::Sender<SessionState>>,
    active: Mutex<Option<ActiveSession>>,
    // Cancelled on host shutdown; halts every dispatcher
    root: CancellationToken,
    provider: Arc<dyn DeviceProvider>,
    injector: Arc<dyn KeyInjector>,
    table_rx: watch::Receiver<Arc<MappingTable>>,
    notices: mpsc::Sender<SessionNotice>,
    settings: SessionSettings,
}

impl LifecycleController {
    pub fn new(
        provider: Arc<dyn DeviceProvider>,
        injector: Arc<dyn KeyInjector>,
        table_rx: watch::Receiver<Arc<MappingTable>>,
        notices: mpsc::Sender<SessionNotice>,
        settings: SessionSettings,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Stopped);
        Self {
            state: Arc::new(state),
            active: Mutex::new(None),
            root: CancellationToken::new(),
            provider,
            injector,
            table_rx,
            notices,
            settings,
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Moves `from` to `to` atomically. Returns the state found.
    fn transition(&self, from: SessionState, to: SessionState) -> SessionState {
        let mut found = from;
        self.state.send_if_modified(|current| {
            found = *current;
            if *current == from {
                *current = to;
                true
            } else {
                false
            }
        });
        if found == from {
            info!("Remapper {} -> {}", from, to);
        }
        found
    }

    /// Opens the controller and starts polling.
    ///
    /// Returns once the device is open (`Running`) or opening failed (`Stopped`).
    /// Calling it while already running does nothing.
    pub async fn start(&self) -> Result<(), LifecycleError> {
        if self.root.is_cancelled() {
            return Err(LifecycleError::ShutDown);
        }

        match self.transition(SessionState::Stopped, SessionState::Starting) {
            SessionState::Stopped => {}
            SessionState::Running => {
                debug!("Remapper already running");
                return Ok(());
            }
            busy => return Err(LifecycleError::Busy(busy)),
        }

        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            reap(previous).await;
        }

        let cancel = self.root.child_token();
        let dispatcher = EventDispatcher::new(
            self.table_rx.clone(),
            self.injector.clone(),
            self.root.clone(),
        );
        let (ready_tx, ready_rx) = oneshot::channel();
        let worker = spawn_worker(
            self.provider.clone(),
            dispatcher,
            cancel.clone(),
            self.settings.clone(),
            self.state.clone(),
            self.notices.clone(),
            ready_tx,
        );
        *active = Some(ActiveSession { cancel, worker });
        drop(active);

        let opened = ready_rx
            .await
            .map_err(|_| LifecycleError::WorkerFailed("poll worker exited during start".into()));

        match opened {
            Ok(Ok(device)) => {
                if self.root.is_cancelled() {
                    return Err(LifecycleError::ShutDown);
                }
                info!("Remapper running on {}", device);
                Ok(())
            }
            Ok(Err(device_error)) => {
                warn!("Could not open controller: {}", device_error);
                self.finish_failed_start().await;
                Err(LifecycleError::Device(device_error))
            }
            Err(e) => {
                error!("{}", e);
                self.finish_failed_start().await;
                Err(e)
            }
        }
    }

    async fn finish_failed_start(&self) {
        if let Some(session) = self.active.lock().await.take() {
            reap(session).await;
        }
        self.transition(SessionState::Starting, SessionState::Stopped);
    }

    /// Stops the running session.
    ///
    /// Returns after the poll thread has flushed held keys and released the
    /// device. A no-op when already stopped.
    pub async fn stop(&self) -> Result<(), LifecycleError> {
        match self.transition(SessionState::Running, SessionState::Stopping) {
            SessionState::Running => {}
            SessionState::Stopped => {
                debug!("Remapper already stopped");
                if let Some(finished) = self.active.lock().await.take() {
                    reap(finished).await;
                }
                return Ok(());
            }
            busy => return Err(LifecycleError::Busy(busy)),
        }

        let session = self.active.lock().await.take();
        let result = match session {
            Some(session) => {
                session.cancel.cancel();
                match session.worker.await {
                    Ok(reason) => {
                        debug!("Poll worker finished: {:?}", reason);
                        Ok(())
                    }
                    Err(e) => {
                        error!("Poll worker failed: {}", e);
                        Err(LifecycleError::WorkerFailed(e.to_string()))
                    }
                }
            }
            None => Ok(()),
        };

        self.transition(SessionState::Stopping, SessionState::Stopped);
        result
    }

    /// Host shutdown: `Stopped` immediately, no further synthesized keys, then a
    /// bounded wait for the poll thread.
    pub async fn shutdown(&self) {
        info!("Shutting down remapper");
        self.root.cancel();
        self.state.send_if_modified(|current| {
            let changed = *current != SessionState::Stopped;
            *current = SessionState::Stopped;
            changed
        });

        let session = self.active.lock().await.take();
        if let Some(session) = session {
            match tokio::time::timeout(self.settings.stop_timeout, session.worker).await {
                Ok(Ok(_)) => debug!("Poll worker joined"),
                Ok(Err(e)) => warn!("Poll worker failed during shutdown: {}", e),
                Err(_) => warn!(
                    "Poll worker did not finish within {}ms, leaving it behind",
                    self.settings.stop_timeout.as_millis()
                ),
            }
        }
    }
}

async fn reap(session: ActiveSession) {
    session.cancel.cancel();
    if let Err(e) = session.worker.await {
        warn!("Previous poll worker failed: {}", e);
    }
}

fn spawn_worker(
    provider: Arc<dyn DeviceProvider>,
    dispatcher: EventDispatcher,
    cancel: CancellationToken,
    settings: SessionSettings,
    state: Arc<watch::Sender<SessionState>>,
    notices: mpsc::Sender<SessionNotice>,
    ready: oneshot::Sender<Result<String, DeviceError>>,
) -> JoinHandle<Option<CloseReason>> {
    tokio::task::spawn_blocking(move || {
        let polling = match PollLoop::open(
            provider.as_ref(),
            dispatcher,
            cancel,
            settings.poll_interval,
        ) {
            Ok(polling) => polling,
            Err(e) => {
                let _ = ready.send(Err(e));
                return None;
            }
        };

        let device = polling.device().to_string();
        state.send_if_modified(|current| {
            if *current == SessionState::Starting {
                *current = SessionState::Running;
                info!("Remapper {} -> {}", SessionState::Starting, SessionState::Running);
                true
            } else {
                false
            }
        });
        let _ = ready.send(Ok(device.clone()));

        let reason = polling.run();

        let notice = match &reason {
            CloseReason::Cancelled => None,
            CloseReason::Disconnected => Some(SessionNotice::DeviceDisconnected {
                device: device.clone(),
            }),
            CloseReason::Failed(error) => Some(SessionNotice::DeviceFailed {
                device: device.clone(),
                error: error.clone(),
            }),
        };

        if let Some(notice) = notice {
            let stopped = state.send_if_modified(|current| {
                if *current == SessionState::Running {
                    *current = SessionState::Stopped;
                    true
                } else {
                    false
                }
            });
            if stopped {
                info!("Remapper {} -> {}", SessionState::Running, SessionState::Stopped);
                if let Err(e) = notices.try_send(notice) {
                    warn!("Could not deliver session notice: {}", e);
                }
            }
        }

        Some(reason)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::ButtonId;
    use crate::mapping::{SynthKey, SynthKeyEvent};
    use crate::test_support::{eventually, RecordingInjector, ScriptedProvider};
    use egui::Key;
    use std::time::Duration;

    struct Harness {
        provider: Arc<ScriptedProvider>,
        injector: Arc<RecordingInjector>,
        table_tx: watch::Sender<Arc<MappingTable>>,
        notices: mpsc::Receiver<SessionNotice>,
        controller: Arc<LifecycleController>,
    }

    fn harness(provider: ScriptedProvider) -> Harness {
        let provider = Arc::new(provider);
        let injector = Arc::new(RecordingInjector::new());
        let (table_tx, table_rx) = watch::channel(Arc::new(MappingTable::defaults()));
        let (notice_tx, notices) = mpsc::channel(8);
        let settings = SessionSettings {
            poll_interval: Duration::from_millis(1),
            stop_timeout: Duration::from_millis(500),
        };
        let controller = Arc::new(LifecycleController::new(
            provider.clone(),
            injector.clone(),
            table_rx,
            notice_tx,
            settings,
        ));
        Harness {
            provider,
            injector,
            table_tx,
            notices,
            controller,
        }
    }

    fn key(key: Key) -> SynthKey {
        SynthKey::Base(key)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn missing_device_leaves_remapper_stopped() {
        let h = harness(ScriptedProvider::failing(DeviceError::DeviceNotFound));

        let result = h.controller.start().await;

        assert!(matches!(
            result,
            Err(LifecycleError::Device(DeviceError::DeviceNotFound))
        ));
        assert_eq!(h.controller.state(), SessionState::Stopped);
        assert!(h.table_tx.borrow().is_default());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn permission_denied_is_reported() {
        let h = harness(ScriptedProvider::failing(DeviceError::PermissionDenied(
            "/dev/input/event3".into(),
        )));

        let result = h.controller.start().await;
        assert!(matches!(
            result,
            Err(LifecycleError::Device(DeviceError::PermissionDenied(_)))
        ));
        assert_eq!(h.controller.state(), SessionState::Stopped);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_when_stopped_is_a_no_op() {
        let h = harness(ScriptedProvider::new());
        h.controller.stop().await.unwrap();
        assert_eq!(h.controller.state(), SessionState::Stopped);
        assert_eq!(h.provider.opened(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn running_session_injects_mapped_keys() {
        let h = harness(ScriptedProvider::new());
        h.controller.start().await.unwrap();
        assert_eq!(h.controller.state(), SessionState::Running);

        h.provider.press(ButtonId::A);
        h.provider.release(ButtonId::A);
        assert!(eventually(|| h.injector.events().len() == 2).await);
        assert_eq!(
            h.injector.events(),
            vec![
                SynthKeyEvent::down(key(Key::Space)),
                SynthKeyEvent::up(key(Key::Space)),
            ]
        );

        // already running
        h.controller.start().await.unwrap();
        assert_eq!(h.provider.opened(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_releases_device_and_flushes_held_keys() {
        let h = harness(ScriptedProvider::new());
        h.controller.start().await.unwrap();
        h.provider.press(ButtonId::B);
        assert!(eventually(|| h.injector.events().len() == 1).await);

        h.controller.stop().await.unwrap();

        assert_eq!(h.controller.state(), SessionState::Stopped);
        assert_eq!(h.provider.released(), 1);
        assert_eq!(
            h.injector.events().last(),
            Some(&SynthKeyEvent::up(key(Key::Enter)))
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn disconnect_stops_session_and_notifies() {
        let mut h = harness(ScriptedProvider::new());
        h.controller.start().await.unwrap();
        let mut state_rx = h.controller.subscribe();

        h.provider.disconnect();

        tokio::time::timeout(
            Duration::from_secs(2),
            state_rx.wait_for(|s| *s == SessionState::Stopped),
        )
        .await
        .unwrap()
        .unwrap();
        let notice = tokio::time::timeout(Duration::from_secs(2), h.notices.recv())
            .await
            .unwrap();
        assert_eq!(
            notice,
            Some(SessionNotice::DeviceDisconnected {
                device: "Scripted Pad".into()
            })
        );
        assert!(eventually(|| h.provider.released() == 1).await);

        // a fresh start after the disconnect opens the device again
        h.controller.start().await.unwrap();
        assert_eq!(h.provider.opened(), 2);
        h.controller.stop().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn calls_during_start_are_rejected_as_busy() {
        let (provider, gate) = ScriptedProvider::gated();
        let h = harness(provider);

        let controller = h.controller.clone();
        let starting = tokio::spawn(async move { controller.start().await });
        let mut state_rx = h.controller.subscribe();
        state_rx
            .wait_for(|s| *s == SessionState::Starting)
            .await
            .unwrap();

        assert!(matches!(
            h.controller.stop().await,
            Err(LifecycleError::Busy(SessionState::Starting))
        ));
        assert!(matches!(
            h.controller.start().await,
            Err(LifecycleError::Busy(SessionState::Starting))
        ));

        gate.send(()).unwrap();
        starting.await.unwrap().unwrap();
        assert_eq!(h.controller.state(), SessionState::Running);
        h.controller.stop().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shutdown_stops_immediately_and_silences_output() {
        let h = harness(ScriptedProvider::new());
        h.controller.start().await.unwrap();
        h.provider.press(ButtonId::A);
        assert!(eventually(|| h.injector.events().len() == 1).await);

        h.controller.shutdown().await;

        assert_eq!(h.controller.state(), SessionState::Stopped);
        assert_eq!(h.provider.released(), 1);
        // no key-up for the held Space after shutdown
        assert_eq!(h.injector.events().len(), 1);
        assert!(matches!(
            h.controller.start().await,
            Err(LifecycleError::ShutDown)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn rebinding_while_running_takes_effect() {
        let h = harness(ScriptedProvider::new());
        h.controller.start().await.unwrap();

        let mut table = MappingTable::defaults();
        table.insert(ButtonId::A, "Ctrl+q".parse().unwrap());
        h.table_tx.send_replace(Arc::new(table));

        h.provider.press(ButtonId::A);
        assert!(eventually(|| h.injector.events().len() == 2).await);
        assert_eq!(
            h.injector.events()[1],
            SynthKeyEvent::down(key(Key::Q))
        );
        h.controller.stop().await.unwrap();
    }
}
