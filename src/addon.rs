//! Add-on boundary towards the host application.
//!
//! The host creates one [`RemapperContext`] when the add-on loads and calls
//! [`RemapperContext::unload`] when it goes away. Menu entries are routed
//! through [`AddonHandle`], a small command worker that also turns session
//! notices into user-facing messages.

use crate::controller::DeviceProvider;
use crate::mapping::{KeyInjector, MappingStore};
use crate::persistence::SettingsStore;
use crate::session::{LifecycleController, SessionNotice, SessionSettings, SessionState};
use std::sync::Arc;
use tokio::sync::mpsc::{channel, Receiver, Sender};
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};

/// Entries the add-on contributes to the host's Tools menu
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuAction {
    StartRemapper,
    StopRemapper,
    OpenSettings,
}

impl MenuAction {
    pub const ALL: [MenuAction; 3] = [
        MenuAction::StartRemapper,
        MenuAction::StopRemapper,
        MenuAction::OpenSettings,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            MenuAction::StartRemapper => "Start Controller Remapper",
            MenuAction::StopRemapper => "Stop Controller Remapper",
            MenuAction::OpenSettings => "Controller Remapper Settings",
        }
    }
}

/// Message for the user, or a request the host UI has to fulfil
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddonNotice {
    Info(String),
    Error(String),
    OpenSettings,
}

/// Everything the add-on owns between load and unload
pub struct RemapperContext {
    store: Arc<MappingStore>,
    lifecycle: Arc<LifecycleController>,
}

impl RemapperContext {
    /// Loads the stored mappings and prepares a stopped remapper.
    ///
    /// The returned receiver carries notices the session raises on its own
    /// (e.g. a disconnected controller).
    pub fn load(
        backend: Arc<dyn SettingsStore>,
        provider: Arc<dyn DeviceProvider>,
        injector: Arc<dyn KeyInjector>,
        settings: SessionSettings,
    ) -> (Self, Receiver<SessionNotice>) {
        info!("Loading controller remapper");
        let store = Arc::new(MappingStore::open(backend));
        let (notice_tx, notice_rx) = channel(16);
        let lifecycle = Arc::new(LifecycleController::new(
            provider,
            injector,
            store.subscribe(),
            notice_tx,
            settings,
        ));
        (Self { store, lifecycle }, notice_rx)
    }

    pub fn store(&self) -> Arc<MappingStore> {
        self.store.clone()
    }

    pub fn lifecycle(&self) -> Arc<LifecycleController> {
        self.lifecycle.clone()
    }

    pub async fn handle_menu_action(&self, action: MenuAction) -> AddonNotice {
        debug!("Menu action: {}", action.label());
        match action {
            MenuAction::StartRemapper => match self.lifecycle.start().await {
                Ok(()) => AddonNotice::Info("Controller remapper started".into()),
                Err(e) => {
                    warn!("Start failed: {}", e);
                    AddonNotice::Error(format!("Failed to start controller remapper: {}", e))
                }
            },
            MenuAction::StopRemapper => match self.lifecycle.stop().await {
                Ok(()) => AddonNotice::Info("Controller remapper stopped".into()),
                Err(e) => {
                    warn!("Stop failed: {}", e);
                    AddonNotice::Error(format!("Failed to stop controller remapper: {}", e))
                }
            },
            MenuAction::OpenSettings => AddonNotice::OpenSettings,
        }
    }

    /// Tears the remapper down: no further keys, device released.
    pub async fn unload(&self) {
        info!("Unloading controller remapper");
        self.lifecycle.shutdown().await;
    }
}

#[derive(Debug)]
pub enum AddonCommand {
    Menu(MenuAction),
    Unload { response_tx: oneshot::Sender<()> },
}

/// Runs menu actions off the UI thread
pub struct AddonHandle {
    client: AddonClient,
    worker_handle: tokio::task::JoinHandle<()>,
}

/// What the host UI needs from the add-on
#[derive(Clone)]
pub struct AddonClient {
    tx: Sender<AddonCommand>,
    store: Arc<MappingStore>,
    state_rx: watch::Receiver<SessionState>,
}

impl AddonClient {
    /// Queues a menu action; never blocks the caller
    pub fn dispatch(&self, action: MenuAction) {
        if let Err(e) = self.tx.try_send(AddonCommand::Menu(action)) {
            error!("Could not queue {}: {}", action.label(), e);
        }
    }

    pub fn store(&self) -> Arc<MappingStore> {
        self.store.clone()
    }

    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }
}

impl AddonHandle {
    pub fn spawn(
        context: RemapperContext,
        mut session_notices: Receiver<SessionNotice>,
        notice_tx: Sender<AddonNotice>,
    ) -> Self {
        let store = context.store();
        let state_rx = context.lifecycle.subscribe();
        let (tx, mut rx) = channel::<AddonCommand>(32);

        let worker_handle = tokio::spawn(async move {
            info!("Add-on worker started");
            loop {
                tokio::select! {
                    command = rx.recv() => match command {
                        Some(AddonCommand::Menu(action)) => {
                            let notice = context.handle_menu_action(action).await;
                            forward(&notice_tx, notice);
                        }
                        Some(AddonCommand::Unload { response_tx }) => {
                            context.unload().await;
                            if response_tx.send(()).is_err() {
                                error!("Failed to send response");
                            }
                            break;
                        }
                        None => {
                            context.unload().await;
                            break;
                        }
                    },
                    Some(notice) = session_notices.recv() => {
                        forward(&notice_tx, AddonNotice::Error(notice.to_string()));
                    }
                }
            }
            info!("Add-on worker finished");
        });

        Self {
            client: AddonClient {
                tx,
                store,
                state_rx,
            },
            worker_handle,
        }
    }

    pub fn client(&self) -> AddonClient {
        self.client.clone()
    }

    pub fn dispatch(&self, action: MenuAction) {
        self.client.dispatch(action);
    }

    /// Unloads the add-on and waits for the worker to finish
    pub async fn shutdown(self) {
        let (response_tx, response_rx) = oneshot::channel();
        if self
            .client
            .tx
            .send(AddonCommand::Unload { response_tx })
            .await
            .is_ok()
        {
            let _ = response_rx.await;
        }
        if let Err(e) = self.worker_handle.await {
            error!("Add-on worker failed: {}", e);
        }
    }
}

fn forward(notice_tx: &Sender<AddonNotice>, notice: AddonNotice) {
    debug!("Notice: {:?}", notice);
    if let Err(e) = notice_tx.try_send(notice) {
        warn!("Dropping notice: {}", e);
    }
}
