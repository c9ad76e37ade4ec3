//! Test doubles for the device, injection and settings seams

use crate::controller::{
    ButtonId, ControllerEvent, DeviceError, DeviceProvider, InputSource, Phase,
};
use crate::mapping::error::InjectError;
use crate::mapping::injector::{KeyInjector, SynthKeyEvent};
use crate::mapping::keys::SynthKey;
use crate::persistence::{PersistenceError, SettingsStore};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use std::time::Duration;

/// Records every injected key event
#[derive(Default)]
pub struct RecordingInjector {
    events: Mutex<Vec<SynthKeyEvent>>,
    failing: AtomicBool,
    panic_on: Mutex<Option<SynthKey>>,
}

impl RecordingInjector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SynthKeyEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    /// Rejects every event with `ChannelFull` while set
    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// The next injection of `key` panics, once
    pub fn panic_on(&self, key: SynthKey) {
        *self.panic_on.lock().unwrap() = Some(key);
    }
}

impl KeyInjector for RecordingInjector {
    fn inject(&self, event: SynthKeyEvent) -> Result<(), InjectError> {
        let mut trigger = self.panic_on.lock().unwrap();
        if *trigger == Some(event.key) {
            *trigger = None;
            drop(trigger);
            panic!("injector exploded on {:?}", event.key);
        }
        drop(trigger);
        if self.failing.load(Ordering::SeqCst) {
            return Err(InjectError::ChannelFull);
        }
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

type Script = Arc<Mutex<VecDeque<Result<ControllerEvent, DeviceError>>>>;

/// Device provider fed from a shared script.
///
/// Events pushed while a session runs are delivered on the next poll cycle.
#[derive(Default)]
pub struct ScriptedProvider {
    script: Script,
    open_error: Option<DeviceError>,
    gate: Mutex<Option<std_mpsc::Receiver<()>>>,
    opened: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `open` fails with `error`
    pub fn failing(error: DeviceError) -> Self {
        Self {
            open_error: Some(error),
            ..Self::new()
        }
    }

    /// The first `open` blocks until the returned sender fires or is dropped
    pub fn gated() -> (Self, std_mpsc::Sender<()>) {
        let (tx, rx) = std_mpsc::channel();
        let provider = Self::new();
        *provider.gate.lock().unwrap() = Some(rx);
        (provider, tx)
    }

    pub fn press(&self, button: ButtonId) {
        self.push(Ok(ControllerEvent::button(button, Phase::Pressed)));
    }

    pub fn release(&self, button: ButtonId) {
        self.push(Ok(ControllerEvent::button(button, Phase::Released)));
    }

    pub fn disconnect(&self) {
        self.push(Ok(ControllerEvent::Disconnected {
            timestamp: chrono::Local::now(),
        }));
    }

    pub fn push(&self, step: Result<ControllerEvent, DeviceError>) {
        self.script.lock().unwrap().push_back(step);
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

impl DeviceProvider for ScriptedProvider {
    fn open(&self) -> Result<Box<dyn InputSource>, DeviceError> {
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.recv();
        }
        if let Some(error) = &self.open_error {
            return Err(error.clone());
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSource {
            script: self.script.clone(),
            released: self.released.clone(),
        }))
    }
}

pub struct ScriptedSource {
    script: Script,
    released: Arc<AtomicUsize>,
}

impl InputSource for ScriptedSource {
    fn poll_event(&mut self) -> Result<Option<ControllerEvent>, DeviceError> {
        match self.script.lock().unwrap().pop_front() {
            Some(step) => step.map(Some),
            None => Ok(None),
        }
    }

    fn device_name(&self) -> String {
        "Scripted Pad".to_string()
    }
}

impl Drop for ScriptedSource {
    fn drop(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// In-memory settings store whose writes can be made to fail
#[derive(Default)]
pub struct MemoryStore {
    contents: Mutex<Option<String>>,
    failing: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contents(contents: &str) -> Self {
        Self {
            contents: Mutex::new(Some(contents.to_string())),
            failing: AtomicBool::new(false),
        }
    }

    pub fn contents(&self) -> Option<String> {
        self.contents.lock().unwrap().clone()
    }

    pub fn fail_writes(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl SettingsStore for MemoryStore {
    fn load(&self) -> Result<Option<String>, PersistenceError> {
        Ok(self.contents())
    }

    fn save(&self, contents: &str) -> Result<(), PersistenceError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PersistenceError::Io {
                path: "memory".into(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "write refused"),
            });
        }
        *self.contents.lock().unwrap() = Some(contents.to_string());
        Ok(())
    }
}

/// Polls `condition` until it holds, giving up after two seconds
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let wait = async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(2), wait).await.is_ok()
}
