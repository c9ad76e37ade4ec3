//! Event Dispatcher
//!
//! Übersetzt Button-Ereignisse anhand des aktuellen Tabellen-Snapshots in
//! synthetische Tastenereignisse.
//!
//! Gehaltene Tasten werden referenzgezählt: teilen sich zwei Buttons eine Taste
//! (z.B. `Ctrl`), wird sie nur beim ersten Halter gedrückt und erst beim letzten
//! wieder losgelassen.
//!
//! Key-ups the host cannot take right now (`ChannelFull`) are queued and
//! retried before anything else is sent. Key-downs are dropped in that case.

use crate::controller::{ButtonId, Phase};
use crate::mapping::error::InjectError;
use crate::mapping::injector::{KeyInjector, SynthKeyEvent};
use crate::mapping::keys::{KeyCombination, SynthKey};
use crate::mapping::table::MappingTable;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub struct EventDispatcher {
    table_rx: watch::Receiver<Arc<MappingTable>>,
    table: Arc<MappingTable>,
    injector: Arc<dyn KeyInjector>,
    /// Nach Host-Shutdown wird nichts mehr eingespeist
    halt: CancellationToken,
    held_buttons: HashMap<ButtonId, KeyCombination>,
    held_keys: HashMap<SynthKey, usize>,
    /// Key-ups rejected by a full host buffer, oldest first
    pending_releases: VecDeque<SynthKey>,
}

impl EventDispatcher {
    pub fn new(
        mut table_rx: watch::Receiver<Arc<MappingTable>>,
        injector: Arc<dyn KeyInjector>,
        halt: CancellationToken,
    ) -> Self {
        let table = table_rx.borrow_and_update().clone();
        Self {
            table_rx,
            table,
            injector,
            halt,
            held_buttons: HashMap::new(),
            held_keys: HashMap::new(),
            pending_releases: VecDeque::new(),
        }
    }

    pub fn on_button_event(&mut self, button: ButtonId, phase: Phase) {
        self.flush_pending();
        self.sync_table();
        match phase {
            Phase::Pressed => self.press(button),
            Phase::Released => self.release(button),
        }
    }

    fn press(&mut self, button: ButtonId) {
        if self.held_buttons.contains_key(&button) {
            debug!("{} already held, ignoring repeat", button);
            return;
        }
        let Some(combo) = self.table.get(button) else {
            debug!("{} is not mapped", button);
            return;
        };

        debug!("{} pressed -> {}", button, combo);
        self.held_buttons.insert(button, combo);
        for key in keys_in_press_order(&combo) {
            self.acquire(key);
        }
    }

    fn release(&mut self, button: ButtonId) {
        // the combination recorded at press time, not the current mapping
        let Some(combo) = self.held_buttons.remove(&button) else {
            return;
        };

        debug!("{} released -> {}", button, combo);
        for key in keys_in_press_order(&combo).into_iter().rev() {
            self.release_key(key);
        }
    }

    // counted only once the key-down call returned
    fn acquire(&mut self, key: SynthKey) {
        let count = self.held_keys.get(&key).copied().unwrap_or(0);
        if count == 0 {
            self.emit(SynthKeyEvent::down(key));
        }
        self.held_keys.insert(key, count + 1);
    }

    fn release_key(&mut self, key: SynthKey) {
        let Some(&count) = self.held_keys.get(&key) else {
            return;
        };
        if count > 1 {
            self.held_keys.insert(key, count - 1);
            return;
        }
        self.emit(SynthKeyEvent::up(key));
        self.held_keys.remove(&key);
    }

    fn emit(&mut self, event: SynthKeyEvent) {
        if self.halt.is_cancelled() {
            debug!("Host shut down, dropping {:?}", event);
            return;
        }

        // nothing may overtake a queued key-up
        if !self.pending_releases.is_empty() {
            match event.phase {
                Phase::Pressed => debug!("Key-ups pending, dropping {:?}", event),
                Phase::Released => self.queue_release(event.key),
            }
            return;
        }

        match self.injector.inject(event) {
            Ok(()) => {}
            Err(InjectError::ChannelFull) if event.phase == Phase::Released => {
                warn!("Host buffer full, queueing {:?}", event);
                self.queue_release(event.key);
            }
            Err(e) => warn!("Failed to inject {:?}: {}", event, e),
        }
    }

    fn queue_release(&mut self, key: SynthKey) {
        if !self.pending_releases.contains(&key) {
            self.pending_releases.push_back(key);
        }
    }

    /// Retries queued key-ups in order until the host buffer is full again
    pub fn flush_pending(&mut self) {
        if self.halt.is_cancelled() {
            self.pending_releases.clear();
            return;
        }
        while let Some(&key) = self.pending_releases.front() {
            match self.injector.inject(SynthKeyEvent::up(key)) {
                Ok(()) => {
                    self.pending_releases.pop_front();
                }
                Err(InjectError::ChannelFull) => return,
                Err(e) => {
                    warn!("Dropping {} queued key-ups: {}", self.pending_releases.len(), e);
                    self.pending_releases.clear();
                    return;
                }
            }
        }
    }

    pub fn pending_releases(&self) -> usize {
        self.pending_releases.len()
    }

    /// Übernimmt einen neuen Tabellen-Snapshot, falls vorhanden.
    ///
    /// Held buttons whose combination changed or was removed are released with
    /// their old combination before the new table takes effect.
    pub fn sync_table(&mut self) {
        match self.table_rx.has_changed() {
            Ok(true) => {}
            // sender gone: keep the last snapshot
            Ok(false) | Err(_) => return,
        }
        let table = self.table_rx.borrow_and_update().clone();

        let stale: Vec<ButtonId> = self
            .held_buttons
            .iter()
            .filter(|(button, combo)| table.get(**button) != Some(**combo))
            .map(|(button, _)| *button)
            .collect();
        for button in stale {
            debug!("Mapping of held {} changed, releasing", button);
            self.release(button);
        }

        self.table = table;
    }

    /// Lässt alle gehaltenen Tasten los
    pub fn release_all(&mut self) {
        let held: Vec<ButtonId> = self.held_buttons.keys().copied().collect();
        for button in held {
            self.release(button);
        }
        self.held_keys.clear();
    }

    pub fn held_buttons(&self) -> usize {
        self.held_buttons.len()
    }
}

/// Modifiers in canonical order (Ctrl, Shift, Alt), then the base key
fn keys_in_press_order(combo: &KeyCombination) -> Vec<SynthKey> {
    combo
        .modifiers
        .iter()
        .map(SynthKey::Modifier)
        .chain(std::iter::once(SynthKey::Base(combo.key)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::keys::Modifier;
    use crate::mapping::injector::ChannelInjector;
    use crate::test_support::RecordingInjector;
    use crate::ui::KeyBridge;
    use egui::{Event, Key, Modifiers};
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use tokio::sync::mpsc;

    fn setup(table: MappingTable) -> (
        watch::Sender<Arc<MappingTable>>,
        Arc<RecordingInjector>,
        CancellationToken,
        EventDispatcher,
    ) {
        let (tx, rx) = watch::channel(Arc::new(table));
        let injector = Arc::new(RecordingInjector::new());
        let halt = CancellationToken::new();
        let dispatcher = EventDispatcher::new(rx, injector.clone(), halt.clone());
        (tx, injector, halt, dispatcher)
    }

    fn ctrl() -> SynthKey {
        SynthKey::Modifier(Modifier::Ctrl)
    }

    fn shift() -> SynthKey {
        SynthKey::Modifier(Modifier::Shift)
    }

    fn z() -> SynthKey {
        SynthKey::Base(Key::Z)
    }

    #[test]
    fn combination_is_pressed_and_released_in_order() {
        let (_tx, injector, _halt, mut dispatcher) = setup(MappingTable::defaults());

        dispatcher.on_button_event(ButtonId::LeftShoulder, Phase::Pressed);
        dispatcher.on_button_event(ButtonId::LeftShoulder, Phase::Released);

        assert_eq!(
            injector.events(),
            vec![
                SynthKeyEvent::down(ctrl()),
                SynthKeyEvent::down(shift()),
                SynthKeyEvent::down(z()),
                SynthKeyEvent::up(z()),
                SynthKeyEvent::up(shift()),
                SynthKeyEvent::up(ctrl()),
            ]
        );
    }

    #[test]
    fn repeated_press_issues_nothing_new() {
        let mut table = MappingTable::empty();
        table.insert(ButtonId::A, "Ctrl+z".parse().unwrap());
        let (_tx, injector, _halt, mut dispatcher) = setup(table);

        dispatcher.on_button_event(ButtonId::A, Phase::Pressed);
        dispatcher.on_button_event(ButtonId::A, Phase::Pressed);

        assert_eq!(
            injector.events(),
            vec![SynthKeyEvent::down(ctrl()), SynthKeyEvent::down(z())]
        );
    }

    #[test]
    fn unmapped_buttons_are_dropped() {
        let (_tx, injector, _halt, mut dispatcher) = setup(MappingTable::empty());

        dispatcher.on_button_event(ButtonId::Y, Phase::Pressed);
        dispatcher.on_button_event(ButtonId::Y, Phase::Released);

        assert!(injector.events().is_empty());
        assert_eq!(dispatcher.held_buttons(), 0);
    }

    #[test]
    fn shared_keys_are_released_by_the_last_holder() {
        let (_tx, injector, _halt, mut dispatcher) = setup(MappingTable::defaults());

        // LeftShoulder = Ctrl+Shift+z, RightShoulder = Ctrl+z
        dispatcher.on_button_event(ButtonId::LeftShoulder, Phase::Pressed);
        dispatcher.on_button_event(ButtonId::RightShoulder, Phase::Pressed);
        dispatcher.on_button_event(ButtonId::LeftShoulder, Phase::Released);
        injector.clear();

        dispatcher.on_button_event(ButtonId::RightShoulder, Phase::Released);
        assert_eq!(
            injector.events(),
            vec![SynthKeyEvent::up(z()), SynthKeyEvent::up(ctrl())]
        );
    }

    #[test]
    fn release_uses_combination_from_press_time() {
        let (tx, injector, _halt, mut dispatcher) = setup(MappingTable::defaults());
        dispatcher.on_button_event(ButtonId::X, Phase::Pressed);

        let mut rebound = MappingTable::defaults();
        rebound.insert(ButtonId::X, KeyCombination::new(Key::Q));
        tx.send_replace(Arc::new(rebound));
        injector.clear();

        // new snapshot flushes the old key-up
        dispatcher.sync_table();
        assert_eq!(injector.events(), vec![SynthKeyEvent::up(z())]);

        // the release that follows belongs to nothing held anymore
        dispatcher.on_button_event(ButtonId::X, Phase::Released);
        assert_eq!(injector.events().len(), 1);

        dispatcher.on_button_event(ButtonId::X, Phase::Pressed);
        assert_eq!(
            injector.events().last(),
            Some(&SynthKeyEvent::down(SynthKey::Base(Key::Q)))
        );
    }

    #[test]
    fn unchanged_bindings_survive_a_table_update() {
        let (tx, injector, _halt, mut dispatcher) = setup(MappingTable::defaults());
        dispatcher.on_button_event(ButtonId::A, Phase::Pressed);

        let mut edited = MappingTable::defaults();
        edited.remove(ButtonId::Select);
        tx.send_replace(Arc::new(edited));
        dispatcher.sync_table();

        assert_eq!(dispatcher.held_buttons(), 1);
        dispatcher.on_button_event(ButtonId::A, Phase::Released);
        assert_eq!(
            injector.events().last(),
            Some(&SynthKeyEvent::up(SynthKey::Base(Key::Space)))
        );
    }

    #[test]
    fn release_all_flushes_every_held_key() {
        let (_tx, injector, _halt, mut dispatcher) = setup(MappingTable::defaults());
        dispatcher.on_button_event(ButtonId::RightTrigger, Phase::Pressed);
        dispatcher.on_button_event(ButtonId::Up, Phase::Pressed);
        injector.clear();

        dispatcher.release_all();

        let ups = injector.events();
        assert_eq!(ups.len(), 3);
        assert!(ups.iter().all(|e| e.phase == Phase::Released));
        assert_eq!(dispatcher.held_buttons(), 0);
    }

    #[test]
    fn halted_dispatcher_injects_nothing() {
        let (_tx, injector, halt, mut dispatcher) = setup(MappingTable::defaults());
        dispatcher.on_button_event(ButtonId::A, Phase::Pressed);
        halt.cancel();
        injector.clear();

        dispatcher.on_button_event(ButtonId::B, Phase::Pressed);
        dispatcher.release_all();

        assert!(injector.events().is_empty());
    }

    #[test]
    fn injection_failure_does_not_stop_dispatch() {
        let (_tx, injector, _halt, mut dispatcher) = setup(MappingTable::defaults());
        injector.fail(true);
        dispatcher.on_button_event(ButtonId::A, Phase::Pressed);
        injector.fail(false);

        dispatcher.on_button_event(ButtonId::A, Phase::Released);
        assert_eq!(
            injector.events(),
            vec![SynthKeyEvent::up(SynthKey::Base(Key::Space))]
        );
    }

    #[test]
    fn modifier_release_survives_a_full_host_buffer() {
        let (_tx, rx) = watch::channel(Arc::new(MappingTable::defaults()));
        let (key_tx, mut key_rx) = mpsc::channel(2);
        let injector = Arc::new(ChannelInjector::new(key_tx));
        let mut dispatcher = EventDispatcher::new(rx, injector, CancellationToken::new());
        let mut bridge = KeyBridge::new();
        let mut drain = |bridge: &mut KeyBridge| {
            let mut events = Vec::new();
            while let Ok(event) = key_rx.try_recv() {
                events.extend(bridge.translate(event));
            }
            events
        };

        // RightShoulder = Ctrl+z fills the buffer
        dispatcher.on_button_event(ButtonId::RightShoulder, Phase::Pressed);
        dispatcher.on_button_event(ButtonId::RightShoulder, Phase::Released);
        assert_eq!(dispatcher.pending_releases(), 2);
        drain(&mut bridge);
        assert!(bridge.modifiers().ctrl);

        // X = z, sent after the queued key-ups
        dispatcher.on_button_event(ButtonId::X, Phase::Pressed);
        assert_eq!(dispatcher.pending_releases(), 0);
        drain(&mut bridge);
        assert_eq!(bridge.modifiers(), Modifiers::NONE);

        dispatcher.on_button_event(ButtonId::X, Phase::Released);
        dispatcher.on_button_event(ButtonId::X, Phase::Pressed);
        let events = drain(&mut bridge);
        assert!(events.contains(&Event::Text("z".into())));
        assert!(events.iter().all(|e| match e {
            Event::Key { modifiers, .. } => *modifiers == Modifiers::NONE,
            _ => true,
        }));
    }

    #[test]
    fn key_downs_do_not_overtake_queued_key_ups() {
        let mut table = MappingTable::empty();
        table.insert(ButtonId::A, "Ctrl+z".parse().unwrap());
        table.insert(ButtonId::B, KeyCombination::new(Key::Q));
        let (_tx, injector, _halt, mut dispatcher) = setup(table);

        dispatcher.on_button_event(ButtonId::A, Phase::Pressed);
        injector.fail(true);
        dispatcher.on_button_event(ButtonId::A, Phase::Released);
        injector.fail(false);
        injector.clear();

        dispatcher.sync_table();
        dispatcher.press(ButtonId::B);
        assert!(injector.events().is_empty());
        assert_eq!(dispatcher.pending_releases(), 2);

        dispatcher.flush_pending();
        assert_eq!(
            injector.events(),
            vec![SynthKeyEvent::up(z()), SynthKeyEvent::up(ctrl())]
        );
    }

    #[test]
    fn halt_discards_queued_key_ups() {
        let (_tx, injector, halt, mut dispatcher) = setup(MappingTable::defaults());
        dispatcher.on_button_event(ButtonId::A, Phase::Pressed);
        injector.fail(true);
        dispatcher.on_button_event(ButtonId::A, Phase::Released);
        injector.fail(false);
        injector.clear();

        halt.cancel();
        dispatcher.flush_pending();

        assert_eq!(dispatcher.pending_releases(), 0);
        assert!(injector.events().is_empty());
    }

    #[test]
    fn key_down_that_panicked_is_not_released_later() {
        let (_tx, injector, _halt, mut dispatcher) = setup(MappingTable::defaults());
        injector.panic_on(SynthKey::Base(Key::Space));

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            dispatcher.on_button_event(ButtonId::A, Phase::Pressed)
        }));
        assert!(outcome.is_err());

        dispatcher.on_button_event(ButtonId::A, Phase::Released);
        assert!(injector.events().is_empty());
        assert_eq!(dispatcher.held_buttons(), 0);
    }
}
