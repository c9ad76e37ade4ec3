//! Mapping Store
//!
//! Besitzt die aktive [`MappingTable`] und veröffentlicht sie als unveränderlichen
//! Snapshot über einen `watch`-Kanal. Dispatcher halten nur einen Receiver und
//! sehen daher immer entweder die alte oder die neue Tabelle, nie einen
//! Zwischenstand.

use crate::controller::ButtonId;
use crate::mapping::error::ParseError;
use crate::mapping::keys::KeyCombination;
use crate::mapping::table::{MappingTable, PersistedMappings};
use crate::persistence::{PersistenceError, SettingsStore};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub struct MappingStore {
    table_tx: watch::Sender<Arc<MappingTable>>,
    backend: Arc<dyn SettingsStore>,
    /// Serialisiert Speichern + Veröffentlichen, damit Datei und Tabelle übereinstimmen
    write_lock: Mutex<()>,
}

impl MappingStore {
    /// Erstellt den Store mit der Standardbelegung, ohne zu laden
    pub fn new(backend: Arc<dyn SettingsStore>) -> Self {
        let (table_tx, _) = watch::channel(Arc::new(MappingTable::defaults()));
        Self {
            table_tx,
            backend,
            write_lock: Mutex::new(()),
        }
    }

    /// Erstellt den Store und lädt die gespeicherte Konfiguration.
    ///
    /// Ladefehler werden geloggt; der Store bleibt dann bei der Standardbelegung.
    pub fn open(backend: Arc<dyn SettingsStore>) -> Self {
        let store = Self::new(backend);
        if let Err(e) = store.load_from_persisted() {
            warn!("Could not load stored mappings, using defaults: {}", e);
        }
        store
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, button: ButtonId) -> Option<KeyCombination> {
        self.table_tx.borrow().get(button)
    }

    /// Parses `text` and binds it to `button`. Unparseable input is never stored.
    pub fn set(&self, button: ButtonId, text: &str) -> Result<KeyCombination, ParseError> {
        let combo = KeyCombination::parse(text)?;
        self.set_combination(button, combo);
        Ok(combo)
    }

    pub fn set_combination(&self, button: ButtonId, combo: KeyCombination) {
        let _guard = self.lock();
        self.table_tx.send_if_modified(|table| {
            if table.get(button) == Some(combo) {
                return false;
            }
            Arc::make_mut(table).insert(button, combo);
            true
        });
        debug!("Mapped {} -> {}", button, combo);
    }

    pub fn remove(&self, button: ButtonId) -> Option<KeyCombination> {
        let _guard = self.lock();
        let mut removed = None;
        self.table_tx.send_if_modified(|table| {
            if !table.contains(button) {
                return false;
            }
            removed = Arc::make_mut(table).remove(button);
            true
        });
        removed
    }

    /// Ersetzt die gesamte Tabelle atomar durch die Standardbelegung
    pub fn reset_to_defaults(&self) {
        let _guard = self.lock();
        self.table_tx.send_replace(Arc::new(MappingTable::defaults()));
        info!("Mappings reset to defaults");
    }

    /// Lädt die Tabelle aus dem Backend.
    ///
    /// Kein gespeicherter Stand oder ein unlesbares Dokument ergibt die
    /// Standardbelegung. Bei einem I/O-Fehler bleibt die aktive Tabelle erhalten.
    pub fn load_from_persisted(&self) -> Result<(), PersistenceError> {
        let _guard = self.lock();
        let stored = self.backend.load()?;

        let table = match stored {
            None => MappingTable::defaults(),
            Some(text) => match toml::from_str::<PersistedMappings>(&text) {
                Ok(persisted) => MappingTable::from_persisted(&persisted),
                Err(e) => {
                    self.table_tx.send_replace(Arc::new(MappingTable::defaults()));
                    return Err(e.into());
                }
            },
        };

        info!("Loaded {} mappings (default: {})", table.len(), table.is_default());
        self.table_tx.send_replace(Arc::new(table));
        Ok(())
    }

    /// Schreibt die aktive Tabelle ins Backend (alles oder nichts)
    pub fn save_to_persisted(&self) -> Result<(), PersistenceError> {
        let _guard = self.lock();
        let table = self.snapshot();
        self.write(&table)
    }

    fn write(&self, table: &MappingTable) -> Result<(), PersistenceError> {
        let text = toml::to_string_pretty(&table.to_persisted())?;
        self.backend.save(&text)
    }

    /// Aktueller Snapshot der Tabelle
    pub fn snapshot(&self) -> Arc<MappingTable> {
        self.table_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<MappingTable>> {
        self.table_tx.subscribe()
    }

    /// Startet eine gestufte Bearbeitung auf einer Kopie der aktiven Tabelle
    pub fn begin_edit(&self) -> MappingDraft {
        MappingDraft {
            table: (*self.snapshot()).clone(),
        }
    }

    /// Persists the draft, then publishes it as the active table.
    ///
    /// If persisting fails the active table is untouched and the draft is handed
    /// back for another attempt.
    pub fn commit(&self, draft: MappingDraft) -> Result<(), CommitError> {
        let _guard = self.lock();
        if let Err(error) = self.write(&draft.table) {
            warn!("Saving mappings failed: {}", error);
            return Err(CommitError { error, draft });
        }
        self.table_tx.send_replace(Arc::new(draft.table));
        info!("Mapping changes committed");
        Ok(())
    }
}

/// Bearbeitungsstand des Einstellungsdialogs
#[derive(Debug, Clone, PartialEq)]
pub struct MappingDraft {
    table: MappingTable,
}

impl MappingDraft {
    pub fn get(&self, button: ButtonId) -> Option<KeyCombination> {
        self.table.get(button)
    }

    pub fn set(&mut self, button: ButtonId, text: &str) -> Result<KeyCombination, ParseError> {
        let combo = KeyCombination::parse(text)?;
        self.table.insert(button, combo);
        Ok(combo)
    }

    pub fn remove(&mut self, button: ButtonId) -> Option<KeyCombination> {
        self.table.remove(button)
    }

    pub fn reset_to_defaults(&mut self) {
        self.table = MappingTable::defaults();
    }

    pub fn iter(&self) -> impl Iterator<Item = (ButtonId, KeyCombination)> + '_ {
        self.table.iter()
    }

    pub fn table(&self) -> &MappingTable {
        &self.table
    }
}

/// Speichern beim Commit fehlgeschlagen; enthält den unveränderten Entwurf
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct CommitError {
    #[source]
    pub error: PersistenceError,
    pub draft: MappingDraft,
}
