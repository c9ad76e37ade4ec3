//! Zuordnungstabelle Controller-Button → Tastenkombination

use crate::controller::ButtonId;
use crate::mapping::keys::{KeyCombination, Modifier};
use egui::Key;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// Full button → combination configuration.
///
/// Buttons without an entry have no action. At most one combination per button;
/// inserting again overwrites.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingTable {
    entries: BTreeMap<ButtonId, KeyCombination>,
}

impl MappingTable {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Standardbelegung
    pub fn defaults() -> Self {
        let space = KeyCombination::new(Key::Space);
        let enter = KeyCombination::new(Key::Enter);
        let redo = KeyCombination::new(Key::Z)
            .with(Modifier::Ctrl)
            .with(Modifier::Shift);

        let mut table = Self::empty();
        table.insert(ButtonId::A, space);
        table.insert(ButtonId::B, enter);
        table.insert(ButtonId::X, KeyCombination::new(Key::Z));
        table.insert(ButtonId::Y, KeyCombination::new(Key::X));
        table.insert(ButtonId::Up, KeyCombination::new(Key::ArrowUp));
        table.insert(ButtonId::Down, KeyCombination::new(Key::ArrowDown));
        table.insert(ButtonId::Left, KeyCombination::new(Key::ArrowLeft));
        table.insert(ButtonId::Right, KeyCombination::new(Key::ArrowRight));
        table.insert(ButtonId::LeftShoulder, redo);
        table.insert(
            ButtonId::RightShoulder,
            KeyCombination::new(Key::Z).with(Modifier::Ctrl),
        );
        table.insert(ButtonId::Start, enter);
        table.insert(ButtonId::Select, KeyCombination::new(Key::Backspace));
        table.insert(ButtonId::LeftTrigger, redo);
        table.insert(
            ButtonId::RightTrigger,
            KeyCombination::new(Key::Y).with(Modifier::Ctrl),
        );
        table
    }

    pub fn get(&self, button: ButtonId) -> Option<KeyCombination> {
        self.entries.get(&button).copied()
    }

    pub fn insert(&mut self, button: ButtonId, combo: KeyCombination) -> Option<KeyCombination> {
        self.entries.insert(button, combo)
    }

    pub fn remove(&mut self, button: ButtonId) -> Option<KeyCombination> {
        self.entries.remove(&button)
    }

    pub fn contains(&self, button: ButtonId) -> bool {
        self.entries.contains_key(&button)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_default(&self) -> bool {
        *self == Self::defaults()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ButtonId, KeyCombination)> + '_ {
        self.entries.iter().map(|(button, combo)| (*button, *combo))
    }

    pub fn to_persisted(&self) -> PersistedMappings {
        PersistedMappings {
            custom: !self.is_default(),
            mappings: self
                .iter()
                .map(|(button, combo)| (button.to_string(), combo.to_string()))
                .collect(),
        }
    }

    /// Builds the table from its stored form.
    ///
    /// A non-custom configuration yields the defaults. A custom one is taken as
    /// stored, even when it is empty. Entries that do not parse are skipped.
    pub fn from_persisted(persisted: &PersistedMappings) -> Self {
        if !persisted.custom {
            return Self::defaults();
        }

        let mut table = Self::empty();
        for (button_name, combo_text) in &persisted.mappings {
            let button = match button_name.parse::<ButtonId>() {
                Ok(button) => button,
                Err(e) => {
                    warn!("Skipping stored mapping: {}", e);
                    continue;
                }
            };
            match KeyCombination::parse(combo_text) {
                Ok(combo) => {
                    table.insert(button, combo);
                }
                Err(e) => {
                    warn!("Skipping stored mapping for {}: {}", button, e);
                }
            }
        }
        table
    }
}

/// Serialized form of the mapping table
///
/// ```toml
/// custom = true
///
/// [mappings]
/// A = "Space"
/// LeftShoulder = "Ctrl+Shift+z"
/// ```
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct PersistedMappings {
    /// `false` means "use the built-in defaults"
    #[serde(default)]
    pub custom: bool,
    #[serde(default)]
    pub mappings: BTreeMap<String, String>,
}
