//! Tastenkombinationen: Parser, Normalform und Anzeige
//!
//! A combination is written as `Mod+Mod+Key`, e.g. `Ctrl+Shift+z`. Modifiers are
//! stored as a set, so `Shift+Ctrl+z` and `Ctrl+Shift+z` parse to the same value.

use crate::mapping::error::ParseError;
use egui::Key;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Modifier keys in canonical press order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Modifier {
    Ctrl,
    Shift,
    Alt,
}

impl Modifier {
    pub const ALL: [Modifier; 3] = [Modifier::Ctrl, Modifier::Shift, Modifier::Alt];

    pub fn name(&self) -> &'static str {
        match self {
            Modifier::Ctrl => "Ctrl",
            Modifier::Shift => "Shift",
            Modifier::Alt => "Alt",
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "ctrl" | "control" => Some(Modifier::Ctrl),
            "shift" => Some(Modifier::Shift),
            "alt" => Some(Modifier::Alt),
            _ => None,
        }
    }

    fn bit(&self) -> u8 {
        match self {
            Modifier::Ctrl => 0b001,
            Modifier::Shift => 0b010,
            Modifier::Alt => 0b100,
        }
    }
}

/// Unordered set of modifiers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ModifierSet {
    bits: u8,
}

impl ModifierSet {
    pub const NONE: ModifierSet = ModifierSet { bits: 0 };

    pub fn insert(&mut self, modifier: Modifier) {
        self.bits |= modifier.bit();
    }

    pub fn with(mut self, modifier: Modifier) -> Self {
        self.insert(modifier);
        self
    }

    pub fn contains(&self, modifier: Modifier) -> bool {
        self.bits & modifier.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// Iterates in canonical order (Ctrl, Shift, Alt); `.rev()` for release order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = Modifier> + '_ {
        Modifier::ALL
            .into_iter()
            .filter(move |modifier| self.contains(*modifier))
    }
}

impl FromIterator<Modifier> for ModifierSet {
    fn from_iter<I: IntoIterator<Item = Modifier>>(iter: I) -> Self {
        let mut set = ModifierSet::NONE;
        for modifier in iter {
            set.insert(modifier);
        }
        set
    }
}

static LETTERS: [(&str, Key); 26] = [
    ("a", Key::A),
    ("b", Key::B),
    ("c", Key::C),
    ("d", Key::D),
    ("e", Key::E),
    ("f", Key::F),
    ("g", Key::G),
    ("h", Key::H),
    ("i", Key::I),
    ("j", Key::J),
    ("k", Key::K),
    ("l", Key::L),
    ("m", Key::M),
    ("n", Key::N),
    ("o", Key::O),
    ("p", Key::P),
    ("q", Key::Q),
    ("r", Key::R),
    ("s", Key::S),
    ("t", Key::T),
    ("u", Key::U),
    ("v", Key::V),
    ("w", Key::W),
    ("x", Key::X),
    ("y", Key::Y),
    ("z", Key::Z),
];

static DIGITS: [(&str, Key); 10] = [
    ("0", Key::Num0),
    ("1", Key::Num1),
    ("2", Key::Num2),
    ("3", Key::Num3),
    ("4", Key::Num4),
    ("5", Key::Num5),
    ("6", Key::Num6),
    ("7", Key::Num7),
    ("8", Key::Num8),
    ("9", Key::Num9),
];

// First name per key is the canonical one, the rest are aliases
static NAMED_KEYS: &[(&str, Key)] = &[
    ("Space", Key::Space),
    ("Enter", Key::Enter),
    ("Return", Key::Enter),
    ("Backspace", Key::Backspace),
    ("Delete", Key::Delete),
    ("Del", Key::Delete),
    ("Escape", Key::Escape),
    ("Esc", Key::Escape),
    ("Tab", Key::Tab),
    ("Up", Key::ArrowUp),
    ("ArrowUp", Key::ArrowUp),
    ("Down", Key::ArrowDown),
    ("ArrowDown", Key::ArrowDown),
    ("Left", Key::ArrowLeft),
    ("ArrowLeft", Key::ArrowLeft),
    ("Right", Key::ArrowRight),
    ("ArrowRight", Key::ArrowRight),
    ("Home", Key::Home),
    ("End", Key::End),
    ("PageUp", Key::PageUp),
    ("PageDown", Key::PageDown),
    ("Insert", Key::Insert),
    ("F1", Key::F1),
    ("F2", Key::F2),
    ("F3", Key::F3),
    ("F4", Key::F4),
    ("F5", Key::F5),
    ("F6", Key::F6),
    ("F7", Key::F7),
    ("F8", Key::F8),
    ("F9", Key::F9),
    ("F10", Key::F10),
    ("F11", Key::F11),
    ("F12", Key::F12),
    ("Minus", Key::Minus),
    ("Equals", Key::Equals),
    ("Comma", Key::Comma),
    ("Period", Key::Period),
    ("Semicolon", Key::Semicolon),
    ("Slash", Key::Slash),
];

fn key_table() -> impl Iterator<Item = &'static (&'static str, Key)> {
    LETTERS.iter().chain(DIGITS.iter()).chain(NAMED_KEYS.iter())
}

/// Case-insensitive lookup of a base key name
pub fn key_from_name(name: &str) -> Option<Key> {
    key_table()
        .find(|(candidate, _)| candidate.eq_ignore_ascii_case(name))
        .map(|(_, key)| *key)
}

/// Canonical name of a supported key
pub fn key_name(key: Key) -> Option<&'static str> {
    key_table()
        .find(|(_, candidate)| *candidate == key)
        .map(|(name, _)| *name)
}

/// Normalized key combination: modifier set plus exactly one base key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KeyCombination {
    pub modifiers: ModifierSet,
    pub key: Key,
}

impl KeyCombination {
    pub fn new(key: Key) -> Self {
        Self {
            modifiers: ModifierSet::NONE,
            key,
        }
    }

    pub fn with(mut self, modifier: Modifier) -> Self {
        self.modifiers.insert(modifier);
        self
    }

    pub fn parse(text: &str) -> Result<Self, ParseError> {
        if text.trim().is_empty() {
            return Err(ParseError::EmptyCombination);
        }

        let tokens: Vec<&str> = text.split('+').map(str::trim).collect();
        let (base, modifier_tokens) = match tokens.split_last() {
            Some(split) => split,
            None => return Err(ParseError::EmptyCombination),
        };

        let mut modifiers = ModifierSet::NONE;
        for token in modifier_tokens {
            let modifier = Modifier::from_token(token)
                .ok_or_else(|| ParseError::UnknownModifier(token.to_string()))?;
            modifiers.insert(modifier);
        }

        let key = key_from_name(base).ok_or_else(|| ParseError::UnknownKey(base.to_string()))?;

        Ok(Self { modifiers, key })
    }
}

impl FromStr for KeyCombination {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        KeyCombination::parse(s)
    }
}

impl TryFrom<String> for KeyCombination {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        KeyCombination::parse(&value)
    }
}

impl From<KeyCombination> for String {
    fn from(value: KeyCombination) -> Self {
        value.to_string()
    }
}

impl fmt::Display for KeyCombination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for modifier in self.modifiers.iter() {
            write!(f, "{}+", modifier.name())?;
        }
        match key_name(self.key) {
            Some(name) => f.write_str(name),
            None => f.write_str(self.key.name()),
        }
    }
}

/// One key as seen by the injection layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SynthKey {
    Modifier(Modifier),
    Base(Key),
}
