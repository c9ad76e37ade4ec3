//! Fehlerdefinitionen für das Mapping-Modul

use thiserror::Error;

/// Fehler beim Parsen einer Tastenkombination
///
/// Surfaced inline in the settings dialog; the mapping is not stored.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Leere Eingabe oder nur Leerzeichen
    #[error("Key combination is empty")]
    EmptyCombination,

    /// Ein Token vor der Basistaste ist kein Modifier
    #[error("Unknown modifier: {0:?} (expected Ctrl, Shift or Alt)")]
    UnknownModifier(String),

    /// Die Basistaste ist nicht bekannt
    #[error("Unknown key: {0:?}")]
    UnknownKey(String),
}

/// Fehler beim Einspeisen synthetischer Tastenereignisse
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InjectError {
    /// Der Host nimmt keine Ereignisse mehr an
    #[error("Key event channel closed")]
    ChannelClosed,

    /// Der Puffer des Hosts ist voll
    #[error("Key event channel full")]
    ChannelFull,
}
