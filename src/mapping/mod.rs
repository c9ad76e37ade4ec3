//! Modul für die Umwandlung von Controller-Buttons in Tastenkombinationen.
//!
//! Dieses Modul enthält den Parser für Tastenkombinationen ([`keys`]), die
//! Zuordnungstabelle ([`table`]) mit ihrem Store ([`store`]) sowie den
//! [`dispatcher::EventDispatcher`], der Button-Ereignisse in synthetische
//! Tastenereignisse für den Host übersetzt ([`injector`]).

pub mod dispatcher;
pub mod error;
pub mod injector;
pub mod keys;
pub mod store;
pub mod table;

// Re-exports für einfacheren Zugriff
pub use dispatcher::EventDispatcher;
pub use error::{InjectError, ParseError};
pub use injector::{ChannelInjector, KeyInjector, SynthKeyEvent};
pub use keys::{KeyCombination, Modifier, ModifierSet, SynthKey};
pub use store::{CommitError, MappingDraft, MappingStore};
pub use table::{MappingTable, PersistedMappings};
