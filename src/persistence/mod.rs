//! # Persistence Module
//!
//! ## Why This Module Exists
//! The mapping table must outlive the process. The host application owns the
//! actual storage; this module defines the narrow seam ([`SettingsStore`]) the
//! mapping store talks to, plus the file-backed implementation used by the
//! bundled host ([`settings_store::TomlFileStore`]).
//!
//! ## Key Abstractions
//! - **Opaque blob**: the store reads and writes one UTF-8 document. Serialization
//!   to and from [`crate::mapping::table::PersistedMappings`] happens in the mapping
//!   store, so a failed serialization never reaches the disk.
//! - **All-or-nothing writes**: a save either replaces the whole document or leaves
//!   the previous one untouched.
//!
//! ## Error Handling Strategy
//! Every failure is a [`PersistenceError`]. Callers surface it to the user and keep
//! the in-memory table; nothing here is fatal to the host.

pub mod settings_store;

pub use settings_store::{SettingsStore, TomlFileStore};

use std::path::PathBuf;

/// Errors raised while loading or saving the mapping configuration
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize mappings: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Failed to parse stored mappings: {0}")]
    Deserialize(#[from] toml::de::Error),
}
