use super::PersistenceError;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Key/value storage scoped to the add-on, holding the serialized mapping table.
pub trait SettingsStore: Send + Sync {
    /// Returns `None` when nothing has been stored yet.
    fn load(&self) -> Result<Option<String>, PersistenceError>;

    /// Replaces the stored document. On error the previous document is intact.
    fn save(&self, contents: &str) -> Result<(), PersistenceError>;
}

/// Stores the mapping document as a TOML file.
///
/// Writes go to a sibling `*.tmp` file which is synced and then renamed over the
/// target, so readers see either the old or the new document.
#[derive(Debug, Clone)]
pub struct TomlFileStore {
    path: PathBuf,
}

impl TomlFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "mappings.toml".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn io_error(&self, path: &Path, source: std::io::Error) -> PersistenceError {
        PersistenceError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn write_temp(&self, temp: &Path, contents: &str) -> Result<(), PersistenceError> {
        let mut file = fs::File::create(temp).map_err(|e| self.io_error(temp, e))?;
        file.write_all(contents.as_bytes())
            .map_err(|e| self.io_error(temp, e))?;
        file.sync_all().map_err(|e| self.io_error(temp, e))?;
        Ok(())
    }
}

impl SettingsStore for TomlFileStore {
    fn load(&self) -> Result<Option<String>, PersistenceError> {
        match fs::read_to_string(&self.path) {
            Ok(content) => {
                debug!("Loaded {} bytes from {}", content.len(), self.path.display());
                Ok(Some(content))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No stored mappings at {}", self.path.display());
                Ok(None)
            }
            Err(e) => Err(self.io_error(&self.path, e)),
        }
    }

    fn save(&self, contents: &str) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| self.io_error(parent, e))?;
            }
        }

        let temp = self.temp_path();
        if let Err(e) = self.write_temp(&temp, contents) {
            if let Err(cleanup) = fs::remove_file(&temp) {
                debug!("Could not remove {}: {}", temp.display(), cleanup);
            }
            return Err(e);
        }

        if let Err(e) = fs::rename(&temp, &self.path) {
            warn!("Failed to move {} into place: {}", temp.display(), e);
            let _ = fs::remove_file(&temp);
            return Err(self.io_error(&self.path, e));
        }

        info!("Mappings saved to {}", self.path.display());
        Ok(())
    }
}
