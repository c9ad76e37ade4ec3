use crate::controller::CollectorSettings;
use crate::session::SessionSettings;
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn, Level};

const CONFIG_DIR: &str = "padremap";
const MAIN_CONFIG_FILE: &str = "config.toml";
const MAPPINGS_FILE: &str = "mappings.toml";

/// Application settings, read from `<config dir>/padremap/config.toml`
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Pause between two controller poll cycles
    pub poll_interval_ms: u64,
    /// Axis deflection counted as a D-pad press
    pub axis_threshold: f32,
    /// Only use a gamepad whose name contains this text
    pub gamepad_name: Option<String>,
    /// Start the remapper right after loading
    pub autostart: bool,
    pub log_level: String,
    pub stop_timeout_ms: u64,
    /// Mapping table location; relative paths are resolved against the config dir
    pub mappings_file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10,
            axis_threshold: 0.5,
            gamepad_name: None,
            autostart: true,
            log_level: "info".to_string(),
            stop_timeout_ms: 2000,
            mappings_file: None,
        }
    }
}

impl AppConfig {
    /// Writes the default configuration if none exists yet
    pub async fn ensure_default_config_in(dir: &Path) -> Result<PathBuf> {
        let path = dir.join(MAIN_CONFIG_FILE);
        if tokio::fs::try_exists(&path)
            .await
            .map_err(|e| eyre!("Failed to check if config file exists: {}", e))?
        {
            debug!("Config file present at {}", path.display());
            return Ok(path);
        }

        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| eyre!("Failed to create config directory: {}", e))?;
        let content = toml::to_string_pretty(&AppConfig::default())
            .map_err(|e| eyre!("Failed to serialize default config: {}", e))?;
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| eyre!("Failed to write default config: {}", e))?;

        info!("Created default config at {}", path.display());
        Ok(path)
    }

    /// Writes the default file if needed, then reads it.
    ///
    /// Runs before logging is set up, so failures are returned for the caller
    /// to report once the subscriber is installed.
    pub async fn ensure_and_load() -> Result<Self> {
        Self::ensure_and_load_in(&config_dir()).await
    }

    pub async fn ensure_and_load_in(dir: &Path) -> Result<Self> {
        let path = Self::ensure_default_config_in(dir).await?;
        Self::load(&path).await
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| eyre!("Failed to read {}: {}", path.display(), e))?;
        let config: AppConfig = toml::from_str(&content)
            .map_err(|e| eyre!("Failed to parse {}: {}", path.display(), e))?;
        debug!("Loaded config: {:?}", config);
        Ok(config)
    }

    pub fn mappings_path(&self) -> PathBuf {
        self.mappings_path_in(&config_dir())
    }

    fn mappings_path_in(&self, dir: &Path) -> PathBuf {
        match &self.mappings_file {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => dir.join(path),
            None => dir.join(MAPPINGS_FILE),
        }
    }

    /// Log level for the subscriber; unknown names fall back to INFO
    pub fn level(&self) -> Level {
        self.log_level.parse().unwrap_or(Level::INFO)
    }
}

impl From<&AppConfig> for CollectorSettings {
    fn from(config: &AppConfig) -> Self {
        CollectorSettings {
            axis_threshold: config.axis_threshold,
            gamepad_name: config.gamepad_name.clone(),
        }
    }
}

impl From<&AppConfig> for SessionSettings {
    fn from(config: &AppConfig) -> Self {
        SessionSettings {
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            stop_timeout: Duration::from_millis(config.stop_timeout_ms),
        }
    }
}

fn config_dir() -> PathBuf {
    let base = dirs::config_dir().unwrap_or_else(|| {
        warn!("Could not determine config directory, using current directory");
        PathBuf::from(".")
    });
    base.join(CONFIG_DIR)
}
