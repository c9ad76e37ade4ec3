pub mod addon;
pub mod config;
pub mod controller;
pub mod mapping;
pub mod persistence;
pub mod session;
pub mod ui;

#[cfg(test)]
mod test_support;

use crate::addon::{AddonHandle, MenuAction, RemapperContext};
use crate::config::AppConfig;
use crate::controller::{CollectorSettings, GilrsProvider};
use crate::mapping::ChannelInjector;
use crate::persistence::TomlFileStore;
use crate::session::SessionSettings;
use crate::ui::RemapperHostUI;
use color_eyre::{eyre::eyre, Result};
use eframe::egui;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Konfiguration vor dem Logging laden, sie bestimmt das Log-Level
    let loaded = AppConfig::ensure_and_load().await;
    let config = loaded.as_ref().cloned().unwrap_or_default();
    setup(config.level())?;
    match &loaded {
        Ok(_) => info!("Loaded config: {:?}", config),
        Err(e) => warn!("Using default config: {}", e),
    }

    // Add-on laden
    let mappings_path = config.mappings_path();
    info!("Mappings file: {}", mappings_path.display());
    let backend = Arc::new(TomlFileStore::new(mappings_path));
    let provider = Arc::new(GilrsProvider::new(CollectorSettings::from(&config)));

    let (key_tx, key_rx) = mpsc::channel(256);
    let injector = Arc::new(ChannelInjector::new(key_tx));

    let (context, session_notices) = RemapperContext::load(
        backend,
        provider,
        injector,
        SessionSettings::from(&config),
    );

    let (notice_tx, notice_rx) = mpsc::channel(32);
    let addon = AddonHandle::spawn(context, session_notices, notice_tx);

    if config.autostart {
        info!("Autostarting controller remapper");
        addon.dispatch(MenuAction::StartRemapper);
    }

    // UI starten
    info!("Starting host UI");
    let client = addon.client();
    let native_options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default().with_inner_size([900.0, 600.0]),
        ..Default::default()
    };

    let ui_result = eframe::run_native(
        "Controller Remapper",
        native_options,
        Box::new(|cc| Ok(Box::new(RemapperHostUI::new(cc, key_rx, notice_rx, client)))),
    );

    addon.shutdown().await;
    info!("Controller remapper shut down");

    ui_result.map_err(|e| eyre!("UI terminated with error: {}", e))
}

fn setup(level: Level) -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    setup_logging_env(level);
    Ok(())
}

fn setup_logging_env(level: Level) {
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
