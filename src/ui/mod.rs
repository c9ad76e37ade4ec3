//! # Host User Interface Module
//!
//! A small eframe/egui application that hosts the remapper: a text document is the
//! focused input context, the `Tools` menu carries the add-on's actions and a
//! bottom status line shows the remapper state.
//!
//! ## Controller Event Integration Strategy
//! Synthesized keys arrive on an `mpsc` channel from the
//! [`crate::mapping::ChannelInjector`]. They are translated by [`KeyBridge`] and
//! pushed into egui's event stream in `raw_input_hook`, before egui processes the
//! frame. Widgets therefore see them exactly like keyboard input.
//!
//! ## Frame Rate Management
//! Requests a repaint every 33ms so queued keys are picked up even while the
//! window has no other input.

pub mod key_bridge;
pub mod settings_dialog;

pub use key_bridge::KeyBridge;
pub use settings_dialog::SettingsDialog;

use crate::addon::{AddonClient, AddonNotice, MenuAction};
use crate::mapping::SynthKeyEvent;
use eframe::egui::{self, Color32, Id, RichText, TextEdit};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// Last message shown in the status line
enum StatusMessage {
    None,
    Info(String),
    Error(String),
}

pub struct RemapperHostUI {
    /// Synthetische Tasten vom Injector
    key_receiver: mpsc::Receiver<SynthKeyEvent>,

    bridge: KeyBridge,

    /// Meldungen des Add-on-Workers
    notice_receiver: mpsc::Receiver<AddonNotice>,

    addon: AddonClient,

    settings_dialog: SettingsDialog,

    document: String,

    status: StatusMessage,
}

impl RemapperHostUI {
    pub fn new(
        cc: &eframe::CreationContext<'_>,
        key_receiver: mpsc::Receiver<SynthKeyEvent>,
        notice_receiver: mpsc::Receiver<AddonNotice>,
        addon: AddonClient,
    ) -> Self {
        cc.egui_ctx.set_theme(egui::Theme::Dark);
        RemapperHostUI {
            key_receiver,
            bridge: KeyBridge::new(),
            notice_receiver,
            addon,
            settings_dialog: SettingsDialog::default(),
            document: String::new(),
            status: StatusMessage::None,
        }
    }

    fn drain_notices(&mut self) {
        while let Ok(notice) = self.notice_receiver.try_recv() {
            match notice {
                AddonNotice::Info(text) => self.status = StatusMessage::Info(text),
                AddonNotice::Error(text) => self.status = StatusMessage::Error(text),
                AddonNotice::OpenSettings => {
                    let store = self.addon.store();
                    self.settings_dialog.open(&store);
                }
            }
        }
    }

    fn render_menu(&mut self, ui: &mut egui::Ui) {
        egui::menu::bar(ui, |ui| {
            ui.menu_button("Tools", |ui| {
                for action in MenuAction::ALL {
                    if ui.button(action.label()).clicked() {
                        debug!("Menu entry clicked: {}", action.label());
                        self.addon.dispatch(action);
                        ui.close_menu();
                    }
                }
            });
        });
    }

    fn render_status(&self, ui: &mut egui::Ui) {
        ui.horizontal_centered(|ui| {
            ui.label(format!("Controller Remapper: {}", self.addon.state()));
            ui.separator();
            match &self.status {
                StatusMessage::None => {}
                StatusMessage::Info(text) => {
                    ui.label(text);
                }
                StatusMessage::Error(text) => {
                    ui.label(RichText::new(text).color(Color32::LIGHT_RED));
                }
            }
        });
    }
}

impl eframe::App for RemapperHostUI {
    fn raw_input_hook(&mut self, _ctx: &egui::Context, raw_input: &mut egui::RawInput) {
        while let Ok(event) = self.key_receiver.try_recv() {
            raw_input.events.extend(self.bridge.translate(event));
        }
    }

    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        ctx.request_repaint_after(Duration::from_millis(33));
        self.drain_notices();

        egui::TopBottomPanel::top("menu_panel").show(ctx, |ui| self.render_menu(ui));

        egui::TopBottomPanel::bottom("status_panel")
            .show_separator_line(false)
            .show(ctx, |ui| self.render_status(ui));

        egui::CentralPanel::default().show(ctx, |ui| {
            let editor = ui.add_sized(
                ui.available_size(),
                TextEdit::multiline(&mut self.document)
                    .id(Id::new("document"))
                    .lock_focus(true),
            );
            let nothing_focused = ctx.memory(|m| m.focused().is_none());
            if nothing_focused && !self.settings_dialog.is_open() {
                editor.request_focus();
            }
        });

        let store = self.addon.store();
        if self.settings_dialog.show(ctx, &store) {
            self.status = StatusMessage::Info("Settings saved".to_string());
        }
    }
}
