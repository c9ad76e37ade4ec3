use crate::controller::ButtonId;
use crate::mapping::{MappingDraft, MappingStore};
use eframe::egui::{self, Color32, ComboBox, RichText, ScrollArea, TextEdit, Ui};
use tracing::{debug, info};

/// Datenstruktur für den Einstellungsdialog.
///
/// Edits go to a [`MappingDraft`]; only OK writes them through the store.
pub struct SettingsDialog {
    draft: Option<MappingDraft>,
    selected_button: ButtonId,
    key_input: String,
    error: Option<String>,
}

impl Default for SettingsDialog {
    fn default() -> Self {
        Self {
            draft: None,
            selected_button: ButtonId::A,
            key_input: String::new(),
            error: None,
        }
    }
}

impl SettingsDialog {
    pub fn is_open(&self) -> bool {
        self.draft.is_some()
    }

    pub fn open(&mut self, store: &MappingStore) {
        if self.is_open() {
            return;
        }
        debug!("Opening mapping settings");
        self.draft = Some(store.begin_edit());
        self.key_input.clear();
        self.error = None;
    }

    /// Add/Update: bindet die Eingabe an den gewählten Button
    pub fn apply_input(&mut self) {
        let Some(draft) = self.draft.as_mut() else {
            return;
        };
        match draft.set(self.selected_button, &self.key_input) {
            Ok(combo) => {
                debug!("Draft: {} -> {}", self.selected_button, combo);
                self.error = None;
            }
            Err(e) => self.error = Some(e.to_string()),
        }
    }

    pub fn remove_selected(&mut self) {
        if let Some(draft) = self.draft.as_mut() {
            draft.remove(self.selected_button);
            self.error = None;
        }
    }

    pub fn reset(&mut self) {
        if let Some(draft) = self.draft.as_mut() {
            draft.reset_to_defaults();
            self.error = None;
        }
    }

    /// OK: persistiert den Entwurf. Schlägt das fehl, bleibt der Dialog offen.
    pub fn accept(&mut self, store: &MappingStore) -> bool {
        let Some(draft) = self.draft.take() else {
            return false;
        };
        match store.commit(draft) {
            Ok(()) => {
                info!("Mapping settings saved");
                self.error = None;
                true
            }
            Err(failed) => {
                self.error = Some(format!("Could not save settings: {}", failed.error));
                self.draft = Some(failed.draft);
                false
            }
        }
    }

    pub fn cancel(&mut self) {
        debug!("Mapping settings discarded");
        self.draft = None;
        self.error = None;
    }

    /// Rendert den Dialog. Returns `true` when the settings were saved.
    pub fn show(&mut self, ctx: &egui::Context, store: &MappingStore) -> bool {
        if !self.is_open() {
            return false;
        }

        let mut saved = false;
        egui::Window::new("Controller Remapper Settings")
            .collapsible(false)
            .resizable(true)
            .show(ctx, |ui| {
                self.render_mapping_list(ui);
                ui.separator();
                self.render_form(ui);
                ui.separator();

                ui.horizontal(|ui| {
                    if ui.button("OK").clicked() {
                        saved = self.accept(store);
                    }
                    if ui.button("Cancel").clicked() {
                        self.cancel();
                    }
                });
            });
        saved
    }

    fn render_mapping_list(&mut self, ui: &mut Ui) {
        let Some(draft) = self.draft.as_ref() else {
            return;
        };
        ScrollArea::vertical().max_height(220.0).show(ui, |ui| {
            for (button, combo) in draft.iter() {
                let label = format!("{}: {}", button, combo);
                if ui
                    .selectable_label(self.selected_button == button, label)
                    .clicked()
                {
                    self.selected_button = button;
                    self.key_input = combo.to_string();
                }
            }
        });
    }

    fn render_form(&mut self, ui: &mut Ui) {
        ui.horizontal(|ui| {
            ui.label("Controller Button:");
            ComboBox::from_id_salt("button_select")
                .selected_text(self.selected_button.to_string())
                .show_ui(ui, |ui| {
                    for button in ButtonId::ALL {
                        ui.selectable_value(&mut self.selected_button, button, button.name());
                    }
                });
        });

        ui.horizontal(|ui| {
            ui.label("Keyboard Key:");
            ui.add(
                TextEdit::singleline(&mut self.key_input)
                    .hint_text("e.g., z, Ctrl+z, Ctrl+Shift+z"),
            );
        });

        if let Some(error) = &self.error {
            ui.label(RichText::new(error).color(Color32::RED));
        }

        ui.horizontal(|ui| {
            let add = ui.button("Add Mapping").clicked();
            let update = ui.button("Update Mapping").clicked();
            if add || update {
                self.apply_input();
            }
            if ui.button("Remove Mapping").clicked() {
                self.remove_selected();
            }
            if ui.button("Reset to Defaults").clicked() {
                self.reset();
            }
        });
    }
}
