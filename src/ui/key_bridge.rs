//! Übersetzt synthetische Tastenereignisse in egui-Events
//!
//! Modifier haben in egui keine eigene Taste; sie werden hier mitgezählt und an
//! jedes Key-Event gehängt. Druckbare Tasten ohne Ctrl/Alt erzeugen zusätzlich
//! ein `Event::Text`, damit Textfelder die Eingabe übernehmen.

use crate::controller::Phase;
use crate::mapping::keys::key_name;
use crate::mapping::{Modifier, SynthKey, SynthKeyEvent};
use eframe::egui::{Event, Key, Modifiers};

#[derive(Debug, Default)]
pub struct KeyBridge {
    ctrl: bool,
    shift: bool,
    alt: bool,
}

impl KeyBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn modifiers(&self) -> Modifiers {
        Modifiers {
            alt: self.alt,
            ctrl: self.ctrl,
            shift: self.shift,
            mac_cmd: false,
            command: self.ctrl,
        }
    }

    pub fn translate(&mut self, event: SynthKeyEvent) -> Vec<Event> {
        let pressed = event.phase == Phase::Pressed;
        match event.key {
            SynthKey::Modifier(modifier) => {
                match modifier {
                    Modifier::Ctrl => self.ctrl = pressed,
                    Modifier::Shift => self.shift = pressed,
                    Modifier::Alt => self.alt = pressed,
                }
                Vec::new()
            }
            SynthKey::Base(key) => {
                let mut events = vec![Event::Key {
                    key,
                    physical_key: Some(key),
                    pressed,
                    repeat: false,
                    modifiers: self.modifiers(),
                }];
                if pressed && !self.ctrl && !self.alt {
                    if let Some(text) = key_text(key, self.shift) {
                        events.push(Event::Text(text));
                    }
                }
                events
            }
        }
    }
}

fn key_text(key: Key, shift: bool) -> Option<String> {
    let text = match key {
        Key::Space => " ",
        Key::Minus => "-",
        Key::Equals => "=",
        Key::Comma => ",",
        Key::Period => ".",
        Key::Semicolon => ";",
        Key::Slash => "/",
        _ => {
            let name = key_name(key)?;
            let mut chars = name.chars();
            return match (chars.next(), chars.next()) {
                (Some(c), None) if c.is_ascii_alphabetic() && shift => {
                    Some(c.to_ascii_uppercase().to_string())
                }
                (Some(c), None) if c.is_ascii_alphanumeric() => Some(c.to_string()),
                _ => None,
            };
        }
    };
    Some(text.to_string())
}
