//! Keyboard injection seam
//!
//! The dispatcher hands every synthesized key transition to a [`KeyInjector`].
//! [`ChannelInjector`] forwards them to the host UI, which replays them into its
//! focused input context.

use crate::controller::Phase;
use crate::mapping::error::InjectError;
use crate::mapping::keys::SynthKey;
use tokio::sync::mpsc;
use tracing::debug;

/// A key transition to deliver to the host application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SynthKeyEvent {
    pub key: SynthKey,
    pub phase: Phase,
}

impl SynthKeyEvent {
    pub fn down(key: SynthKey) -> Self {
        Self {
            key,
            phase: Phase::Pressed,
        }
    }

    pub fn up(key: SynthKey) -> Self {
        Self {
            key,
            phase: Phase::Released,
        }
    }
}

pub trait KeyInjector: Send + Sync {
    fn inject(&self, event: SynthKeyEvent) -> Result<(), InjectError>;
}

/// Sends synthesized keys to the host over a bounded channel
#[derive(Debug, Clone)]
pub struct ChannelInjector {
    sender: mpsc::Sender<SynthKeyEvent>,
}

impl ChannelInjector {
    pub fn new(sender: mpsc::Sender<SynthKeyEvent>) -> Self {
        Self { sender }
    }
}

impl KeyInjector for ChannelInjector {
    fn inject(&self, event: SynthKeyEvent) -> Result<(), InjectError> {
        match self.sender.try_send(event) {
            Ok(_) => {
                debug!("Injected {:?}", event);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => Err(InjectError::ChannelFull),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(InjectError::ChannelClosed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use egui::Key;

    #[test]
    fn channel_injector_reports_full_and_closed() {
        let (tx, mut rx) = mpsc::channel(1);
        let injector = ChannelInjector::new(tx);
        let event = SynthKeyEvent::down(SynthKey::Base(Key::Space));

        assert_eq!(injector.inject(event), Ok(()));
        assert_eq!(injector.inject(event), Err(InjectError::ChannelFull));
        assert_eq!(rx.try_recv().ok(), Some(event));

        drop(rx);
        assert_eq!(injector.inject(event), Err(InjectError::ChannelClosed));
    }
}
