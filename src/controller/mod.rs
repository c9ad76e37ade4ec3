//! Controller subsystem for gamepad input handling
//!
//! [`event_collector`] turns raw gilrs input into discrete [`ControllerEvent`]s:
//!
//! ```text
//! Gamepad ──► gilrs ──► GilrsSource ──► ControllerEvent (Button / Disconnected)
//!                          │
//!                 DirectionalInput (AxisLatch per axis, analog → digital)
//! ```
//!
//! Opening a device goes through the [`DeviceProvider`] seam so the session
//! lifecycle can be driven by scripted devices in tests.

pub mod event_collector;

pub use event_collector::{
    AxisLatch, ButtonId, CollectorSettings, ControllerEvent, DeviceError, DeviceProvider,
    DirectionalInput, GilrsProvider, InputSource, Phase, UnknownButton,
};
