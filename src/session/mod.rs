//! # Session Module
//!
//! A session is one run of the remapper: the controller device is open, a poll
//! loop reads it on a dedicated blocking thread and feeds the
//! [`crate::mapping::EventDispatcher`].
//!
//! ## Lifecycle
//! ```text
//! Stopped --start--> Starting --device opened--> Running
//!    ^                  |                           |
//!    |<--open failed----+                           |
//!    |<--------------------disconnected-------------+
//!    |<--Stopping <--stop---------------------------+
//! ```
//! Host shutdown forces `Stopped` from any state.
//!
//! [`lifecycle::LifecycleController`] owns the transitions; [`poll_loop::PollLoop`]
//! is the loop itself.

pub mod lifecycle;
pub mod poll_loop;

pub use lifecycle::LifecycleController;
pub use poll_loop::{CloseReason, PollLoop};

use crate::controller::DeviceError;
use std::fmt;
use std::time::Duration;

/// Observable run state of the remapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SessionState::Stopped => "Stopped",
            SessionState::Starting => "Starting",
            SessionState::Running => "Running",
            SessionState::Stopping => "Stopping",
        };
        f.write_str(text)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("Remapper is busy ({0})")]
    Busy(SessionState),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("Remapper has been shut down")]
    ShutDown,

    #[error("Remapper worker failed: {0}")]
    WorkerFailed(String),
}

/// Events a session reports on its own, outside of start/stop calls
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotice {
    DeviceDisconnected { device: String },
    DeviceFailed { device: String, error: DeviceError },
}

impl fmt::Display for SessionNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionNotice::DeviceDisconnected { device } => {
                write!(f, "Controller \"{}\" disconnected, remapper stopped", device)
            }
            SessionNotice::DeviceFailed { device, error } => {
                write!(f, "Controller \"{}\" failed: {}", device, error)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Pause between two poll cycles
    pub poll_interval: Duration,
    /// How long host shutdown waits for the poll thread
    pub stop_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
            stop_timeout: Duration::from_millis(2000),
        }
    }
}
