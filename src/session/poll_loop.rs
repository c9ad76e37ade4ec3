use crate::controller::{ControllerEvent, DeviceError, DeviceProvider, InputSource};
use crate::mapping::EventDispatcher;
use statum::{machine, state};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Poll intervals spent retrying queued key-ups while closing
const RELEASE_DRAIN_CYCLES: u32 = 50;

/// Why a poll loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// stop() or host shutdown
    Cancelled,
    Disconnected,
    Failed(DeviceError),
}

// Define loop states using statum's state macro
#[state]
#[derive(Debug, Clone)]
pub enum LoopState {
    Polling,
    Closing(CloseReason),
}

#[machine]
pub struct PollLoop<S: LoopState> {
    // Opened controller; dropping it releases the device
    source: Box<dyn InputSource>,

    dispatcher: EventDispatcher,

    // Cancelled by stop() and host shutdown
    cancel: CancellationToken,

    poll_interval: Duration,

    device: String,
}

/// Result of one poll cycle
pub enum Cycle {
    Continue(PollLoop<Polling>),
    Close(PollLoop<Closing>),
}

impl<S: LoopState> PollLoop<S> {
    pub fn device(&self) -> &str {
        &self.device
    }
}

impl PollLoop<Polling> {
    /// Opens the device. Must run on the thread that will poll it.
    pub fn open(
        provider: &dyn DeviceProvider,
        dispatcher: EventDispatcher,
        cancel: CancellationToken,
        poll_interval: Duration,
    ) -> Result<Self, DeviceError> {
        let source = provider.open()?;
        let device = source.device_name();
        info!("Controller opened: {}", device);
        Ok(Self::new(source, dispatcher, cancel, poll_interval, device))
    }

    /// Drains every pending event, dispatching each one completely before the
    /// next is read.
    pub fn cycle(mut self) -> Cycle {
        if self.cancel.is_cancelled() {
            return Cycle::Close(self.close_with(CloseReason::Cancelled));
        }

        let dispatcher = &mut self.dispatcher;
        let synced = catch_unwind(AssertUnwindSafe(|| {
            dispatcher.flush_pending();
            dispatcher.sync_table();
        }));
        if synced.is_err() {
            error!("Mapping update panicked");
        }

        loop {
            match self.source.poll_event() {
                Ok(Some(ControllerEvent::Button {
                    button,
                    phase,
                    timestamp,
                })) => {
                    debug!(
                        "Button {} {:?} at {}",
                        button,
                        phase,
                        timestamp.format("%H:%M:%S.%3f")
                    );
                    let dispatcher = &mut self.dispatcher;
                    let outcome = catch_unwind(AssertUnwindSafe(|| {
                        dispatcher.on_button_event(button, phase)
                    }));
                    if outcome.is_err() {
                        error!("Dispatch of {} {:?} panicked, event dropped", button, phase);
                    }
                }
                Ok(Some(ControllerEvent::Disconnected { timestamp })) => {
                    warn!(
                        "{} disconnected at {}",
                        self.device,
                        timestamp.format("%H:%M:%S.%3f")
                    );
                    return Cycle::Close(self.close_with(CloseReason::Disconnected));
                }
                Ok(None) => break,
                Err(DeviceError::DeviceDisconnected) => {
                    warn!("{} disconnected", self.device);
                    return Cycle::Close(self.close_with(CloseReason::Disconnected));
                }
                Err(e) => {
                    error!("Reading {} failed: {}", self.device, e);
                    return Cycle::Close(self.close_with(CloseReason::Failed(e)));
                }
            }
        }

        Cycle::Continue(self)
    }

    fn close_with(self, reason: CloseReason) -> PollLoop<Closing> {
        debug!("Transitioning to Closing state ({:?})", reason);
        self.transition_with(reason)
    }

    /// Polls until cancelled or the device goes away, then closes.
    pub fn run(self) -> CloseReason {
        let interval = self.poll_interval;
        info!("Entering poll loop with {}ms interval", interval.as_millis());

        let mut polling = self;
        let mut cycles: u64 = 0;
        loop {
            match polling.cycle() {
                Cycle::Continue(next) => polling = next,
                Cycle::Close(closing) => {
                    debug!("Poll loop left after {} cycles", cycles);
                    return closing.close();
                }
            }
            cycles += 1;
            std::thread::sleep(interval);
        }
    }
}

impl PollLoop<Closing> {
    /// Flushes held keys and releases the device
    pub fn close(mut self) -> CloseReason {
        let reason = self
            .get_state_data()
            .cloned()
            .unwrap_or(CloseReason::Cancelled);

        let dispatcher = &mut self.dispatcher;
        if catch_unwind(AssertUnwindSafe(|| dispatcher.release_all())).is_err() {
            error!("Releasing held keys panicked");
        }
        self.drain_releases();

        info!("Controller released: {} ({:?})", self.device, reason);
        drop(self);
        reason
    }

    fn drain_releases(&mut self) {
        for _ in 0..RELEASE_DRAIN_CYCLES {
            let dispatcher = &mut self.dispatcher;
            if catch_unwind(AssertUnwindSafe(|| dispatcher.flush_pending())).is_err() {
                error!("Flushing queued key-ups panicked");
                return;
            }
            if self.dispatcher.pending_releases() == 0 {
                return;
            }
            std::thread::sleep(self.poll_interval);
        }
        warn!(
            "Host did not take {} queued key-ups",
            self.dispatcher.pending_releases()
        );
    }
}
