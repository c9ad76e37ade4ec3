use chrono::{DateTime, Local};
use gilrs::{Axis, Button, Event, EventType, GamepadId, Gilrs};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, error, info, warn};

// Controller event with chrono timestamp
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    Button {
        button: ButtonId,
        phase: Phase,
        timestamp: DateTime<Local>,
    },
    Disconnected {
        timestamp: DateTime<Local>,
    },
}

impl ControllerEvent {
    pub fn button(button: ButtonId, phase: Phase) -> Self {
        ControllerEvent::Button {
            button,
            phase,
            timestamp: Local::now(),
        }
    }
}

// Button / key phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Pressed,
    Released,
}

/// Physical control on the gamepad.
///
/// The D-pad directions also cover analog axes pushed past the configured
/// threshold, see [`DirectionalInput`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ButtonId {
    A,
    B,
    X,
    Y,
    Up,
    Down,
    Left,
    Right,
    LeftShoulder,
    RightShoulder,
    LeftTrigger,
    RightTrigger,
    Start,
    Select,
}

impl ButtonId {
    pub const ALL: [ButtonId; 14] = [
        ButtonId::A,
        ButtonId::B,
        ButtonId::X,
        ButtonId::Y,
        ButtonId::Up,
        ButtonId::Down,
        ButtonId::Left,
        ButtonId::Right,
        ButtonId::LeftShoulder,
        ButtonId::RightShoulder,
        ButtonId::LeftTrigger,
        ButtonId::RightTrigger,
        ButtonId::Start,
        ButtonId::Select,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ButtonId::A => "A",
            ButtonId::B => "B",
            ButtonId::X => "X",
            ButtonId::Y => "Y",
            ButtonId::Up => "Up",
            ButtonId::Down => "Down",
            ButtonId::Left => "Left",
            ButtonId::Right => "Right",
            ButtonId::LeftShoulder => "LeftShoulder",
            ButtonId::RightShoulder => "RightShoulder",
            ButtonId::LeftTrigger => "LeftTrigger",
            ButtonId::RightTrigger => "RightTrigger",
            ButtonId::Start => "Start",
            ButtonId::Select => "Select",
        }
    }
}

impl fmt::Display for ButtonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown controller button: {0}")]
pub struct UnknownButton(pub String);

impl FromStr for ButtonId {
    type Err = UnknownButton;

    // Accepts "LeftShoulder", "leftshoulder" and "LEFT_SHOULDER"
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s.trim().chars().filter(|c| *c != '_').collect();
        ButtonId::ALL
            .into_iter()
            .find(|button| button.name().eq_ignore_ascii_case(&normalized))
            .ok_or_else(|| UnknownButton(s.to_string()))
    }
}

// Collector settings
#[derive(Clone, Debug)]
pub struct CollectorSettings {
    /// Axis deflection (0.0-1.0) at which a stick or D-pad axis counts as pressed
    pub axis_threshold: f32,
    /// Use the first connected gamepad whose name contains this string
    pub gamepad_name: Option<String>,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            axis_threshold: 0.5,
            gamepad_name: None,
        }
    }
}

/// Errors raised while acquiring or reading the controller device
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    #[error("No gamepad connected")]
    DeviceNotFound,

    #[error("Permission denied while opening the gamepad: {0}")]
    PermissionDenied(String),

    #[error("Gamepad disconnected")]
    DeviceDisconnected,

    #[error("Gamepad backend failure: {0}")]
    Backend(String),
}

/// An opened controller device.
///
/// Dropping the source releases the device handle. Sources live on the poll
/// thread only and therefore need not be `Send`.
pub trait InputSource {
    /// Returns the next pending event, or `None` when nothing is queued.
    fn poll_event(&mut self) -> Result<Option<ControllerEvent>, DeviceError>;

    fn device_name(&self) -> String;
}

/// Opens controller devices. Called on the poll thread when a session starts.
pub trait DeviceProvider: Send + Sync {
    fn open(&self) -> Result<Box<dyn InputSource>, DeviceError>;
}

/// Turns one analog axis into digital presses of two opposite buttons.
#[derive(Debug, Clone)]
pub struct AxisLatch {
    negative: ButtonId,
    positive: ButtonId,
    active: Option<ButtonId>,
}

impl AxisLatch {
    pub fn new(negative: ButtonId, positive: ButtonId) -> Self {
        Self {
            negative,
            positive,
            active: None,
        }
    }

    pub fn horizontal() -> Self {
        Self::new(ButtonId::Left, ButtonId::Right)
    }

    // gilrs reports "up" as positive Y
    pub fn vertical() -> Self {
        Self::new(ButtonId::Down, ButtonId::Up)
    }

    pub fn update(&mut self, value: f32, threshold: f32) -> Vec<(ButtonId, Phase)> {
        let next = if value <= -threshold {
            Some(self.negative)
        } else if value >= threshold {
            Some(self.positive)
        } else {
            None
        };

        if next == self.active {
            return Vec::new();
        }

        let mut transitions = Vec::with_capacity(2);
        if let Some(previous) = self.active {
            transitions.push((previous, Phase::Released));
        }
        if let Some(current) = next {
            transitions.push((current, Phase::Pressed));
        }
        self.active = next;
        transitions
    }
}

/// Where a direction press came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum DirectionSource {
    DPadButton,
    DPadAxis,
    LeftStick,
}

/// D-pad buttons, D-pad axes and the left stick feeding the four directions.
///
/// Every axis has its own latch. A direction counts as pressed while any source
/// holds it and is released when the last one lets go.
#[derive(Debug)]
pub struct DirectionalInput {
    dpad_x: AxisLatch,
    dpad_y: AxisLatch,
    stick_x: AxisLatch,
    stick_y: AxisLatch,
    holders: HashMap<ButtonId, HashSet<DirectionSource>>,
}

impl Default for DirectionalInput {
    fn default() -> Self {
        Self {
            dpad_x: AxisLatch::horizontal(),
            dpad_y: AxisLatch::vertical(),
            stick_x: AxisLatch::horizontal(),
            stick_y: AxisLatch::vertical(),
            holders: HashMap::new(),
        }
    }
}

impl DirectionalInput {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` for axes that do not drive a direction
    pub fn axis(
        &mut self,
        axis: Axis,
        value: f32,
        threshold: f32,
    ) -> Option<Vec<(ButtonId, Phase)>> {
        let (source, latch) = match axis {
            Axis::DPadX => (DirectionSource::DPadAxis, &mut self.dpad_x),
            Axis::DPadY => (DirectionSource::DPadAxis, &mut self.dpad_y),
            Axis::LeftStickX => (DirectionSource::LeftStick, &mut self.stick_x),
            Axis::LeftStickY => (DirectionSource::LeftStick, &mut self.stick_y),
            _ => return None,
        };
        let transitions = latch.update(value, threshold);
        Some(
            transitions
                .into_iter()
                .filter_map(|(button, phase)| self.hold(source, button, phase))
                .collect(),
        )
    }

    pub fn dpad_button(&mut self, button: ButtonId, phase: Phase) -> Option<(ButtonId, Phase)> {
        self.hold(DirectionSource::DPadButton, button, phase)
    }

    fn hold(
        &mut self,
        source: DirectionSource,
        button: ButtonId,
        phase: Phase,
    ) -> Option<(ButtonId, Phase)> {
        let holders = self.holders.entry(button).or_default();
        let was_held = !holders.is_empty();
        match phase {
            Phase::Pressed => {
                holders.insert(source);
            }
            Phase::Released => {
                holders.remove(&source);
            }
        }
        let held = !holders.is_empty();
        (held != was_held).then_some((button, phase))
    }
}

/// Opens gamepads through gilrs.
#[derive(Debug, Clone, Default)]
pub struct GilrsProvider {
    settings: CollectorSettings,
}

impl GilrsProvider {
    pub fn new(settings: CollectorSettings) -> Self {
        Self { settings }
    }
}

impl DeviceProvider for GilrsProvider {
    fn open(&self) -> Result<Box<dyn InputSource>, DeviceError> {
        info!("Initializing gilrs controller interface");
        let gilrs = match Gilrs::new() {
            Ok(g) => {
                info!("Successfully initialized gilrs");
                g
            }
            Err(gilrs::Error::NotImplemented(_)) => {
                error!("gilrs has no backend for this platform");
                return Err(DeviceError::DeviceNotFound);
            }
            Err(e) => {
                error!("Failed to initialize gilrs: {}", e);
                return Err(classify_backend_error(&e));
            }
        };

        let source = GilrsSource::select(gilrs, self.settings.clone())?;
        Ok(Box::new(source))
    }
}

fn classify_backend_error(error: &gilrs::Error) -> DeviceError {
    if let gilrs::Error::Other(inner) = error {
        if let Some(io) = inner.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::PermissionDenied {
                return DeviceError::PermissionDenied(io.to_string());
            }
        }
    }
    DeviceError::Backend(error.to_string())
}

/// A gamepad opened through gilrs.
pub struct GilrsSource {
    gilrs: Gilrs,
    active_gamepad: GamepadId,
    name: String,
    settings: CollectorSettings,
    directions: DirectionalInput,
    pending: VecDeque<ControllerEvent>,
}

impl GilrsSource {
    fn select(gilrs: Gilrs, settings: CollectorSettings) -> Result<Self, DeviceError> {
        let connected: Vec<(GamepadId, String)> = gilrs
            .gamepads()
            .filter(|(_, gamepad)| gamepad.is_connected())
            .map(|(id, gamepad)| (id, gamepad.name().to_string()))
            .collect();

        if connected.is_empty() {
            warn!("No gamepad connected");
            return Err(DeviceError::DeviceNotFound);
        }

        info!("Found {} gamepads:", connected.len());
        for (idx, (id, name)) in connected.iter().enumerate() {
            info!("  [{}] ID: {}, Name: {}", idx, id, name);
        }

        let chosen = match &settings.gamepad_name {
            Some(wanted) => connected
                .iter()
                .find(|(_, name)| name.to_lowercase().contains(&wanted.to_lowercase())),
            None => connected.first(),
        };

        let Some((id, name)) = chosen.cloned() else {
            warn!(
                "No connected gamepad matches {:?}",
                settings.gamepad_name.as_deref().unwrap_or_default()
            );
            return Err(DeviceError::DeviceNotFound);
        };

        info!("Selected gamepad: {} ({})", name, id);
        Ok(Self {
            gilrs,
            active_gamepad: id,
            name,
            settings,
            directions: DirectionalInput::new(),
            pending: VecDeque::new(),
        })
    }

    fn convert_gilrs_event(&mut self, event: EventType) {
        let now = Local::now();

        match event {
            EventType::ButtonPressed(button, _) => {
                debug!("Button pressed: {:?} at {}", button, now.format("%H:%M:%S.%3f"));
                if let Some(button) = map_button(button) {
                    self.push_button(button, Phase::Pressed, now);
                }
            }
            EventType::ButtonReleased(button, _) => {
                debug!("Button released: {:?} at {}", button, now.format("%H:%M:%S.%3f"));
                if let Some(button) = map_button(button) {
                    self.push_button(button, Phase::Released, now);
                }
            }
            EventType::ButtonRepeated(button, _) => {
                debug!("Button repeat ignored: {:?}", button);
            }
            EventType::AxisChanged(axis, value, _) => {
                let threshold = self.settings.axis_threshold;
                let Some(transitions) = self.directions.axis(axis, value, threshold) else {
                    debug!("Ignoring unsupported axis: {:?}", axis);
                    return;
                };
                for (button, phase) in transitions {
                    debug!("Axis {:?} = {:.3} -> {:?} {:?}", axis, value, button, phase);
                    self.push(button, phase, now);
                }
            }
            EventType::Disconnected => {
                warn!("Controller disconnected event detected");
                self.pending
                    .push_back(ControllerEvent::Disconnected { timestamp: now });
            }
            _ => {
                debug!("Unhandled event type: {:?}", event);
            }
        }
    }

    fn push_button(&mut self, button: ButtonId, phase: Phase, timestamp: DateTime<Local>) {
        let transition = match button {
            ButtonId::Up | ButtonId::Down | ButtonId::Left | ButtonId::Right => {
                self.directions.dpad_button(button, phase)
            }
            _ => Some((button, phase)),
        };
        if let Some((button, phase)) = transition {
            self.push(button, phase, timestamp);
        }
    }

    fn push(&mut self, button: ButtonId, phase: Phase, timestamp: DateTime<Local>) {
        self.pending.push_back(ControllerEvent::Button {
            button,
            phase,
            timestamp,
        });
    }
}

impl InputSource for GilrsSource {
    fn poll_event(&mut self) -> Result<Option<ControllerEvent>, DeviceError> {
        while self.pending.is_empty() {
            let Some(Event { id, event, .. }) = self.gilrs.next_event() else {
                break;
            };

            if id != self.active_gamepad {
                debug!("Skipping event from non-active gamepad: {:?}", id);
                continue;
            }
            self.convert_gilrs_event(event);
        }

        Ok(self.pending.pop_front())
    }

    fn device_name(&self) -> String {
        self.name.clone()
    }
}

impl Drop for GilrsSource {
    fn drop(&mut self) {
        info!("Releasing gamepad {} ({})", self.name, self.active_gamepad);
    }
}

// Helper function to map gilrs Button to our ButtonId
fn map_button(button: Button) -> Option<ButtonId> {
    match button {
        Button::South => Some(ButtonId::A),
        Button::East => Some(ButtonId::B),
        Button::West => Some(ButtonId::Y),
        Button::North => Some(ButtonId::X),
        Button::Start => Some(ButtonId::Start),
        Button::Select => Some(ButtonId::Select),
        Button::LeftTrigger => Some(ButtonId::LeftShoulder),
        Button::RightTrigger => Some(ButtonId::RightShoulder),
        Button::LeftTrigger2 => Some(ButtonId::LeftTrigger),
        Button::RightTrigger2 => Some(ButtonId::RightTrigger),
        Button::DPadUp => Some(ButtonId::Up),
        Button::DPadDown => Some(ButtonId::Down),
        Button::DPadLeft => Some(ButtonId::Left),
        Button::DPadRight => Some(ButtonId::Right),
        _ => None,
    }
}
