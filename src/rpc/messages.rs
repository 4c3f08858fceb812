//! Line-protocol message schema.
//!
//! Every type here is serialized with `postcard` and carried inside one
//! length-prefixed frame (see [`codec`](super::codec)).  The enums are the
//! schema's `oneof`s: the variant *is* the tag, so a Registration's driver
//! kind can never disagree with its configuration.
//!
//! ```text
//! Request ─┬─ Action       { profile_id, params: ActionParams }
//!          └─ Registration { profile_id, config: DriverConfig? }
//!
//! Response { code, profile_id?, payload? }
//! ```

use core::fmt;

use embedded_hal::digital::PinState;
use serde::de::{self, EnumAccess, VariantAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::Error;
use crate::registry::ProfileId;

/// Maximum bytes carried in a response payload.
pub const PAYLOAD_CAPACITY: usize = 96;

/// Maximum length of a UART passthrough command (G-code line).
pub const UART_COMMAND_CAPACITY: usize = 40;

/// Optional byte payload attached to a [`Response`].
pub type Payload = heapless::Vec<u8, PAYLOAD_CAPACITY>;

// ───────────────────────────────────────────────────────────────
// Requests
// ───────────────────────────────────────────────────────────────

/// Top-level message sent by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Gateway-chosen message id (echoed in logs only).
    pub id: u32,
    /// Exactly one of Action or Registration.  `None` is an invalid shape.
    pub payload: Option<RequestPayload>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestPayload {
    Action(Action),
    Registration(Registration),
}

/// An operation against an already-registered profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub profile_id: u32,
    pub params: ActionParams,
}

/// Binds a driver configuration to a profile id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub profile_id: u32,
    /// `None` when the gateway selected no driver, or one this firmware
    /// does not implement.
    #[serde(deserialize_with = "known_driver")]
    pub config: Option<DriverConfig>,
}

impl Registration {
    pub fn new(profile_id: ProfileId, config: DriverConfig) -> Self {
        Self {
            profile_id: profile_id.into(),
            config: Some(config),
        }
    }

    /// Driver kind selected by the configuration, if any.
    pub fn driver_kind(&self) -> Option<DriverKind> {
        self.config.as_ref().map(DriverConfig::kind)
    }
}

/// Variant names of [`DriverConfig`], in wire tag order.
const DRIVER_TAGS: &[&str] = &[
    "DigitalGeneric",
    "UartTtlGeneric",
    "ColorSensor",
    "UltrasonicSensor",
    "StepMotor",
    "McuDriver",
];

/// Decode an optional [`DriverConfig`], mapping a tag past the last known
/// driver to `None` instead of failing the whole request.  The settings
/// that follow an unknown tag are left unread; they are always the tail of
/// the message.
fn known_driver<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<DriverConfig>, D::Error> {
    struct SelectionVisitor;

    impl<'de> Visitor<'de> for SelectionVisitor {
        type Value = Option<DriverConfig>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("an optional driver configuration")
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_some<D: Deserializer<'de>>(self, inner: D) -> Result<Self::Value, D::Error> {
            inner.deserialize_enum("DriverConfig", DRIVER_TAGS, TagVisitor)
        }
    }

    struct TagVisitor;

    impl<'de> Visitor<'de> for TagVisitor {
        type Value = Option<DriverConfig>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a driver configuration")
        }

        fn visit_enum<A: EnumAccess<'de>>(self, data: A) -> Result<Self::Value, A::Error> {
            let (tag, variant) = data.variant::<u32>()?;
            let config = match tag {
                0 => DriverConfig::DigitalGeneric(variant.newtype_variant()?),
                1 => DriverConfig::UartTtlGeneric(variant.newtype_variant()?),
                2 => DriverConfig::ColorSensor(variant.newtype_variant()?),
                3 => DriverConfig::UltrasonicSensor(variant.newtype_variant()?),
                4 => DriverConfig::StepMotor(variant.newtype_variant()?),
                5 => {
                    variant.unit_variant()?;
                    DriverConfig::McuDriver
                }
                _ => {
                    variant.unit_variant()?;
                    return Ok(None);
                }
            };
            Ok(Some(config))
        }
    }

    deserializer.deserialize_option(SelectionVisitor)
}

// ───────────────────────────────────────────────────────────────
// Driver kinds
// ───────────────────────────────────────────────────────────────

/// Discriminant shared by [`DriverConfig`] and [`ActionParams`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverKind {
    DigitalGeneric,
    UartTtlGeneric,
    ColorSensor,
    UltrasonicSensor,
    StepMotor,
    McuDriver,
}

impl DriverKind {
    pub const fn name(self) -> &'static str {
        match self {
            Self::DigitalGeneric => "digital_generic",
            Self::UartTtlGeneric => "uart_ttl_generic",
            Self::ColorSensor => "color_sensor",
            Self::UltrasonicSensor => "ultrasonic_sensor",
            Self::StepMotor => "step_motor",
            Self::McuDriver => "mcu_driver",
        }
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ───────────────────────────────────────────────────────────────
// Driver configurations (registration side)
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriverConfig {
    DigitalGeneric(DigitalConfig),
    UartTtlGeneric(UartConfig),
    ColorSensor(ColorConfig),
    UltrasonicSensor(UltrasonicConfig),
    StepMotor(StepMotorConfig),
    McuDriver,
}

impl DriverConfig {
    pub fn kind(&self) -> DriverKind {
        match self {
            Self::DigitalGeneric(_) => DriverKind::DigitalGeneric,
            Self::UartTtlGeneric(_) => DriverKind::UartTtlGeneric,
            Self::ColorSensor(_) => DriverKind::ColorSensor,
            Self::UltrasonicSensor(_) => DriverKind::UltrasonicSensor,
            Self::StepMotor(_) => DriverKind::StepMotor,
            Self::McuDriver => DriverKind::McuDriver,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PinMode {
    Input,
    Output,
    InputPullup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Level {
    Low,
    High,
}

impl Level {
    /// Zero-free sample byte used on the wire: 1 = LOW, 2 = HIGH.
    pub const fn sample_byte(self) -> u8 {
        match self {
            Self::Low => 1,
            Self::High => 2,
        }
    }
}

impl From<Level> for PinState {
    fn from(level: Level) -> Self {
        match level {
            Level::Low => PinState::Low,
            Level::High => PinState::High,
        }
    }
}

impl From<PinState> for Level {
    fn from(state: PinState) -> Self {
        match state {
            PinState::Low => Level::Low,
            PinState::High => Level::High,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigitalConfig {
    pub pin: u8,
    pub mode: PinMode,
}

/// Auxiliary hardware UARTs available for passthrough.  UART0 is the
/// gateway link and UART1 is reserved, so neither can be registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UartPort {
    Uart2,
    Uart3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UartConfig {
    pub port: UartPort,
    pub baudrate: u32,
}

/// TCS34725-style RGB sensor settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorConfig {
    /// Integration time in milliseconds (2..=700).
    pub integration_time_ms: u16,
    /// Analog gain: 1, 4, 16 or 60.
    pub gain: u8,
}

impl Default for ColorConfig {
    fn default() -> Self {
        Self {
            integration_time_ms: 700,
            gain: 16,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UltrasonicConfig {
    /// Single trigger/echo pin (Grove-style ranger).
    pub pin: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Microstep {
    Full,
    Half,
    Quarter,
    Eighth,
    Sixteenth,
}

impl Microstep {
    /// MS1..MS3 levels for an A4988-style driver.
    pub const fn select_lines(self) -> [bool; 3] {
        match self {
            Self::Full => [false, false, false],
            Self::Half => [true, false, false],
            Self::Quarter => [false, true, false],
            Self::Eighth => [true, true, false],
            Self::Sixteenth => [true, true, true],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepMotorConfig {
    pub step_pin: u8,
    pub dir_pin: u8,
    pub ms_pins: [u8; 3],
    pub microstep: Microstep,
}

// ───────────────────────────────────────────────────────────────
// Action parameters
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionParams {
    DigitalGeneric(DigitalAction),
    UartTtlGeneric(UartAction),
    ColorSensor,
    UltrasonicSensor,
    StepMotor(StepAction),
    McuDriver(McuAction),
}

impl ActionParams {
    pub fn kind(&self) -> DriverKind {
        match self {
            Self::DigitalGeneric(_) => DriverKind::DigitalGeneric,
            Self::UartTtlGeneric(_) => DriverKind::UartTtlGeneric,
            Self::ColorSensor => DriverKind::ColorSensor,
            Self::UltrasonicSensor => DriverKind::UltrasonicSensor,
            Self::StepMotor(_) => DriverKind::StepMotor,
            Self::McuDriver(_) => DriverKind::McuDriver,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DigitalAction {
    /// Drive the pin (requires OUTPUT mode).
    Write(Level),
    /// Blocking read of the current level.
    Read,
    /// Event-triggered read: reply once the pin reaches `Level`.
    ReadOnLevel(Level),
}

/// How the UART driver collects the peripheral's reply line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UartReply {
    /// Fire and forget.
    Ignore,
    /// Spin until a full line arrives (bounded by the read timeout).
    Blocking,
    /// Return ACK now; the line is delivered by the event poller.
    Event,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UartAction {
    pub command: heapless::String<UART_COMMAND_CAPACITY>,
    pub reply: UartReply,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepAction {
    /// Continuous rotation; sign is direction, magnitude is speed, 0 stops.
    Speed(i8),
    /// Move a fixed number of steps with at least `min_interval_ms` between
    /// pulses.  `wait = false` returns ACK and reports completion as an event.
    Steps {
        steps: i32,
        min_interval_ms: u16,
        wait: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum McuAction {
    Version,
    FreeMemory,
}

// ───────────────────────────────────────────────────────────────
// Responses
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ResponseCode {
    Ack = 0,
    Error = 1,
    Done = 2,
    Data = 3,
    Debug = 4,
}

/// Message sent back to the gateway.
///
/// `profile_id == None` is the out-of-band "no profile" marker used for
/// errors that cannot be attributed to a valid profile id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub code: ResponseCode,
    pub profile_id: Option<u32>,
    pub payload: Option<Payload>,
}

impl Response {
    pub fn ack(profile_id: ProfileId) -> Self {
        Self::bare(ResponseCode::Ack, Some(profile_id))
    }

    pub fn done(profile_id: ProfileId) -> Self {
        Self::bare(ResponseCode::Done, Some(profile_id))
    }

    /// DATA response.  Bytes beyond [`PAYLOAD_CAPACITY`] are dropped.
    pub fn data(profile_id: ProfileId, bytes: &[u8]) -> Self {
        Self {
            code: ResponseCode::Data,
            profile_id: Some(profile_id.into()),
            payload: Some(truncated(bytes)),
        }
    }

    /// DATA response without payload (completion notice).
    pub fn empty_data(profile_id: ProfileId) -> Self {
        Self::bare(ResponseCode::Data, Some(profile_id))
    }

    pub fn error(profile_id: Option<ProfileId>, err: &Error) -> Self {
        Self {
            code: ResponseCode::Error,
            profile_id: profile_id.map(u32::from),
            payload: Some(formatted(format_args!("{err}"))),
        }
    }

    pub fn debug(msg: fmt::Arguments<'_>) -> Self {
        Self {
            code: ResponseCode::Debug,
            profile_id: None,
            payload: Some(formatted(msg)),
        }
    }

    /// Payload bytes, or an empty slice when absent.
    pub fn payload_bytes(&self) -> &[u8] {
        self.payload.as_deref().unwrap_or(&[])
    }

    fn bare(code: ResponseCode, profile_id: Option<ProfileId>) -> Self {
        Self {
            code,
            profile_id: profile_id.map(u32::from),
            payload: None,
        }
    }
}

fn truncated(bytes: &[u8]) -> Payload {
    let len = bytes.len().min(PAYLOAD_CAPACITY);
    let mut payload = Payload::new();
    // Cannot fail: `len` is bounded by the capacity.
    let _ = payload.extend_from_slice(&bytes[..len]);
    payload
}

fn formatted(args: fmt::Arguments<'_>) -> Payload {
    let mut text = heapless::String::<PAYLOAD_CAPACITY>::new();
    // Overlong diagnostics are cut off rather than dropped.
    let _ = fmt::Write::write_fmt(&mut text, args);
    truncated(text.as_bytes())
}
