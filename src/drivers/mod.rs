//! Peripheral drivers and the capability contract they share.
//!
//! ```text
//!   ProfileRegistry ──▶ Driver (enum) ──▶ Capability impl ──▶ &mut dyn HalPort
//! ```
//!
//! Each driver is a plain struct implementing [`Capability`].  The
//! [`Driver`] enum owns one of them per occupied profile slot and forwards
//! every call with a single `match`.

pub mod color_sensor;
pub mod digital;
pub mod mcu;
pub mod step_motor;
pub mod uart_ttl;
pub mod ultrasonic;

use core::fmt;

use crate::app::ports::{HalError, HalPort};
use crate::config::ControllerConfig;
use crate::error::{DriverError, Error};
use crate::registry::ProfileId;
use crate::rpc::messages::{ActionParams, DriverConfig, DriverKind, Response, UartPort};

pub use color_sensor::ColorSensorDriver;
pub use digital::DigitalDriver;
pub use mcu::McuDriver;
pub use step_motor::StepMotorDriver;
pub use uart_ttl::UartTtlDriver;
pub use ultrasonic::UltrasonicDriver;

// ───────────────────────────────────────────────────────────────
// Capability contract
// ───────────────────────────────────────────────────────────────

/// What every concrete driver can do.
pub trait Capability: Sized {
    type Config;
    type Params;

    /// Validate `config` and acquire the hardware.  Callable again after
    /// [`release`](Capability::release).
    fn init(
        profile_id: ProfileId,
        config: &Self::Config,
        hal: &mut dyn HalPort,
    ) -> Result<Self, DriverError>;

    /// Execute one action and produce exactly one response.  Event-driven
    /// actions call [`DriverContext::arm_event`] and return ACK.
    fn action(&mut self, params: &Self::Params, ctx: &mut DriverContext<'_>) -> Response;

    /// Non-blocking check for a deferred result.
    fn poll_event(&mut self, _ctx: &mut DriverContext<'_>) -> Option<Response> {
        None
    }

    /// Return the hardware to an idle state.
    fn release(&mut self, _hal: &mut dyn HalPort) {}
}

/// Firmware settings drivers need at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverSettings {
    /// Upper bound on a blocking UART reply.
    pub uart_read_timeout_ms: u32,
    /// Upper bound on a blocking stepper move.
    pub step_wait_limit_ms: u32,
    /// Reported by the MCU driver's version query.
    pub firmware_version: heapless::String<16>,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self::from(&ControllerConfig::default())
    }
}

impl From<&ControllerConfig> for DriverSettings {
    fn from(cfg: &ControllerConfig) -> Self {
        Self {
            uart_read_timeout_ms: cfg.uart_read_timeout_ms,
            step_wait_limit_ms: cfg.step_wait_limit_ms,
            firmware_version: cfg.firmware_version.clone(),
        }
    }
}

/// Handed to [`Capability::action`] and [`Capability::poll_event`].
pub struct DriverContext<'a> {
    pub hal: &'a mut dyn HalPort,
    settings: &'a DriverSettings,
    profile_id: ProfileId,
    arm: bool,
}

impl<'a> DriverContext<'a> {
    pub fn new(profile_id: ProfileId, hal: &'a mut dyn HalPort, settings: &'a DriverSettings) -> Self {
        Self {
            hal,
            settings,
            profile_id,
            arm: false,
        }
    }

    pub fn profile_id(&self) -> ProfileId {
        self.profile_id
    }

    pub fn settings(&self) -> &DriverSettings {
        self.settings
    }

    /// Ask the scheduler to start polling this profile.
    pub fn arm_event(&mut self) {
        self.arm = true;
    }

    pub fn arm_requested(&self) -> bool {
        self.arm
    }

    pub fn ack(&self) -> Response {
        Response::ack(self.profile_id)
    }

    pub fn done(&self) -> Response {
        Response::done(self.profile_id)
    }

    pub fn data(&self, bytes: &[u8]) -> Response {
        Response::data(self.profile_id, bytes)
    }

    pub fn empty_data(&self) -> Response {
        Response::empty_data(self.profile_id)
    }

    pub fn fail(&self, err: DriverError) -> Response {
        Response::error(Some(self.profile_id), &Error::from(err))
    }
}

// ───────────────────────────────────────────────────────────────
// Hardware claims
// ───────────────────────────────────────────────────────────────

/// GPIOs behind UART2 (TX, RX).
pub const UART2_PINS: [u8; 2] = [17, 16];

/// GPIOs of the colour sensor's I²C bus (SDA, SCL).
pub const COLOR_BUS_PINS: [u8; 2] = [21, 22];

/// A piece of hardware at most one profile may own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Pin(u8),
    Uart(UartPort),
    /// The I²C address of the RGB sensor.
    ColorBus,
    /// The single PWM channel that drives a STEP line.
    StepPwm,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pin(pin) => write!(f, "pin {pin}"),
            Self::Uart(port) => write!(f, "{port:?}"),
            Self::ColorBus => write!(f, "color sensor bus"),
            Self::StepPwm => write!(f, "step pwm channel"),
        }
    }
}

/// Claims of one configuration.  The stepper is the widest: five pins and
/// the PWM channel.
pub type Resources = heapless::Vec<Resource, 6>;

impl DriverConfig {
    /// Hardware this configuration takes exclusive ownership of, including
    /// the pins wired to a bus or port.
    pub fn resources(&self) -> Resources {
        match self {
            Self::DigitalGeneric(c) => pins(&[c.pin]).collect(),
            Self::UartTtlGeneric(c) => {
                let wired: &[u8] = match c.port {
                    UartPort::Uart2 => &UART2_PINS,
                    UartPort::Uart3 => &[],
                };
                core::iter::once(Resource::Uart(c.port)).chain(pins(wired)).collect()
            }
            Self::ColorSensor(_) => core::iter::once(Resource::ColorBus)
                .chain(pins(&COLOR_BUS_PINS))
                .collect(),
            Self::UltrasonicSensor(c) => pins(&[c.pin]).collect(),
            Self::StepMotor(c) => pins(&[c.step_pin, c.dir_pin])
                .chain(pins(&c.ms_pins))
                .chain(core::iter::once(Resource::StepPwm))
                .collect(),
            Self::McuDriver => Resources::new(),
        }
    }
}

fn pins(pins: &[u8]) -> impl Iterator<Item = Resource> + '_ {
    pins.iter().map(|&pin| Resource::Pin(pin))
}

impl From<HalError> for DriverError {
    fn from(e: HalError) -> Self {
        match e {
            HalError::UnsupportedPin(_) => Self::InvalidConfig("pin not available on this board"),
            HalError::PortUnavailable | HalError::NoDevice => Self::HardwareUnavailable,
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Driver sum type
// ───────────────────────────────────────────────────────────────

/// Live state of one registered profile.
pub enum Driver {
    DigitalGeneric(DigitalDriver),
    UartTtlGeneric(UartTtlDriver),
    ColorSensor(ColorSensorDriver),
    UltrasonicSensor(UltrasonicDriver),
    StepMotor(StepMotorDriver),
    McuDriver(McuDriver),
}

impl Driver {
    pub fn init(
        profile_id: ProfileId,
        config: &DriverConfig,
        hal: &mut dyn HalPort,
    ) -> Result<Self, DriverError> {
        Ok(match config {
            DriverConfig::DigitalGeneric(c) => {
                Self::DigitalGeneric(DigitalDriver::init(profile_id, c, hal)?)
            }
            DriverConfig::UartTtlGeneric(c) => {
                Self::UartTtlGeneric(UartTtlDriver::init(profile_id, c, hal)?)
            }
            DriverConfig::ColorSensor(c) => {
                Self::ColorSensor(ColorSensorDriver::init(profile_id, c, hal)?)
            }
            DriverConfig::UltrasonicSensor(c) => {
                Self::UltrasonicSensor(UltrasonicDriver::init(profile_id, c, hal)?)
            }
            DriverConfig::StepMotor(c) => {
                Self::StepMotor(StepMotorDriver::init(profile_id, c, hal)?)
            }
            DriverConfig::McuDriver => Self::McuDriver(McuDriver::init(profile_id, &(), hal)?),
        })
    }

    pub fn kind(&self) -> DriverKind {
        match self {
            Self::DigitalGeneric(_) => DriverKind::DigitalGeneric,
            Self::UartTtlGeneric(_) => DriverKind::UartTtlGeneric,
            Self::ColorSensor(_) => DriverKind::ColorSensor,
            Self::UltrasonicSensor(_) => DriverKind::UltrasonicSensor,
            Self::StepMotor(_) => DriverKind::StepMotor,
            Self::McuDriver(_) => DriverKind::McuDriver,
        }
    }

    pub fn action(&mut self, params: &ActionParams, ctx: &mut DriverContext<'_>) -> Response {
        match (self, params) {
            (Self::DigitalGeneric(d), ActionParams::DigitalGeneric(p)) => d.action(p, ctx),
            (Self::UartTtlGeneric(d), ActionParams::UartTtlGeneric(p)) => d.action(p, ctx),
            (Self::ColorSensor(d), ActionParams::ColorSensor) => d.action(&(), ctx),
            (Self::UltrasonicSensor(d), ActionParams::UltrasonicSensor) => d.action(&(), ctx),
            (Self::StepMotor(d), ActionParams::StepMotor(p)) => d.action(p, ctx),
            (Self::McuDriver(d), ActionParams::McuDriver(p)) => d.action(p, ctx),
            (driver, params) => Response::error(
                Some(ctx.profile_id()),
                &Error::ActionDriverMismatch {
                    registered: Some(driver.kind()),
                    requested: params.kind(),
                },
            ),
        }
    }

    pub fn poll_event(&mut self, ctx: &mut DriverContext<'_>) -> Option<Response> {
        match self {
            Self::DigitalGeneric(d) => d.poll_event(ctx),
            Self::UartTtlGeneric(d) => d.poll_event(ctx),
            Self::ColorSensor(d) => d.poll_event(ctx),
            Self::UltrasonicSensor(d) => d.poll_event(ctx),
            Self::StepMotor(d) => d.poll_event(ctx),
            Self::McuDriver(d) => d.poll_event(ctx),
        }
    }

    pub fn release(&mut self, hal: &mut dyn HalPort) {
        match self {
            Self::DigitalGeneric(d) => d.release(hal),
            Self::UartTtlGeneric(d) => d.release(hal),
            Self::ColorSensor(d) => d.release(hal),
            Self::UltrasonicSensor(d) => d.release(hal),
            Self::StepMotor(d) => d.release(hal),
            Self::McuDriver(d) => d.release(hal),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Test support
// ───────────────────────────────────────────────────────────────
