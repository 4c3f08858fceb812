//! Single-pin ultrasonic ranger (Grove style: trigger and echo share a pin).

use embedded_hal::digital::PinState;
use log::debug;

use super::{Capability, DriverContext};
use crate::app::ports::HalPort;
use crate::error::DriverError;
use crate::registry::ProfileId;
use crate::rpc::messages::{PinMode, Response, UltrasonicConfig};

/// Echo wait, about 5 m of round trip.
const ECHO_TIMEOUT_US: u32 = 30_000;

/// Round-trip microseconds per centimetre, halved for the one-way distance.
fn distance_cm(echo_us: u32) -> u16 {
    (echo_us / 29 / 2).min(u32::from(u16::MAX)) as u16
}

pub struct UltrasonicDriver {
    pin: u8,
}

impl Capability for UltrasonicDriver {
    type Config = UltrasonicConfig;
    type Params = ();

    fn init(
        profile_id: ProfileId,
        config: &UltrasonicConfig,
        hal: &mut dyn HalPort,
    ) -> Result<Self, DriverError> {
        hal.pin_mode(config.pin, PinMode::Input)?;
        debug!("Ultrasonic[{}]: pin {}", profile_id, config.pin);
        Ok(Self { pin: config.pin })
    }

    fn action(&mut self, _params: &(), ctx: &mut DriverContext<'_>) -> Response {
        let hal = &mut *ctx.hal;
        if hal.pin_mode(self.pin, PinMode::Output).is_err() {
            return ctx.fail(DriverError::HardwareUnavailable);
        }
        hal.digital_write(self.pin, PinState::Low);
        hal.delay_us(2);
        hal.digital_write(self.pin, PinState::High);
        hal.delay_us(5);
        hal.digital_write(self.pin, PinState::Low);
        if hal.pin_mode(self.pin, PinMode::Input).is_err() {
            return ctx.fail(DriverError::HardwareUnavailable);
        }

        match hal.pulse_in(self.pin, PinState::High, ECHO_TIMEOUT_US) {
            Some(echo_us) => ctx.data(&distance_cm(echo_us).to_be_bytes()),
            None => ctx.fail(DriverError::TimedOut),
        }
    }

    fn release(&mut self, hal: &mut dyn HalPort) {
        let _ = hal.pin_mode(self.pin, PinMode::Input);
    }
}
