//! Generic digital pin driver.
//!
//! Supports direct writes, immediate reads, and an event-triggered read
//! that completes once the pin reaches a requested level.  Samples go on
//! the wire as `level + 1` so a LOW reading is never a zero byte.

use embedded_hal::digital::PinState;
use log::debug;

use super::{Capability, DriverContext};
use crate::app::ports::HalPort;
use crate::error::DriverError;
use crate::registry::ProfileId;
use crate::rpc::messages::{DigitalAction, DigitalConfig, Level, PinMode, Response};

pub struct DigitalDriver {
    pin: u8,
    mode: PinMode,
    /// Level awaited by an armed `ReadOnLevel`.
    trigger: Option<Level>,
}

impl DigitalDriver {
    fn sample(&self, hal: &mut dyn HalPort) -> Level {
        Level::from(hal.digital_read(self.pin))
    }
}

impl Capability for DigitalDriver {
    type Config = DigitalConfig;
    type Params = DigitalAction;

    fn init(
        profile_id: ProfileId,
        config: &DigitalConfig,
        hal: &mut dyn HalPort,
    ) -> Result<Self, DriverError> {
        hal.pin_mode(config.pin, config.mode)?;
        debug!(
            "Digital[{}]: pin {} as {:?}",
            profile_id, config.pin, config.mode
        );
        Ok(Self {
            pin: config.pin,
            mode: config.mode,
            trigger: None,
        })
    }

    fn action(&mut self, params: &DigitalAction, ctx: &mut DriverContext<'_>) -> Response {
        self.trigger = None;
        match *params {
            DigitalAction::Write(level) => {
                if self.mode != PinMode::Output {
                    return ctx.fail(DriverError::ModeMismatch("write needs an OUTPUT pin"));
                }
                ctx.hal.digital_write(self.pin, PinState::from(level));
                ctx.done()
            }
            DigitalAction::Read => {
                let level = self.sample(ctx.hal);
                ctx.data(&[level.sample_byte()])
            }
            DigitalAction::ReadOnLevel(level) => {
                if self.mode == PinMode::Output {
                    return ctx.fail(DriverError::ModeMismatch("event read needs an INPUT pin"));
                }
                self.trigger = Some(level);
                ctx.arm_event();
                ctx.ack()
            }
        }
    }

    fn poll_event(&mut self, ctx: &mut DriverContext<'_>) -> Option<Response> {
        let wanted = self.trigger?;
        let level = self.sample(ctx.hal);
        if level != wanted {
            return None;
        }
        self.trigger = None;
        Some(ctx.data(&[level.sample_byte()]))
    }

    fn release(&mut self, hal: &mut dyn HalPort) {
        self.trigger = None;
        // Back to high impedance; a pin that was accepted at init cannot fail here.
        let _ = hal.pin_mode(self.pin, PinMode::Input);
    }
}
