//! Stepper motor driver (A4988 / DRV8825 style STEP + DIR + MS1..MS3).
//!
//! Two modes:
//! - `Speed(n)`: continuous rotation from a hardware square wave on STEP.
//! - `Steps { .. }`: counted pulses, either blocking or paced by the event
//!   poller (one step per poll at most, never faster than
//!   `min_interval_ms`).

use embedded_hal::digital::PinState;
use log::{debug, warn};

use super::{Capability, DriverContext};
use crate::app::ports::HalPort;
use crate::error::DriverError;
use crate::registry::ProfileId;
use crate::rpc::messages::{PinMode, Response, StepAction, StepMotorConfig};

/// STEP frequency per unit of `Speed`.
const HZ_PER_SPEED_UNIT: u32 = 10;

/// STEP high time.
const PULSE_WIDTH_US: u32 = 2;

/// Time a blocking move of `count` pulses spends in the driver.
fn blocking_move_us(count: u32, min_interval_ms: u16) -> u64 {
    let count = u64::from(count);
    count * u64::from(PULSE_WIDTH_US) + count.saturating_sub(1) * u64::from(min_interval_ms) * 1000
}

pub struct StepMotorDriver {
    profile_id: ProfileId,
    config: StepMotorConfig,
    /// Steps left in a non-blocking move.
    remaining: u32,
    interval_ms: u64,
    next_step_ms: u64,
}

impl StepMotorDriver {
    fn pins(&self) -> impl Iterator<Item = u8> {
        [self.config.step_pin, self.config.dir_pin]
            .into_iter()
            .chain(self.config.ms_pins)
    }

    fn set_direction(&self, hal: &mut dyn HalPort, forward: bool) {
        hal.digital_write(self.config.dir_pin, PinState::from(forward));
    }

    fn pulse(&self, hal: &mut dyn HalPort) {
        hal.digital_write(self.config.step_pin, PinState::High);
        hal.delay_us(PULSE_WIDTH_US);
        hal.digital_write(self.config.step_pin, PinState::Low);
    }

    fn stop(&mut self, hal: &mut dyn HalPort) {
        self.remaining = 0;
        hal.step_pwm(self.config.step_pin, 0);
    }
}

impl Capability for StepMotorDriver {
    type Config = StepMotorConfig;
    type Params = StepAction;

    fn init(
        profile_id: ProfileId,
        config: &StepMotorConfig,
        hal: &mut dyn HalPort,
    ) -> Result<Self, DriverError> {
        let mut pins: heapless::Vec<u8, 5> = heapless::Vec::new();
        for pin in [config.step_pin, config.dir_pin]
            .into_iter()
            .chain(config.ms_pins)
        {
            if pins.contains(&pin) {
                return Err(DriverError::InvalidConfig("stepper pins must be distinct"));
            }
            // Capacity matches the five pins iterated.
            let _ = pins.push(pin);
        }

        for (configured, pin) in pins.iter().enumerate() {
            if let Err(e) = hal.pin_mode(*pin, PinMode::Output) {
                for earlier in &pins[..configured] {
                    let _ = hal.pin_mode(*earlier, PinMode::Input);
                }
                return Err(e.into());
            }
        }
        for (pin, high) in config.ms_pins.iter().zip(config.microstep.select_lines()) {
            hal.digital_write(*pin, PinState::from(high));
        }
        hal.digital_write(config.step_pin, PinState::Low);
        hal.digital_write(config.dir_pin, PinState::Low);

        debug!(
            "Stepper[{}]: step {} dir {} {:?}",
            profile_id, config.step_pin, config.dir_pin, config.microstep
        );
        Ok(Self {
            profile_id,
            config: *config,
            remaining: 0,
            interval_ms: 0,
            next_step_ms: 0,
        })
    }

    fn action(&mut self, params: &StepAction, ctx: &mut DriverContext<'_>) -> Response {
        self.stop(ctx.hal);
        match *params {
            StepAction::Speed(0) => ctx.done(),
            StepAction::Speed(speed) => {
                self.set_direction(ctx.hal, speed > 0);
                let hz = u32::from(speed.unsigned_abs()) * HZ_PER_SPEED_UNIT;
                ctx.hal.step_pwm(self.config.step_pin, hz);
                ctx.done()
            }
            StepAction::Steps {
                steps,
                min_interval_ms,
                wait,
            } => {
                let count = steps.unsigned_abs();
                if count == 0 {
                    return ctx.empty_data();
                }
                self.set_direction(ctx.hal, steps > 0);

                if wait {
                    let limit_us = u64::from(ctx.settings().step_wait_limit_ms) * 1000;
                    if blocking_move_us(count, min_interval_ms) > limit_us {
                        warn!(
                            "Stepper[{}]: {} steps every {} ms exceed the blocking limit",
                            self.profile_id, count, min_interval_ms
                        );
                        return ctx.fail(DriverError::InvalidConfig(
                            "blocking move too long, send it with wait = false",
                        ));
                    }
                    for step in 0..count {
                        self.pulse(ctx.hal);
                        if step + 1 < count {
                            ctx.hal.delay_ms(u32::from(min_interval_ms));
                        }
                    }
                    return ctx.empty_data();
                }

                self.remaining = count;
                self.interval_ms = u64::from(min_interval_ms);
                self.next_step_ms = ctx.hal.millis();
                debug!(
                    "Stepper[{}]: {} steps queued every {} ms",
                    self.profile_id, count, min_interval_ms
                );
                ctx.arm_event();
                ctx.ack()
            }
        }
    }

    fn poll_event(&mut self, ctx: &mut DriverContext<'_>) -> Option<Response> {
        if self.remaining == 0 {
            return None;
        }
        let now = ctx.hal.millis();
        if now < self.next_step_ms {
            return None;
        }
        self.pulse(ctx.hal);
        self.next_step_ms = now.saturating_add(self.interval_ms);
        self.remaining -= 1;
        (self.remaining == 0).then(|| ctx.empty_data())
    }

    fn release(&mut self, hal: &mut dyn HalPort) {
        self.stop(hal);
        for pin in self.pins() {
            let _ = hal.pin_mode(pin, PinMode::Input);
        }
    }
}
