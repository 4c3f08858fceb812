//! RGB color sensor driver (TCS34725 on the shared I²C bus).

use log::{debug, warn};

use super::{Capability, DriverContext};
use crate::app::ports::HalPort;
use crate::error::DriverError;
use crate::registry::ProfileId;
use crate::rpc::messages::{ColorConfig, Response};

const GAINS: [u8; 4] = [1, 4, 16, 60];
const INTEGRATION_MS: core::ops::RangeInclusive<u16> = 2..=700;

pub struct ColorSensorDriver {
    profile_id: ProfileId,
}

/// Scale a raw 16-bit channel to a zero-free byte.
fn channel_byte(raw: u16) -> u8 {
    (raw / 256).clamp(1, 255) as u8
}

impl Capability for ColorSensorDriver {
    type Config = ColorConfig;
    type Params = ();

    fn init(
        profile_id: ProfileId,
        config: &ColorConfig,
        hal: &mut dyn HalPort,
    ) -> Result<Self, DriverError> {
        if !GAINS.contains(&config.gain) {
            return Err(DriverError::InvalidConfig("gain must be 1, 4, 16 or 60"));
        }
        if !INTEGRATION_MS.contains(&config.integration_time_ms) {
            return Err(DriverError::InvalidConfig(
                "integration time must be 2-700 ms",
            ));
        }
        hal.color_sensor_begin(config.integration_time_ms, config.gain)?;
        debug!(
            "Color[{}]: {} ms, {}x gain",
            profile_id, config.integration_time_ms, config.gain
        );
        Ok(Self { profile_id })
    }

    fn action(&mut self, _params: &(), ctx: &mut DriverContext<'_>) -> Response {
        match ctx.hal.color_sensor_read() {
            Ok([r, g, b]) => ctx.data(&[channel_byte(r), channel_byte(g), channel_byte(b)]),
            Err(e) => {
                warn!("Color[{}]: read failed: {}", self.profile_id, e);
                ctx.fail(DriverError::HardwareUnavailable)
            }
        }
    }
}
