//! Introspection of the controller itself: firmware version and free heap.

use super::{Capability, DriverContext};
use crate::app::ports::HalPort;
use crate::error::DriverError;
use crate::registry::ProfileId;
use crate::rpc::messages::{McuAction, Response};

/// Free-memory byte count as three 7-bit groups, least significant first,
/// each with the MSB set so no byte is ever zero.  Saturates at 2²¹ − 1.
pub fn encode_free_memory(bytes: u32) -> [u8; 3] {
    let value = bytes.min((1 << 21) - 1);
    [
        (value & 0x7F) as u8 | 0x80,
        ((value >> 7) & 0x7F) as u8 | 0x80,
        ((value >> 14) & 0x7F) as u8 | 0x80,
    ]
}

pub struct McuDriver;

impl Capability for McuDriver {
    type Config = ();
    type Params = McuAction;

    fn init(_profile_id: ProfileId, _config: &(), _hal: &mut dyn HalPort) -> Result<Self, DriverError> {
        Ok(Self)
    }

    fn action(&mut self, params: &McuAction, ctx: &mut DriverContext<'_>) -> Response {
        match params {
            McuAction::Version => ctx.data(ctx.settings().firmware_version.as_bytes()),
            McuAction::FreeMemory => ctx.data(&encode_free_memory(ctx.hal.free_memory())),
        }
    }
}
