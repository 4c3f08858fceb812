//! Boundary between the controller core and the board.
//!
//! All interaction with hardware and flash happens through the **port
//! traits** defined in [`ports`], keeping the registry, drivers and
//! dispatcher fully testable without real peripherals.

pub mod ports;
