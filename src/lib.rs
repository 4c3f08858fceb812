//! Peripheral profile controller firmware library.
//!
//! A gateway registers *profiles* (a driver bound to a piece of hardware)
//! and then drives them by numeric id over a framed serial protocol.
//! Exposes the pure-logic modules for integration testing; all ESP-IDF
//! specific code is guarded by `#[cfg(target_os = "espidf")]` within each
//! module.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod config;
pub mod drivers;
pub mod error;
pub mod registry;
pub mod rpc;
pub mod scheduler;

pub use config::ControllerConfig;
pub use error::Error;
pub use registry::{ProfileId, ProfileRegistry};
pub use scheduler::{Controller, TickOutcome};
