//! Controller configuration parameters
//!
//! All tunable parameters of the controller.  Built-in defaults match the
//! gateway's expectations; a board may override them at startup.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::app::ports::{StorageError, StoragePort};

/// NVS namespace and key of the persisted controller configuration.
pub const CONFIG_NAMESPACE: &str = "ctrl";
pub const CONFIG_KEY: &str = "config";

/// Upper bound of the encoded configuration blob.
const MAX_CONFIG_SIZE: usize = 64;

/// Core controller configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    // --- Link ---
    /// Gateway serial link speed
    pub baud_rate: u32,

    // --- Timing ---
    /// Pause between scheduler ticks (milliseconds)
    pub tick_interval_ms: u32,
    /// Upper bound on a blocking UART passthrough reply (milliseconds)
    pub uart_read_timeout_ms: u32,
    /// Longest blocking stepper move accepted (milliseconds)
    pub step_wait_limit_ms: u32,

    // --- Boot ---
    /// Replay persisted registrations before serving the gateway
    pub restore_on_boot: bool,
    /// Reported by the MCU driver and the boot banner
    pub firmware_version: heapless::String<16>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        let mut firmware_version = heapless::String::new();
        // "v1.0" always fits.
        let _ = firmware_version.push_str("v1.0");
        Self {
            // Link
            baud_rate: 115_200,

            // Timing
            tick_interval_ms: 10,
            uart_read_timeout_ms: 2_000,
            step_wait_limit_ms: 10_000,

            // Boot
            restore_on_boot: true,
            firmware_version,
        }
    }
}

/// Longest accepted bound on any blocking driver action.
pub const MAX_BLOCKING_WAIT_MS: u32 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    ValidationFailed(&'static str),
    /// Stored blob or override file does not decode.
    Corrupted,
    Storage(StorageError),
}

impl From<StorageError> for ConfigError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ValidationFailed(msg) => write!(f, "invalid config: {msg}"),
            Self::Corrupted => write!(f, "config data corrupted"),
            Self::Storage(e) => write!(f, "config storage: {e}"),
        }
    }
}

impl ControllerConfig {
    /// Range-check every field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.baud_rate == 0 {
            return Err(ConfigError::ValidationFailed("baud_rate must be non-zero"));
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::ValidationFailed(
                "tick_interval_ms must be non-zero",
            ));
        }
        if !(1..=MAX_BLOCKING_WAIT_MS).contains(&self.uart_read_timeout_ms) {
            return Err(ConfigError::ValidationFailed(
                "uart_read_timeout_ms must be 1–60000",
            ));
        }
        if !(1..=MAX_BLOCKING_WAIT_MS).contains(&self.step_wait_limit_ms) {
            return Err(ConfigError::ValidationFailed(
                "step_wait_limit_ms must be 1–60000",
            ));
        }
        if self.firmware_version.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "firmware_version must not be empty",
            ));
        }
        Ok(())
    }

    /// Read the persisted configuration.  `Ok(None)` when none was saved.
    pub fn load(storage: &dyn StoragePort) -> Result<Option<Self>, ConfigError> {
        if !storage.exists(CONFIG_NAMESPACE, CONFIG_KEY) {
            return Ok(None);
        }
        let mut buf = [0u8; MAX_CONFIG_SIZE];
        let len = storage.read(CONFIG_NAMESPACE, CONFIG_KEY, &mut buf)?;
        let config: Self = postcard::from_bytes(&buf[..len]).map_err(|_| ConfigError::Corrupted)?;
        config.validate()?;
        Ok(Some(config))
    }

    /// Validate and persist.
    pub fn save(&self, storage: &mut dyn StoragePort) -> Result<(), ConfigError> {
        self.validate()?;
        let mut buf = [0u8; MAX_CONFIG_SIZE];
        let bytes = postcard::to_slice(self, &mut buf).map_err(|_| ConfigError::Corrupted)?;
        storage.write(CONFIG_NAMESPACE, CONFIG_KEY, bytes)?;
        Ok(())
    }

    /// Parse a JSON override (host simulation config file).
    pub fn from_json(bytes: &[u8]) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_slice(bytes).map_err(|_| ConfigError::Corrupted)?;
        config.validate()?;
        Ok(config)
    }
}
