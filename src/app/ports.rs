//! Port traits: the boundary between the controller core and the board.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ Registry / Drivers / Dispatcher
//! ```
//!
//! Driven adapters (GPIO + UART + sensors, key-value flash) implement these
//! traits.  Drivers only ever see a `&mut dyn HalPort`, so every driver can
//! be exercised on the host against a recording mock.

use embedded_hal::digital::PinState;

use crate::registry::ProfileId;
use crate::rpc::messages::{PinMode, Registration, UartPort};

// ───────────────────────────────────────────────────────────────
// Hardware abstraction port (driven adapter: drivers → board)
// ───────────────────────────────────────────────────────────────

/// Everything a driver may do to the board.
///
/// Calls are synchronous and must return promptly, except [`delay_us`]
/// / [`delay_ms`] and [`pulse_in`] which block for at most the requested
/// time.
///
/// [`delay_us`]: HalPort::delay_us
/// [`delay_ms`]: HalPort::delay_ms
/// [`pulse_in`]: HalPort::pulse_in
pub trait HalPort {
    /// Configure a GPIO.  Fails for pins the board does not expose.
    fn pin_mode(&mut self, pin: u8, mode: PinMode) -> Result<(), HalError>;

    fn digital_write(&mut self, pin: u8, state: PinState);

    fn digital_read(&mut self, pin: u8) -> PinState;

    /// Open an auxiliary UART.
    fn serial_begin(&mut self, port: UartPort, baudrate: u32) -> Result<(), HalError>;

    fn serial_end(&mut self, port: UartPort);

    /// Queue bytes for transmission.  Returns the number accepted.
    fn serial_write(&mut self, port: UartPort, data: &[u8]) -> usize;

    /// Pop one received byte, if any.
    fn serial_read(&mut self, port: UartPort) -> Option<u8>;

    /// Number of received bytes waiting.
    fn serial_available(&self, port: UartPort) -> usize;

    /// Length in microseconds of the next pulse at `state` on `pin`, or
    /// `None` if none completed within `timeout_us`.
    fn pulse_in(&mut self, pin: u8, state: PinState, timeout_us: u32) -> Option<u32>;

    /// Bring up the RGB sensor on the shared I²C bus.
    fn color_sensor_begin(&mut self, integration_time_ms: u16, gain: u8) -> Result<(), HalError>;

    /// Raw `[r, g, b]` channel counts.
    fn color_sensor_read(&mut self) -> Result<[u16; 3], HalError>;

    /// Square wave on `pin` at `frequency_hz`; 0 stops it.
    fn step_pwm(&mut self, pin: u8, frequency_hz: u32);

    fn delay_us(&mut self, us: u32);

    fn delay_ms(&mut self, ms: u32) {
        self.delay_us(ms.saturating_mul(1000));
    }

    /// Monotonic milliseconds since boot.
    fn millis(&self) -> u64;

    /// Free heap in bytes.
    fn free_memory(&self) -> u32;
}

/// Board-level failure reported by a [`HalPort`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalError {
    /// The pin number does not exist or is reserved.
    UnsupportedPin(u8),
    /// The UART peripheral could not be opened.
    PortUnavailable,
    /// An external device did not answer.
    NoDevice,
}

impl core::fmt::Display for HalError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::UnsupportedPin(pin) => write!(f, "pin {pin} not available"),
            Self::PortUnavailable => write!(f, "serial port unavailable"),
            Self::NoDevice => write!(f, "device not responding"),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Profile persistence port (driven adapter: dispatcher ↔ flash)
// ───────────────────────────────────────────────────────────────

/// Durable copy of the registry.
///
/// Failures are the implementation's to log; the controller never reports
/// them to the gateway and never retries.
pub trait PersistencePort {
    /// Persist a successful registration, replacing any previous record.
    fn store(&mut self, registration: &Registration);

    /// Forget a profile.  Idempotent.
    fn remove(&mut self, profile_id: ProfileId);

    /// Every stored registration, in ascending profile order.  Records that
    /// cannot be decoded are discarded.
    fn load_all(&mut self) -> Vec<Registration>;
}

/// Persistence that keeps nothing.  Used when no flash is available.
pub struct NullPersistence;

impl PersistencePort for NullPersistence {
    fn store(&mut self, _registration: &Registration) {}

    fn remove(&mut self, _profile_id: ProfileId) {}

    fn load_all(&mut self) -> Vec<Registration> {
        Vec::new()
    }
}

// ───────────────────────────────────────────────────────────────
// Storage port (driven adapter: persistence ↔ NVS / flash)
// ───────────────────────────────────────────────────────────────

/// Persistent key-value storage.
///
/// - Keys are namespaced to prevent collisions between subsystems.
/// - Write operations MUST be atomic, with no partial writes on power loss.
///   The ESP-IDF NVS API guarantees this natively; in-memory simulation
///   achieves it trivially.
pub trait StoragePort {
    /// Read a value.  Returns the number of bytes written to `buf`.
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Write a value atomically.
    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Delete a key.  Returns `Ok(())` even if the key didn't exist.
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError>;

    /// Check whether a key exists without reading it.
    fn exists(&self, namespace: &str, key: &str) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    NotFound,
    IoError,
    Full,
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::IoError => write!(f, "storage I/O error"),
            Self::Full => write!(f, "storage full"),
        }
    }
}
