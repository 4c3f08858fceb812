//! Unified error types for the controller firmware.
//!
//! Every failure the gateway can observe funnels into [`Error`], which the
//! dispatcher renders into an ERROR response.  All variants are `Copy` so
//! they can be passed through the registry and drivers without allocation.

use core::fmt;

use crate::registry::ProfileId;
use crate::rpc::messages::DriverKind;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every error surfaced to the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Malformed, truncated or mis-framed bytes.
    Decode(DecodeError),
    /// Request carried neither an Action nor a Registration.
    InvalidRequestShape,
    /// Profile id outside 0..=255.
    InvalidProfileId(u32),
    /// Registration named a driver this firmware does not implement.
    UnknownDriverKind,
    /// Driver `init` rejected the configuration or hardware failed.
    DriverInit(DriverKind, DriverError),
    /// Action kind does not match the profile's registration.
    ActionDriverMismatch {
        registered: Option<DriverKind>,
        requested: DriverKind,
    },
    /// Driver reported a failure while executing an action.
    DriverAction(DriverError),
    /// Bounded receive buffer filled before the reply terminator arrived.
    ResponseBufferOverflow,
    /// Blocking read gave up after the configured timeout.
    TimedOut,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decode(e) => write!(f, "decoding failed: {e}"),
            Self::InvalidRequestShape => {
                write!(f, "request holds neither action nor registration")
            }
            Self::InvalidProfileId(id) => write!(f, "profile id {id} out of range"),
            Self::UnknownDriverKind => write!(f, "unknown driver kind"),
            Self::DriverInit(kind, e) => write!(f, "{kind}: init failed: {e}"),
            Self::ActionDriverMismatch {
                registered: Some(registered),
                requested,
            } => write!(
                f,
                "no matching registration ({requested} action on {registered} profile)"
            ),
            Self::ActionDriverMismatch {
                registered: None,
                requested,
            } => write!(f, "no matching registration ({requested} action on empty profile)"),
            Self::DriverAction(e) => write!(f, "{e}"),
            Self::ResponseBufferOverflow => write!(f, "response buffer overflow"),
            Self::TimedOut => write!(f, "timed out waiting for reply"),
        }
    }
}

// ---------------------------------------------------------------------------
// Decode errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Frame header announced an empty payload.
    EmptyFrame,
    /// Frame header announced more than the frame buffer holds.
    Oversized(u32),
    /// Payload ended before the message was complete.
    Truncated,
    /// Any other schema violation (bad tag, varint, utf-8, bool, capacity ...).
    Malformed,
    /// A complete message was followed by unconsumed bytes.
    TrailingBytes(usize),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyFrame => write!(f, "empty frame"),
            Self::Oversized(len) => write!(f, "frame of {len} bytes exceeds limit"),
            Self::Truncated => write!(f, "truncated message"),
            Self::Malformed => write!(f, "malformed message"),
            Self::TrailingBytes(n) => write!(f, "{n} trailing bytes after message"),
        }
    }
}

impl From<postcard::Error> for DecodeError {
    fn from(e: postcard::Error) -> Self {
        match e {
            postcard::Error::DeserializeUnexpectedEnd => Self::Truncated,
            _ => Self::Malformed,
        }
    }
}

impl From<DecodeError> for Error {
    fn from(e: DecodeError) -> Self {
        Self::Decode(e)
    }
}

// ---------------------------------------------------------------------------
// Encode errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeError {
    /// Output buffer too small for header + message.
    BufferFull,
    /// Serializer rejected the message.
    Serialize,
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BufferFull => write!(f, "encode buffer full"),
            Self::Serialize => write!(f, "message serialization failed"),
        }
    }
}

impl From<postcard::Error> for EncodeError {
    fn from(e: postcard::Error) -> Self {
        match e {
            postcard::Error::SerializeBufferFull => Self::BufferFull,
            _ => Self::Serialize,
        }
    }
}

// ---------------------------------------------------------------------------
// Driver errors
// ---------------------------------------------------------------------------

/// Failures reported by a concrete driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverError {
    /// A configuration field is out of range.
    InvalidConfig(&'static str),
    /// Another profile already owns a resource this one needs.
    ResourceBusy(ProfileId),
    /// The peripheral did not respond during initialisation.
    HardwareUnavailable,
    /// The action needs a pin mode the registration did not configure.
    ModeMismatch(&'static str),
    /// Blocking read expired.
    TimedOut,
    /// Receive buffer exhausted before the terminator arrived.
    BufferOverflow,
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            Self::ResourceBusy(holder) => write!(f, "resource held by profile {holder}"),
            Self::HardwareUnavailable => write!(f, "hardware not responding"),
            Self::ModeMismatch(msg) => write!(f, "mode mismatch: {msg}"),
            Self::TimedOut => write!(f, "timed out waiting for reply"),
            Self::BufferOverflow => write!(f, "response buffer overflow"),
        }
    }
}

impl From<DriverError> for Error {
    fn from(e: DriverError) -> Self {
        match e {
            DriverError::TimedOut => Self::TimedOut,
            DriverError::BufferOverflow => Self::ResponseBufferOverflow,
            other => Self::DriverAction(other),
        }
    }
}

/// Failure from [`ProfileRegistry::register`](crate::registry::ProfileRegistry::register).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitError {
    pub kind: DriverKind,
    pub cause: DriverError,
}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: init failed: {}", self.kind, self.cause)
    }
}

impl From<InitError> for Error {
    fn from(e: InitError) -> Self {
        Self::DriverInit(e.kind, e.cause)
    }
}
