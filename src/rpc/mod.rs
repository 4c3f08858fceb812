//! Gateway protocol subsystem.
//!
//! Schema-typed request/response messages carried in length-prefixed
//! frames over a single byte stream.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                     Protocol Stack                         │
//! │                                                            │
//! │  ┌───────────┐   ┌──────────┐   ┌───────────────────────┐ │
//! │  │ Transport │──▶│  Codec   │──▶│ Dispatcher            │ │
//! │  │ (trait)   │   │ (framing)│   │ → ProfileRegistry     │ │
//! │  └───────────┘   └──────────┘   └───────────────────────┘ │
//! │       ▲                                    │              │
//! │       └──────────── Response ◀─────────────┘              │
//! └────────────────────────────────────────────────────────────┘
//! ```

pub mod codec;
pub mod dispatch;
pub mod messages;
pub mod transport;
