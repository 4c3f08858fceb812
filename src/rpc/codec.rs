//! Length-prefix frame codec.
//!
//! Wire format:
//! ```text
//! ┌────────────┬──────────────────────────┐
//! │ Length (4B)│ postcard payload (N B)   │
//! │ LE u32     │                          │
//! └────────────┴──────────────────────────┘
//! ```
//!
//! The decoder is fed one byte at a time and yields a payload as soon as
//! its last byte arrives, so bytes belonging to the next frame are never
//! consumed early.  A zero or oversized length header is reported and the
//! decoder starts over at the next byte.

use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, EncodeError};
use crate::rpc::messages::{Request, RequestPayload, Response};

/// Maximum frame payload size (protects against memory exhaustion).
pub const MAX_FRAME_SIZE: usize = 256;

/// Frame header size (4-byte little-endian length).
pub const HEADER_SIZE: usize = 4;

/// Buffer large enough for any encoded frame.
pub const FRAME_BUF_SIZE: usize = HEADER_SIZE + MAX_FRAME_SIZE;

/// Decoder state machine.
enum DecoderState {
    /// Waiting for header bytes.
    ReadingHeader { collected: usize },
    /// Header received, reading payload.
    ReadingPayload { expected: usize, collected: usize },
}

/// Streaming frame decoder.
pub struct FrameDecoder {
    state: DecoderState,
    header_buf: [u8; HEADER_SIZE],
    payload_buf: [u8; MAX_FRAME_SIZE],
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            state: DecoderState::ReadingHeader { collected: 0 },
            header_buf: [0; HEADER_SIZE],
            payload_buf: [0; MAX_FRAME_SIZE],
        }
    }

    /// Feed one byte.
    ///
    /// Returns `Ok(Some(payload))` when this byte completes a frame.  The
    /// slice is valid until the next call to `push`.
    pub fn push(&mut self, byte: u8) -> Result<Option<&[u8]>, DecodeError> {
        match &mut self.state {
            DecoderState::ReadingHeader { collected } => {
                self.header_buf[*collected] = byte;
                *collected += 1;
                if *collected < HEADER_SIZE {
                    return Ok(None);
                }

                let announced = u32::from_le_bytes(self.header_buf);
                self.state = DecoderState::ReadingHeader { collected: 0 };
                if announced == 0 {
                    return Err(DecodeError::EmptyFrame);
                }
                if announced as usize > MAX_FRAME_SIZE {
                    return Err(DecodeError::Oversized(announced));
                }
                self.state = DecoderState::ReadingPayload {
                    expected: announced as usize,
                    collected: 0,
                };
                Ok(None)
            }

            DecoderState::ReadingPayload { expected, collected } => {
                self.payload_buf[*collected] = byte;
                *collected += 1;
                if *collected < *expected {
                    return Ok(None);
                }

                let len = *expected;
                self.state = DecoderState::ReadingHeader { collected: 0 };
                Ok(Some(&self.payload_buf[..len]))
            }
        }
    }

    /// True between frames.
    pub fn is_idle(&self) -> bool {
        matches!(self.state, DecoderState::ReadingHeader { collected: 0 })
    }

    /// Reset decoder state (e.g. after a transport reconnect).
    pub fn reset(&mut self) {
        self.state = DecoderState::ReadingHeader { collected: 0 };
    }
}

// ───────────────────────────────────────────────────────────────
// Message encoding
// ───────────────────────────────────────────────────────────────

/// Serialize `msg` straight into a frame in `out_buf`.
pub fn encode_message<T: Serialize>(msg: &T, out_buf: &mut [u8]) -> Result<usize, EncodeError> {
    if out_buf.len() <= HEADER_SIZE {
        return Err(EncodeError::BufferFull);
    }
    let limit = out_buf.len().min(FRAME_BUF_SIZE);
    let (header, body) = out_buf[..limit].split_at_mut(HEADER_SIZE);
    let len = postcard::to_slice(msg, body)?.len();
    header.copy_from_slice(&(len as u32).to_le_bytes());
    Ok(HEADER_SIZE + len)
}

/// Deserialize one message that must span the whole payload.
pub fn decode_message<'a, T: Deserialize<'a>>(payload: &'a [u8]) -> Result<T, DecodeError> {
    if payload.is_empty() {
        return Err(DecodeError::EmptyFrame);
    }
    let (msg, rest) = postcard::take_from_bytes(payload)?;
    if !rest.is_empty() {
        return Err(DecodeError::TrailingBytes(rest.len()));
    }
    Ok(msg)
}

/// Like [`decode_message`], except that a Registration for an unknown
/// driver may end in settings nobody can parse.
pub fn decode_request(payload: &[u8]) -> Result<Request, DecodeError> {
    if payload.is_empty() {
        return Err(DecodeError::EmptyFrame);
    }
    let (request, rest): (Request, _) = postcard::take_from_bytes(payload)?;
    let unknown_driver = matches!(
        &request.payload,
        Some(RequestPayload::Registration(registration)) if registration.config.is_none()
    );
    if !rest.is_empty() && !unknown_driver {
        return Err(DecodeError::TrailingBytes(rest.len()));
    }
    Ok(request)
}

pub fn encode_response(response: &Response, out_buf: &mut [u8]) -> Result<usize, EncodeError> {
    encode_message(response, out_buf)
}

/// Gateway side: frame a request.
pub fn encode_request(request: &Request, out_buf: &mut [u8]) -> Result<usize, EncodeError> {
    encode_message(request, out_buf)
}

/// Gateway side: parse a response payload.
pub fn decode_response(payload: &[u8]) -> Result<Response, DecodeError> {
    decode_message(payload)
}
