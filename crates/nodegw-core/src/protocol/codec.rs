//! Bounded newline-delimited JSON frame codec.
//!
//! This module implements a [`tokio_util::codec`] compatible codec for
//! line-oriented JSON framing. Each frame is one JSON object followed by a
//! single `\n`:
//!
//! ```text
//! +--------------------------------------+------+
//! | JSON object (UTF-8, no raw newlines) | \n   |
//! +--------------------------------------+------+
//! ```
//!
//! # Security Considerations
//!
//! The codec enforces bounded reads: the accumulated line length is
//! checked against the maximum BEFORE more input is buffered, so a peer
//! that never sends a newline cannot grow the buffer without bound.
//! Oversized lines are rejected with [`ProtocolError::LineTooLong`].

use std::marker::PhantomData;

use bytes::{BufMut, BytesMut};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::codec::{Decoder, Encoder};

use super::error::{MAX_LINE_BYTES, ProtocolError, ProtocolResult};
use super::messages::NodeMessage;

/// Encodes one [`NodeMessage`] to its JSON wire bytes (no trailing
/// newline).
///
/// # Errors
///
/// Returns [`ProtocolError::Malformed`] if serialization fails.
pub fn encode_message(msg: &NodeMessage) -> ProtocolResult<Vec<u8>> {
    Ok(serde_json::to_vec(msg)?)
}

/// Decodes one [`NodeMessage`] from JSON wire bytes.
///
/// # Errors
///
/// Returns [`ProtocolError::Malformed`] if the bytes are not valid JSON or
/// do not match any known frame schema.
pub fn decode_message(bytes: &[u8]) -> ProtocolResult<NodeMessage> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Newline-delimited JSON codec over a typed frame.
///
/// Used with [`tokio_util::codec::Framed`] to provide frame-based I/O over
/// async byte streams. The same codec serves the node channel
/// ([`NodeMessage`]) and the exec-host socket
/// ([`crate::execwire::ExecMessage`]).
///
/// # Invariants
///
/// - Lines are at most the configured maximum (never above
///   [`MAX_LINE_BYTES`])
/// - Carriage returns preceding the newline are tolerated and stripped
/// - Encoded frames never contain raw newlines (JSON string escapes cover
///   embedded ones)
#[derive(Debug)]
pub struct JsonLineCodec<T> {
    /// Maximum allowed line length in bytes.
    max_line_bytes: usize,
    /// Scan position within the buffer for the next newline search.
    scanned: usize,
    _frame: PhantomData<fn() -> T>,
}

impl<T> JsonLineCodec<T> {
    /// Creates a codec with the hard maximum line length.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_line_bytes: MAX_LINE_BYTES,
            scanned: 0,
            _frame: PhantomData,
        }
    }

    /// Creates a codec with a custom maximum line length.
    ///
    /// # Panics
    ///
    /// Panics if `max_line_bytes` exceeds [`MAX_LINE_BYTES`].
    #[must_use]
    pub fn with_max_line_bytes(max_line_bytes: usize) -> Self {
        assert!(
            max_line_bytes <= MAX_LINE_BYTES,
            "max_line_bytes {max_line_bytes} exceeds protocol limit {MAX_LINE_BYTES}"
        );
        Self {
            max_line_bytes,
            scanned: 0,
            _frame: PhantomData,
        }
    }

    /// Returns the maximum line length for this codec.
    #[must_use]
    pub const fn max_line_bytes(&self) -> usize {
        self.max_line_bytes
    }
}

impl<T> Default for JsonLineCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> Decoder for JsonLineCodec<T> {
    type Item = T;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> ProtocolResult<Option<T>> {
        let Some(offset) = src[self.scanned..].iter().position(|b| *b == b'\n') else {
            // No newline yet: reject before buffering past the limit.
            if src.len() > self.max_line_bytes {
                return Err(ProtocolError::LineTooLong {
                    size: src.len(),
                    max: self.max_line_bytes,
                });
            }
            self.scanned = src.len();
            return Ok(None);
        };

        let newline = self.scanned + offset;
        self.scanned = 0;

        if newline > self.max_line_bytes {
            return Err(ProtocolError::LineTooLong {
                size: newline,
                max: self.max_line_bytes,
            });
        }

        let mut line = src.split_to(newline + 1);
        line.truncate(newline);
        if line.last() == Some(&b'\r') {
            line.truncate(newline - 1);
        }

        Ok(Some(serde_json::from_slice(&line)?))
    }
}

impl<T: Serialize> Encoder<&T> for JsonLineCodec<T> {
    type Error = ProtocolError;

    fn encode(&mut self, item: &T, dst: &mut BytesMut) -> ProtocolResult<()> {
        let body = serde_json::to_vec(item)?;
        if body.len() > self.max_line_bytes {
            return Err(ProtocolError::LineTooLong {
                size: body.len(),
                max: self.max_line_bytes,
            });
        }
        dst.reserve(body.len() + 1);
        dst.extend_from_slice(&body);
        dst.put_u8(b'\n');
        Ok(())
    }
}
