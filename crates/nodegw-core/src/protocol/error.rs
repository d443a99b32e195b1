//! Error types for the wire protocol and its framing.

use thiserror::Error;

/// Hard upper bound on a single line frame (16 MiB).
///
/// Individual channels normally run with a much smaller limit derived from
/// the negotiated payload cap; this constant bounds what any codec will
/// ever buffer.
pub const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// Result alias for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised by the codec and message decoding.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// A line exceeded the codec's maximum length.
    #[error("line too long: {size} bytes > maximum {max}")]
    LineTooLong {
        /// Observed (or lower-bounded) line length.
        size: usize,
        /// Maximum allowed length.
        max: usize,
    },

    /// A frame was not valid JSON or did not match any known schema.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Underlying transport I/O failure.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Returns the error kind as a string identifier.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::LineTooLong { .. } => "line_too_long",
            Self::Malformed(_) => "malformed",
            Self::Io(_) => "io",
        }
    }
}
