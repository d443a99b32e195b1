//! Wire protocol for the node gateway.
//!
//! Every frame on the node channel is one JSON object carrying a `type`
//! discriminant. The gateway produces `node.invoke.request` and
//! `node.event` frames; nodes produce `node.hello`, `node.invoke.result`,
//! `node.invoke.result.chunk`, and `node.invoke.result.abort` frames.
//!
//! The protocol stack is organized in layers:
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │          Application Messages            │  NodeMessage (JSON)
//! ├─────────────────────────────────────────┤
//! │               Framing                    │  One object per line
//! ├─────────────────────────────────────────┤
//! │              Transport                   │  Abstract duplex channel
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Module Overview
//!
//! - [`codec`]: Bounded newline-delimited JSON codec ([`JsonLineCodec`])
//! - [`error`]: Protocol error types ([`ProtocolError`], [`ProtocolResult`])
//! - [`messages`]: Message schemas ([`NodeMessage`] and its frames)
//!
//! # Security Considerations
//!
//! - Line length is validated BEFORE buffering continues (prevents memory
//!   exhaustion from a peer that never sends a newline)
//! - Unknown `type` discriminants decode to an error, never a panic

pub mod codec;
pub mod error;
pub mod messages;

pub use codec::{JsonLineCodec, decode_message, encode_message};
pub use error::{MAX_LINE_BYTES, ProtocolError, ProtocolResult};
pub use messages::{
    CHUNK_RESULT_CAPABILITY, ErrorCode, InvokeError, InvokeRequest, InvokeResult,
    InvokeResultAbort, InvokeResultChunk, NodeEvent, NodeMessage, NodeMetadata, PayloadTransfer,
};
