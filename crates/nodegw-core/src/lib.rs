//! nodegw-core - Node Gateway Protocol Library
//!
//! This library provides the shared protocol vocabulary for the nodegw
//! gateway: the wire message schemas exchanged with remote nodes, the
//! bounded JSON line codec, transfer size limits, and the exec-host
//! socket wire contract with its HMAC authentication helpers.
//!
//! # Modules
//!
//! - [`execwire`]: Exec-host socket line schemas and HMAC helpers
//! - [`limits`]: Payload, result, and inflight byte limits
//! - [`payload`]: Invoke payload variants (decoded / serialized / empty)
//! - [`protocol`]: Wire message schemas, codec, and framing

pub mod execwire;
pub mod limits;
pub mod payload;
pub mod protocol;

pub use execwire::{
    ExecAuthError, ExecMessage, ExecPending, ExecPendingPayload, ExecRequest, ExecResponse,
    exec_signature, generate_nonce, sign_exec_request, verify_exec_request, wall_clock_ms,
};
pub use limits::TransferLimits;
pub use payload::InvokePayload;
pub use protocol::{
    ErrorCode, InvokeError, InvokeRequest, InvokeResult, InvokeResultAbort, InvokeResultChunk,
    JsonLineCodec, NodeEvent, NodeMessage, NodeMetadata, PayloadTransfer, ProtocolError,
    ProtocolResult, decode_message, encode_message,
};
