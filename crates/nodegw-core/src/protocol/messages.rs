//! Message schemas for the node gateway wire protocol.
//!
//! All frames serialize to JSON objects with a `type` discriminant and
//! camelCase field names. Optional fields are omitted when absent rather
//! than serialized as `null`, with the single exception of
//! [`InvokeRequest::params_json`], which is always present (possibly
//! `null`) so nodes can distinguish "no params" without probing for the
//! key.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Capability string a node declares to advertise support for chunked
/// invoke results.
pub const CHUNK_RESULT_CAPABILITY: &str = "node.invoke.result.chunk";

// ============================================================================
// Error codes
// ============================================================================

/// Wire-level error codes for invoke outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// The target node has no live session.
    NotConnected,
    /// The node is present but the operation could not be carried out.
    Unavailable,
    /// The invoke deadline elapsed before a reply arrived.
    Timeout,
    /// The node sent a malformed or out-of-contract message.
    InvalidRequest,
    /// The deadline elapsed while the node was awaiting human approval.
    AwaitingNodeApproval,
}

impl ErrorCode {
    /// Returns the wire spelling of this code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotConnected => "NOT_CONNECTED",
            Self::Unavailable => "UNAVAILABLE",
            Self::Timeout => "TIMEOUT",
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::AwaitingNodeApproval => "AWAITING_NODE_APPROVAL",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error carried in invoke replies and resolutions.
///
/// Remote application errors are surfaced through this type verbatim;
/// broker-originated failures use the constructors below so the message
/// strings stay consistent across call sites.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvokeError {
    /// Machine-readable code.
    pub code: ErrorCode,
    /// Optional human-readable detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl InvokeError {
    /// Creates an error with a code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
        }
    }

    /// Creates an error with a bare code.
    #[must_use]
    pub const fn code(code: ErrorCode) -> Self {
        Self {
            code,
            message: None,
        }
    }

    /// Terminal failure used when the target node's session is gone.
    #[must_use]
    pub fn not_connected() -> Self {
        Self::new(ErrorCode::NotConnected, "node disconnected")
    }

    /// Failure used when the request frame could not be enqueued.
    #[must_use]
    pub fn send_failed() -> Self {
        Self::new(ErrorCode::Unavailable, "failed to send invoke to node")
    }

    /// Failure used when the invoke deadline elapses.
    #[must_use]
    pub const fn timeout() -> Self {
        Self::code(ErrorCode::Timeout)
    }

    /// Failure used for a node-driven abort without an explicit error.
    #[must_use]
    pub fn aborted() -> Self {
        Self::new(ErrorCode::Unavailable, "node invoke aborted")
    }
}

impl std::fmt::Display for InvokeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {message}", self.code),
            None => write!(f, "{}", self.code),
        }
    }
}

impl std::error::Error for InvokeError {}

// ============================================================================
// Node metadata (hello)
// ============================================================================

/// Descriptive metadata a node declares during its hello handshake.
///
/// The stable node id is derived from `device_id` when present, else
/// `client_id`. Everything else is advisory: display strings, the declared
/// capability and command sets, and the permission map the node is willing
/// to honor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeMetadata {
    /// Per-install client identifier; node-id fallback.
    pub client_id: String,
    /// Stable device identifier; preferred node-id source.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// Human-readable name shown in listings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Node platform string (e.g. `linux-x86_64`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    /// Node software version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Opaque device fingerprint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_fingerprint: Option<String>,
    /// Remote address observed by the transport.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_ip: Option<String>,
    /// Declared capability set (feature-method strings such as
    /// [`CHUNK_RESULT_CAPABILITY`]).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub caps: Vec<String>,
    /// Declared command set.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub commands: Vec<String>,
    /// Permission map (permission name to granted flag).
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub permissions: BTreeMap<String, bool>,
    /// PATH-style environment string the node executes commands under.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path_env: Option<String>,
}

impl NodeMetadata {
    /// Returns `true` if the node advertised chunked invoke results.
    #[must_use]
    pub fn supports_result_chunking(&self) -> bool {
        self.caps.iter().any(|c| c == CHUNK_RESULT_CAPABILITY)
    }
}

// ============================================================================
// Invoke frames
// ============================================================================

/// Server-to-node invoke request (`node.invoke.request`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeRequest {
    /// Fresh request id, echoed back by the node.
    pub id: String,
    /// Target node id.
    pub node_id: String,
    /// Command name to execute.
    pub command: String,
    /// Caller params, pre-serialized; `null` when absent.
    #[serde(rename = "paramsJSON")]
    pub params_json: Option<String>,
    /// Caller deadline hint in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Caller idempotency key, passed through opaquely.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

/// Announcement of a chunked result payload inside the start form of
/// `node.invoke.result`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadTransfer {
    /// Payload format; `"json"` is the only defined value.
    pub format: String,
    /// Chunk body encoding; `"base64"` is the only defined value.
    pub encoding: String,
    /// Total raw payload size in bytes.
    pub total_bytes: u64,
    /// Number of chunks that will follow.
    pub chunk_count: u64,
    /// Lowercase hex SHA-256 of the raw payload.
    pub sha256: String,
    /// Advisory raw bytes per chunk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_bytes: Option<u64>,
}

impl PayloadTransfer {
    /// Creates a `json`/`base64` transfer announcement.
    pub fn json(total_bytes: u64, chunk_count: u64, sha256: impl Into<String>) -> Self {
        Self {
            format: "json".to_string(),
            encoding: "base64".to_string(),
            total_bytes,
            chunk_count,
            sha256: sha256.into(),
            chunk_bytes: None,
        }
    }
}

/// Node-to-server invoke reply (`node.invoke.result`).
///
/// Direct form carries `payload` or `payload_json`; the chunked-start form
/// carries `payload_transfer` instead and is followed by
/// [`InvokeResultChunk`] frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeResult {
    /// Request id being answered.
    pub id: String,
    /// Node id of the sender.
    pub node_id: String,
    /// Whether the command succeeded on the node.
    pub ok: bool,
    /// Decoded payload object.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Pre-serialized payload string.
    #[serde(rename = "payloadJSON", skip_serializing_if = "Option::is_none")]
    pub payload_json: Option<String>,
    /// Chunked-transfer announcement (start form).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_transfer: Option<PayloadTransfer>,
    /// Remote application error, surfaced verbatim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<InvokeError>,
}

/// One chunk of a chunked invoke result (`node.invoke.result.chunk`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeResultChunk {
    /// Request id the chunk belongs to.
    pub id: String,
    /// Node id of the sender.
    pub node_id: String,
    /// 0-based chunk index; must arrive contiguous and ascending.
    pub index: u64,
    /// Base64-encoded chunk body.
    pub data: String,
    /// Raw (decoded) byte length of this chunk.
    pub bytes: u64,
}

/// Node-driven abort of an in-flight invoke or transfer
/// (`node.invoke.result.abort`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeResultAbort {
    /// Request id being aborted.
    pub id: String,
    /// Node id of the sender.
    pub node_id: String,
    /// Optional abort cause.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<InvokeError>,
}

/// Fire-and-forget server-to-node event (`node.event`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeEvent {
    /// Event name.
    pub event: String,
    /// Optional event payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

// ============================================================================
// Envelope
// ============================================================================

/// Any frame on the node channel, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NodeMessage {
    /// Node handshake metadata.
    #[serde(rename = "node.hello")]
    Hello(NodeMetadata),
    /// Server-to-node invoke request.
    #[serde(rename = "node.invoke.request")]
    InvokeRequest(InvokeRequest),
    /// Node-to-server invoke reply (direct or chunked-start form).
    #[serde(rename = "node.invoke.result")]
    InvokeResult(InvokeResult),
    /// One chunk of a chunked invoke result.
    #[serde(rename = "node.invoke.result.chunk")]
    InvokeResultChunk(InvokeResultChunk),
    /// Node-driven abort.
    #[serde(rename = "node.invoke.result.abort")]
    InvokeResultAbort(InvokeResultAbort),
    /// Fire-and-forget server-to-node event.
    #[serde(rename = "node.event")]
    Event(NodeEvent),
}

impl NodeMessage {
    /// Returns the wire `type` discriminant of this frame.
    #[must_use]
    pub const fn message_type(&self) -> &'static str {
        match self {
            Self::Hello(_) => "node.hello",
            Self::InvokeRequest(_) => "node.invoke.request",
            Self::InvokeResult(_) => "node.invoke.result",
            Self::InvokeResultChunk(_) => "node.invoke.result.chunk",
            Self::InvokeResultAbort(_) => "node.invoke.result.abort",
            Self::Event(_) => "node.event",
        }
    }
}
