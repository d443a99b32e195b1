//! Exec-host socket wire contract.
//!
//! The gateway executes local OS commands through a companion helper
//! reachable over a Unix-domain socket. Framing is one JSON object per
//! newline-terminated line (the same [`JsonLineCodec`] as the node
//! channel). A request is authenticated with an HMAC-SHA256 tag over
//! `nonce + ":" + ts + ":" + requestJson` keyed by a shared token, encoded
//! as lowercase hex.
//!
//! The reply stream for one request is zero or one `exec-pending` frame
//! followed by exactly one `exec-res` frame. Closing the socket before
//! `exec-res` is a hard failure.
//!
//! # Timestamp freshness
//!
//! [`verify_exec_request`] rejects requests whose `ts` deviates from the
//! verifier's wall clock by more than [`EXEC_TS_SKEW_MS`]. The window is
//! this implementation's choice; signers always stamp the current time.
//!
//! [`JsonLineCodec`]: crate::protocol::JsonLineCodec

use std::time::{SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Nonce length in raw bytes (hex-encoded on the wire).
pub const EXEC_NONCE_LEN: usize = 16;

/// Maximum accepted deviation between a request's `ts` and the verifier's
/// wall clock, in milliseconds.
pub const EXEC_TS_SKEW_MS: u64 = 60_000;

// ============================================================================
// Line schemas
// ============================================================================

/// Authenticated exec request line (`exec`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecRequest {
    /// Request identifier, echoed in replies.
    pub id: String,
    /// 16 random bytes, hex-encoded.
    pub nonce: String,
    /// Wall-clock milliseconds at signing time.
    pub ts: u64,
    /// Lowercase hex HMAC-SHA256 tag.
    pub hmac: String,
    /// The command request, pre-serialized.
    #[serde(rename = "requestJson")]
    pub request_json: String,
}

/// Payload of an `exec-pending` acknowledgement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecPendingPayload {
    /// Extended deadline in milliseconds, replacing the base timeout.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Why the command is pending (e.g. awaiting approval).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Additional helper-defined fields, passed through.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Intermediate acknowledgement line (`exec-pending`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecPending {
    /// Request id being acknowledged.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Pending details; may carry an extended deadline.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<ExecPendingPayload>,
}

/// Terminal result line (`exec-res`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecResponse {
    /// Request id being answered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Whether the command succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    /// Command result payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

/// Any line on the exec-host socket, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExecMessage {
    /// Authenticated request.
    #[serde(rename = "exec")]
    Request(ExecRequest),
    /// Intermediate pending acknowledgement.
    #[serde(rename = "exec-pending")]
    Pending(ExecPending),
    /// Terminal result.
    #[serde(rename = "exec-res")]
    Response(ExecResponse),
}

// ============================================================================
// HMAC authentication
// ============================================================================

/// Errors raised while verifying an exec request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ExecAuthError {
    /// The `hmac` field is not valid lowercase hex of the right length.
    #[error("malformed signature")]
    MalformedSignature,

    /// The signature does not match the request contents.
    #[error("signature mismatch")]
    SignatureMismatch,

    /// The request timestamp is outside the accepted skew window.
    #[error("stale timestamp: ts {ts} deviates from now {now} by more than {skew_ms} ms")]
    StaleTimestamp {
        /// The request's timestamp.
        ts: u64,
        /// The verifier's wall clock.
        now: u64,
        /// The accepted window.
        skew_ms: u64,
    },
}

/// Returns the current wall clock in milliseconds since the Unix epoch.
#[must_use]
pub fn wall_clock_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Generates a fresh [`EXEC_NONCE_LEN`]-byte nonce, hex-encoded.
#[must_use]
pub fn generate_nonce() -> String {
    let bytes: [u8; EXEC_NONCE_LEN] = rand::random();
    hex::encode(bytes)
}

/// Computes the lowercase hex HMAC-SHA256 tag for an exec request.
///
/// The signed input is `nonce + ":" + ts + ":" + request_json`.
#[must_use]
pub fn exec_signature(token: &SecretString, nonce: &str, ts: u64, request_json: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(token.expose_secret().as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(nonce.as_bytes());
    mac.update(b":");
    mac.update(ts.to_string().as_bytes());
    mac.update(b":");
    mac.update(request_json.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Builds a signed [`ExecRequest`] stamped with the given wall clock.
#[must_use]
pub fn sign_exec_request(
    token: &SecretString,
    id: impl Into<String>,
    request_json: impl Into<String>,
    now_ms: u64,
) -> ExecRequest {
    let request_json = request_json.into();
    let nonce = generate_nonce();
    let hmac = exec_signature(token, &nonce, now_ms, &request_json);
    ExecRequest {
        id: id.into(),
        nonce,
        ts: now_ms,
        hmac,
        request_json,
    }
}

/// Verifies an exec request's signature and timestamp freshness.
///
/// The comparison is constant-time over the decoded tag bytes.
///
/// # Errors
///
/// Returns [`ExecAuthError::StaleTimestamp`] when `ts` deviates from
/// `now_ms` by more than [`EXEC_TS_SKEW_MS`],
/// [`ExecAuthError::MalformedSignature`] when the `hmac` field is not
/// 32 bytes of hex, and [`ExecAuthError::SignatureMismatch`] when the tag
/// does not match.
pub fn verify_exec_request(
    token: &SecretString,
    request: &ExecRequest,
    now_ms: u64,
) -> Result<(), ExecAuthError> {
    let skew = now_ms.abs_diff(request.ts);
    if skew > EXEC_TS_SKEW_MS {
        return Err(ExecAuthError::StaleTimestamp {
            ts: request.ts,
            now: now_ms,
            skew_ms: EXEC_TS_SKEW_MS,
        });
    }

    let provided: [u8; 32] = hex::decode(&request.hmac)
        .ok()
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(ExecAuthError::MalformedSignature)?;

    let expected_hex = exec_signature(token, &request.nonce, request.ts, &request.request_json);
    let expected: [u8; 32] = hex::decode(expected_hex)
        .expect("signature helper emits valid hex")
        .try_into()
        .expect("SHA-256 tag is 32 bytes");

    if bool::from(expected.ct_eq(&provided)) {
        Ok(())
    } else {
        Err(ExecAuthError::SignatureMismatch)
    }
}
