//! Exec-host client with approval-pending timeout extension.
//!
//! One call, one connection: the client connects to the helper's
//! Unix-domain socket, sends a single HMAC-authenticated `exec` line, and
//! reads the reply stream. The helper may acknowledge with one
//! `exec-pending` line while a human approves the command; that cancels
//! the base timer and arms the extended one, but never resolves the call.
//! Exactly one `exec-res` line (or the deadline, or a connection failure)
//! resolves it.
//!
//! State machine:
//!
//! ```text
//!            exec-pending                exec-res
//!   Armed ───────────────▶ Pending ───────────────▶ resolved(payload)
//!     │                       │
//!     │ base deadline         │ extended deadline
//!     ▼                       ▼
//!  Unavailable          ApprovalTimeout
//! ```
//!
//! A second `exec-pending` is idempotent: the extended timer is not
//! re-armed. Resolution is exactly-once, and the socket is closed
//! unconditionally afterwards.

use std::path::PathBuf;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use nodegw_core::execwire::{ExecMessage, ExecPendingPayload, ExecResponse, sign_exec_request, wall_clock_ms};
use nodegw_core::protocol::JsonLineCodec;
use secrecy::SecretString;
use tokio::net::UnixStream;
use tokio::time::Instant;
use tokio_util::codec::Framed;
use tracing::{debug, warn};
use uuid::Uuid;

/// Default base deadline in milliseconds.
pub const DEFAULT_BASE_TIMEOUT_MS: u64 = 20_000;

/// Default extended deadline when `exec-pending` carries none (5 min).
pub const DEFAULT_PENDING_TIMEOUT_MS: u64 = 300_000;

/// Configuration for the exec-host client.
#[derive(Clone)]
pub struct ExecClientConfig {
    /// Path to the helper's Unix-domain socket.
    pub socket_path: PathBuf,
    /// Shared HMAC token.
    pub token: SecretString,
    /// Deadline while no `exec-pending` has been seen.
    pub base_timeout_ms: u64,
    /// Extended deadline applied when `exec-pending` carries no
    /// `timeoutMs` of its own.
    pub pending_timeout_ms: u64,
}

impl ExecClientConfig {
    /// Creates a config with default timing.
    pub fn new(socket_path: impl Into<PathBuf>, token: SecretString) -> Self {
        Self {
            socket_path: socket_path.into(),
            token,
            base_timeout_ms: DEFAULT_BASE_TIMEOUT_MS,
            pending_timeout_ms: DEFAULT_PENDING_TIMEOUT_MS,
        }
    }

    /// Overrides the base deadline.
    #[must_use]
    pub const fn with_base_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.base_timeout_ms = timeout_ms;
        self
    }

    /// Overrides the fallback extended deadline.
    #[must_use]
    pub const fn with_pending_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.pending_timeout_ms = timeout_ms;
        self
    }
}

impl std::fmt::Debug for ExecClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecClientConfig")
            .field("socket_path", &self.socket_path)
            .field("token", &"[REDACTED]")
            .field("base_timeout_ms", &self.base_timeout_ms)
            .field("pending_timeout_ms", &self.pending_timeout_ms)
            .finish()
    }
}

/// How an exec call resolved. Exactly one of these per call.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecOutcome {
    /// The helper answered with `exec-res`.
    Response(ExecResponse),
    /// The extended deadline elapsed while approval was pending.
    ApprovalTimeout,
    /// The base deadline elapsed, the socket could not be reached, or the
    /// helper closed the stream before `exec-res`.
    Unavailable,
}

impl ExecOutcome {
    /// Returns the `exec-res` payload, if that is how the call resolved.
    #[must_use]
    pub const fn response(&self) -> Option<&ExecResponse> {
        match self {
            Self::Response(response) => Some(response),
            Self::ApprovalTimeout | Self::Unavailable => None,
        }
    }
}

/// Short-lived client for the exec-host helper socket.
#[derive(Debug, Clone)]
pub struct ExecHostClient {
    config: ExecClientConfig,
}

impl ExecHostClient {
    /// Creates a client.
    #[must_use]
    pub const fn new(config: ExecClientConfig) -> Self {
        Self { config }
    }

    /// Executes one pre-serialized command request.
    pub async fn execute(&self, request_json: &str) -> ExecOutcome {
        self.execute_with(request_json, |_| {}).await
    }

    /// Executes one pre-serialized command request, observing any
    /// `exec-pending` acknowledgement through `on_pending`.
    ///
    /// `on_pending` fires at most once, with the pending payload (empty
    /// when the helper sent none); it changes the deadline but never the
    /// resolution.
    pub async fn execute_with<F>(&self, request_json: &str, mut on_pending: F) -> ExecOutcome
    where
        F: FnMut(&ExecPendingPayload),
    {
        let stream = match UnixStream::connect(&self.config.socket_path).await {
            Ok(stream) => stream,
            Err(error) => {
                warn!(
                    socket = %self.config.socket_path.display(),
                    %error,
                    "exec socket connect failed"
                );
                return ExecOutcome::Unavailable;
            },
        };
        let mut framed = Framed::new(stream, JsonLineCodec::<ExecMessage>::new());

        let exec_id = Uuid::new_v4().to_string();
        let request = sign_exec_request(
            &self.config.token,
            exec_id.as_str(),
            request_json,
            wall_clock_ms(),
        );
        let frame = ExecMessage::Request(request);
        if let Err(error) = framed.send(&frame).await {
            warn!(exec_id = %exec_id, %error, "exec request send failed");
            return ExecOutcome::Unavailable;
        }
        debug!(exec_id = %exec_id, base_timeout_ms = self.config.base_timeout_ms, "exec dispatched");

        // At most one timer is armed at a time: the base deadline until a
        // pending acknowledgement arrives, the extended deadline after.
        let deadline = tokio::time::sleep(Duration::from_millis(self.config.base_timeout_ms));
        tokio::pin!(deadline);
        let mut pending_seen = false;

        loop {
            tokio::select! {
                () = &mut deadline => {
                    return if pending_seen {
                        debug!(exec_id = %exec_id, "exec approval deadline elapsed");
                        ExecOutcome::ApprovalTimeout
                    } else {
                        debug!(exec_id = %exec_id, "exec base deadline elapsed");
                        ExecOutcome::Unavailable
                    };
                },
                frame = framed.next() => match frame {
                    Some(Ok(ExecMessage::Pending(pending))) => {
                        if pending_seen {
                            // Idempotent: the deadline is not re-extended.
                            continue;
                        }
                        pending_seen = true;
                        let payload = pending.payload.unwrap_or_default();
                        let extension_ms = payload
                            .timeout_ms
                            .unwrap_or(self.config.pending_timeout_ms);
                        deadline
                            .as_mut()
                            .reset(Instant::now() + Duration::from_millis(extension_ms));
                        debug!(exec_id = %exec_id, extension_ms, "exec pending; deadline extended");
                        on_pending(&payload);
                    },
                    Some(Ok(ExecMessage::Response(response))) => {
                        debug!(exec_id = %exec_id, "exec resolved");
                        return ExecOutcome::Response(response);
                    },
                    Some(Ok(ExecMessage::Request(_))) => {
                        warn!(exec_id = %exec_id, "unexpected exec request frame from helper");
                    },
                    Some(Err(error)) => {
                        warn!(exec_id = %exec_id, %error, "exec stream error");
                        return ExecOutcome::Unavailable;
                    },
                    None => {
                        warn!(exec_id = %exec_id, "exec stream closed before result");
                        return ExecOutcome::Unavailable;
                    },
                },
            }
        }
    }
}
