//! Invocation table: outstanding invokes, their timers, and resolution.
//!
//! Each invoke owns exactly one oneshot resolver and one timeout task.
//! Whichever path wins under the broker mutex (reply, transfer
//! completion, transfer error, timeout, abort, disconnect) removes the
//! pending entry, cancels the timer, tears down any associated transfer,
//! and fires the resolver. Late paths find no entry and are no-ops, so
//! the resolver fires exactly once.

use std::sync::Arc;
use std::time::Duration;

use nodegw_core::InvokePayload;
use nodegw_core::protocol::{ErrorCode, InvokeError, InvokeRequest, InvokeResult, NodeMessage};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{BrokerInner, BrokerShared, NodeBroker};

/// Outcome type carried by an invoke resolver.
pub(crate) type InvokeOutcome = Result<InvokePayload, InvokeError>;

/// One outstanding invoke.
pub(crate) struct PendingInvoke {
    /// Target node id; replies from any other node are rejected.
    pub node_id: String,
    /// Command name, kept for logging.
    pub command: String,
    /// Single-shot resolver for the suspended caller.
    resolver: oneshot::Sender<InvokeOutcome>,
    /// Timeout task handle, aborted on resolution.
    timer: JoinHandle<()>,
}

impl PendingInvoke {
    /// Fires the resolver and cancels the timer. The receiver may already
    /// be gone (caller dropped its future); that is not an error.
    fn resolve(self, outcome: InvokeOutcome) {
        self.timer.abort();
        let _ = self.resolver.send(outcome);
    }
}

/// Per-call invoke options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvokeOptions {
    /// Deadline override in milliseconds; the configured default applies
    /// when absent.
    pub timeout_ms: Option<u64>,
    /// Idempotency key passed through to the node opaquely.
    pub idempotency_key: Option<String>,
}

impl InvokeOptions {
    /// Overrides the invoke deadline.
    #[must_use]
    pub const fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Sets the idempotency key.
    #[must_use]
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

impl NodeBroker {
    /// Invokes a command on a node with default options.
    ///
    /// # Errors
    ///
    /// Never panics and never retries; every failure comes back as an
    /// [`InvokeError`] value (`NOT_CONNECTED`, `UNAVAILABLE`, `TIMEOUT`,
    /// `INVALID_REQUEST`, or a remote application error verbatim).
    pub async fn invoke(
        &self,
        node_id: &str,
        command: &str,
        params: Option<Value>,
    ) -> Result<InvokePayload, InvokeError> {
        self.invoke_with(node_id, command, params, InvokeOptions::default())
            .await
    }

    /// Invokes a command on a node.
    ///
    /// Suspends until the first of: a direct reply, chunked-transfer
    /// completion, a transfer error, the deadline, a node-driven abort,
    /// or the node's session being unregistered.
    ///
    /// # Errors
    ///
    /// See [`invoke`](Self::invoke).
    pub async fn invoke_with(
        &self,
        node_id: &str,
        command: &str,
        params: Option<Value>,
        options: InvokeOptions,
    ) -> Result<InvokePayload, InvokeError> {
        let timeout_ms = options
            .timeout_ms
            .unwrap_or(self.config().invoke_timeout_ms);
        let params_json = params.map(|value| value.to_string());
        let request_id = Uuid::new_v4().to_string();

        // Send and registration happen atomically under the lock: the
        // resolver cannot fire before the request frame is enqueued.
        let receiver = {
            let mut inner = self.lock();
            let Some(session) = inner.by_node_id.get(node_id) else {
                return Err(InvokeError::not_connected());
            };

            let frame = NodeMessage::InvokeRequest(InvokeRequest {
                id: request_id.clone(),
                node_id: node_id.to_string(),
                command: command.to_string(),
                params_json,
                timeout_ms: Some(timeout_ms),
                idempotency_key: options.idempotency_key,
            });
            if let Err(error) = session.conn.send(&frame) {
                warn!(node_id, request_id = %request_id, %error, "invoke request send failed");
                return Err(InvokeError::send_failed());
            }

            let (resolver, receiver) = oneshot::channel();
            let timer = spawn_invoke_timer(Arc::clone(self.shared()), request_id.clone(), timeout_ms);
            inner.pending.insert(
                request_id.clone(),
                PendingInvoke {
                    node_id: node_id.to_string(),
                    command: command.to_string(),
                    resolver,
                    timer,
                },
            );
            receiver
        };

        debug!(node_id, command, request_id = %request_id, timeout_ms, "invoke dispatched");

        match receiver.await {
            Ok(outcome) => outcome,
            // The broker was dropped with the invoke still outstanding.
            Err(_) => Err(InvokeError::code(ErrorCode::Unavailable)),
        }
    }

    /// Applies a direct invoke reply from a node.
    ///
    /// Cancels the pending entry's timer, clears any associated transfer,
    /// and resolves the caller with the reply's outcome. A reply for an
    /// unknown request id is silently discarded; a reply whose node id
    /// does not match the pending entry is rejected. A reply carrying a
    /// `payloadTransfer` announcement is routed to the transfer engine
    /// instead. Returns `true` if a matching pending entry existed.
    pub fn handle_invoke_result(&self, result: InvokeResult) -> bool {
        if let Some(transfer) = &result.payload_transfer {
            return self
                .start_invoke_result_transfer(&result.id, &result.node_id, transfer)
                .is_ok();
        }

        let mut inner = self.lock();
        let Some(pending) = inner.pending.get(&result.id) else {
            debug!(request_id = %result.id, "reply for unknown invoke id discarded");
            return false;
        };
        if pending.node_id != result.node_id {
            warn!(
                request_id = %result.id,
                expected = %pending.node_id,
                claimed = %result.node_id,
                "reply node id mismatch; rejected"
            );
            return false;
        }

        let outcome = if result.ok {
            Ok(InvokePayload::from_wire(result.payload, result.payload_json))
        } else {
            Err(result
                .error
                .unwrap_or_else(|| InvokeError::new(ErrorCode::Unavailable, "node reported failure")))
        };
        inner.resolve_invoke(&result.id, outcome);
        true
    }

    /// Applies a node-driven abort.
    ///
    /// Resolves a matching pending invoke with the supplied error
    /// (default `UNAVAILABLE`/"node invoke aborted"); when only a
    /// transfer exists its bytes are reclaimed. Returns `true` if
    /// anything was torn down.
    pub fn abort_invoke_result_transfer(
        &self,
        id: &str,
        node_id: &str,
        error: Option<InvokeError>,
    ) -> bool {
        let mut inner = self.lock();
        if inner
            .pending
            .get(id)
            .is_some_and(|pending| pending.node_id == node_id)
        {
            debug!(request_id = %id, node_id, "invoke aborted by node");
            inner.resolve_invoke(id, Err(error.unwrap_or_else(InvokeError::aborted)));
            return true;
        }
        if inner
            .transfers
            .get(id)
            .is_some_and(|transfer| transfer.node_id == node_id)
        {
            debug!(request_id = %id, node_id, "orphaned transfer aborted by node");
            inner.release_transfer(id);
            return true;
        }
        false
    }
}

impl BrokerInner {
    /// Commits a resolution: removes the pending entry, cancels its
    /// timer, tears down any associated transfer, and fires the resolver.
    /// Safe to call from racing paths; the loser finds no entry.
    pub(crate) fn resolve_invoke(&mut self, id: &str, outcome: InvokeOutcome) -> bool {
        self.release_transfer(id);
        match self.pending.remove(id) {
            Some(pending) => {
                debug!(
                    request_id = %id,
                    node_id = %pending.node_id,
                    command = %pending.command,
                    ok = outcome.is_ok(),
                    "invoke resolved"
                );
                pending.resolve(outcome);
                true
            },
            None => false,
        }
    }
}

/// Arms the one-shot timeout for an invoke. On fire it performs the same
/// cleanup as an explicit abort; if the invoke already resolved this is a
/// no-op.
fn spawn_invoke_timer(
    shared: Arc<BrokerShared>,
    request_id: String,
    timeout_ms: u64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(timeout_ms)).await;
        let mut inner = shared.inner.lock().expect("lock poisoned");
        if inner.resolve_invoke(&request_id, Err(InvokeError::timeout())) {
            debug!(request_id = %request_id, timeout_ms, "invoke timed out");
        }
    })
}
