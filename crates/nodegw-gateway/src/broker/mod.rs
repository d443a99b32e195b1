//! Node-invocation broker.
//!
//! The broker coordinates three tables behind one mutex:
//!
//! ```text
//! NodeBroker
//!     ├── by_node_id / by_conn_id: live node sessions (two-way index)
//!     ├── pending:                 outstanding invokes with timers
//!     ├── transfers:               partial chunked result payloads
//!     └── inflight_bytes:          global transfer byte accounting
//! ```
//!
//! Invoke Flow:
//!     1. `invoke()` - allocate id, send request frame, register pending
//!     2. node replies - `handle_message()` routes the inbound frame
//!     3. direct reply resolves the pending entry; a chunked reply runs
//!        the transfer engine until completion synthesizes the payload
//!     4. timeout, abort, or disconnect resolves with the matching error
//!
//! # Thread Safety
//!
//! All mutation happens under a single mutex held for the duration of each
//! public operation, so inter-table transitions are atomic: no caller can
//! observe a transfer without its owning invoke, or an inflight count that
//! disagrees with the transfer table. `invoke` suspends on its resolver
//! outside the lock; inbound frame handlers never suspend.

pub mod invoke;
pub mod registry;
pub mod session;
pub mod transfer;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::warn;

pub use invoke::InvokeOptions;
pub use registry::{RegisterError, UnregisterReason};
pub use session::NodeSessionInfo;
pub use transfer::{TransferError, TransferProgress};

use nodegw_core::protocol::NodeMessage;

use crate::config::GatewayConfig;
use invoke::PendingInvoke;
use session::NodeSession;
use transfer::PendingTransfer;

/// Gateway-side broker for remote execution nodes.
///
/// Cloning is cheap and shares the same state; handlers, timers, and
/// callers all operate on one set of tables.
#[derive(Clone)]
pub struct NodeBroker {
    shared: Arc<BrokerShared>,
}

pub(crate) struct BrokerShared {
    pub(crate) config: GatewayConfig,
    pub(crate) inner: Mutex<BrokerInner>,
}

/// The mutexed tables. Only ever touched with the lock held.
#[derive(Default)]
pub(crate) struct BrokerInner {
    /// Live sessions keyed by stable node id.
    pub(crate) by_node_id: HashMap<String, NodeSession>,
    /// Connection id to node id, for O(1) unregister on transport close.
    pub(crate) by_conn_id: HashMap<String, String>,
    /// Outstanding invokes keyed by request id.
    pub(crate) pending: HashMap<String, PendingInvoke>,
    /// Partial chunked payloads keyed by request id.
    pub(crate) transfers: HashMap<String, PendingTransfer>,
    /// Sum of `total_bytes` across active transfers.
    pub(crate) inflight_bytes: u64,
}

impl NodeBroker {
    /// Creates a broker with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(GatewayConfig::default())
    }

    /// Creates a broker with the given configuration.
    #[must_use]
    pub fn with_config(config: GatewayConfig) -> Self {
        Self {
            shared: Arc::new(BrokerShared {
                config,
                inner: Mutex::new(BrokerInner::default()),
            }),
        }
    }

    /// Returns the broker configuration.
    #[must_use]
    pub fn config(&self) -> &GatewayConfig {
        &self.shared.config
    }

    /// Returns the current sum of declared bytes across active transfers.
    #[must_use]
    pub fn inflight_bytes(&self) -> u64 {
        self.lock().inflight_bytes
    }

    /// Routes one decoded inbound frame from the connection `conn_id`.
    ///
    /// The frame's `nodeId` must match the session registered for the
    /// connection; mismatches are dropped so one node cannot answer for
    /// another. Returns `true` if the frame matched broker state and was
    /// consumed.
    pub fn handle_message(&self, conn_id: &str, msg: NodeMessage) -> bool {
        let Some(node_id) = self.lock().by_conn_id.get(conn_id).cloned() else {
            warn!(
                conn_id,
                frame = msg.message_type(),
                "frame from unregistered connection dropped"
            );
            return false;
        };

        let sender_node_id = match &msg {
            NodeMessage::InvokeResult(result) => Some(&result.node_id),
            NodeMessage::InvokeResultChunk(chunk) => Some(&chunk.node_id),
            NodeMessage::InvokeResultAbort(abort) => Some(&abort.node_id),
            NodeMessage::Hello(_) | NodeMessage::InvokeRequest(_) | NodeMessage::Event(_) => None,
        };
        if let Some(sender_node_id) = sender_node_id {
            if *sender_node_id != node_id {
                warn!(
                    conn_id,
                    node_id,
                    claimed = %sender_node_id,
                    "frame node id does not match session; dropped"
                );
                return false;
            }
        }

        match msg {
            NodeMessage::InvokeResult(result) => self.handle_invoke_result(result),
            NodeMessage::InvokeResultChunk(chunk) => {
                self.handle_invoke_result_chunk(&chunk).is_ok()
            },
            NodeMessage::InvokeResultAbort(abort) => {
                self.abort_invoke_result_transfer(&abort.id, &abort.node_id, abort.error)
            },
            // Hello is consumed by the transport at handshake time, where
            // the connection handle is available for `register`.
            NodeMessage::Hello(_) => false,
            NodeMessage::InvokeRequest(_) | NodeMessage::Event(_) => {
                warn!(
                    conn_id,
                    node_id,
                    frame = msg.message_type(),
                    "unexpected inbound frame dropped"
                );
                false
            },
        }
    }

    pub(crate) fn lock(&self) -> std::sync::MutexGuard<'_, BrokerInner> {
        self.shared.inner.lock().expect("lock poisoned")
    }

    pub(crate) fn shared(&self) -> &Arc<BrokerShared> {
        &self.shared
    }
}

impl Default for NodeBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for NodeBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("NodeBroker")
            .field("sessions", &inner.by_node_id.len())
            .field("pending", &inner.pending.len())
            .field("transfers", &inner.transfers.len())
            .field("inflight_bytes", &inner.inflight_bytes)
            .finish()
    }
}
