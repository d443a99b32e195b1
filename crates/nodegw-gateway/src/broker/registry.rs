//! Node registry: the two-way session index and its lifecycle.
//!
//! The registry keeps `by_node_id` and `by_conn_id` in lockstep so a
//! transport close event, which only knows its connection id, can
//! unregister in O(1). After any mutation the two indexes satisfy: every
//! node-id entry is pointed at by exactly one connection-id entry, and
//! every connection-id entry whose node still exists points at a session
//! carrying that same connection id.

use std::sync::Arc;

use nodegw_core::protocol::{InvokeError, NodeEvent, NodeMessage, NodeMetadata};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::session::{NodeSession, NodeSessionInfo, derive_node_id};
use super::{BrokerInner, NodeBroker};
use crate::connection::NodeConnection;

/// Why a session left the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnregisterReason {
    /// The transport closed the connection.
    Disconnected,
    /// A newer session registered with the same node id.
    Replaced,
}

impl UnregisterReason {
    /// Returns the reason as a string identifier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Replaced => "replaced",
        }
    }
}

/// Errors raised while registering a session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum RegisterError {
    /// The hello metadata carried neither a device id nor a client id.
    #[error("metadata carries neither device id nor client id")]
    MissingNodeIdentity,
}

impl NodeBroker {
    /// Registers a node session for a freshly handshaken connection.
    ///
    /// The node id is derived from the metadata (device id if present,
    /// else client id). A prior session with the same node id is
    /// unregistered first, the newcomer wins: the old session's pending
    /// invokes and transfers are torn down with `NOT_CONNECTED` failures.
    ///
    /// # Errors
    ///
    /// Returns [`RegisterError::MissingNodeIdentity`] if no node id can be
    /// derived from the metadata.
    pub fn register(
        &self,
        conn_id: impl Into<String>,
        conn: Arc<dyn NodeConnection>,
        metadata: NodeMetadata,
    ) -> Result<NodeSessionInfo, RegisterError> {
        let conn_id = conn_id.into();
        let node_id = derive_node_id(&metadata).ok_or(RegisterError::MissingNodeIdentity)?;

        let mut inner = self.lock();

        if let Some(prior_conn) = inner
            .by_node_id
            .get(&node_id)
            .map(|session| session.conn_id.clone())
        {
            inner.unregister_conn(&prior_conn, UnregisterReason::Replaced);
        }
        // A connection that re-sends hello sheds its previous identity too.
        if inner.by_conn_id.contains_key(&conn_id) {
            inner.unregister_conn(&conn_id, UnregisterReason::Replaced);
        }

        let session = NodeSession {
            node_id: node_id.clone(),
            conn_id: conn_id.clone(),
            conn,
            metadata,
            connected_at: std::time::Instant::now(),
        };
        let session_info = session.info();
        inner.by_conn_id.insert(conn_id.clone(), node_id.clone());
        inner.by_node_id.insert(node_id.clone(), session);
        inner.check_index_invariant();

        info!(node_id = %node_id, conn_id = %conn_id, "node session registered");
        Ok(session_info)
    }

    /// Unregisters the session owning `conn_id`, if any.
    ///
    /// Every pending invoke targeting the departed node is resolved with
    /// `NOT_CONNECTED`, and every transfer it owned is torn down with its
    /// bytes freed, before this call returns. Returns the node id that
    /// left the registry.
    pub fn unregister(&self, conn_id: &str) -> Option<String> {
        let mut inner = self.lock();
        let node_id = inner.unregister_conn(conn_id, UnregisterReason::Disconnected);
        inner.check_index_invariant();
        node_id
    }

    /// Returns a snapshot of the session registered for `node_id`.
    #[must_use]
    pub fn get(&self, node_id: &str) -> Option<NodeSessionInfo> {
        self.lock().by_node_id.get(node_id).map(NodeSession::info)
    }

    /// Returns a snapshot of all registered sessions, ordered by node id.
    #[must_use]
    pub fn list_connected(&self) -> Vec<NodeSessionInfo> {
        let inner = self.lock();
        let mut sessions: Vec<NodeSessionInfo> =
            inner.by_node_id.values().map(NodeSession::info).collect();
        sessions.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        sessions
    }

    /// Sends a fire-and-forget event to a node.
    ///
    /// Best-effort: returns `false` if the node is absent or the send was
    /// rejected; the failure is logged and swallowed.
    pub fn send_event(&self, node_id: &str, event: &str, payload: Option<Value>) -> bool {
        let inner = self.lock();
        let Some(session) = inner.by_node_id.get(node_id) else {
            debug!(node_id, event, "event for unknown node dropped");
            return false;
        };

        let frame = NodeMessage::Event(NodeEvent {
            event: event.to_string(),
            payload,
        });
        match session.conn.send(&frame) {
            Ok(()) => true,
            Err(error) => {
                warn!(node_id, event, %error, "event send failed");
                false
            },
        }
    }
}

impl BrokerInner {
    /// Removes the session for `conn_id` from both indexes and tears down
    /// everything it owned. The single mutation point for session removal.
    pub(crate) fn unregister_conn(
        &mut self,
        conn_id: &str,
        reason: UnregisterReason,
    ) -> Option<String> {
        let node_id = self.by_conn_id.remove(conn_id)?;
        match self.by_node_id.get(&node_id) {
            Some(session) if session.conn_id == conn_id => {
                self.by_node_id.remove(&node_id);
            },
            // The node id already points at a newer connection; leave it.
            _ => {},
        }

        let departed: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, pending)| pending.node_id == node_id)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &departed {
            self.resolve_invoke(id, Err(InvokeError::not_connected()));
        }

        let orphaned: Vec<String> = self
            .transfers
            .iter()
            .filter(|(_, transfer)| transfer.node_id == node_id)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &orphaned {
            self.release_transfer(id);
        }

        info!(
            node_id = %node_id,
            conn_id,
            reason = reason.as_str(),
            failed_invokes = departed.len(),
            "node session unregistered"
        );
        Some(node_id)
    }

    /// Asserts the two-index equivalence in debug builds.
    pub(crate) fn check_index_invariant(&self) {
        #[cfg(debug_assertions)]
        {
            let backrefs = self
                .by_conn_id
                .values()
                .filter(|node_id| self.by_node_id.contains_key(*node_id))
                .count();
            debug_assert_eq!(self.by_node_id.len(), backrefs, "session indexes diverged");
            for (node_id, session) in &self.by_node_id {
                debug_assert_eq!(
                    self.by_conn_id.get(&session.conn_id),
                    Some(node_id),
                    "session {node_id} not indexed by its connection"
                );
            }
        }
    }
}
