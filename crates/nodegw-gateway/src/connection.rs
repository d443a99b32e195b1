//! Abstract node connection handle.
//!
//! The broker never owns a socket. Each node session holds a
//! [`NodeConnection`] that enqueues one structured frame at a time; the
//! transport layer behind it owns framing, backpressure, and teardown.
//! Receiving is the transport's job too: it decodes inbound frames and
//! feeds them to [`NodeBroker::handle_message`].
//!
//! [`NodeBroker::handle_message`]: crate::broker::NodeBroker::handle_message

use nodegw_core::protocol::NodeMessage;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors raised when enqueueing a frame on a connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ConnectionError {
    /// The connection is closed; the frame was not enqueued.
    #[error("connection closed")]
    Closed,

    /// The transport rejected the frame.
    #[error("send failed: {message}")]
    SendFailed {
        /// Transport-provided detail.
        message: String,
    },
}

/// One live duplex channel to a remote node, send half.
///
/// `send` enqueues without suspending; delivery ordering matches call
/// ordering for a single connection. Implementations must tolerate being
/// called from multiple tasks concurrently.
pub trait NodeConnection: Send + Sync {
    /// Enqueues one frame for delivery to the node.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`] if the frame could not be enqueued;
    /// the frame is dropped in that case, never partially sent.
    fn send(&self, msg: &NodeMessage) -> Result<(), ConnectionError>;
}

/// Channel-backed [`NodeConnection`] for in-process transports and tests.
///
/// Frames are cloned into an unbounded queue; the paired receiver is the
/// outbound frame stream the transport drains toward the node.
#[derive(Debug, Clone)]
pub struct ChannelConnection {
    tx: mpsc::UnboundedSender<NodeMessage>,
}

impl ChannelConnection {
    /// Creates a connection and the receiver draining its outbound frames.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<NodeMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl NodeConnection for ChannelConnection {
    fn send(&self, msg: &NodeMessage) -> Result<(), ConnectionError> {
        self.tx
            .send(msg.clone())
            .map_err(|_| ConnectionError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use nodegw_core::protocol::{NodeEvent, NodeMessage};

    use super::*;

    fn event(name: &str) -> NodeMessage {
        NodeMessage::Event(NodeEvent {
            event: name.to_string(),
            payload: None,
        })
    }

    #[tokio::test]
    async fn test_channel_connection_delivers_in_order() {
        let (conn, mut rx) = ChannelConnection::new();

        conn.send(&event("first")).unwrap();
        conn.send(&event("second")).unwrap();

        assert_eq!(rx.recv().await.unwrap(), event("first"));
        assert_eq!(rx.recv().await.unwrap(), event("second"));
    }

    #[tokio::test]
    async fn test_send_after_receiver_dropped_is_closed() {
        let (conn, rx) = ChannelConnection::new();
        drop(rx);

        assert_eq!(conn.send(&event("late")), Err(ConnectionError::Closed));
    }
}
