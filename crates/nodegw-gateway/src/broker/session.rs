//! Node session state.

use std::sync::Arc;
use std::time::Instant;

use nodegw_core::protocol::NodeMetadata;
use serde::Serialize;

use crate::connection::NodeConnection;

/// One live node session: the connection handle plus what the node
/// declared about itself at hello time.
pub(crate) struct NodeSession {
    /// Stable, application-chosen node id.
    pub node_id: String,
    /// Per-connection unique id assigned by the transport.
    pub conn_id: String,
    /// Send half of the duplex channel. Never used after unregister: the
    /// session owns the handle and is dropped with it.
    pub conn: Arc<dyn NodeConnection>,
    /// Declared metadata.
    pub metadata: NodeMetadata,
    /// Monotonic registration timestamp.
    pub connected_at: Instant,
}

impl NodeSession {
    /// Snapshot of this session without the connection handle.
    pub fn info(&self) -> NodeSessionInfo {
        NodeSessionInfo {
            node_id: self.node_id.clone(),
            conn_id: self.conn_id.clone(),
            metadata: self.metadata.clone(),
            connected_for_ms: u64::try_from(self.connected_at.elapsed().as_millis())
                .unwrap_or(u64::MAX),
        }
    }
}

impl std::fmt::Debug for NodeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeSession")
            .field("node_id", &self.node_id)
            .field("conn_id", &self.conn_id)
            .field("connected_at", &self.connected_at)
            .finish_non_exhaustive()
    }
}

/// Cloneable snapshot of a registered session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeSessionInfo {
    /// Stable node id.
    pub node_id: String,
    /// Per-connection unique id.
    pub conn_id: String,
    /// Declared metadata.
    pub metadata: NodeMetadata,
    /// Milliseconds since registration.
    pub connected_for_ms: u64,
}

impl NodeSessionInfo {
    /// Returns `true` if the node advertised chunked invoke results.
    #[must_use]
    pub fn supports_result_chunking(&self) -> bool {
        self.metadata.supports_result_chunking()
    }
}

/// Derives the stable node id from hello metadata: the device id when
/// present, else the client id. Returns `None` when neither is usable.
pub(crate) fn derive_node_id(metadata: &NodeMetadata) -> Option<String> {
    match metadata.device_id.as_deref() {
        Some(device_id) if !device_id.is_empty() => Some(device_id.to_string()),
        _ if !metadata.client_id.is_empty() => Some(metadata.client_id.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use nodegw_core::protocol::CHUNK_RESULT_CAPABILITY;

    use super::*;

    #[test]
    fn test_derive_node_id_prefers_device_id() {
        let metadata = NodeMetadata {
            client_id: "client-1".to_string(),
            device_id: Some("device-1".to_string()),
            ..NodeMetadata::default()
        };
        assert_eq!(derive_node_id(&metadata).as_deref(), Some("device-1"));
    }

    #[test]
    fn test_derive_node_id_falls_back_to_client_id() {
        let metadata = NodeMetadata {
            client_id: "client-1".to_string(),
            ..NodeMetadata::default()
        };
        assert_eq!(derive_node_id(&metadata).as_deref(), Some("client-1"));

        let empty_device = NodeMetadata {
            client_id: "client-1".to_string(),
            device_id: Some(String::new()),
            ..NodeMetadata::default()
        };
        assert_eq!(derive_node_id(&empty_device).as_deref(), Some("client-1"));
    }

    #[test]
    fn test_derive_node_id_rejects_empty_identity() {
        assert!(derive_node_id(&NodeMetadata::default()).is_none());
    }

    #[test]
    fn test_info_reports_chunking_capability() {
        let info = NodeSessionInfo {
            node_id: "n".to_string(),
            conn_id: "c".to_string(),
            metadata: NodeMetadata {
                client_id: "n".to_string(),
                caps: vec![CHUNK_RESULT_CAPABILITY.to_string()],
                ..NodeMetadata::default()
            },
            connected_for_ms: 0,
        };
        assert!(info.supports_result_chunking());
    }
}
