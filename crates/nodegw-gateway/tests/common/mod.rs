//! Shared fixtures for the broker integration suites.

#![allow(dead_code)] // Each suite uses a subset of these helpers.

use std::sync::Arc;

use nodegw_core::protocol::{InvokeRequest, NodeMessage, NodeMetadata};
use nodegw_gateway::{ChannelConnection, NodeBroker};
use sha2::{Digest, Sha256};
use tokio::sync::mpsc::UnboundedReceiver;

/// Hello metadata with just enough identity to register.
pub fn metadata(client_id: &str) -> NodeMetadata {
    NodeMetadata {
        client_id: client_id.to_string(),
        ..NodeMetadata::default()
    }
}

/// Registers a channel-backed session and returns its outbound frames.
pub fn register_node(
    broker: &NodeBroker,
    conn_id: &str,
    client_id: &str,
) -> UnboundedReceiver<NodeMessage> {
    let (conn, rx) = ChannelConnection::new();
    broker
        .register(conn_id, Arc::new(conn), metadata(client_id))
        .expect("registration succeeds");
    rx
}

/// Reads the next outbound frame, expecting an invoke request.
pub async fn next_invoke_request(rx: &mut UnboundedReceiver<NodeMessage>) -> InvokeRequest {
    match rx.recv().await.expect("outbound frame") {
        NodeMessage::InvokeRequest(request) => request,
        other => panic!("expected invoke request, got {other:?}"),
    }
}

/// Lowercase hex SHA-256 of a byte string.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Splits a payload into base64 chunk bodies of at most `chunk_bytes`.
pub fn chunk_payload(payload: &[u8], chunk_bytes: usize) -> Vec<(String, u64)> {
    use base64::Engine as _;
    payload
        .chunks(chunk_bytes)
        .map(|chunk| {
            (
                base64::engine::general_purpose::STANDARD.encode(chunk),
                chunk.len() as u64,
            )
        })
        .collect()
}
