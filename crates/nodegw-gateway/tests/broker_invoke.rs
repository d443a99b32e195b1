//! Invocation lifecycle: direct replies, timeouts, disconnects, and the
//! registry semantics they depend on.

mod common;

use std::sync::Arc;

use nodegw_core::protocol::{ErrorCode, InvokeResult, NodeMessage, NodeMetadata};
use nodegw_gateway::broker::InvokeOptions;
use nodegw_gateway::{ChannelConnection, NodeBroker};
use serde_json::json;

fn direct_reply(id: &str, node_id: &str, payload_json: &str) -> InvokeResult {
    InvokeResult {
        id: id.to_string(),
        node_id: node_id.to_string(),
        ok: true,
        payload: None,
        payload_json: Some(payload_json.to_string()),
        payload_transfer: None,
        error: None,
    }
}

// =============================================================================
// Direct invoke
// =============================================================================

/// A registered node answers an invoke directly; the caller observes the
/// serialized payload untouched.
#[tokio::test]
async fn test_direct_invoke_success() {
    let broker = NodeBroker::new();
    let mut rx = common::register_node(&broker, "conn-1", "node-1");

    let invoker = broker.clone();
    let call = tokio::spawn(async move {
        invoker
            .invoke_with(
                "node-1",
                "system.run",
                Some(json!({ "cmd": "echo ok" })),
                InvokeOptions::default().with_timeout_ms(5000),
            )
            .await
    });

    let request = common::next_invoke_request(&mut rx).await;
    assert_eq!(request.node_id, "node-1");
    assert_eq!(request.command, "system.run");
    assert_eq!(
        request.params_json.as_deref(),
        Some(r#"{"cmd":"echo ok"}"#)
    );
    assert_eq!(request.timeout_ms, Some(5000));

    let handled = broker.handle_invoke_result(direct_reply(
        &request.id,
        "node-1",
        r#"{"ok":true,"value":"hello"}"#,
    ));
    assert!(handled);

    let payload = call.await.unwrap().expect("invoke succeeds");
    assert_eq!(
        payload.as_serialized(),
        Some(r#"{"ok":true,"value":"hello"}"#)
    );
}

/// An invoke against an unknown node fails immediately, without a frame.
#[tokio::test]
async fn test_invoke_unknown_node_is_not_connected() {
    let broker = NodeBroker::new();

    let error = broker
        .invoke("node-absent", "system.run", None)
        .await
        .unwrap_err();
    assert_eq!(error.code, ErrorCode::NotConnected);
}

/// A node-reported failure is surfaced to the caller verbatim.
#[tokio::test]
async fn test_invoke_remote_error_surfaced() {
    let broker = NodeBroker::new();
    let mut rx = common::register_node(&broker, "conn-1", "node-1");

    let invoker = broker.clone();
    let call =
        tokio::spawn(async move { invoker.invoke("node-1", "camera.snap", None).await });
    let request = common::next_invoke_request(&mut rx).await;

    let mut reply = direct_reply(&request.id, "node-1", "");
    reply.ok = false;
    reply.payload_json = None;
    reply.error = Some(nodegw_core::protocol::InvokeError::new(
        ErrorCode::Unavailable,
        "camera busy",
    ));
    assert!(broker.handle_invoke_result(reply));

    let error = call.await.unwrap().unwrap_err();
    assert_eq!(error.code, ErrorCode::Unavailable);
    assert_eq!(error.message.as_deref(), Some("camera busy"));
}

/// A send failure on the connection maps to UNAVAILABLE and leaves no
/// pending state behind.
#[tokio::test]
async fn test_invoke_send_failure_is_unavailable() {
    let broker = NodeBroker::new();
    let (conn, rx) = ChannelConnection::new();
    broker
        .register("conn-1", Arc::new(conn), common::metadata("node-1"))
        .unwrap();
    drop(rx); // Transport gone: every send now fails.

    let error = broker.invoke("node-1", "system.run", None).await.unwrap_err();
    assert_eq!(error.code, ErrorCode::Unavailable);
    assert_eq!(error.message.as_deref(), Some("failed to send invoke to node"));
}

// =============================================================================
// Resolver exactly-once and reply validation
// =============================================================================

/// A reply for an unknown request id is silently discarded.
#[tokio::test]
async fn test_unknown_request_id_discarded() {
    let broker = NodeBroker::new();
    let _rx = common::register_node(&broker, "conn-1", "node-1");

    assert!(!broker.handle_invoke_result(direct_reply("no-such-id", "node-1", "{}")));
}

/// A reply claiming the wrong node id is rejected; the true reply still
/// resolves the caller afterwards.
#[tokio::test]
async fn test_cross_node_reply_rejected() {
    let broker = NodeBroker::new();
    let mut rx = common::register_node(&broker, "conn-1", "node-1");
    let _rx2 = common::register_node(&broker, "conn-2", "node-2");

    let invoker = broker.clone();
    let call = tokio::spawn(async move { invoker.invoke("node-1", "system.run", None).await });
    let request = common::next_invoke_request(&mut rx).await;

    // node-2 must not be able to answer node-1's invoke.
    assert!(!broker.handle_invoke_result(direct_reply(&request.id, "node-2", "{}")));

    assert!(broker.handle_invoke_result(direct_reply(&request.id, "node-1", r#"{"ok":true}"#)));
    let payload = call.await.unwrap().unwrap();
    assert_eq!(payload.as_serialized(), Some(r#"{"ok":true}"#));
}

/// Only the first resolution counts; a duplicate reply finds nothing.
#[tokio::test]
async fn test_duplicate_reply_is_noop() {
    let broker = NodeBroker::new();
    let mut rx = common::register_node(&broker, "conn-1", "node-1");

    let invoker = broker.clone();
    let call = tokio::spawn(async move { invoker.invoke("node-1", "system.run", None).await });
    let request = common::next_invoke_request(&mut rx).await;

    assert!(broker.handle_invoke_result(direct_reply(&request.id, "node-1", "1")));
    assert!(!broker.handle_invoke_result(direct_reply(&request.id, "node-1", "2")));

    assert_eq!(call.await.unwrap().unwrap().as_serialized(), Some("1"));
}

// =============================================================================
// Timeout
// =============================================================================

/// An unanswered invoke resolves with TIMEOUT at its deadline.
#[tokio::test(start_paused = true)]
async fn test_invoke_timeout() {
    let broker = NodeBroker::new();
    let mut rx = common::register_node(&broker, "conn-1", "node-1");

    let invoker = broker.clone();
    let call = tokio::spawn(async move {
        invoker
            .invoke_with(
                "node-1",
                "system.run",
                None,
                InvokeOptions::default().with_timeout_ms(5000),
            )
            .await
    });
    let request = common::next_invoke_request(&mut rx).await;

    // No reply: the paused clock advances to the deadline.
    let error = call.await.unwrap().unwrap_err();
    assert_eq!(error.code, ErrorCode::Timeout);

    // A late reply finds no pending entry.
    assert!(!broker.handle_invoke_result(direct_reply(&request.id, "node-1", "{}")));
}

// =============================================================================
// Disconnect and replacement
// =============================================================================

/// Unregistering the connection mid-invoke resolves the caller with
/// NOT_CONNECTED and leaves no pending state.
#[tokio::test]
async fn test_disconnect_mid_invoke() {
    let broker = NodeBroker::new();
    let mut rx = common::register_node(&broker, "conn-1", "node-1");

    let invoker = broker.clone();
    let call = tokio::spawn(async move { invoker.invoke("node-1", "system.run", None).await });
    let request = common::next_invoke_request(&mut rx).await;

    assert_eq!(broker.unregister("conn-1").as_deref(), Some("node-1"));

    let error = call.await.unwrap().unwrap_err();
    assert_eq!(error.code, ErrorCode::NotConnected);
    assert_eq!(error.message.as_deref(), Some("node disconnected"));

    assert!(broker.get("node-1").is_none());
    assert!(!broker.handle_invoke_result(direct_reply(&request.id, "node-1", "{}")));
}

/// Re-registering the same node id replaces the prior session: the old
/// session's invoke fails, and new traffic flows to the new connection.
#[tokio::test]
async fn test_replacement_tears_down_prior_session() {
    let broker = NodeBroker::new();
    let mut rx_old = common::register_node(&broker, "conn-old", "node-1");

    let invoker = broker.clone();
    let call = tokio::spawn(async move { invoker.invoke("node-1", "system.run", None).await });
    let _request = common::next_invoke_request(&mut rx_old).await;

    let mut rx_new = common::register_node(&broker, "conn-new", "node-1");

    let error = call.await.unwrap().unwrap_err();
    assert_eq!(error.code, ErrorCode::NotConnected);

    // The registry kept exactly one session, on the new connection.
    let sessions = broker.list_connected();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].conn_id, "conn-new");

    // Unregistering the stale connection id is a no-op now.
    assert!(broker.unregister("conn-old").is_none());

    assert!(broker.send_event("node-1", "agent.notice", Some(json!({ "n": 1 }))));
    match rx_new.recv().await.unwrap() {
        NodeMessage::Event(event) => assert_eq!(event.event, "agent.notice"),
        other => panic!("expected event, got {other:?}"),
    }
}

// =============================================================================
// Registry surface
// =============================================================================

/// Device id wins over client id when both are present.
#[tokio::test]
async fn test_register_derives_node_id_from_device_id() {
    let broker = NodeBroker::new();
    let (conn, _rx) = ChannelConnection::new();
    let info = broker
        .register(
            "conn-1",
            Arc::new(conn),
            NodeMetadata {
                client_id: "client-1".to_string(),
                device_id: Some("device-1".to_string()),
                ..NodeMetadata::default()
            },
        )
        .unwrap();

    assert_eq!(info.node_id, "device-1");
    assert!(broker.get("device-1").is_some());
    assert!(broker.get("client-1").is_none());
}

/// Metadata with no identity at all cannot register.
#[tokio::test]
async fn test_register_rejects_missing_identity() {
    let broker = NodeBroker::new();
    let (conn, _rx) = ChannelConnection::new();
    assert!(
        broker
            .register("conn-1", Arc::new(conn), NodeMetadata::default())
            .is_err()
    );
    assert!(broker.list_connected().is_empty());
}

/// send_event is best-effort: false for absent nodes and dead transports.
#[tokio::test]
async fn test_send_event_best_effort() {
    let broker = NodeBroker::new();
    assert!(!broker.send_event("node-absent", "ping", None));

    let (conn, rx) = ChannelConnection::new();
    broker
        .register("conn-1", Arc::new(conn), common::metadata("node-1"))
        .unwrap();
    drop(rx);
    assert!(!broker.send_event("node-1", "ping", None));
}

/// handle_message routes frames by connection and enforces that the
/// frame's node id matches the session that sent it.
#[tokio::test]
async fn test_handle_message_routing_and_spoof_guard() {
    let broker = NodeBroker::new();
    let mut rx = common::register_node(&broker, "conn-1", "node-1");
    let _rx2 = common::register_node(&broker, "conn-2", "node-2");

    let invoker = broker.clone();
    let call = tokio::spawn(async move { invoker.invoke("node-1", "system.run", None).await });
    let request = common::next_invoke_request(&mut rx).await;

    // A frame from an unregistered connection is dropped.
    assert!(!broker.handle_message(
        "conn-unknown",
        NodeMessage::InvokeResult(direct_reply(&request.id, "node-1", "{}")),
    ));
    // node-2's connection cannot carry node-1's reply.
    assert!(!broker.handle_message(
        "conn-2",
        NodeMessage::InvokeResult(direct_reply(&request.id, "node-1", "{}")),
    ));
    // The owning connection resolves it.
    assert!(broker.handle_message(
        "conn-1",
        NodeMessage::InvokeResult(direct_reply(&request.id, "node-1", r#"{"done":1}"#)),
    ));

    assert_eq!(
        call.await.unwrap().unwrap().as_serialized(),
        Some(r#"{"done":1}"#)
    );
}
