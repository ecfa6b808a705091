//! MCP session integration tests
//!
//! Drives `McpProtocol` over the in-process `FakeTransport`, playing the
//! server by hand so reply order and timing are under test control.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use toolmesh::error::ToolmeshError;
use toolmesh::mcp::protocol::{McpProtocol, SessionState};
use toolmesh::mcp::server::{ServerDescriptor, ServerKind};
use toolmesh::mcp::transport::fake::{FakeTransport, FakeTransportHandle};
use toolmesh::mcp::types::{LATEST_PROTOCOL_VERSION, NOTIF_TOOLS_LIST_CHANGED};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn next_message(handle: &mut FakeTransportHandle) -> Value {
    let raw = tokio::time::timeout(Duration::from_secs(5), handle.outbound_rx.recv())
        .await
        .expect("timed out waiting for outbound message")
        .expect("outbound channel closed");
    serde_json::from_str(&raw).expect("invalid JSON in outbound")
}

fn reply(handle: &FakeTransportHandle, id: &Value, result: Value) {
    handle.inject_json(&json!({ "jsonrpc": "2.0", "id": id, "result": result }));
}

/// A session that completed the handshake, plus the server side of its link.
async fn ready_session(timeout: Duration) -> (Arc<McpProtocol>, FakeTransportHandle) {
    let (transport, mut handle) = FakeTransport::new();
    let session = Arc::new(McpProtocol::new(
        ServerDescriptor::remote("srv", "Server", Some("ws://srv/mcp".into()), ServerKind::Stream),
        Arc::new(transport),
        timeout,
    ));

    let connecting = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.connect().await })
    };

    let init = next_message(&mut handle).await;
    assert_eq!(init["method"], "initialize");
    assert_eq!(init["params"]["protocolVersion"], LATEST_PROTOCOL_VERSION);
    reply(
        &handle,
        &init["id"],
        json!({
            "protocolVersion": LATEST_PROTOCOL_VERSION,
            "capabilities": { "tools": {} },
            "serverInfo": { "name": "hand-driven", "version": "1.0.0" }
        }),
    );
    connecting.await.unwrap().unwrap();

    let initialized = next_message(&mut handle).await;
    assert_eq!(initialized["method"], "notifications/initialized");
    assert!(initialized.get("id").is_none());

    (session, handle)
}

fn spawn_call(
    session: &Arc<McpProtocol>,
    message: &str,
) -> tokio::task::JoinHandle<anyhow::Result<String>> {
    let session = Arc::clone(session);
    let message = message.to_string();
    tokio::spawn(async move {
        let result = session
            .call_tool("echo", Some(json!({ "message": message })))
            .await?;
        Ok(result.text_content())
    })
}

fn toolmesh_error(err: &anyhow::Error) -> &ToolmeshError {
    err.downcast_ref::<ToolmeshError>()
        .expect("error should be a ToolmeshError")
}

// ---------------------------------------------------------------------------
// Correlation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_handshake_records_server_identity() {
    let (session, _handle) = ready_session(Duration::from_secs(5)).await;
    assert_eq!(session.state(), SessionState::Ready);
    let descriptor = session.descriptor();
    assert!(descriptor.connected);
    assert_eq!(descriptor.server_info.unwrap().name, "hand-driven");
    assert_eq!(session.protocol_version().as_deref(), Some(LATEST_PROTOCOL_VERSION));
}

#[tokio::test]
async fn test_reordered_replies_reach_their_callers() {
    let (session, mut handle) = ready_session(Duration::from_secs(5)).await;

    let calls: Vec<_> = ["first", "second", "third"]
        .iter()
        .map(|m| spawn_call(&session, m))
        .collect();

    let mut requests = Vec::new();
    for _ in 0..3 {
        requests.push(next_message(&mut handle).await);
    }
    let ids: Vec<u64> = requests.iter().map(|r| r["id"].as_u64().unwrap()).collect();
    assert!(ids.windows(2).all(|w| w[0] < w[1]), "ids must increase: {ids:?}");

    // Answer third, first, second; each reply echoes its own request.
    for index in [2, 0, 1] {
        let request = &requests[index];
        let text = request["params"]["arguments"]["message"].clone();
        reply(
            &handle,
            &request["id"],
            json!({ "content": [{ "type": "text", "text": text }] }),
        );
    }

    let mut results = Vec::new();
    for call in calls {
        results.push(call.await.unwrap().unwrap());
    }
    assert_eq!(results, vec!["first", "second", "third"]);
    assert_eq!(session.pending_count().await, 0);
}

#[tokio::test]
async fn test_peer_error_rejects_only_its_own_request() {
    let (session, mut handle) = ready_session(Duration::from_secs(5)).await;

    let failing = spawn_call(&session, "a");
    let first = next_message(&mut handle).await;
    let succeeding = spawn_call(&session, "b");
    let second = next_message(&mut handle).await;

    handle.inject_json(&json!({
        "jsonrpc": "2.0",
        "id": first["id"],
        "error": { "code": -32602, "message": "bad arguments" }
    }));
    reply(
        &handle,
        &second["id"],
        json!({ "content": [{ "type": "text", "text": "b" }] }),
    );

    let err = failing.await.unwrap().unwrap_err();
    assert!(matches!(
        toolmesh_error(&err),
        ToolmeshError::Mcp { code: -32602, .. }
    ));
    assert_eq!(succeeding.await.unwrap().unwrap(), "b");
    assert!(session.is_connected());
}

#[tokio::test]
async fn test_unmatched_reply_is_dropped() {
    let (session, mut handle) = ready_session(Duration::from_secs(5)).await;

    reply(&handle, &json!(9999), json!({ "stray": true }));

    let call = spawn_call(&session, "still fine");
    let request = next_message(&mut handle).await;
    reply(
        &handle,
        &request["id"],
        json!({ "content": [{ "type": "text", "text": "still fine" }] }),
    );
    assert_eq!(call.await.unwrap().unwrap(), "still fine");
}

// ---------------------------------------------------------------------------
// Timeouts and teardown
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_timeout_removes_pending_entry() {
    let (session, mut handle) = ready_session(Duration::from_millis(100)).await;

    let call = spawn_call(&session, "never answered");
    let request = next_message(&mut handle).await;

    let err = call.await.unwrap().unwrap_err();
    match toolmesh_error(&err) {
        ToolmeshError::McpTimeout { server, method } => {
            assert_eq!(server, "srv");
            assert_eq!(method, "tools/call");
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    assert_eq!(session.pending_count().await, 0);

    // A late reply for the expired id changes nothing.
    reply(&handle, &request["id"], json!({ "content": [] }));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(session.is_connected());
    assert_eq!(session.pending_count().await, 0);
}

#[tokio::test]
async fn test_disconnect_rejects_every_outstanding_request() {
    let (session, mut handle) = ready_session(Duration::from_secs(5)).await;

    let calls: Vec<_> = (0..3).map(|i| spawn_call(&session, &i.to_string())).collect();
    for _ in 0..3 {
        next_message(&mut handle).await;
    }
    assert_eq!(session.pending_count().await, 3);

    session.disconnect().await.unwrap();

    for call in calls {
        let err = call.await.unwrap().unwrap_err();
        assert!(
            matches!(toolmesh_error(&err), ToolmeshError::ConnectionLost(_)),
            "unexpected error: {err}"
        );
    }
    assert_eq!(session.pending_count().await, 0);
    assert_eq!(session.state(), SessionState::Closed);
    assert!(!session.descriptor().connected);
}

#[tokio::test]
async fn test_link_close_fails_pending_and_closes_session() {
    let (session, mut handle) = ready_session(Duration::from_secs(5)).await;

    let call = spawn_call(&session, "lost");
    next_message(&mut handle).await;
    handle.close();

    let err = call.await.unwrap().unwrap_err();
    assert!(matches!(toolmesh_error(&err), ToolmeshError::ConnectionLost(_)));

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(session.state(), SessionState::Closed);
    let after = session.list_tools().await.unwrap_err();
    assert!(matches!(toolmesh_error(&after), ToolmeshError::NotInitialized(_)));
}

// ---------------------------------------------------------------------------
// Unsolicited traffic
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_notifications_reach_every_handler() {
    let (session, handle) = ready_session(Duration::from_secs(5)).await;

    let fired = Arc::new(AtomicUsize::new(0));
    for _ in 0..2 {
        let fired = Arc::clone(&fired);
        session.on_notification(NOTIF_TOOLS_LIST_CHANGED, move |_| {
            fired.fetch_add(1, Ordering::SeqCst);
        });
    }

    handle.inject_json(&json!({ "jsonrpc": "2.0", "method": "notifications/unknown" }));
    handle.inject_json(&json!({ "jsonrpc": "2.0", "method": NOTIF_TOOLS_LIST_CHANGED }));
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(fired.load(Ordering::SeqCst), 2);
    assert!(session.is_connected());
}

#[tokio::test]
async fn test_server_request_is_answered_method_not_found() {
    let (_session, mut handle) = ready_session(Duration::from_secs(5)).await;

    handle.inject_json(&json!({
        "jsonrpc": "2.0",
        "id": "srv-1",
        "method": "sampling/createMessage",
        "params": {}
    }));

    let answer = next_message(&mut handle).await;
    assert_eq!(answer["id"], "srv-1");
    assert_eq!(answer["error"]["code"], -32601);
}

#[tokio::test]
async fn test_garbage_inbound_is_ignored() {
    let (session, handle) = ready_session(Duration::from_secs(5)).await;
    handle.inject("this is not json");
    handle.inject_json(&json!({ "jsonrpc": "2.0" }));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(session.is_connected());
}
