//! In-process fake transport for MCP unit and integration tests
//!
//! This module provides [`FakeTransport`] and [`FakeTransportHandle`], an
//! in-process pair that replaces real network or process I/O.
//!
//! # Usage
//!
//! Call [`FakeTransport::new`] to obtain a `(FakeTransport, FakeTransportHandle)`
//! pair. Wire the [`FakeTransport`] into the code under test. From the test
//! side, use the [`FakeTransportHandle`] to:
//!
//! - Read what the client sent: `handle.outbound_rx.recv().await`
//! - Inject server traffic: [`FakeTransportHandle::inject`]
//! - Simulate link faults: [`FakeTransportHandle::inject_error`] and
//!   [`FakeTransportHandle::close`]
//! - Answer requests automatically: [`FakeTransportHandle::serve`], with
//!   [`mcp_responder`] as a ready-made MCP server
//!
//! ```text
//! client send() -----> outbound_tx -----> outbound_rx (handle reads)
//! handle inject() ---> events.publish ---> every subscriber
//! ```
//!
//! # Example
//!
//! ```
//! use toolmesh::mcp::transport::fake::FakeTransport;
//! use toolmesh::mcp::transport::{Transport, TransportEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let (transport, mut handle) = FakeTransport::new();
//! let mut events = transport.subscribe();
//! transport.connect().await.unwrap();
//!
//! transport.send(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#.to_string()).await.unwrap();
//! assert!(handle.outbound_rx.recv().await.unwrap().contains("ping"));
//!
//! handle.inject(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#);
//! assert!(matches!(events.recv().await.unwrap(), TransportEvent::Message(_)));
//! # }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::config::ServerConfig;
use crate::error::{Result, ToolmeshError};
use crate::mcp::server::ServerKind;
use crate::mcp::transport::{Transport, TransportEvent, TransportEvents, TransportFactory};
use crate::mcp::types::{
    JsonRpcError, McpTool, JSONRPC_VERSION, LATEST_PROTOCOL_VERSION, METHOD_INITIALIZE,
    METHOD_NOT_FOUND, METHOD_PING, METHOD_PROMPTS_LIST, METHOD_RESOURCES_LIST, METHOD_TOOLS_CALL,
    METHOD_TOOLS_LIST,
};

/// In-process fake transport.
///
/// Implements the full [`Transport`] trait using in-memory channels, so the
/// protocol client can be driven without spawning processes or opening
/// sockets.
#[derive(Debug)]
pub struct FakeTransport {
    outbound_tx: mpsc::UnboundedSender<String>,
    events: TransportEvents,
    connected: Arc<AtomicBool>,
    reachable: bool,
    kind: ServerKind,
}

impl FakeTransport {
    /// Create a new `(FakeTransport, FakeTransportHandle)` pair.
    ///
    /// # Examples
    ///
    /// ```
    /// use toolmesh::mcp::transport::fake::FakeTransport;
    ///
    /// let (transport, handle) = FakeTransport::new();
    /// ```
    pub fn new() -> (Self, FakeTransportHandle) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<String>();
        let events = TransportEvents::new();
        let connected = Arc::new(AtomicBool::new(false));

        let transport = Self {
            outbound_tx,
            events: events.clone(),
            connected: Arc::clone(&connected),
            reachable: true,
            kind: ServerKind::Stream,
        };
        let handle = FakeTransportHandle {
            outbound_rx,
            link: FakeLink { events, connected },
        };
        (transport, handle)
    }

    /// A transport whose `connect` always fails, as if the peer were down.
    pub fn unreachable() -> Self {
        let (mut transport, _handle) = Self::new();
        transport.reachable = false;
        transport
    }

    /// Report `kind` from [`Transport::kind`] instead of `Stream`.
    pub fn with_kind(mut self, kind: ServerKind) -> Self {
        self.kind = kind;
        self
    }
}

/// The test-side handle for a [`FakeTransport`].
#[derive(Debug)]
pub struct FakeTransportHandle {
    /// Receives messages that the client sent via [`Transport::send`].
    pub outbound_rx: mpsc::UnboundedReceiver<String>,
    link: FakeLink,
}

/// Cloneable control over the server side of a fake link.
///
/// Obtain one with [`FakeTransportHandle::link`] to keep injecting traffic
/// or faults after the handle itself was moved into [`FakeTransportHandle::serve`].
#[derive(Debug, Clone)]
pub struct FakeLink {
    events: TransportEvents,
    connected: Arc<AtomicBool>,
}

impl FakeLink {
    /// Deliver a raw inbound message to every subscriber.
    pub fn inject(&self, raw: impl Into<String>) {
        self.events.publish(TransportEvent::Message(raw.into()));
    }

    /// Deliver a JSON value as an inbound message.
    pub fn inject_json(&self, value: &Value) {
        self.inject(value.to_string());
    }

    /// Report a link fault to every subscriber.
    pub fn inject_error(&self, message: impl Into<String>) {
        self.events.publish(TransportEvent::Error(message.into()));
    }

    /// Close the link from the server side.
    pub fn close(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.events.publish(TransportEvent::Closed);
        }
    }

    /// Whether the client side currently considers the link open.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl FakeTransportHandle {
    /// A cloneable controller for this link.
    pub fn link(&self) -> FakeLink {
        self.link.clone()
    }

    /// Deliver a raw inbound message to every subscriber.
    pub fn inject(&self, raw: impl Into<String>) {
        self.link.inject(raw);
    }

    /// Deliver a JSON value as an inbound message.
    pub fn inject_json(&self, value: &Value) {
        self.link.inject_json(value);
    }

    /// Report a link fault to every subscriber.
    pub fn inject_error(&self, message: impl Into<String>) {
        self.link.inject_error(message);
    }

    /// Close the link from the server side.
    pub fn close(&self) {
        self.link.close();
    }

    /// Whether the client side currently considers the link open.
    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    /// Answer every inbound request with `responder`.
    ///
    /// `responder` receives the method and params of each request. Returning
    /// `Some(Ok(result))` sends a success reply, `Some(Err(error))` sends an
    /// error reply, and `None` leaves the request unanswered. Notifications
    /// are swallowed. The task ends when the transport is dropped.
    pub fn serve<F>(mut self, responder: F) -> JoinHandle<()>
    where
        F: Fn(&str, &Value) -> Option<RpcOutcome> + Send + 'static,
    {
        tokio::spawn(async move {
            while let Some(raw) = self.outbound_rx.recv().await {
                let Ok(message) = serde_json::from_str::<Value>(&raw) else {
                    continue;
                };
                let (Some(id), Some(method)) = (
                    message.get("id").cloned(),
                    message.get("method").and_then(Value::as_str),
                ) else {
                    continue;
                };
                let params = message.get("params").cloned().unwrap_or(Value::Null);
                let reply = match responder(method, &params) {
                    Some(Ok(result)) => serde_json::json!({
                        "jsonrpc": JSONRPC_VERSION,
                        "id": id,
                        "result": result,
                    }),
                    Some(Err(error)) => serde_json::json!({
                        "jsonrpc": JSONRPC_VERSION,
                        "id": id,
                        "error": error,
                    }),
                    None => continue,
                };
                self.inject_json(&reply);
            }
        })
    }
}

/// What a fake server answers for one request.
pub type RpcOutcome = std::result::Result<Value, JsonRpcError>;

/// A minimal MCP server behaviour for [`FakeTransportHandle::serve`].
///
/// Answers `initialize` (advertising tools, resources, and prompts), `ping`,
/// `tools/list` with `tools`, `tools/call` by echoing the `message` argument
/// (or the whole arguments object), and empty `resources/list` and
/// `prompts/list`. Anything else gets `-32601`.
pub fn mcp_responder(
    tools: Vec<McpTool>,
) -> impl Fn(&str, &Value) -> Option<RpcOutcome> + Send + Sync + 'static {
    move |method, params| {
        let result = match method {
            METHOD_INITIALIZE => serde_json::json!({
                "protocolVersion": LATEST_PROTOCOL_VERSION,
                "capabilities": { "tools": {}, "resources": {}, "prompts": {} },
                "serverInfo": { "name": "fake", "version": "0.0.0" }
            }),
            METHOD_PING => serde_json::json!({}),
            METHOD_TOOLS_LIST => serde_json::json!({ "tools": tools }),
            METHOD_TOOLS_CALL => {
                let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
                if !tools.iter().any(|t| t.name == name) {
                    serde_json::json!({
                        "content": [{ "type": "text", "text": format!("Unknown tool: {name}") }],
                        "isError": true
                    })
                } else {
                    let args = params.get("arguments").cloned().unwrap_or(Value::Null);
                    let text = args
                        .get("message")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| args.to_string());
                    serde_json::json!({ "content": [{ "type": "text", "text": text }] })
                }
            }
            METHOD_RESOURCES_LIST => serde_json::json!({ "resources": [] }),
            METHOD_PROMPTS_LIST => serde_json::json!({ "prompts": [] }),
            other => {
                return Some(Err(JsonRpcError {
                    code: METHOD_NOT_FOUND,
                    message: format!("Method not found: {other}"),
                    data: None,
                }))
            }
        };
        Some(Ok(result))
    }
}

#[async_trait::async_trait]
impl Transport for FakeTransport {
    fn kind(&self) -> ServerKind {
        self.kind
    }

    async fn connect(&self) -> Result<()> {
        if !self.reachable {
            return Err(ToolmeshError::McpTransport(
                "FakeTransport: peer unreachable".to_string(),
            )
            .into());
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Record the outbound message so the test can read it via
    /// [`FakeTransportHandle::outbound_rx`].
    ///
    /// # Errors
    ///
    /// Returns [`ToolmeshError::McpTransport`] if the link is not open or
    /// the [`FakeTransportHandle`] was dropped.
    async fn send(&self, message: String) -> Result<()> {
        if !self.is_connected() {
            return Err(
                ToolmeshError::McpTransport("FakeTransport: not connected".to_string()).into(),
            );
        }
        self.outbound_tx.send(message).map_err(|_| {
            ToolmeshError::McpTransport("FakeTransport: outbound channel closed".to_string())
                .into()
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    async fn disconnect(&self) -> Result<()> {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.events.publish(TransportEvent::Closed);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Shared form of a responder passed to [`FakeTransportHandle::serve`].
pub type Responder = Arc<dyn Fn(&str, &Value) -> Option<RpcOutcome> + Send + Sync>;

/// [`TransportFactory`] that wires configured server ids to in-process fakes.
///
/// Servers registered with [`serve`](Self::serve) answer through their
/// responder; every other id gets an unreachable transport. `create` spawns
/// the serving task, so it must run inside a Tokio runtime.
#[derive(Clone, Default)]
pub struct FakeTransportFactory {
    responders: HashMap<String, Responder>,
    links: Arc<Mutex<HashMap<String, FakeLink>>>,
}

impl std::fmt::Debug for FakeTransportFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeTransportFactory")
            .field("servers", &self.responders.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl FakeTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer requests for server `id` with `responder`.
    pub fn serve<F>(mut self, id: impl Into<String>, responder: F) -> Self
    where
        F: Fn(&str, &Value) -> Option<RpcOutcome> + Send + Sync + 'static,
    {
        self.responders.insert(id.into(), Arc::new(responder));
        self
    }

    /// Link of the most recent transport created for `id`.
    pub fn link(&self, id: &str) -> Option<FakeLink> {
        self.links
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(id)
            .cloned()
    }
}

impl TransportFactory for FakeTransportFactory {
    fn create(&self, server: &ServerConfig) -> Result<Arc<dyn Transport>> {
        let kind = server.transport()?.kind();
        let Some(responder) = self.responders.get(&server.id).cloned() else {
            return Ok(Arc::new(FakeTransport::unreachable().with_kind(kind)));
        };

        let (transport, handle) = FakeTransport::new();
        self.links
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(server.id.clone(), handle.link());
        handle.serve(move |method, params| responder(method, params));
        Ok(Arc::new(transport.with_kind(kind)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_delivers_to_outbound_rx() {
        let (transport, mut handle) = FakeTransport::new();
        transport.connect().await.unwrap();
        transport.send("hello".to_string()).await.unwrap();
        assert_eq!(handle.outbound_rx.recv().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_send_before_connect_fails() {
        let (transport, _handle) = FakeTransport::new();
        let err = transport.send("x".to_string()).await.unwrap_err();
        assert!(err.to_string().contains("not connected"));
    }

    #[tokio::test]
    async fn test_send_errors_when_handle_dropped() {
        let (transport, handle) = FakeTransport::new();
        transport.connect().await.unwrap();
        drop(handle);
        assert!(transport.send("x".to_string()).await.is_err());
    }

    #[tokio::test]
    async fn test_injected_messages_preserve_order() {
        let (transport, handle) = FakeTransport::new();
        let mut rx = transport.subscribe();
        for i in 0..3 {
            handle.inject(format!("msg-{i}"));
        }
        for i in 0..3 {
            assert_eq!(
                rx.recv().await.unwrap(),
                TransportEvent::Message(format!("msg-{i}"))
            );
        }
    }

    #[tokio::test]
    async fn test_unreachable_connect_fails() {
        let transport = FakeTransport::unreachable();
        assert!(transport.connect().await.is_err());
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent_and_publishes_closed_once() {
        let (transport, _handle) = FakeTransport::new();
        let mut rx = transport.subscribe();
        transport.connect().await.unwrap();

        transport.disconnect().await.unwrap();
        transport.disconnect().await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), TransportEvent::Closed);
        assert!(rx.try_recv().is_err());
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_handle_close_marks_transport_disconnected() {
        let (transport, handle) = FakeTransport::new();
        transport.connect().await.unwrap();
        handle.close();
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_serve_answers_requests_and_skips_notifications() {
        let (transport, handle) = FakeTransport::new();
        let mut rx = transport.subscribe();
        transport.connect().await.unwrap();
        let _server = handle.serve(|method, _| match method {
            "ping" => Some(Ok(serde_json::json!({}))),
            _ => Some(Err(JsonRpcError {
                code: -32601,
                message: "nope".into(),
                data: None,
            })),
        });

        transport
            .send(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#.into())
            .await
            .unwrap();
        transport
            .send(r#"{"jsonrpc":"2.0","id":7,"method":"ping"}"#.into())
            .await
            .unwrap();

        let TransportEvent::Message(raw) = rx.recv().await.unwrap() else {
            panic!("expected message");
        };
        let reply: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(reply["id"], 7);
        assert!(reply.get("result").is_some());
    }

    #[test]
    fn test_fake_transport_is_object_safe() {
        let (transport, _handle) = FakeTransport::new();
        let _boxed: Box<dyn Transport> = Box::new(transport);
    }

    #[tokio::test]
    async fn test_factory_serves_registered_ids_only() {
        let factory = FakeTransportFactory::new().serve("up", mcp_responder(vec![]));
        let up = crate::config::ServerConfig::new(
            "up",
            crate::config::TransportConfig::from_locator("https://h/mcp").unwrap(),
        );
        let down = crate::config::ServerConfig::new(
            "down",
            crate::config::TransportConfig::from_locator("ws://h/mcp").unwrap(),
        );

        let served = factory.create(&up).unwrap();
        assert_eq!(served.kind(), ServerKind::RequestResponse);
        served.connect().await.unwrap();
        assert!(factory.link("up").unwrap().is_connected());

        let missing = factory.create(&down).unwrap();
        assert!(missing.connect().await.is_err());
        assert!(factory.link("down").is_none());
    }
}
