//! Transport-agnostic async JSON-RPC 2.0 client
//!
//! [`JsonRpcClient`] sends requests through a [`Transport`] and correlates
//! replies by id. A background read loop ([`start_read_loop`]) consumes the
//! transport's event subscription and:
//!
//! - resolves the matching pending request for every response,
//! - fans notifications out to every registered handler,
//! - answers server-initiated requests with `-32601 Method not found`,
//! - fails every pending request when the link reports an error or closes.
//!
//! In-flight requests live in a `pending` map keyed by `u64` id. An entry is
//! inserted before the request is written and removed exactly once: by its
//! reply, by its timeout, by a send failure, or by a link teardown.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, ToolmeshError};
use crate::mcp::transport::{Transport, TransportEvent};
use crate::mcp::types::{
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, INTERNAL_ERROR, JSONRPC_VERSION,
    METHOD_NOT_FOUND,
};

/// Default timeout applied to requests when the caller has no better value.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Why a pending request finished without a result.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyError {
    /// The peer answered with a JSON-RPC error object.
    Rpc(JsonRpcError),
    /// The link went away before a reply arrived.
    ConnectionLost(String),
}

type Reply = std::result::Result<Value, ReplyError>;

type PendingMap = HashMap<u64, oneshot::Sender<Reply>>;

/// Called with the raw `params` of a matching server notification.
pub type NotificationHandler = Arc<dyn Fn(Value) + Send + Sync + 'static>;

/// Async JSON-RPC 2.0 client bound to one transport.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use tokio_util::sync::CancellationToken;
/// use toolmesh::mcp::client::{start_read_loop, JsonRpcClient};
/// use toolmesh::mcp::transport::fake::FakeTransport;
/// use toolmesh::mcp::transport::Transport;
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let (transport, _handle) = FakeTransport::new();
/// let transport: Arc<dyn Transport> = Arc::new(transport);
/// let events = transport.subscribe();
/// transport.connect().await?;
///
/// let client = Arc::new(JsonRpcClient::new("demo", Arc::clone(&transport)));
/// let _loop = start_read_loop(events, CancellationToken::new(), Arc::clone(&client), |_| {});
/// let _pong: serde_json::Value = client.request("ping", None::<()>, Duration::from_secs(1)).await?;
/// # Ok(())
/// # }
/// ```
pub struct JsonRpcClient {
    server_id: String,
    transport: Arc<dyn Transport>,
    next_id: AtomicU64,
    pending: Mutex<PendingMap>,
    notification_handlers: std::sync::RwLock<HashMap<String, Vec<NotificationHandler>>>,
}

impl std::fmt::Debug for JsonRpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonRpcClient")
            .field("server_id", &self.server_id)
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl JsonRpcClient {
    /// Create a client for `server_id` writing through `transport`.
    ///
    /// Request ids start at 1.
    pub fn new(server_id: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            server_id: server_id.into(),
            transport,
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            notification_handlers: std::sync::RwLock::new(HashMap::new()),
        }
    }

    /// Server id used in error messages.
    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// The transport this client writes to.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Send a JSON-RPC request and await the typed result.
    ///
    /// # Errors
    ///
    /// - [`ToolmeshError::McpTransport`] if the transport rejects the write.
    /// - [`ToolmeshError::McpTimeout`] if no reply arrives within `timeout`.
    /// - [`ToolmeshError::Mcp`] if the server answers with an error object.
    /// - [`ToolmeshError::ConnectionLost`] if the link drops first.
    /// - [`ToolmeshError::Serialization`] if the result does not decode as `R`.
    pub async fn request<P, R>(&self, method: &str, params: Option<P>, timeout: Duration) -> Result<R>
    where
        P: serde::Serialize + Send,
        R: serde::de::DeserializeOwned,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let params = params.map(serde_json::to_value).transpose()?;
        let message = serde_json::to_string(&JsonRpcRequest::new(Value::from(id), method, params))?;

        // Register before sending so a fast reply always finds its slot.
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        if let Err(e) = self.transport.send(message).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        let reply = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => {
                return Err(ToolmeshError::ConnectionLost(format!(
                    "request '{}' to '{}' was abandoned",
                    method, self.server_id
                ))
                .into())
            }
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(ToolmeshError::McpTimeout {
                    server: self.server_id.clone(),
                    method: method.to_string(),
                }
                .into());
            }
        };

        match reply {
            Ok(value) => serde_json::from_value(value).map_err(|e| ToolmeshError::Serialization(e).into()),
            Err(ReplyError::Rpc(e)) => Err(ToolmeshError::Mcp {
                code: e.code,
                message: e.message,
            }
            .into()),
            Err(ReplyError::ConnectionLost(reason)) => Err(ToolmeshError::ConnectionLost(reason).into()),
        }
    }

    /// Send a JSON-RPC notification. No reply is expected or awaited.
    ///
    /// # Errors
    ///
    /// Returns [`ToolmeshError::McpTransport`] if the transport rejects the
    /// write.
    pub async fn notify<P: serde::Serialize + Send>(&self, method: &str, params: Option<P>) -> Result<()> {
        let mut message = serde_json::json!({
            "jsonrpc": JSONRPC_VERSION,
            "method": method,
        });
        if let Some(params) = params {
            message["params"] = serde_json::to_value(params)?;
        }
        self.transport.send(serde_json::to_string(&message)?).await
    }

    /// Register a handler for a server-sent notification.
    ///
    /// Every handler registered for a method runs, in registration order.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    /// use toolmesh::mcp::client::JsonRpcClient;
    /// use toolmesh::mcp::transport::fake::FakeTransport;
    /// use toolmesh::mcp::types::NOTIF_TOOLS_LIST_CHANGED;
    ///
    /// let (transport, _handle) = FakeTransport::new();
    /// let client = JsonRpcClient::new("demo", Arc::new(transport));
    /// client.on_notification(NOTIF_TOOLS_LIST_CHANGED, |_params| {
    ///     // refresh tool list
    /// });
    /// ```
    pub fn on_notification(
        &self,
        method: impl Into<String>,
        f: impl Fn(Value) + Send + Sync + 'static,
    ) {
        let mut handlers = self
            .notification_handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        handlers.entry(method.into()).or_default().push(Arc::new(f));
    }

    /// Fail every outstanding request with `reason` and clear the map.
    ///
    /// Returns how many requests were failed.
    pub async fn fail_all_pending(&self, reason: &str) -> usize {
        let drained: Vec<_> = self.pending.lock().await.drain().collect();
        let count = drained.len();
        for (_, tx) in drained {
            let _ = tx.send(Err(ReplyError::ConnectionLost(reason.to_string())));
        }
        if count > 0 {
            tracing::debug!(server = %self.server_id, count, reason, "failed pending requests");
        }
        count
    }

    /// Number of requests still waiting for a reply.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    fn handlers_for(&self, method: &str) -> Vec<NotificationHandler> {
        self.notification_handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(method)
            .cloned()
            .unwrap_or_default()
    }
}

/// Start the JSON-RPC read loop as a background Tokio task.
///
/// The loop consumes `events` (obtained from [`Transport::subscribe`]) until
/// the link closes or `cancellation` fires. On a transport error or closure
/// every pending request fails with [`ToolmeshError::ConnectionLost`] and
/// `on_link_lost` is invoked once with the reason.
pub fn start_read_loop<F>(
    mut events: broadcast::Receiver<TransportEvent>,
    cancellation: CancellationToken,
    client: Arc<JsonRpcClient>,
    on_link_lost: F,
) -> tokio::task::JoinHandle<()>
where
    F: FnOnce(String) + Send + 'static,
{
    tokio::spawn(async move {
        let reason = loop {
            tokio::select! {
                biased;

                _ = cancellation.cancelled() => {
                    client.fail_all_pending("client shut down").await;
                    return;
                }

                event = events.recv() => match event {
                    Ok(TransportEvent::Message(raw)) => dispatch_message(&raw, &client).await,
                    Ok(TransportEvent::Error(e)) => break format!("transport error: {}", e),
                    Ok(TransportEvent::Closed) | Err(broadcast::error::RecvError::Closed) => {
                        break "connection closed".to_string()
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            server = %client.server_id,
                            skipped,
                            "read loop lagged; inbound messages dropped"
                        );
                    }
                },
            }
        };

        tracing::info!(server = %client.server_id, %reason, "MCP link lost");
        client.fail_all_pending(&reason).await;
        on_link_lost(reason);
    })
}

/// Classify and dispatch a single inbound JSON string.
async fn dispatch_message(raw: &str, client: &Arc<JsonRpcClient>) {
    let value: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(server = %client.server_id, "dropping unparseable inbound message: {e}");
            return;
        }
    };

    let has_id = value.get("id").is_some_and(|id| !id.is_null());
    let has_method = value.get("method").is_some();
    let has_result = value.get("result").is_some();
    let has_error = value.get("error").is_some();

    if has_id && (has_result || has_error) && !has_method {
        handle_response(value, client).await;
    } else if has_id && has_method {
        handle_server_request(value, client).await;
    } else if has_method {
        handle_notification(value, client);
    } else {
        tracing::debug!(
            server = %client.server_id,
            "ignoring unclassifiable message: has_id={has_id} has_result={has_result} has_error={has_error}"
        );
    }
}

/// Resolve a pending request with the response value or error.
async fn handle_response(value: Value, client: &Arc<JsonRpcClient>) {
    let id_val = &value["id"];
    let id = match id_val.as_u64().or_else(|| id_val.as_str().and_then(|s| s.parse().ok())) {
        Some(n) => n,
        None => {
            tracing::debug!(server = %client.server_id, "response has non-integer id {id_val}; dropping");
            return;
        }
    };

    let Some(tx) = client.pending.lock().await.remove(&id) else {
        tracing::debug!(server = %client.server_id, "response for unknown id {id}; dropping");
        return;
    };

    let outcome = match value.get("error") {
        Some(error_val) => Err(ReplyError::Rpc(
            serde_json::from_value::<JsonRpcError>(error_val.clone()).unwrap_or_else(|_| JsonRpcError {
                code: INTERNAL_ERROR,
                message: format!("malformed error object: {error_val}"),
                data: None,
            }),
        )),
        None => Ok(value.get("result").cloned().unwrap_or(Value::Null)),
    };

    // The caller may already have timed out.
    let _ = tx.send(outcome);
}

/// Answer a server-initiated request. This client exposes no methods.
async fn handle_server_request(value: Value, client: &Arc<JsonRpcClient>) {
    let method = value.get("method").and_then(Value::as_str).unwrap_or_default();
    let response = JsonRpcResponse {
        jsonrpc: JSONRPC_VERSION.to_string(),
        id: value.get("id").cloned(),
        result: None,
        error: Some(JsonRpcError {
            code: METHOD_NOT_FOUND,
            message: format!("Method not found: {method}"),
            data: None,
        }),
    };

    match serde_json::to_string(&response) {
        Ok(serialized) => {
            if let Err(e) = client.transport.send(serialized).await {
                tracing::debug!(server = %client.server_id, "failed to reject server request: {e}");
            }
        }
        Err(e) => tracing::warn!("failed to serialize rejection: {e}"),
    }
}

fn handle_notification(value: Value, client: &Arc<JsonRpcClient>) {
    let Some(method) = value.get("method").and_then(Value::as_str) else {
        return;
    };
    let params = value.get("params").cloned().unwrap_or(Value::Null);

    let handlers = client.handlers_for(method);
    if handlers.is_empty() {
        tracing::debug!(server = %client.server_id, "no handler for notification '{method}'");
        return;
    }
    for handler in handlers {
        handler(params.clone());
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
