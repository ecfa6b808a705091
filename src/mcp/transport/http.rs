//! Request/response HTTP transport for MCP
//!
//! [`HttpTransport`] sends every outbound JSON-RPC message as an HTTP POST.
//! The server may reply with:
//!
//! - `application/json` -- a direct JSON response body
//! - `text/event-stream` -- a short SSE burst carrying one or more JSON-RPC
//!   messages
//! - `202 Accepted` -- an acknowledgement with no body (notifications)
//!
//! Replies are published to subscribers before `send` returns, so the
//! protocol client sees them in the same order it issued requests. There is
//! no persistent server-push channel.
//!
//! # Connecting
//!
//! `connect` issues a `HEAD` probe. Any HTTP response, including an error
//! status, proves the endpoint is reachable; only a network-level failure
//! or the connect timeout fails the call.
//!
//! # Session management
//!
//! When a response carries an `MCP-Session-Id` header it is stored and
//! attached to every subsequent POST. A `404` while a session is active
//! clears the session. `disconnect` sends a best-effort `DELETE` to end an
//! active session.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use tokio::sync::{broadcast, RwLock};

use crate::error::{Result, ToolmeshError};
use crate::mcp::server::ServerKind;
use crate::mcp::transport::{Transport, TransportEvent, TransportEvents};
use crate::mcp::types::LATEST_PROTOCOL_VERSION;

const SESSION_HEADER: &str = "MCP-Session-Id";

/// Request/response HTTP transport.
///
/// # Examples
///
/// ```no_run
/// use std::collections::HashMap;
/// use std::time::Duration;
/// use url::Url;
/// use toolmesh::mcp::transport::http::HttpTransport;
///
/// let transport = HttpTransport::new(
///     Url::parse("http://localhost:3000/mcp").unwrap(),
///     HashMap::new(),
///     Duration::from_secs(5),
///     Duration::from_secs(30),
/// ).unwrap();
/// ```
#[derive(Debug)]
pub struct HttpTransport {
    http_client: reqwest::Client,
    endpoint: url::Url,
    /// Static extra headers merged into every request (e.g. Authorization).
    headers: HashMap<String, String>,
    session_id: RwLock<Option<String>>,
    events: TransportEvents,
    connected: AtomicBool,
}

impl HttpTransport {
    /// Construct a new [`HttpTransport`] targeting `endpoint`.
    ///
    /// No network I/O is performed at construction time.
    ///
    /// # Errors
    ///
    /// Returns [`ToolmeshError::McpTransport`] if the HTTP client cannot be
    /// built (TLS initialisation failure).
    pub fn new(
        endpoint: url::Url,
        headers: HashMap<String, String>,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .map_err(|e| {
                ToolmeshError::McpTransport(format!("failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            http_client,
            endpoint,
            headers,
            session_id: RwLock::new(None),
            events: TransportEvents::new(),
            connected: AtomicBool::new(false),
        })
    }

    /// The active session id, if the server assigned one.
    pub async fn session_id(&self) -> Option<String> {
        self.session_id.read().await.clone()
    }

    fn with_headers(&self, mut req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        for (k, v) in &self.headers {
            req = req.header(k.as_str(), v.as_str());
        }
        req
    }

    /// Mark the link dead and tell observers, after a network-level failure.
    fn link_lost(&self, reason: &str) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.events.publish(TransportEvent::Error(reason.to_string()));
            self.events.publish(TransportEvent::Closed);
        }
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    fn kind(&self) -> ServerKind {
        ServerKind::RequestResponse
    }

    async fn connect(&self) -> Result<()> {
        let req = self.with_headers(self.http_client.head(self.endpoint.as_str()));
        match req.send().await {
            Ok(response) => {
                tracing::debug!(
                    endpoint = %self.endpoint,
                    status = %response.status(),
                    "HTTP endpoint reachable"
                );
                self.connected.store(true, Ordering::SeqCst);
                Ok(())
            }
            Err(e) => Err(ToolmeshError::McpTransport(format!(
                "failed to reach {}: {}",
                self.endpoint, e
            ))
            .into()),
        }
    }

    /// Send a JSON-RPC message via HTTP POST to the MCP endpoint.
    ///
    /// Headers on every POST:
    ///
    /// - `Content-Type: application/json`
    /// - `Accept: application/json, text/event-stream`
    /// - `MCP-Protocol-Version`
    /// - `MCP-Session-Id: <id>` -- only when a session is active
    ///
    /// # Errors
    ///
    /// Returns [`ToolmeshError::McpTransport`] if the link is not open, the
    /// request fails, or the server answers with a non-success status.
    async fn send(&self, message: String) -> Result<()> {
        if !self.is_connected() {
            return Err(ToolmeshError::McpTransport(format!(
                "not connected to {}",
                self.endpoint
            ))
            .into());
        }

        let mut req = self
            .http_client
            .post(self.endpoint.as_str())
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .header("MCP-Protocol-Version", LATEST_PROTOCOL_VERSION)
            .body(message);
        if let Some(ref id) = *self.session_id.read().await {
            req = req.header(SESSION_HEADER, id.as_str());
        }
        req = self.with_headers(req);

        let response = match req.send().await {
            Ok(r) => r,
            Err(e) => {
                let reason = format!("HTTP POST failed: {}", e);
                if e.is_connect() {
                    self.link_lost(&reason);
                }
                return Err(ToolmeshError::McpTransport(reason).into());
            }
        };

        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            let mut sid = self.session_id.write().await;
            if sid.take().is_some() {
                return Err(ToolmeshError::McpTransport("MCP session expired".into()).into());
            }
            return Err(ToolmeshError::McpTransport("HTTP 404 Not Found".into()).into());
        }

        if status == reqwest::StatusCode::ACCEPTED {
            return Ok(());
        }

        if !status.is_success() {
            return Err(ToolmeshError::McpTransport(format!(
                "HTTP POST returned status {}",
                status
            ))
            .into());
        }

        if let Some(new_session_id) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
        {
            let mut sid = self.session_id.write().await;
            if sid.is_none() {
                tracing::debug!(endpoint = %self.endpoint, "MCP session established");
                *sid = Some(new_session_id);
            }
        }

        let content_type = response
            .headers()
            .get("Content-Type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if content_type.contains("text/event-stream") {
            let delivered = parse_sse_stream(response.bytes_stream(), &self.events).await;
            tracing::trace!(delivered, "SSE reply consumed");
        } else {
            let body = response.text().await.map_err(|e| {
                ToolmeshError::McpTransport(format!("failed to read response body: {}", e))
            })?;
            if !body.trim().is_empty() {
                self.events.publish(TransportEvent::Message(body));
            }
        }

        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    async fn disconnect(&self) -> Result<()> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(sid) = self.session_id.write().await.take() {
            let req = self
                .with_headers(self.http_client.delete(self.endpoint.as_str()))
                .header(SESSION_HEADER, sid.as_str());
            if let Err(e) = req.send().await {
                tracing::debug!(endpoint = %self.endpoint, error = %e, "session DELETE failed");
            }
        }

        self.events.publish(TransportEvent::Closed);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// SSE parser
// ---------------------------------------------------------------------------

/// Parse an SSE byte stream and publish each complete `data:` payload.
///
/// Consumes the stream until it ends or a chunk fails. Returns the number of
/// messages published.
///
/// SSE field processing:
///
/// - `data: [PING]` (case-insensitive) or `event: ping` -- discarded.
/// - All other `data:` values -- published as [`TransportEvent::Message`];
///   multi-line data is joined with `\n`.
/// - `id:`, `retry:`, and comment lines are ignored.
pub async fn parse_sse_stream(
    byte_stream: impl Stream<Item = reqwest::Result<Bytes>>,
    events: &TransportEvents,
) -> usize {
    use futures::StreamExt;

    let mut buffer = String::new();
    let mut delivered = 0;

    tokio::pin!(byte_stream);

    while let Some(chunk_result) = byte_stream.next().await {
        let chunk = match chunk_result {
            Ok(c) => c,
            Err(e) => {
                tracing::debug!(error = %e, "SSE stream ended with error");
                break;
            }
        };

        let Ok(text) = std::str::from_utf8(&chunk) else {
            continue;
        };
        buffer.push_str(&text.replace("\r\n", "\n"));

        while let Some(pos) = buffer.find("\n\n") {
            let event_block: String = buffer.drain(..pos + 2).collect();
            if process_sse_event(&event_block, events) {
                delivered += 1;
            }
        }
    }

    if !buffer.trim().is_empty() && process_sse_event(&buffer, events) {
        delivered += 1;
    }
    delivered
}

/// Process one SSE event block. Returns whether a message was published.
fn process_sse_event(event_block: &str, events: &TransportEvents) -> bool {
    let mut data_lines: Vec<&str> = Vec::new();
    let mut event_type: Option<&str> = None;

    for line in event_block.lines() {
        if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(value.trim());
        } else if let Some(value) = line.strip_prefix("event:") {
            event_type = Some(value.trim());
        }
    }

    if event_type.is_some_and(|et| et.eq_ignore_ascii_case("ping")) {
        return false;
    }

    let data = data_lines.join("\n");
    if data.is_empty() || data.eq_ignore_ascii_case("[ping]") {
        return false;
    }

    events.publish(TransportEvent::Message(data));
    true
}
