//! Typed MCP session over one transport
//!
//! [`McpProtocol`] owns the transport and the [`JsonRpcClient`] for one
//! remote server and walks the session lifecycle:
//!
//! ```text
//! Disconnected --connect()--> Handshaking --initialize ok--> Ready
//!                                  |                           |
//!                                  +--any failure--> Closed <--+-- link lost / disconnect()
//! ```
//!
//! Every typed call (`tools/list`, `tools/call`, `resources/*`, `prompts/*`)
//! fails fast with [`ToolmeshError::NotInitialized`] unless the session is
//! `Ready`. List calls follow `nextCursor` until the server stops returning
//! one and return the accumulated result.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, ToolmeshError};
use crate::mcp::client::{start_read_loop, JsonRpcClient};
use crate::mcp::server::ServerDescriptor;
use crate::mcp::transport::Transport;
use crate::mcp::types::{
    CallToolParams, CallToolResponse, ClientCapabilities, GetPromptParams, GetPromptResponse,
    Implementation, InitializeParams, InitializeResponse, ListPromptsResponse,
    ListResourcesResponse, ListToolsResponse, McpTool, PaginatedParams, Prompt,
    ReadResourceParams, ReadResourceResponse, Resource, ResourceContents,
    LATEST_PROTOCOL_VERSION, METHOD_INITIALIZE, METHOD_INITIALIZED, METHOD_PING,
    METHOD_PROMPTS_GET, METHOD_PROMPTS_LIST, METHOD_RESOURCES_LIST, METHOD_RESOURCES_READ,
    METHOD_TOOLS_CALL, METHOD_TOOLS_LIST, SUPPORTED_PROTOCOL_VERSIONS,
};

/// Identifies a capability a server may advertise during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerCapabilityFlag {
    /// `tools/list` and `tools/call`.
    Tools,
    /// `resources/list` and `resources/read`.
    Resources,
    /// `prompts/list` and `prompts/get`.
    Prompts,
    /// Log message notifications.
    Logging,
    /// Non-standard capabilities.
    Experimental,
}

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, `connect` not called yet.
    Disconnected,
    /// Transport open, `initialize` in flight.
    Handshaking,
    /// Handshake complete; typed calls are allowed.
    Ready,
    /// Handshake failed, the link was lost, or `disconnect` was called.
    Closed,
}

#[derive(Debug)]
struct SessionInner {
    state: SessionState,
    descriptor: ServerDescriptor,
    initialize: Option<InitializeResponse>,
}

/// One MCP session bound to one server descriptor.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use toolmesh::mcp::protocol::McpProtocol;
/// use toolmesh::mcp::server::{ServerDescriptor, ServerKind};
/// use toolmesh::mcp::transport::fake::FakeTransport;
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let (transport, _handle) = FakeTransport::new();
/// let session = McpProtocol::new(
///     ServerDescriptor::remote("demo", "Demo", None, ServerKind::Stream),
///     Arc::new(transport),
///     Duration::from_secs(30),
/// );
/// session.connect().await?;
/// let tools = session.list_tools().await?;
/// # Ok(())
/// # }
/// ```
pub struct McpProtocol {
    transport: Arc<dyn Transport>,
    client: Arc<JsonRpcClient>,
    inner: Arc<RwLock<SessionInner>>,
    request_timeout: Duration,
    cancellation: CancellationToken,
    read_loop: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for McpProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpProtocol")
            .field("server", &self.client.server_id())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl McpProtocol {
    /// Create a session in the `Disconnected` state. No I/O is performed.
    pub fn new(
        descriptor: ServerDescriptor,
        transport: Arc<dyn Transport>,
        request_timeout: Duration,
    ) -> Self {
        let client = Arc::new(JsonRpcClient::new(descriptor.id.clone(), Arc::clone(&transport)));
        Self {
            transport,
            client,
            inner: Arc::new(RwLock::new(SessionInner {
                state: SessionState::Disconnected,
                descriptor,
                initialize: None,
            })),
            request_timeout,
            cancellation: CancellationToken::new(),
            read_loop: Mutex::new(None),
        }
    }

    fn read_inner(&self) -> std::sync::RwLockReadGuard<'_, SessionInner> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_inner(&self) -> std::sync::RwLockWriteGuard<'_, SessionInner> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Server id this session talks to.
    pub fn server_id(&self) -> &str {
        self.client.server_id()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.read_inner().state
    }

    /// Snapshot of the server descriptor, including negotiated capabilities.
    pub fn descriptor(&self) -> ServerDescriptor {
        self.read_inner().descriptor.clone()
    }

    /// Whether the session is `Ready` and its transport still reports open.
    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Ready && self.transport.is_connected()
    }

    /// Protocol version the server chose, once `Ready`.
    pub fn protocol_version(&self) -> Option<String> {
        self.read_inner()
            .initialize
            .as_ref()
            .map(|r| r.protocol_version.clone())
    }

    /// Requests still waiting for a reply.
    pub async fn pending_count(&self) -> usize {
        self.client.pending_count().await
    }

    /// Register a handler for a server notification. All handlers fire.
    pub fn on_notification(&self, method: &str, f: impl Fn(Value) + Send + Sync + 'static) {
        self.client.on_notification(method, f);
    }

    /// Open the transport and perform the `initialize` handshake.
    ///
    /// Calling this on a `Ready` session is a no-op.
    ///
    /// # Errors
    ///
    /// Any failure (transport, timeout, peer error, unsupported protocol
    /// version) leaves the session `Closed` and is returned. A `Closed`
    /// session cannot be reopened; create a new one.
    pub async fn connect(&self) -> Result<()> {
        {
            let mut inner = self.write_inner();
            match inner.state {
                SessionState::Ready => return Ok(()),
                SessionState::Disconnected => inner.state = SessionState::Handshaking,
                SessionState::Handshaking | SessionState::Closed => {
                    return Err(ToolmeshError::McpTransport(format!(
                        "session for '{}' cannot connect from state {:?}",
                        inner.descriptor.id, inner.state
                    ))
                    .into())
                }
            }
        }

        match self.handshake().await {
            Ok(response) => {
                let mut inner = self.write_inner();
                if inner.state != SessionState::Handshaking {
                    return Err(ToolmeshError::ConnectionLost(format!(
                        "link to '{}' dropped during handshake",
                        inner.descriptor.id
                    ))
                    .into());
                }
                inner.descriptor.connected = true;
                inner.descriptor.capabilities = Some(response.capabilities.clone());
                inner.descriptor.server_info = Some(response.server_info.clone());
                inner.initialize = Some(response);
                inner.state = SessionState::Ready;
                tracing::info!(
                    server = %inner.descriptor.id,
                    protocol_version = ?inner.initialize.as_ref().map(|r| &r.protocol_version),
                    "MCP session ready"
                );
                Ok(())
            }
            Err(e) => {
                tracing::debug!(server = %self.server_id(), error = %e, "handshake failed");
                self.teardown("handshake failed").await;
                Err(e)
            }
        }
    }

    async fn handshake(&self) -> Result<InitializeResponse> {
        let events = self.transport.subscribe();
        self.transport.connect().await?;

        let inner = Arc::clone(&self.inner);
        let handle = start_read_loop(
            events,
            self.cancellation.clone(),
            Arc::clone(&self.client),
            move |_reason| {
                let mut inner = inner.write().unwrap_or_else(|poisoned| poisoned.into_inner());
                inner.descriptor.connected = false;
                inner.state = SessionState::Closed;
            },
        );
        *self.read_loop.lock().await = Some(handle);

        let response: InitializeResponse = self
            .client
            .request(
                METHOD_INITIALIZE,
                Some(InitializeParams {
                    protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
                    capabilities: ClientCapabilities::default(),
                    client_info: Implementation::toolmesh(),
                }),
                self.request_timeout,
            )
            .await?;

        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&response.protocol_version.as_str()) {
            return Err(ToolmeshError::McpProtocolVersion {
                expected: SUPPORTED_PROTOCOL_VERSIONS
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
                got: response.protocol_version,
            }
            .into());
        }

        self.client.notify(METHOD_INITIALIZED, None::<()>).await?;
        Ok(response)
    }

    /// Reject outstanding calls, stop the read loop, close the transport.
    async fn teardown(&self, reason: &str) {
        self.client.fail_all_pending(reason).await;
        self.cancellation.cancel();
        if let Err(e) = self.transport.disconnect().await {
            tracing::debug!(server = %self.server_id(), error = %e, "transport disconnect failed");
        }
        if let Some(handle) = self.read_loop.lock().await.take() {
            let _ = handle.await;
        }
        let mut inner = self.write_inner();
        inner.descriptor.connected = false;
        inner.state = SessionState::Closed;
    }

    /// Reject every pending request, then close the transport. Idempotent.
    pub async fn disconnect(&self) -> Result<()> {
        if self.state() == SessionState::Disconnected {
            self.write_inner().state = SessionState::Closed;
            return Ok(());
        }
        self.teardown("client disconnected").await;
        tracing::info!(server = %self.server_id(), "MCP session closed");
        Ok(())
    }

    fn ensure_ready(&self) -> Result<()> {
        let inner = self.read_inner();
        if inner.state == SessionState::Ready {
            Ok(())
        } else {
            Err(ToolmeshError::NotInitialized(inner.descriptor.id.clone()).into())
        }
    }

    /// Whether the server advertised `capability` during the handshake.
    pub fn capable(&self, capability: ServerCapabilityFlag) -> bool {
        let inner = self.read_inner();
        let Some(caps) = inner.initialize.as_ref().map(|r| &r.capabilities) else {
            return false;
        };
        match capability {
            ServerCapabilityFlag::Tools => caps.tools.is_some(),
            ServerCapabilityFlag::Resources => caps.resources.is_some(),
            ServerCapabilityFlag::Prompts => caps.prompts.is_some(),
            ServerCapabilityFlag::Logging => caps.logging.is_some(),
            ServerCapabilityFlag::Experimental => caps.experimental.is_some(),
        }
    }

    /// Round-trip a `ping`.
    pub async fn ping(&self) -> Result<()> {
        self.ensure_ready()?;
        let _: Value = self
            .client
            .request(METHOD_PING, None::<()>, self.request_timeout)
            .await?;
        Ok(())
    }

    /// Every tool the server lists, across all pages.
    pub async fn list_tools(&self) -> Result<Vec<McpTool>> {
        self.ensure_ready()?;
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let resp: ListToolsResponse = self
                .client
                .request(METHOD_TOOLS_LIST, Some(PaginatedParams { cursor }), self.request_timeout)
                .await?;
            tools.extend(resp.tools);

            match resp.next_cursor {
                Some(c) if !c.is_empty() => cursor = Some(c),
                _ => break,
            }
        }

        Ok(tools)
    }

    /// Invoke tool `name` (the server-local name, no namespace prefix).
    ///
    /// A tool-level failure comes back as `Ok` with `is_error` set.
    pub async fn call_tool(&self, name: &str, arguments: Option<Value>) -> Result<CallToolResponse> {
        self.ensure_ready()?;
        tracing::debug!(server = %self.server_id(), tool = name, "calling remote tool");
        self.client
            .request(
                METHOD_TOOLS_CALL,
                Some(CallToolParams {
                    name: name.to_string(),
                    arguments,
                }),
                self.request_timeout,
            )
            .await
    }

    /// Every resource the server lists, across all pages.
    pub async fn list_resources(&self) -> Result<Vec<Resource>> {
        self.ensure_ready()?;
        let mut resources = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let resp: ListResourcesResponse = self
                .client
                .request(
                    METHOD_RESOURCES_LIST,
                    Some(PaginatedParams { cursor }),
                    self.request_timeout,
                )
                .await?;
            resources.extend(resp.resources);

            match resp.next_cursor {
                Some(c) if !c.is_empty() => cursor = Some(c),
                _ => break,
            }
        }

        Ok(resources)
    }

    /// Read a resource by its server-local URI.
    pub async fn read_resource(&self, uri: &str) -> Result<Vec<ResourceContents>> {
        self.ensure_ready()?;
        let resp: ReadResourceResponse = self
            .client
            .request(
                METHOD_RESOURCES_READ,
                Some(ReadResourceParams {
                    uri: uri.to_string(),
                }),
                self.request_timeout,
            )
            .await?;
        Ok(resp.contents)
    }

    /// Every prompt the server lists, across all pages.
    pub async fn list_prompts(&self) -> Result<Vec<Prompt>> {
        self.ensure_ready()?;
        let mut prompts = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let resp: ListPromptsResponse = self
                .client
                .request(
                    METHOD_PROMPTS_LIST,
                    Some(PaginatedParams { cursor }),
                    self.request_timeout,
                )
                .await?;
            prompts.extend(resp.prompts);

            match resp.next_cursor {
                Some(c) if !c.is_empty() => cursor = Some(c),
                _ => break,
            }
        }

        Ok(prompts)
    }

    /// Render prompt `name` with `arguments`.
    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<HashMap<String, String>>,
    ) -> Result<GetPromptResponse> {
        self.ensure_ready()?;
        self.client
            .request(
                METHOD_PROMPTS_GET,
                Some(GetPromptParams {
                    name: name.to_string(),
                    arguments,
                }),
                self.request_timeout,
            )
            .await
    }
}

impl Drop for McpProtocol {
    fn drop(&mut self) {
        self.cancellation.cancel();
    }
}
