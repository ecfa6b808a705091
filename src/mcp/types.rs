//! MCP protocol types and JSON-RPC 2.0 primitives
//!
//! This module defines the wire types exchanged with MCP servers over any
//! transport. Struct fields are `camelCase` on the wire via
//! `#[serde(rename_all = "camelCase")]`, and every `Option<>` field omits its
//! key from JSON when `None`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Protocol version constants
// ---------------------------------------------------------------------------

/// The JSON-RPC envelope version; fixed by the protocol.
pub const JSONRPC_VERSION: &str = "2.0";

/// The most recent supported MCP protocol revision, requested on `initialize`.
pub const LATEST_PROTOCOL_VERSION: &str = "2025-06-18";

/// Earlier protocol revision retained for backwards compatibility.
pub const PROTOCOL_VERSION_2025_03_26: &str = "2025-03-26";

/// Original public protocol revision, still spoken by many servers.
pub const PROTOCOL_VERSION_2024_11_05: &str = "2024-11-05";

/// All protocol versions that this client accepts during negotiation.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &[
    LATEST_PROTOCOL_VERSION,
    PROTOCOL_VERSION_2025_03_26,
    PROTOCOL_VERSION_2024_11_05,
];

// ---------------------------------------------------------------------------
// JSON-RPC method constants
// ---------------------------------------------------------------------------

/// Capability handshake request.
pub const METHOD_INITIALIZE: &str = "initialize";
/// One-way notification sent after a successful handshake.
pub const METHOD_INITIALIZED: &str = "notifications/initialized";
/// Liveness check.
pub const METHOD_PING: &str = "ping";
/// List tools exposed by the server.
pub const METHOD_TOOLS_LIST: &str = "tools/list";
/// Invoke a tool.
pub const METHOD_TOOLS_CALL: &str = "tools/call";
/// List resources exposed by the server.
pub const METHOD_RESOURCES_LIST: &str = "resources/list";
/// Read a resource by URI.
pub const METHOD_RESOURCES_READ: &str = "resources/read";
/// List prompt templates.
pub const METHOD_PROMPTS_LIST: &str = "prompts/list";
/// Render a prompt template.
pub const METHOD_PROMPTS_GET: &str = "prompts/get";

// ---------------------------------------------------------------------------
// Notification method constants
// ---------------------------------------------------------------------------

/// The server's tool list changed; cached listings are stale.
pub const NOTIF_TOOLS_LIST_CHANGED: &str = "notifications/tools/list_changed";
/// The server's resource list changed.
pub const NOTIF_RESOURCES_LIST_CHANGED: &str = "notifications/resources/list_changed";
/// The server's prompt list changed.
pub const NOTIF_PROMPTS_LIST_CHANGED: &str = "notifications/prompts/list_changed";

// ---------------------------------------------------------------------------
// JSON-RPC error codes
// ---------------------------------------------------------------------------

/// Invalid JSON was received.
pub const PARSE_ERROR: i64 = -32700;
/// The method does not exist or is not available.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Invalid method parameters.
pub const INVALID_PARAMS: i64 = -32602;
/// Internal JSON-RPC error.
pub const INTERNAL_ERROR: i64 = -32603;

// ---------------------------------------------------------------------------
// JSON-RPC 2.0 wire types
// ---------------------------------------------------------------------------

/// A JSON-RPC 2.0 request object.
///
/// `jsonrpc` MUST always be `"2.0"`. `id` is `None` only for notifications
/// (use [`JsonRpcNotification`] instead for clarity).
///
/// # Examples
///
/// ```
/// use toolmesh::mcp::types::JsonRpcRequest;
///
/// let req = JsonRpcRequest::new(serde_json::json!(1), "ping", None);
/// assert_eq!(req.jsonrpc, "2.0");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol version identifier; always `"2.0"`.
    pub jsonrpc: String,
    /// Request correlation identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
    /// The method name to invoke.
    pub method: String,
    /// Optional method parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    /// Build a request envelope with the fixed `"2.0"` version tag.
    pub fn new(
        id: serde_json::Value,
        method: impl Into<String>,
        params: Option<serde_json::Value>,
    ) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 response object.
///
/// Exactly one of `result` or `error` will be present in a valid response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Protocol version identifier; always `"2.0"`.
    pub jsonrpc: String,
    /// Mirrors the `id` from the corresponding request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
    /// Successful result value; mutually exclusive with `error`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error object; mutually exclusive with `result`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// A JSON-RPC 2.0 error object.
///
/// Implements `Display` as `"JSON-RPC error {code}: {message}"`.
///
/// # Examples
///
/// ```
/// use toolmesh::mcp::types::JsonRpcError;
///
/// let e = JsonRpcError { code: -32600, message: "Invalid Request".to_string(), data: None };
/// assert_eq!(e.to_string(), "JSON-RPC error -32600: Invalid Request");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Numeric error code as defined by JSON-RPC 2.0 or MCP.
    pub code: i64,
    /// Human-readable error description.
    pub message: String,
    /// Optional additional error context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

/// A JSON-RPC 2.0 notification (a request with no `id`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// Protocol version identifier; always `"2.0"`.
    pub jsonrpc: String,
    /// The notification method name.
    pub method: String,
    /// Optional notification parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Handshake types
// ---------------------------------------------------------------------------

/// Identifies a client or server implementation by name and version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    /// Short name of the implementation (e.g. `"toolmesh"`).
    pub name: String,
    /// Version string (e.g. `"0.1.0"`).
    pub version: String,
}

impl Implementation {
    /// Identity of this crate, sent as `clientInfo` during the handshake.
    pub fn toolmesh() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Capabilities the client declares during `initialize`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientCapabilities {
    /// Experimental, non-standard capabilities.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<serde_json::Value>,
    /// Filesystem roots support.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roots: Option<serde_json::Value>,
    /// LLM sampling support.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampling: Option<serde_json::Value>,
}

/// Capabilities a server advertises in its `initialize` reply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerCapabilities {
    /// Experimental, non-standard capabilities.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<serde_json::Value>,
    /// Log message notifications.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<serde_json::Value>,
    /// Prompt templates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompts: Option<serde_json::Value>,
    /// Readable resources.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<serde_json::Value>,
    /// Callable tools.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<serde_json::Value>,
}

/// Parameters for the `initialize` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Protocol revision requested by the client.
    pub protocol_version: String,
    /// Capabilities declared by the client.
    pub capabilities: ClientCapabilities,
    /// Client identity.
    pub client_info: Implementation,
}

/// Result of the `initialize` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResponse {
    /// Protocol revision chosen by the server.
    pub protocol_version: String,
    /// Capabilities advertised by the server.
    #[serde(default)]
    pub capabilities: ServerCapabilities,
    /// Server identity.
    pub server_info: Implementation,
    /// Optional usage instructions for the client.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

// ---------------------------------------------------------------------------
// Tool types
// ---------------------------------------------------------------------------

fn default_input_schema() -> serde_json::Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

/// A tool exposed by a server or built-in provider.
///
/// `input_schema` documents the expected arguments (a JSON Schema object with
/// `properties` and `required`); it is never executed.
///
/// # Examples
///
/// ```
/// use toolmesh::mcp::types::McpTool;
///
/// let tool: McpTool = serde_json::from_value(serde_json::json!({
///     "name": "echo",
///     "description": "Echo a message",
///     "inputSchema": { "type": "object", "properties": { "message": { "type": "string" } } }
/// })).unwrap();
/// assert_eq!(tool.name, "echo");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpTool {
    /// Tool name, unique within its owning provider.
    pub name: String,
    /// Optional display title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema describing the arguments.
    #[serde(default = "default_input_schema")]
    pub input_schema: serde_json::Value,
}

impl McpTool {
    /// Build a tool descriptor from its parts.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            title: None,
            description: Some(description.into()),
            input_schema,
        }
    }

    /// Return a copy of this descriptor named `{owner}.{name}`.
    pub fn namespaced(&self, owner: &str) -> Self {
        Self {
            name: format!("{}.{}", owner, self.name),
            ..self.clone()
        }
    }
}

/// One page of a `tools/list` reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResponse {
    /// Tools in this page.
    pub tools: Vec<McpTool>,
    /// Opaque cursor for the next page; `None` means this is the last page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Parameters for `tools/call`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolParams {
    /// Tool name as listed by the owning server.
    pub name: String,
    /// Arguments matching the tool's `inputSchema`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<serde_json::Value>,
}

/// Result of a tool invocation.
///
/// `is_error` is the only channel for tool-level failure; protocol faults are
/// reported as errors instead.
///
/// # Examples
///
/// ```
/// use toolmesh::mcp::types::CallToolResponse;
///
/// let ok = CallToolResponse::text("42");
/// assert!(!ok.is_error);
/// assert_eq!(ok.text_content(), "42");
///
/// let failed = CallToolResponse::error("bad argument");
/// assert!(failed.is_error);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResponse {
    /// Ordered content blocks.
    #[serde(default)]
    pub content: Vec<ToolResponseContent>,
    /// Whether the tool reported a failure.
    #[serde(default)]
    pub is_error: bool,
}

impl CallToolResponse {
    /// A successful result with a single text block.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolResponseContent::Text { text: text.into() }],
            is_error: false,
        }
    }

    /// An error-tagged result with a single text block.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ToolResponseContent::Text {
                text: message.into(),
            }],
            is_error: true,
        }
    }

    /// All text blocks joined by newlines; non-text blocks are skipped.
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ToolResponseContent::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A single content item in a tool result or prompt message.
///
/// Discriminated by the `"type"` field on the wire. Block types this client
/// does not understand deserialize as [`ToolResponseContent::Unsupported`]
/// instead of failing the whole reply.
///
/// # Examples
///
/// ```
/// use toolmesh::mcp::types::ToolResponseContent;
///
/// let c = ToolResponseContent::Text { text: "hello".to_string() };
/// let json = serde_json::to_value(&c).unwrap();
/// assert_eq!(json["type"], "text");
/// assert_eq!(json["text"], "hello");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolResponseContent {
    /// Plain text output.
    Text {
        /// The text content.
        text: String,
    },
    /// A base64-encoded image.
    Image {
        /// Base64-encoded image bytes.
        data: String,
        /// MIME type of the image (e.g. `"image/png"`).
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    /// An embedded resource.
    Resource {
        /// The resource contents.
        resource: ResourceContents,
    },
    /// Any block type this client does not model (audio, resource links, ...).
    #[serde(other)]
    Unsupported,
}

// ---------------------------------------------------------------------------
// Resource types
// ---------------------------------------------------------------------------

/// Text contents of a resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TextResourceContents {
    /// URI of the resource.
    pub uri: String,
    /// MIME type, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// UTF-8 text body.
    pub text: String,
}

/// Binary contents of a resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BlobResourceContents {
    /// URI of the resource.
    pub uri: String,
    /// MIME type, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Base64-encoded body.
    pub blob: String,
}

/// Either text or binary resource contents.
///
/// Uses `#[serde(untagged)]` so the discriminator is presence of `"text"` vs
/// `"blob"` in the JSON object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ResourceContents {
    /// UTF-8 text resource.
    Text(TextResourceContents),
    /// Binary resource (base64-encoded blob).
    Blob(BlobResourceContents),
}

impl ResourceContents {
    /// URI carried by either variant.
    pub fn uri(&self) -> &str {
        match self {
            ResourceContents::Text(t) => &t.uri,
            ResourceContents::Blob(b) => &b.uri,
        }
    }

    /// Replace the URI carried by either variant.
    pub fn set_uri(&mut self, uri: String) {
        match self {
            ResourceContents::Text(t) => t.uri = uri,
            ResourceContents::Blob(b) => b.uri = uri,
        }
    }
}

/// Metadata describing a resource exposed by a server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    /// Canonical URI for this resource.
    pub uri: String,
    /// Human-readable resource name.
    pub name: String,
    /// Optional description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// MIME type, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// One page of a `resources/list` reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResourcesResponse {
    /// Resources in this page.
    pub resources: Vec<Resource>,
    /// Opaque cursor for the next page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Parameters for `resources/read`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadResourceParams {
    /// URI of the resource to read.
    pub uri: String,
}

/// Response to a `resources/read` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadResourceResponse {
    /// One or more content objects representing the resource's current state.
    pub contents: Vec<ResourceContents>,
}

// ---------------------------------------------------------------------------
// Prompt types
// ---------------------------------------------------------------------------

/// Conversation participant role.
///
/// # Examples
///
/// ```
/// use toolmesh::mcp::types::Role;
///
/// let r: Role = serde_json::from_str("\"user\"").unwrap();
/// assert_eq!(r, Role::User);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A message from the human user.
    User,
    /// A message from the AI assistant.
    Assistant,
}

/// A single message in a rendered prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    /// Who authored this message.
    pub role: Role,
    /// The message body.
    pub content: ToolResponseContent,
}

/// Describes a single argument accepted by a prompt template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptArgument {
    /// Argument name.
    pub name: String,
    /// Optional description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Whether the argument must be supplied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
}

/// A prompt template exposed by a server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    /// Prompt name, unique within its owner.
    pub name: String,
    /// Optional description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Accepted arguments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Vec<PromptArgument>>,
}

/// One page of a `prompts/list` reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPromptsResponse {
    /// Prompts in this page.
    pub prompts: Vec<Prompt>,
    /// Opaque cursor for the next page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Parameters for `prompts/get`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPromptParams {
    /// Prompt name as listed by the owner.
    pub name: String,
    /// Template argument values.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<HashMap<String, String>>,
}

/// Result of `prompts/get`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetPromptResponse {
    /// Optional description of the rendered prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Rendered messages.
    pub messages: Vec<PromptMessage>,
}

/// Cursor parameter shared by every paginated list method.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaginatedParams {
    /// Cursor from the previous page, `None` for the first page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serializes_envelope() {
        let req = JsonRpcRequest::new(
            serde_json::json!(42),
            METHOD_TOOLS_LIST,
            Some(serde_json::json!({})),
        );
        let val = serde_json::to_value(&req).unwrap();
        assert_eq!(val["jsonrpc"], "2.0");
        assert_eq!(val["id"], 42);
        assert_eq!(val["method"], "tools/list");
    }

    #[test]
    fn test_initialize_params_use_camel_case() {
        let params = InitializeParams {
            protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
            capabilities: ClientCapabilities::default(),
            client_info: Implementation::toolmesh(),
        };
        let val = serde_json::to_value(&params).unwrap();
        assert_eq!(val["protocolVersion"], LATEST_PROTOCOL_VERSION);
        assert_eq!(val["clientInfo"]["name"], "toolmesh");
        assert!(val["capabilities"].as_object().unwrap().is_empty());
    }

    #[test]
    fn test_initialize_response_tolerates_missing_capabilities() {
        let resp: InitializeResponse = serde_json::from_value(serde_json::json!({
            "protocolVersion": "2024-11-05",
            "serverInfo": { "name": "srv", "version": "1" }
        }))
        .unwrap();
        assert_eq!(resp.capabilities, ServerCapabilities::default());
    }

    #[test]
    fn test_tool_without_schema_gets_empty_object_schema() {
        let tool: McpTool = serde_json::from_value(serde_json::json!({ "name": "x" })).unwrap();
        assert_eq!(tool.input_schema["type"], "object");
    }

    #[test]
    fn test_namespaced_tool_keeps_schema() {
        let tool = McpTool::new("get_current_time", "now", serde_json::json!({"type": "object"}));
        let named = tool.namespaced("builtin-time");
        assert_eq!(named.name, "builtin-time.get_current_time");
        assert_eq!(named.input_schema, tool.input_schema);
    }

    #[test]
    fn test_call_tool_response_defaults_is_error_false() {
        let resp: CallToolResponse = serde_json::from_value(serde_json::json!({
            "content": [{ "type": "text", "text": "hi" }]
        }))
        .unwrap();
        assert!(!resp.is_error);
        assert_eq!(resp.text_content(), "hi");
    }

    #[test]
    fn test_unknown_content_block_is_unsupported() {
        let resp: CallToolResponse = serde_json::from_value(serde_json::json!({
            "content": [
                { "type": "audio", "data": "AAA", "mimeType": "audio/wav" },
                { "type": "text", "text": "after" }
            ],
            "isError": false
        }))
        .unwrap();
        assert_eq!(resp.content[0], ToolResponseContent::Unsupported);
        assert_eq!(resp.text_content(), "after");
    }

    #[test]
    fn test_image_block_uses_mime_type_key() {
        let block = ToolResponseContent::Image {
            data: "iVBOR".to_string(),
            mime_type: "image/png".to_string(),
        };
        let val = serde_json::to_value(&block).unwrap();
        assert_eq!(val["type"], "image");
        assert_eq!(val["mimeType"], "image/png");
    }

    #[test]
    fn test_resource_contents_untagged_discrimination() {
        let text: ResourceContents =
            serde_json::from_value(serde_json::json!({ "uri": "a://b", "text": "t" })).unwrap();
        let blob: ResourceContents =
            serde_json::from_value(serde_json::json!({ "uri": "a://c", "blob": "AA==" })).unwrap();
        assert!(matches!(text, ResourceContents::Text(_)));
        assert!(matches!(blob, ResourceContents::Blob(_)));
        assert_eq!(blob.uri(), "a://c");
    }

    #[test]
    fn test_role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::User).unwrap(), "\"user\"");
        assert_eq!(
            serde_json::to_string(&Role::Assistant).unwrap(),
            "\"assistant\""
        );
    }

    #[test]
    fn test_paginated_params_omit_absent_cursor() {
        let val = serde_json::to_value(PaginatedParams::default()).unwrap();
        assert!(val.get("cursor").is_none());
    }
}
