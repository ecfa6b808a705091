//! Server descriptors
//!
//! A [`ServerDescriptor`] is the runtime's view of one tool owner: a remote
//! MCP server reached over a transport, or an in-process built-in provider.
//! Descriptors are created from configuration at startup, updated when a
//! handshake succeeds, and snapshotted into the capability cache so partial
//! information survives reconnects.

use serde::{Deserialize, Serialize};

use crate::mcp::types::{Implementation, ServerCapabilities};

/// How a tool owner is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServerKind {
    /// Child process speaking newline-delimited JSON over stdio.
    Process,
    /// Persistent, server-push capable socket stream (WebSocket).
    Stream,
    /// One HTTP round trip per message.
    RequestResponse,
    /// In-process provider with no transport.
    BuiltIn,
}

impl std::fmt::Display for ServerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ServerKind::Process => "process",
            ServerKind::Stream => "stream",
            ServerKind::RequestResponse => "request-response",
            ServerKind::BuiltIn => "built-in",
        };
        f.write_str(label)
    }
}

/// Identity, locator, and negotiated state of one tool owner.
///
/// # Examples
///
/// ```
/// use toolmesh::mcp::server::{ServerDescriptor, ServerKind};
///
/// let d = ServerDescriptor::remote("weather", "Weather", Some("ws://localhost:9000".into()), ServerKind::Stream);
/// assert!(!d.connected);
/// assert_eq!(d.kind, ServerKind::Stream);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerDescriptor {
    /// Stable id; the namespace prefix for this owner's tools.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Transport locator (URL or command line); absent for built-ins.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locator: Option<String>,
    /// Whether the owner is currently usable.
    pub connected: bool,
    /// Capabilities negotiated during the last successful handshake.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<ServerCapabilities>,
    /// Server identity reported during the last successful handshake.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_info: Option<Implementation>,
    /// Discriminates how the owner is reached.
    #[serde(rename = "type")]
    pub kind: ServerKind,
}

impl ServerDescriptor {
    /// Descriptor for a remote server that has not connected yet.
    pub fn remote(
        id: impl Into<String>,
        name: impl Into<String>,
        locator: Option<String>,
        kind: ServerKind,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            locator,
            connected: false,
            capabilities: None,
            server_info: None,
            kind,
        }
    }

    /// Descriptor for a built-in provider; always connected.
    pub fn builtin(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            locator: None,
            connected: true,
            capabilities: Some(ServerCapabilities {
                tools: Some(serde_json::json!({})),
                ..Default::default()
            }),
            server_info: None,
            kind: ServerKind::BuiltIn,
        }
    }
}

/// Separator between an owner id and a tool or prompt name.
pub const NAME_SEPARATOR: char = '.';

/// Separator between an owner id and an original resource URI.
pub const URI_SEPARATOR: &str = "://";

/// `owner.local`, the externally visible name of an owner's tool or prompt.
pub fn qualify(owner: &str, local: &str) -> String {
    format!("{}{}{}", owner, NAME_SEPARATOR, local)
}

/// Split `owner.local` on the first separator.
///
/// Owner ids never contain the separator, so everything after the first one
/// belongs to the local name.
///
/// # Examples
///
/// ```
/// use toolmesh::mcp::server::split_qualified;
///
/// assert_eq!(split_qualified("builtin-time.get_current_time"), Some(("builtin-time", "get_current_time")));
/// assert_eq!(split_qualified("files.read.all"), Some(("files", "read.all")));
/// assert_eq!(split_qualified("no_owner"), None);
/// ```
pub fn split_qualified(name: &str) -> Option<(&str, &str)> {
    match name.split_once(NAME_SEPARATOR) {
        Some((owner, local)) if !owner.is_empty() && !local.is_empty() => Some((owner, local)),
        _ => None,
    }
}

/// `owner://uri`, the externally visible form of an owner's resource URI.
pub fn qualify_uri(owner: &str, uri: &str) -> String {
    format!("{}{}{}", owner, URI_SEPARATOR, uri)
}

/// Split `owner://uri` back into the owner id and the original URI.
///
/// # Examples
///
/// ```
/// use toolmesh::mcp::server::split_qualified_uri;
///
/// assert_eq!(split_qualified_uri("files://file:///tmp/a.txt"), Some(("files", "file:///tmp/a.txt")));
/// assert_eq!(split_qualified_uri("plain"), None);
/// ```
pub fn split_qualified_uri(uri: &str) -> Option<(&str, &str)> {
    match uri.split_once(URI_SEPARATOR) {
        Some((owner, original)) if !owner.is_empty() && !original.is_empty() => {
            Some((owner, original))
        }
        _ => None,
    }
}
