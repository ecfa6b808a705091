//! Error types for Toolmesh
//!
//! This module defines all error types used throughout the runtime,
//! using `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Main error type for Toolmesh operations
///
/// Covers configuration loading, transport faults, protocol-level errors
/// returned by peers, request timeouts, storage failures, and built-in
/// tool failures.
#[derive(Error, Debug)]
pub enum ToolmeshError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The peer answered with a JSON-RPC error envelope
    #[error("MCP error {code}: {message}")]
    Mcp {
        /// JSON-RPC error code
        code: i64,
        /// Error message sent by the peer
        message: String,
    },

    /// Transport-level failure (connect, send, framing)
    #[error("MCP transport error: {0}")]
    McpTransport(String),

    /// No reply arrived within the per-request timeout
    #[error("MCP timeout: server '{server}' did not answer '{method}' in time")]
    McpTimeout {
        /// Server id the request was addressed to
        server: String,
        /// JSON-RPC method that timed out
        method: String,
    },

    /// The link to the peer was lost while a request was outstanding
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// An operation was attempted before the handshake completed
    #[error("Client not initialized: server '{0}'")]
    NotInitialized(String),

    /// The peer negotiated a protocol version this client does not speak
    #[error("Unsupported MCP protocol version '{got}', expected one of: {}", expected.join(", "))]
    McpProtocolVersion {
        /// Versions this client accepts
        expected: Vec<String>,
        /// Version the server returned
        got: String,
    },

    /// A server id did not resolve to a configured server
    #[error("Server not found: {0}")]
    ServerNotFound(String),

    /// Built-in tool execution errors
    #[error("Tool execution error: {0}")]
    Tool(String),

    /// Storage backend errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket protocol errors
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

impl From<rusqlite::Error> for ToolmeshError {
    fn from(err: rusqlite::Error) -> Self {
        ToolmeshError::Storage(err.to_string())
    }
}

/// Result type alias for Toolmesh operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation.
pub type Result<T> = anyhow::Result<T>;
