//! MCP (Model Context Protocol) client runtime
//!
//! Speaks JSON-RPC 2.0 to remote tool servers over pluggable transports,
//! correlates replies with outstanding requests, and runs the capability
//! handshake. Supported protocol revisions are listed in
//! [`types::SUPPORTED_PROTOCOL_VERSIONS`]; the newest is requested.
//!
//! # Module Layout
//!
//! - `types`     -- JSON-RPC envelopes and MCP wire types
//! - `client`    -- transport-agnostic request/response correlation
//! - `protocol`  -- per-server session state machine and typed MCP calls
//! - `transport` -- `Transport` trait plus WebSocket, HTTP, stdio and fake
//!   implementations
//! - `server`    -- descriptors for remote servers and built-in providers

pub mod client;
pub mod protocol;
pub mod server;
pub mod transport;
pub mod types;

pub use types::*;
