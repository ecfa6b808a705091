//! Toolmesh - multi-transport MCP tool runtime
//!
//! This library speaks the Model Context Protocol to any number of remote
//! servers, over WebSocket, HTTP or a child process, and merges their tools
//! with in-process built-in providers under one namespaced surface.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `mcp`: wire types, transports, request correlation and the session
//!   state machine
//! - `manager`: aggregation and routing across every tool owner
//! - `tools`: the tool-call executor and the built-in providers
//! - `cache`: expiring capability cache with stale fallback data
//! - `storage`: native (SQLite) and simulated key/value backends
//! - `config`: configuration management and validation
//! - `error`: error types and result aliases
//! - `cli` / `commands`: command-line interface
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use toolmesh::{commands, Config, ToolCall, ToolCallExecutor};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config/toolmesh.yaml")?;
//!     let manager = commands::build_manager(config)?;
//!     manager.initialize().await;
//!
//!     let executor = ToolCallExecutor::new(Arc::clone(&manager));
//!     let outcome = executor
//!         .execute(&ToolCall::named("builtin-time.get_current_time"))
//!         .await;
//!     println!("{}", ToolCallExecutor::format(&outcome));
//!
//!     manager.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod manager;
pub mod mcp;
pub mod storage;
pub mod tools;

// Re-export commonly used types
pub use cache::CapabilityCache;
pub use config::Config;
pub use error::{Result, ToolmeshError};
pub use manager::ProviderManager;
pub use tools::{ToolCall, ToolCallExecutor, ToolCallOutcome};
