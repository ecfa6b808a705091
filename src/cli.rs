//! Command-line interface definition for Toolmesh
//!
//! This module defines the CLI structure using clap's derive API: listing
//! owners, tools, resources and prompts, invoking tools, and maintaining the
//! capability cache.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::DEFAULT_CONFIG_PATH;

/// Toolmesh - multi-transport MCP tool runtime
///
/// Aggregates tools from remote MCP servers and built-in providers under
/// namespaced names and invokes them.
#[derive(Parser, Debug, Clone)]
#[command(name = "toolmesh")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "TOOLMESH_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// List built-in providers and configured servers
    Servers,

    /// List every tool under its namespaced name
    Tools {
        /// Print the tool descriptors as JSON
        #[arg(long)]
        json: bool,
    },

    /// Invoke one tool
    Call {
        /// Namespaced tool name (`owner.tool`)
        name: String,

        /// Arguments as a JSON object
        #[arg(short, long)]
        args: Option<String>,
    },

    /// Invoke every tool call listed in a JSON file concurrently
    Batch {
        /// File holding `[{"name": ..., "arguments": {...}}, ...]`
        file: PathBuf,
    },

    /// List every resource under its `owner://uri` form
    Resources,

    /// Read one resource
    Read {
        /// Qualified resource URI (`owner://uri`)
        uri: String,
    },

    /// List every prompt under its namespaced name
    Prompts,

    /// Render one prompt
    Prompt {
        /// Namespaced prompt name (`owner.prompt`)
        name: String,

        /// Template argument as key=value (repeatable)
        #[arg(short, long = "arg")]
        args: Vec<String>,
    },

    /// Maintain the persisted capability cache
    Cache {
        #[command(subcommand)]
        command: CacheCommand,
    },
}

/// Capability cache subcommands
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheCommand {
    /// Remove every cached entry
    Clear,
    /// Remove expired entries only
    Cleanup,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
