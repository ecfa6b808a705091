//! CLI subcommand handlers
//!
//! Each handler receives a ready [`ProviderManager`] and prints to stdout.
//! Listings are tables; `--json` output is pretty-printed serde JSON.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use colored::Colorize;
use prettytable::{row, Table};
use serde_json::{Map, Value};

use crate::cache::CapabilityCache;
use crate::cli::CacheCommand;
use crate::config::Config;
use crate::error::{Result, ToolmeshError};
use crate::manager::ProviderManager;
use crate::mcp::server::ServerDescriptor;
use crate::mcp::types::{McpTool, ResourceContents, ToolResponseContent};
use crate::storage::StorageCapability;
use crate::tools::builtin::BuiltinRegistry;
use crate::tools::{ToolCall, ToolCallExecutor, ToolCallOutcome};

/// Wire storage, built-ins, the capability cache and the manager from
/// `config`. Nothing is connected yet.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or a built-in provider
/// cannot be created.
pub fn build_manager(config: Config) -> Result<Arc<ProviderManager>> {
    let store = StorageCapability::select(&config.storage);
    let builtins = BuiltinRegistry::with_defaults(&config.builtins, Arc::clone(&store))?;
    let cache = Arc::new(CapabilityCache::new(store));
    let manager = ProviderManager::new(config, Arc::new(builtins), cache, None)?;
    Ok(Arc::new(manager))
}

fn status_marker(connected: bool) -> String {
    if connected {
        "connected".green().to_string()
    } else {
        "disconnected".red().to_string()
    }
}

fn render_servers(servers: &[ServerDescriptor]) -> Table {
    let mut table = Table::new();
    table.add_row(row!["ID", "Name", "Type", "Locator", "Status"]);
    for server in servers {
        table.add_row(row![
            server.id,
            server.name,
            server.kind,
            server.locator.as_deref().unwrap_or("-"),
            status_marker(server.connected)
        ]);
    }
    table
}

fn render_tools(tools: &[McpTool]) -> Table {
    let mut table = Table::new();
    table.add_row(row!["Tool", "Description"]);
    for tool in tools {
        table.add_row(row![tool.name, tool.description.as_deref().unwrap_or("")]);
    }
    table
}

/// `toolmesh servers`
pub async fn list_servers(manager: &ProviderManager) -> Result<()> {
    let servers = manager.servers().await;
    println!();
    render_servers(&servers).printstd();
    println!();
    Ok(())
}

/// `toolmesh tools [--json]`
pub async fn list_tools(manager: &ProviderManager, json: bool) -> Result<()> {
    let tools = manager.list_tools().await;
    if json {
        println!("{}", serde_json::to_string_pretty(&tools)?);
        return Ok(());
    }
    if tools.is_empty() {
        println!("No tools available.");
        return Ok(());
    }
    println!("\n{} tool(s):\n", tools.len());
    render_tools(&tools).printstd();
    println!();
    Ok(())
}

/// Parse `--args` into an argument map. Absent means no arguments.
///
/// # Errors
///
/// Returns [`ToolmeshError::Config`] unless the text is a JSON object.
pub fn parse_arguments(raw: Option<&str>) -> Result<Map<String, Value>> {
    let Some(raw) = raw else {
        return Ok(Map::new());
    };
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ToolmeshError::Config("--args must be a JSON object".into()).into()),
        Err(e) => Err(ToolmeshError::Config(format!("--args is not valid JSON: {}", e)).into()),
    }
}

/// Parse repeated `key=value` pairs.
///
/// # Errors
///
/// Returns [`ToolmeshError::Config`] for a pair without `=` or with an
/// empty key.
pub fn parse_key_values(pairs: &[String]) -> Result<HashMap<String, String>> {
    pairs
        .iter()
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok((key.trim().to_string(), value.to_string()))
            }
            _ => Err(ToolmeshError::Config(format!(
                "argument '{}' must be of the form key=value",
                pair
            ))
            .into()),
        })
        .collect()
}

fn print_outcome(outcome: &ToolCallOutcome) {
    let line = ToolCallExecutor::format(outcome);
    if outcome.success {
        println!("{}", line);
    } else {
        eprintln!("{}", line.red());
    }
}

/// `toolmesh call <name> [--args JSON]`
///
/// # Errors
///
/// Returns an error if the arguments do not parse or the call fails.
pub async fn call_tool(
    manager: Arc<ProviderManager>,
    name: &str,
    args: Option<&str>,
) -> Result<()> {
    let call = ToolCall::new(name, parse_arguments(args)?);
    let outcome = ToolCallExecutor::new(manager).execute(&call).await;
    print_outcome(&outcome);
    if outcome.success {
        Ok(())
    } else {
        Err(ToolmeshError::Tool(outcome.error.unwrap_or_default()).into())
    }
}

/// Read a batch file of [`ToolCall`]s.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not a JSON array of
/// calls.
pub fn load_batch(path: &Path) -> Result<Vec<ToolCall>> {
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents).map_err(|e| {
        ToolmeshError::Config(format!("invalid batch file {}: {}", path.display(), e)).into()
    })
}

/// `toolmesh batch <file>`
///
/// # Errors
///
/// Returns an error if the batch file is unusable or any call failed.
pub async fn run_batch(manager: Arc<ProviderManager>, path: &Path) -> Result<()> {
    let calls = load_batch(path)?;
    let outcomes = ToolCallExecutor::new(manager).execute_batch(&calls).await;

    let mut failed = 0;
    for (index, outcome) in outcomes.iter().enumerate() {
        let marker = if outcome.success {
            "ok".green()
        } else {
            failed += 1;
            "failed".red()
        };
        println!("[{}] {} {}", index, outcome.tool_name.bold(), marker);
        print_outcome(outcome);
    }

    if failed > 0 {
        return Err(ToolmeshError::Tool(format!(
            "{} of {} call(s) failed",
            failed,
            outcomes.len()
        ))
        .into());
    }
    Ok(())
}

/// `toolmesh resources`
pub async fn list_resources(manager: &ProviderManager) -> Result<()> {
    let resources = manager.list_resources().await;
    if resources.is_empty() {
        println!("No resources available.");
        return Ok(());
    }
    let mut table = Table::new();
    table.add_row(row!["URI", "Name", "MIME type"]);
    for resource in &resources {
        table.add_row(row![
            resource.uri,
            resource.name,
            resource.mime_type.as_deref().unwrap_or("-")
        ]);
    }
    println!();
    table.printstd();
    println!();
    Ok(())
}

/// `toolmesh read <uri>`
pub async fn read_resource(manager: &ProviderManager, uri: &str) -> Result<()> {
    for contents in manager.read_resource(uri).await? {
        match contents {
            ResourceContents::Text(text) => println!("{}", text.text),
            ResourceContents::Blob(blob) => println!(
                "<{} bytes of base64 {}>",
                blob.blob.len(),
                blob.mime_type.as_deref().unwrap_or("binary data")
            ),
        }
    }
    Ok(())
}

/// `toolmesh prompts`
pub async fn list_prompts(manager: &ProviderManager) -> Result<()> {
    let prompts = manager.list_prompts().await;
    if prompts.is_empty() {
        println!("No prompts available.");
        return Ok(());
    }
    let mut table = Table::new();
    table.add_row(row!["Prompt", "Arguments", "Description"]);
    for prompt in &prompts {
        let arguments = prompt
            .arguments
            .iter()
            .flatten()
            .map(|arg| {
                if arg.required.unwrap_or(false) {
                    format!("{}*", arg.name)
                } else {
                    arg.name.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(", ");
        table.add_row(row![
            prompt.name,
            arguments,
            prompt.description.as_deref().unwrap_or("")
        ]);
    }
    println!();
    table.printstd();
    println!();
    Ok(())
}

/// `toolmesh prompt <name> [--arg key=value]...`
pub async fn get_prompt(manager: &ProviderManager, name: &str, args: &[String]) -> Result<()> {
    let rendered = manager.get_prompt(name, parse_key_values(args)?).await?;
    if let Some(description) = &rendered.description {
        println!("{}\n", description.dimmed());
    }
    for message in &rendered.messages {
        let role = serde_json::to_value(&message.role)?
            .as_str()
            .unwrap_or_default()
            .to_string();
        match &message.content {
            ToolResponseContent::Text { text } => println!("{}: {}", role.bold(), text),
            other => println!("{}: {}", role.bold(), serde_json::to_string(other)?),
        }
    }
    Ok(())
}

/// `toolmesh cache clear|cleanup`
pub async fn maintain_cache(cache: &Arc<CapabilityCache>, command: CacheCommand) -> Result<()> {
    let removed = cache
        .blocking(move |c| match command {
            CacheCommand::Clear => c.clear(),
            CacheCommand::Cleanup => c.cleanup(),
        })
        .await
        .ok_or_else(|| ToolmeshError::Storage("cache maintenance task failed".to_string()))?;
    println!("Removed {} cache entr{}", removed, if removed == 1 { "y" } else { "ies" });
    Ok(())
}
