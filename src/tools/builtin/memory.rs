//! `builtin-memory` provider
//!
//! Named notes kept in the storage capability. On the native backend they
//! persist across runs; on the simulated backend they last for the process.
//! Callers see the same tools either way.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{Result, ToolmeshError};
use crate::mcp::types::{
    CallToolResponse, GetPromptResponse, McpTool, Prompt, PromptArgument, PromptMessage, Role,
    ToolResponseContent,
};
use crate::storage::KeyValueStore;
use crate::tools::builtin::{parse_params, BuiltinProvider};

pub const MEMORY_PROVIDER_ID: &str = "builtin-memory";
pub const MEMORY_NAMESPACE: &str = "builtin-memory";
pub const TOOL_REMEMBER: &str = "remember";
pub const TOOL_RECALL: &str = "recall";
pub const TOOL_FORGET: &str = "forget";
pub const TOOL_LIST_MEMORIES: &str = "list_memories";
pub const PROMPT_SUMMARIZE: &str = "summarize_memories";

/// Key/value notes over a [`KeyValueStore`].
#[derive(Debug, Clone)]
pub struct MemoryProvider {
    store: Arc<dyn KeyValueStore>,
}

#[derive(Debug, Deserialize)]
struct RememberParams {
    key: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct KeyParams {
    key: String,
}

impl MemoryProvider {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    fn remember(&self, params: RememberParams) -> Result<CallToolResponse> {
        if params.key.trim().is_empty() {
            return Ok(CallToolResponse::error("Memory key cannot be empty"));
        }
        self.store.put(MEMORY_NAMESPACE, &params.key, &params.content)?;
        Ok(CallToolResponse::text(format!("Remembered '{}'", params.key)))
    }

    fn recall(&self, params: KeyParams) -> Result<CallToolResponse> {
        Ok(match self.store.get(MEMORY_NAMESPACE, &params.key)? {
            Some(content) => CallToolResponse::text(content),
            None => CallToolResponse::error(format!("No memory named '{}'", params.key)),
        })
    }

    fn forget(&self, params: KeyParams) -> Result<CallToolResponse> {
        Ok(if self.store.remove(MEMORY_NAMESPACE, &params.key)? {
            CallToolResponse::text(format!("Forgot '{}'", params.key))
        } else {
            CallToolResponse::error(format!("No memory named '{}'", params.key))
        })
    }

    fn list(&self) -> Result<CallToolResponse> {
        let keys = self.store.keys(MEMORY_NAMESPACE)?;
        if keys.is_empty() {
            return Ok(CallToolResponse::text("No memories stored"));
        }
        Ok(CallToolResponse::text(keys.join("\n")))
    }

    fn all_memories(&self) -> Result<Vec<(String, String)>> {
        let mut memories = Vec::new();
        for key in self.store.keys(MEMORY_NAMESPACE)? {
            if let Some(content) = self.store.get(MEMORY_NAMESPACE, &key)? {
                memories.push((key, content));
            }
        }
        Ok(memories)
    }
}

fn key_schema(description: &str) -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "key": { "type": "string", "description": description }
        },
        "required": ["key"]
    })
}

#[async_trait]
impl BuiltinProvider for MemoryProvider {
    fn id(&self) -> &str {
        MEMORY_PROVIDER_ID
    }

    fn name(&self) -> &str {
        "Memory"
    }

    fn list_tools(&self) -> Vec<McpTool> {
        vec![
            McpTool::new(
                TOOL_REMEMBER,
                "Stores a note under a key, replacing any previous note with that key.",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "key": { "type": "string", "description": "Name of the note" },
                        "content": { "type": "string", "description": "Text to store" }
                    },
                    "required": ["key", "content"]
                }),
            ),
            McpTool::new(TOOL_RECALL, "Returns the note stored under a key.", key_schema("Name of the note")),
            McpTool::new(TOOL_FORGET, "Deletes the note stored under a key.", key_schema("Name of the note")),
            McpTool::new(
                TOOL_LIST_MEMORIES,
                "Lists the keys of all stored notes.",
                serde_json::json!({ "type": "object", "properties": {} }),
            ),
        ]
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResponse> {
        match name {
            TOOL_REMEMBER => self.remember(parse_params(arguments)?),
            TOOL_RECALL => self.recall(parse_params(arguments)?),
            TOOL_FORGET => self.forget(parse_params(arguments)?),
            TOOL_LIST_MEMORIES => self.list(),
            other => Err(ToolmeshError::Tool(format!("Unknown tool: {}", other)).into()),
        }
    }

    fn list_prompts(&self) -> Vec<Prompt> {
        vec![Prompt {
            name: PROMPT_SUMMARIZE.to_string(),
            description: Some("Asks for a summary of every stored note".to_string()),
            arguments: Some(vec![PromptArgument {
                name: "focus".to_string(),
                description: Some("Optional topic to focus the summary on".to_string()),
                required: Some(false),
            }]),
        }]
    }

    async fn get_prompt(
        &self,
        name: &str,
        arguments: HashMap<String, String>,
    ) -> Result<GetPromptResponse> {
        if name != PROMPT_SUMMARIZE {
            return Err(ToolmeshError::Tool(format!("prompt not found: {}", name)).into());
        }

        let memories = self.all_memories()?;
        let mut text = String::from("Summarize the following notes");
        if let Some(focus) = arguments.get("focus").filter(|f| !f.is_empty()) {
            text.push_str(&format!(", focusing on {}", focus));
        }
        text.push_str(":\n");
        if memories.is_empty() {
            text.push_str("(no notes stored)\n");
        }
        for (key, content) in &memories {
            text.push_str(&format!("- {}: {}\n", key, content));
        }

        Ok(GetPromptResponse {
            description: Some(format!("Summary request over {} note(s)", memories.len())),
            messages: vec![PromptMessage {
                role: Role::User,
                content: ToolResponseContent::Text { text },
            }],
        })
    }
}
