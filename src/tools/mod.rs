//! Tool invocation for callers outside the runtime
//!
//! [`ToolCallExecutor`] is the single point of contact for code that wants
//! to run a tool by name and splice the outcome into a prompt. It hides
//! transports and request correlation behind one uniform outcome record.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::manager::ProviderManager;
use crate::mcp::types::CallToolResponse;

pub mod builtin;

/// One tool invocation, addressed by its namespaced name.
///
/// # Examples
///
/// ```
/// use toolmesh::tools::ToolCall;
///
/// let call: ToolCall = serde_json::from_str(
///     r#"{"name": "builtin-time.get_current_time", "arguments": {"utc_offset": "+01:00"}}"#,
/// ).unwrap();
/// assert_eq!(call.arguments["utc_offset"], "+01:00");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// `ownerId.toolName`
    pub name: String,
    /// Arguments keyed by parameter name
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }

    /// Call with no arguments.
    pub fn named(name: impl Into<String>) -> Self {
        Self::new(name, Map::new())
    }
}

/// Uniform result of one [`ToolCall`].
///
/// `error` is a short sentence safe to show a user; `result` holds the raw
/// tool result whenever the owner produced one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<CallToolResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub tool_name: String,
    pub arguments: Map<String, Value>,
}

impl ToolCallOutcome {
    fn from_response(call: &ToolCall, response: CallToolResponse) -> Self {
        if response.is_error {
            let message = response.text_content();
            let error = if message.trim().is_empty() {
                "the tool reported an error".to_string()
            } else {
                message
            };
            Self::failure(call, error, Some(response))
        } else {
            Self {
                success: true,
                result: Some(response),
                error: None,
                tool_name: call.name.clone(),
                arguments: call.arguments.clone(),
            }
        }
    }

    fn failure(call: &ToolCall, error: String, result: Option<CallToolResponse>) -> Self {
        Self {
            success: false,
            result,
            error: Some(error),
            tool_name: call.name.clone(),
            arguments: call.arguments.clone(),
        }
    }
}

/// Runs tool calls through a [`ProviderManager`].
#[derive(Debug, Clone)]
pub struct ToolCallExecutor {
    manager: Arc<ProviderManager>,
}

impl ToolCallExecutor {
    pub fn new(manager: Arc<ProviderManager>) -> Self {
        Self { manager }
    }

    fn unconfigured(&self, call: &ToolCall) -> Option<ToolCallOutcome> {
        if self.manager.is_configured() {
            None
        } else {
            Some(ToolCallOutcome::failure(
                call,
                "no tool providers are configured".to_string(),
                None,
            ))
        }
    }

    /// Run one call.
    ///
    /// Never fails: manager errors and error-tagged results both become an
    /// unsuccessful outcome.
    pub async fn execute(&self, call: &ToolCall) -> ToolCallOutcome {
        if let Some(outcome) = self.unconfigured(call) {
            return outcome;
        }

        match self
            .manager
            .call_tool(&call.name, Value::Object(call.arguments.clone()))
            .await
        {
            Ok(response) => ToolCallOutcome::from_response(call, response),
            Err(e) => {
                tracing::warn!(tool = %call.name, error = %e, "tool call failed");
                ToolCallOutcome::failure(call, e.to_string(), None)
            }
        }
    }

    /// Run calls concurrently; outcomes are index-aligned with `calls`.
    pub async fn execute_batch(&self, calls: &[ToolCall]) -> Vec<ToolCallOutcome> {
        if !self.manager.is_configured() {
            return calls
                .iter()
                .filter_map(|call| self.unconfigured(call))
                .collect();
        }

        self.manager
            .call_tools(calls.to_vec())
            .await
            .into_iter()
            .zip(calls)
            .map(|(response, call)| ToolCallOutcome::from_response(call, response))
            .collect()
    }

    /// Render an outcome as plain text for a prompt.
    ///
    /// A success yields its text blocks joined by newlines; a failure yields
    /// `Tool '<name>' failed: <message>`.
    pub fn format(outcome: &ToolCallOutcome) -> String {
        match (&outcome.result, outcome.success) {
            (Some(result), true) => result.text_content(),
            _ => format!(
                "Tool '{}' failed: {}",
                outcome.tool_name,
                outcome.error.as_deref().unwrap_or("unknown error")
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CapabilityCache;
    use crate::config::Config;
    use crate::mcp::types::ToolResponseContent;
    use crate::storage::MemoryStore;
    use crate::tools::builtin::time::TimeProvider;
    use crate::tools::builtin::BuiltinRegistry;
    use serde_json::json;

    fn executor(builtins: BuiltinRegistry) -> ToolCallExecutor {
        let manager = ProviderManager::new(
            Config::default(),
            Arc::new(builtins),
            Arc::new(CapabilityCache::new(Arc::new(MemoryStore::new()))),
            None,
        )
        .unwrap();
        ToolCallExecutor::new(Arc::new(manager))
    }

    fn time_executor() -> ToolCallExecutor {
        executor(BuiltinRegistry::new(vec![Arc::new(TimeProvider::new())]))
    }

    #[tokio::test]
    async fn test_execute_success() {
        let outcome = time_executor()
            .execute(&ToolCall::named("builtin-time.get_unix_timestamp"))
            .await;
        assert!(outcome.success);
        assert!(outcome.error.is_none());
        assert_eq!(outcome.tool_name, "builtin-time.get_unix_timestamp");
        assert!(ToolCallExecutor::format(&outcome).parse::<i64>().is_ok());
    }

    #[tokio::test]
    async fn test_error_result_becomes_failure() {
        let outcome = time_executor()
            .execute(&ToolCall::named("ghost.tool"))
            .await;
        assert!(!outcome.success);
        let line = ToolCallExecutor::format(&outcome);
        assert!(line.starts_with("Tool 'ghost.tool' failed: "), "{line}");
        assert!(line.contains("ghost"));
    }

    #[tokio::test]
    async fn test_unconfigured_manager_fails_every_call() {
        let exec = executor(BuiltinRegistry::empty());
        let outcome = exec
            .execute(&ToolCall::named("builtin-time.get_unix_timestamp"))
            .await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("no tool providers"));

        let batch = exec
            .execute_batch(&[ToolCall::named("a.b"), ToolCall::named("c.d")])
            .await;
        assert_eq!(batch.len(), 2);
        assert!(batch.iter().all(|o| !o.success));
    }

    #[tokio::test]
    async fn test_execute_batch_preserves_order() {
        let calls = vec![
            ToolCall::named("builtin-time.get_unix_timestamp"),
            ToolCall::named("nowhere.tool"),
            ToolCall::new(
                "builtin-time.get_current_time",
                json!({"format": "%Y"}).as_object().cloned().unwrap_or_default(),
            ),
        ];
        let outcomes = time_executor().execute_batch(&calls).await;
        let names: Vec<&str> = outcomes.iter().map(|o| o.tool_name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "builtin-time.get_unix_timestamp",
                "nowhere.tool",
                "builtin-time.get_current_time"
            ]
        );
        assert_eq!(
            outcomes.iter().map(|o| o.success).collect::<Vec<_>>(),
            vec![true, false, true]
        );
    }

    #[test]
    fn test_format_joins_text_blocks_only() {
        let outcome = ToolCallOutcome {
            success: true,
            result: Some(CallToolResponse {
                content: vec![
                    ToolResponseContent::Text { text: "one".into() },
                    ToolResponseContent::Image {
                        data: "AAAA".into(),
                        mime_type: "image/png".into(),
                    },
                    ToolResponseContent::Text { text: "two".into() },
                ],
                is_error: false,
            }),
            error: None,
            tool_name: "x.y".into(),
            arguments: Map::new(),
        };
        assert_eq!(ToolCallExecutor::format(&outcome), "one\ntwo");
    }

    #[test]
    fn test_outcome_serializes_camel_case() {
        let outcome = ToolCallOutcome::failure(&ToolCall::named("a.b"), "boom".into(), None);
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["toolName"], "a.b");
        assert_eq!(value["success"], false);
        assert!(value.get("result").is_none());
    }
}
