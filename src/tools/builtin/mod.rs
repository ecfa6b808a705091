//! Built-in tool providers
//!
//! In-process providers that need no transport and no handshake. Each one
//! presents the same listing/invocation surface as a remote MCP server, so
//! the provider manager can treat both kinds of owner alike.
//!
//! The [`BuiltinRegistry`] is built from an explicit provider list and
//! exposes every provider's tools as `providerId.toolName`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::BuiltinsConfig;
use crate::error::{Result, ToolmeshError};
use crate::mcp::server::{qualify, qualify_uri, split_qualified, ServerDescriptor};
use crate::mcp::types::{
    CallToolResponse, GetPromptResponse, McpTool, Prompt, Resource, ResourceContents,
};
use crate::storage::KeyValueStore;

pub mod memory;
pub mod sqlite;
pub mod time;

/// Id prefix reserved for built-in providers.
pub const BUILTIN_ID_PREFIX: &str = "builtin-";

/// An in-process tool owner.
///
/// `call_tool` reports tool-level failures through
/// [`CallToolResponse::is_error`]; an `Err` is reserved for malformed
/// requests and is converted to an error-tagged result by the registry.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BuiltinProvider: Send + Sync {
    /// Provider id; must start with [`BUILTIN_ID_PREFIX`].
    fn id(&self) -> &str;

    /// Display name.
    fn name(&self) -> &str;

    /// Tools exposed by this provider, with local names.
    fn list_tools(&self) -> Vec<McpTool>;

    /// Invoke the tool `name` (local name).
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResponse>;

    /// Resources exposed by this provider, with original URIs.
    fn list_resources(&self) -> Vec<Resource> {
        Vec::new()
    }

    /// Read a resource by its original URI.
    async fn read_resource(&self, uri: &str) -> Result<Vec<ResourceContents>> {
        Err(ToolmeshError::Tool(format!("resource not found: {}", uri)).into())
    }

    /// Prompts exposed by this provider, with local names.
    fn list_prompts(&self) -> Vec<Prompt> {
        Vec::new()
    }

    /// Render the prompt `name` (local name).
    async fn get_prompt(
        &self,
        name: &str,
        _arguments: HashMap<String, String>,
    ) -> Result<GetPromptResponse> {
        Err(ToolmeshError::Tool(format!("prompt not found: {}", name)).into())
    }
}

/// Fixed set of built-in providers.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use toolmesh::tools::builtin::{time::TimeProvider, BuiltinRegistry};
///
/// let registry = BuiltinRegistry::new(vec![Arc::new(TimeProvider::new())]);
/// assert!(registry.contains("builtin-time"));
/// assert!(registry
///     .list_tools()
///     .iter()
///     .any(|t| t.name == "builtin-time.get_current_time"));
/// ```
#[derive(Clone, Default)]
pub struct BuiltinRegistry {
    providers: Vec<Arc<dyn BuiltinProvider>>,
}

impl std::fmt::Debug for BuiltinRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltinRegistry")
            .field("providers", &self.ids())
            .finish()
    }
}

impl BuiltinRegistry {
    /// Registry over `providers`, in listing order.
    pub fn new(providers: Vec<Arc<dyn BuiltinProvider>>) -> Self {
        Self { providers }
    }

    /// Registry with no providers.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The standard providers: time, SQLite and memory.
    ///
    /// Returns an empty registry when built-ins are disabled.
    ///
    /// # Errors
    ///
    /// Returns [`ToolmeshError::Storage`] if the SQLite provider's database
    /// cannot be opened.
    pub fn with_defaults(config: &BuiltinsConfig, store: Arc<dyn KeyValueStore>) -> Result<Self> {
        if !config.enabled {
            tracing::info!("built-in providers disabled");
            return Ok(Self::empty());
        }

        let sqlite = match &config.sqlite_path {
            Some(path) => sqlite::SqliteProvider::open(path)?,
            None => sqlite::SqliteProvider::in_memory()?,
        };

        Ok(Self::new(vec![
            Arc::new(time::TimeProvider::new()),
            Arc::new(sqlite),
            Arc::new(memory::MemoryProvider::new(store)),
        ]))
    }

    /// Ids of all registered providers.
    pub fn ids(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.id()).collect()
    }

    /// Whether `id` names a registered provider.
    pub fn contains(&self, id: &str) -> bool {
        self.provider(id).is_some()
    }

    /// Whether `name` (`owner.local`) is addressed to a built-in provider.
    pub fn owns(&self, name: &str) -> bool {
        split_qualified(name).is_some_and(|(owner, _)| self.contains(owner))
    }

    /// Number of registered providers.
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether no providers are registered.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    fn provider(&self, id: &str) -> Option<&Arc<dyn BuiltinProvider>> {
        self.providers.iter().find(|p| p.id() == id)
    }

    /// One always-connected descriptor per provider.
    pub fn descriptors(&self) -> Vec<ServerDescriptor> {
        self.providers
            .iter()
            .map(|p| ServerDescriptor::builtin(p.id(), p.name()))
            .collect()
    }

    /// Every provider's tools, named `providerId.toolName`.
    pub fn list_tools(&self) -> Vec<McpTool> {
        self.providers
            .iter()
            .flat_map(|p| {
                let id = p.id().to_string();
                p.list_tools()
                    .into_iter()
                    .map(move |tool| tool.namespaced(&id))
            })
            .collect()
    }

    /// Route `providerId.toolName` to its provider.
    ///
    /// Never fails: an unknown provider, an unqualified name, or a provider
    /// error all come back as an error-tagged result.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> CallToolResponse {
        let Some((owner, local)) = split_qualified(name) else {
            return CallToolResponse::error(format!(
                "Tool name '{}' is not of the form provider.tool",
                name
            ));
        };
        let Some(provider) = self.provider(owner) else {
            return CallToolResponse::error(format!("Built-in provider not found: {}", owner));
        };

        tracing::debug!(provider = owner, tool = local, "calling built-in tool");
        match provider.call_tool(local, arguments).await {
            Ok(result) => result,
            Err(e) => CallToolResponse::error(e.to_string()),
        }
    }

    /// Every provider's resources, with URIs rewritten to `providerId://uri`.
    pub fn list_resources(&self) -> Vec<Resource> {
        self.providers
            .iter()
            .flat_map(|p| {
                let id = p.id().to_string();
                p.list_resources().into_iter().map(move |mut resource| {
                    resource.uri = qualify_uri(&id, &resource.uri);
                    resource
                })
            })
            .collect()
    }

    /// Read `uri` (original form) from provider `owner`.
    ///
    /// Returned contents carry the rewritten `owner://uri` form.
    ///
    /// # Errors
    ///
    /// Returns [`ToolmeshError::ServerNotFound`] for an unknown provider, or
    /// the provider's own error.
    pub async fn read_resource(&self, owner: &str, uri: &str) -> Result<Vec<ResourceContents>> {
        let provider = self
            .provider(owner)
            .ok_or_else(|| ToolmeshError::ServerNotFound(owner.to_string()))?;
        let mut contents = provider.read_resource(uri).await?;
        for item in &mut contents {
            let qualified = qualify_uri(owner, item.uri());
            item.set_uri(qualified);
        }
        Ok(contents)
    }

    /// Every provider's prompts, named `providerId.promptName`.
    pub fn list_prompts(&self) -> Vec<Prompt> {
        self.providers
            .iter()
            .flat_map(|p| {
                let id = p.id().to_string();
                p.list_prompts().into_iter().map(move |mut prompt| {
                    prompt.name = qualify(&id, &prompt.name);
                    prompt
                })
            })
            .collect()
    }

    /// Render `providerId.promptName`.
    ///
    /// # Errors
    ///
    /// Returns [`ToolmeshError::ServerNotFound`] for an unknown provider, or
    /// the provider's own error.
    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: HashMap<String, String>,
    ) -> Result<GetPromptResponse> {
        let (owner, local) = split_qualified(name).ok_or_else(|| {
            ToolmeshError::Tool(format!("Prompt name '{}' is not of the form provider.prompt", name))
        })?;
        let provider = self
            .provider(owner)
            .ok_or_else(|| ToolmeshError::ServerNotFound(owner.to_string()))?;
        provider.get_prompt(local, arguments).await
    }
}

/// Parse tool arguments into a typed parameter struct.
pub(crate) fn parse_params<T: serde::de::DeserializeOwned>(arguments: Value) -> Result<T> {
    let arguments = if arguments.is_null() {
        Value::Object(Default::default())
    } else {
        arguments
    };
    serde_json::from_value(arguments)
        .map_err(|e| ToolmeshError::Tool(format!("Invalid parameters: {}", e)).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::types::{Role, TextResourceContents, ToolResponseContent};
    use crate::storage::MemoryStore;
    use serde_json::json;

    fn mock_provider(id: &'static str) -> MockBuiltinProvider {
        let mut mock = MockBuiltinProvider::new();
        mock.expect_id().return_const(id.to_string());
        mock.expect_name().return_const("Mock".to_string());
        mock.expect_list_tools()
            .returning(|| vec![McpTool::new("echo", "Echo", json!({"type": "object"}))]);
        mock
    }

    #[test]
    fn test_tools_are_prefixed_with_provider_id() {
        let registry = BuiltinRegistry::new(vec![
            Arc::new(mock_provider("builtin-a")),
            Arc::new(mock_provider("builtin-b")),
        ]);
        let names: Vec<String> = registry.list_tools().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["builtin-a.echo", "builtin-b.echo"]);
    }

    #[tokio::test]
    async fn test_call_routes_to_provider_with_local_name() {
        let mut mock = mock_provider("builtin-a");
        mock.expect_call_tool()
            .withf(|name, args| name == "echo" && args["message"] == "hi")
            .returning(|_, _| Ok(CallToolResponse::text("hi")));
        let registry = BuiltinRegistry::new(vec![Arc::new(mock)]);

        let result = registry
            .call_tool("builtin-a.echo", json!({"message": "hi"}))
            .await;
        assert!(!result.is_error);
        assert_eq!(result.text_content(), "hi");
    }

    #[tokio::test]
    async fn test_unknown_provider_is_error_result() {
        let registry = BuiltinRegistry::new(vec![Arc::new(mock_provider("builtin-a"))]);
        let result = registry.call_tool("builtin-zzz.echo", json!({})).await;
        assert!(result.is_error);
        assert!(result.text_content().contains("builtin-zzz"));

        let unqualified = registry.call_tool("echo", json!({})).await;
        assert!(unqualified.is_error);
    }

    #[tokio::test]
    async fn test_provider_error_becomes_error_result() {
        let mut mock = mock_provider("builtin-a");
        mock.expect_call_tool()
            .returning(|_, _| Err(ToolmeshError::Tool("Invalid parameters: missing field".into()).into()));
        let registry = BuiltinRegistry::new(vec![Arc::new(mock)]);

        let result = registry.call_tool("builtin-a.echo", json!({})).await;
        assert!(result.is_error);
        assert!(result.text_content().contains("Invalid parameters"));
    }

    #[tokio::test]
    async fn test_resources_and_prompts_are_namespaced() {
        let mut mock = mock_provider("builtin-a");
        mock.expect_list_resources().returning(|| {
            vec![Resource {
                uri: "schema://tables".into(),
                name: "tables".into(),
                description: None,
                mime_type: None,
            }]
        });
        mock.expect_read_resource().returning(|uri| {
            Ok(vec![ResourceContents::Text(TextResourceContents {
                uri: uri.to_string(),
                mime_type: None,
                text: "t".into(),
            })])
        });
        mock.expect_list_prompts().returning(|| {
            vec![Prompt {
                name: "summary".into(),
                description: None,
                arguments: None,
            }]
        });
        mock.expect_get_prompt().returning(|_, _| {
            Ok(GetPromptResponse {
                description: None,
                messages: vec![crate::mcp::types::PromptMessage {
                    role: Role::User,
                    content: ToolResponseContent::Text { text: "x".into() },
                }],
            })
        });
        let registry = BuiltinRegistry::new(vec![Arc::new(mock)]);

        assert_eq!(registry.list_resources()[0].uri, "builtin-a://schema://tables");
        let contents = registry
            .read_resource("builtin-a", "schema://tables")
            .await
            .unwrap();
        assert_eq!(contents[0].uri(), "builtin-a://schema://tables");

        assert_eq!(registry.list_prompts()[0].name, "builtin-a.summary");
        let prompt = registry
            .get_prompt("builtin-a.summary", HashMap::new())
            .await
            .unwrap();
        assert_eq!(prompt.messages.len(), 1);
        assert!(registry.get_prompt("builtin-x.summary", HashMap::new()).await.is_err());
    }

    #[test]
    fn test_owns_checks_registered_ids() {
        let registry = BuiltinRegistry::new(vec![Arc::new(mock_provider("builtin-a"))]);
        assert!(registry.owns("builtin-a.echo"));
        assert!(!registry.owns("builtin-b.echo"));
        assert!(!registry.owns("weather.forecast"));
    }

    #[test]
    fn test_with_defaults_registers_standard_providers() {
        let registry =
            BuiltinRegistry::with_defaults(&BuiltinsConfig::default(), Arc::new(MemoryStore::new()))
                .unwrap();
        assert_eq!(
            registry.ids(),
            vec!["builtin-time", "builtin-sqlite", "builtin-memory"]
        );
        assert!(registry.descriptors().iter().all(|d| d.connected));
    }

    #[test]
    fn test_with_defaults_respects_disabled() {
        let config = BuiltinsConfig {
            enabled: false,
            sqlite_path: None,
        };
        let registry = BuiltinRegistry::with_defaults(&config, Arc::new(MemoryStore::new())).unwrap();
        assert!(registry.is_empty());
    }
}
