//! Provider manager
//!
//! The aggregator and router over every tool owner: the built-in registry
//! plus one [`McpProtocol`] session per configured remote server.
//!
//! - Tool, resource and prompt listings are merged under owner-qualified
//!   names (`owner.tool`, `owner://uri`), so two owners can never collide.
//! - Calls are routed back to their owner by that prefix.
//! - One failing server never hides the built-ins or any other server.
//! - The merged tool list is held in memory for a short TTL. Per-server
//!   listings are persisted in the [`CapabilityCache`], with a last-known
//!   copy that outlives the TTL as a fallback when a live listing fails.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;

use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::cache::CapabilityCache;
use crate::config::{Config, ServerConfig};
use crate::error::{Result, ToolmeshError};
use crate::mcp::protocol::{McpProtocol, ServerCapabilityFlag};
use crate::mcp::server::{
    qualify, qualify_uri, split_qualified, split_qualified_uri, ServerDescriptor,
};
use crate::mcp::transport::{DefaultTransportFactory, TransportFactory};
use crate::mcp::types::{
    CallToolResponse, GetPromptResponse, Implementation, McpTool, Prompt, Resource,
    ResourceContents, ServerCapabilities, NOTIF_TOOLS_LIST_CHANGED,
};
use crate::tools::builtin::BuiltinRegistry;
use crate::tools::ToolCall;

/// Persisted capability snapshot key for server `id`.
pub fn server_snapshot_key(id: &str) -> String {
    format!("server:{}", id)
}

/// Persisted tool listing key for server `id`.
pub fn tools_snapshot_key(id: &str) -> String {
    format!("tools:{}", id)
}

/// Persisted last-known tool listing key for server `id`; never expires.
pub fn last_known_tools_key(id: &str) -> String {
    format!("tools:{}:last-known", id)
}

/// What survives a reconnect about a server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerSnapshot {
    #[serde(default)]
    capabilities: Option<ServerCapabilities>,
    #[serde(default)]
    server_info: Option<Implementation>,
    #[serde(default)]
    protocol_version: Option<String>,
}

/// Short-lived merged tool list.
///
/// The generation counter stops a rebuild that started before an
/// invalidation from storing its now-stale result.
#[derive(Debug, Default)]
struct ToolsCache {
    entry: StdMutex<Option<(Instant, Vec<McpTool>)>>,
    generation: AtomicU64,
}

impl ToolsCache {
    fn lock(&self) -> std::sync::MutexGuard<'_, Option<(Instant, Vec<McpTool>)>> {
        self.entry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn fresh(&self, ttl: std::time::Duration) -> Option<Vec<McpTool>> {
        match self.lock().as_ref() {
            Some((stored_at, tools)) if stored_at.elapsed() < ttl => Some(tools.clone()),
            _ => None,
        }
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn store(&self, generation: u64, tools: Vec<McpTool>) {
        let mut entry = self.lock();
        if self.generation() == generation {
            *entry = Some((Instant::now(), tools));
        }
    }

    fn invalidate(&self) {
        let mut entry = self.lock();
        self.generation.fetch_add(1, Ordering::SeqCst);
        *entry = None;
    }
}

/// Aggregates and routes across built-in providers and remote servers.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use toolmesh::cache::CapabilityCache;
/// use toolmesh::config::Config;
/// use toolmesh::manager::ProviderManager;
/// use toolmesh::storage::MemoryStore;
/// use toolmesh::tools::builtin::BuiltinRegistry;
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let store = Arc::new(MemoryStore::new());
/// let config = Config::load("config/toolmesh.yaml")?;
/// let builtins = BuiltinRegistry::with_defaults(&config.builtins, store.clone())?;
/// let manager = ProviderManager::new(
///     config,
///     Arc::new(builtins),
///     Arc::new(CapabilityCache::new(store)),
///     None,
/// )?;
/// manager.initialize().await;
/// for tool in manager.list_tools().await {
///     println!("{}", tool.name);
/// }
/// manager.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct ProviderManager {
    config: Config,
    builtins: Arc<BuiltinRegistry>,
    cache: Arc<CapabilityCache>,
    factory: Arc<dyn TransportFactory>,
    clients: RwLock<HashMap<String, Arc<McpProtocol>>>,
    tools_cache: Arc<ToolsCache>,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ProviderManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderManager")
            .field("servers", &self.config.servers.len())
            .field("builtins", &self.builtins)
            .finish_non_exhaustive()
    }
}

impl ProviderManager {
    /// Create a manager; nothing is connected until [`initialize`](Self::initialize).
    ///
    /// `factory` defaults to [`DefaultTransportFactory`] with the configured
    /// timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`ToolmeshError::Config`] if `config` fails
    /// [`Config::validate`], e.g. a server id containing `.` or a duplicate id.
    pub fn new(
        config: Config,
        builtins: Arc<BuiltinRegistry>,
        cache: Arc<CapabilityCache>,
        factory: Option<Arc<dyn TransportFactory>>,
    ) -> Result<Self> {
        config.validate()?;
        let factory = factory.unwrap_or_else(|| {
            Arc::new(DefaultTransportFactory::new(
                config.runtime.connect_timeout(),
                config.runtime.request_timeout(),
            ))
        });
        Ok(Self {
            config,
            builtins,
            cache,
            factory,
            clients: RwLock::new(HashMap::new()),
            tools_cache: Arc::new(ToolsCache::default()),
            maintenance: Mutex::new(None),
        })
    }

    /// The built-in registry.
    pub fn builtins(&self) -> &Arc<BuiltinRegistry> {
        &self.builtins
    }

    /// The capability cache.
    pub fn cache(&self) -> &Arc<CapabilityCache> {
        &self.cache
    }

    /// Connect every configured server concurrently.
    ///
    /// A server that fails to connect is logged and left out; this never
    /// fails. Servers that already have a live session keep it, so calling
    /// this again only retries the ones that are down. Returns how many
    /// servers are connected afterwards.
    pub async fn initialize(&self) -> usize {
        let mut pending = Vec::new();
        for server in &self.config.servers {
            match self.client(&server.id).await {
                Some(existing) if existing.is_connected() => {
                    tracing::debug!(server = %server.id, "already connected; keeping session");
                }
                _ => pending.push(server),
            }
        }

        let attempts = pending
            .into_iter()
            .map(|server| async move { (server.id.clone(), self.connect_server(server).await) });

        for (id, result) in join_all(attempts).await {
            match result {
                Ok(client) => {
                    let replaced = self.clients.write().await.insert(id.clone(), client);
                    if let Some(replaced) = replaced {
                        if let Err(e) = replaced.disconnect().await {
                            tracing::debug!(server = %id, error = %e, "error closing replaced session");
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(server = %id, error = %e, "failed to connect MCP server; continuing without it");
                }
            }
        }

        let connected = self
            .clients
            .read()
            .await
            .values()
            .filter(|c| c.is_connected())
            .count();
        self.tools_cache.invalidate();
        tracing::info!(
            connected,
            configured = self.config.servers.len(),
            builtins = self.builtins.len(),
            "provider manager initialized"
        );
        connected
    }

    async fn restore_snapshot(&self, descriptor: &mut ServerDescriptor) {
        let key = server_snapshot_key(&descriptor.id);
        let snapshot = self
            .cache
            .blocking(move |c| c.get_as::<ServerSnapshot>(&key))
            .await
            .flatten();
        if let Some(snapshot) = snapshot {
            tracing::debug!(server = %descriptor.id, "restored cached capability snapshot");
            descriptor.capabilities = snapshot.capabilities;
            descriptor.server_info = snapshot.server_info;
        }
    }

    async fn connect_server(&self, server: &ServerConfig) -> Result<Arc<McpProtocol>> {
        let mut descriptor = server.descriptor()?;
        self.restore_snapshot(&mut descriptor).await;

        let transport = self.factory.create(server)?;
        let client = Arc::new(McpProtocol::new(
            descriptor,
            transport,
            self.config.runtime.request_timeout(),
        ));

        let tools_cache = Arc::clone(&self.tools_cache);
        let cache = Arc::clone(&self.cache);
        let id = server.id.clone();
        client.on_notification(NOTIF_TOOLS_LIST_CHANGED, move |_| {
            tracing::debug!(server = %id, "tool list changed; invalidating caches");
            tools_cache.invalidate();
            let cache = Arc::clone(&cache);
            let key = tools_snapshot_key(&id);
            tokio::task::spawn_blocking(move || cache.delete(&key));
        });

        client.connect().await?;

        let connected = client.descriptor();
        let key = server_snapshot_key(&server.id);
        let snapshot = ServerSnapshot {
            capabilities: connected.capabilities,
            server_info: connected.server_info,
            protocol_version: client.protocol_version(),
        };
        let ttl = self.config.runtime.capability_snapshot_ttl();
        self.cache
            .blocking(move |c| c.set_as(&key, &snapshot, Some(ttl)))
            .await;
        Ok(client)
    }

    async fn clients_snapshot(&self) -> Vec<(String, Arc<McpProtocol>)> {
        let clients = self.clients.read().await;
        self.config
            .servers
            .iter()
            .filter_map(|s| clients.get(&s.id).map(|c| (s.id.clone(), Arc::clone(c))))
            .collect()
    }

    async fn client(&self, id: &str) -> Option<Arc<McpProtocol>> {
        self.clients.read().await.get(id).cloned()
    }

    /// Descriptors for every owner: built-ins first, then configured servers.
    ///
    /// Servers without a live session report `connected: false` with any
    /// capabilities restored from the last snapshot.
    pub async fn servers(&self) -> Vec<ServerDescriptor> {
        let mut descriptors = self.builtins.descriptors();
        for server in &self.config.servers {
            if let Some(client) = self.client(&server.id).await {
                let mut descriptor = client.descriptor();
                descriptor.connected = client.is_connected();
                descriptors.push(descriptor);
                continue;
            }
            match server.descriptor() {
                Ok(mut descriptor) => {
                    self.restore_snapshot(&mut descriptor).await;
                    descriptors.push(descriptor);
                }
                Err(e) => tracing::warn!(server = %server.id, error = %e, "skipping unusable server"),
            }
        }
        descriptors
    }

    /// Whether any owner (built-in or remote) is configured at all.
    pub fn is_configured(&self) -> bool {
        !self.builtins.is_empty() || !self.config.servers.is_empty()
    }

    /// Whether at least one owner is usable right now.
    pub async fn is_connected(&self) -> bool {
        if !self.builtins.is_empty() {
            return true;
        }
        self.clients.read().await.values().any(|c| c.is_connected())
    }

    /// The merged, owner-qualified tool list.
    ///
    /// Served from memory while fresh; otherwise rebuilt from the built-ins
    /// and every connected remote session. A server whose link has dropped
    /// contributes nothing until it reconnects.
    pub async fn list_tools(&self) -> Vec<McpTool> {
        if let Some(tools) = self.tools_cache.fresh(self.config.runtime.tools_cache_ttl()) {
            return tools;
        }

        let generation = self.tools_cache.generation();
        let mut tools = self.builtins.list_tools();

        let clients: Vec<_> = self
            .clients_snapshot()
            .await
            .into_iter()
            .filter(|(_, client)| client.is_connected())
            .collect();
        let remote = join_all(
            clients
                .iter()
                .map(|(id, client)| self.server_tools(id, client)),
        )
        .await;
        for (id, server_tools) in clients.iter().map(|(id, _)| id).zip(remote) {
            tools.extend(server_tools.iter().map(|tool| tool.namespaced(id)));
        }

        self.tools_cache.store(generation, tools.clone());
        tools
    }

    /// Tools for one server: persisted listing, then live, then last known.
    async fn server_tools(&self, id: &str, client: &McpProtocol) -> Vec<McpTool> {
        let key = tools_snapshot_key(id);
        let persisted = {
            let key = key.clone();
            self.cache
                .blocking(move |c| c.get_as::<Vec<McpTool>>(&key))
                .await
                .flatten()
        };
        if let Some(tools) = persisted {
            return tools;
        }

        let last_known = last_known_tools_key(id);
        match client.list_tools().await {
            Ok(tools) => {
                let ttl = self.config.runtime.tools_snapshot_ttl();
                let listed = tools.clone();
                self.cache
                    .blocking(move |c| {
                        c.set_as(&key, &listed, Some(ttl));
                        c.set_as(&last_known, &listed, None);
                    })
                    .await;
                tools
            }
            Err(e) => {
                let stale = self
                    .cache
                    .blocking(move |c| c.get_as::<Vec<McpTool>>(&last_known))
                    .await
                    .flatten();
                match stale {
                    Some(stale) => {
                        tracing::warn!(server = %id, error = %e, count = stale.len(), "live tools/list failed; using last known tools");
                        stale
                    }
                    None => {
                        tracing::warn!(server = %id, error = %e, "live tools/list failed and no cached tools exist");
                        Vec::new()
                    }
                }
            }
        }
    }

    /// Drop the in-memory merged tool list.
    pub fn invalidate_tools_cache(&self) {
        self.tools_cache.invalidate();
    }

    /// Rebuild the merged tool list, bypassing the in-memory copy.
    pub async fn refresh_tools(&self) -> Vec<McpTool> {
        self.tools_cache.invalidate();
        self.list_tools().await
    }

    /// Invoke `owner.tool`.
    ///
    /// Built-in ids are checked first. An unknown, unqualified or
    /// unconnected owner yields an error-tagged result. Transport faults,
    /// timeouts and peer errors from a remote call are returned as `Err`.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResponse> {
        if self.builtins.owns(name) {
            return Ok(self.builtins.call_tool(name, arguments).await);
        }

        let Some((owner, local)) = split_qualified(name) else {
            return Ok(CallToolResponse::error(format!(
                "Tool name '{}' must be of the form server.tool",
                name
            )));
        };
        let Some(client) = self.client(owner).await else {
            return Ok(CallToolResponse::error(format!("Server not found: {}", owner)));
        };
        if !client.is_connected() {
            return Ok(CallToolResponse::error(format!(
                "Server '{}' is not connected",
                owner
            )));
        }

        let arguments = match arguments {
            Value::Null => None,
            other => Some(other),
        };
        client.call_tool(local, arguments).await
    }

    /// Invoke every call concurrently.
    ///
    /// Results are index-aligned with `calls`; a failed call becomes an
    /// error-tagged result in its own slot.
    pub async fn call_tools(&self, calls: Vec<ToolCall>) -> Vec<CallToolResponse> {
        tracing::debug!(batch.size = calls.len(), "executing tool batch");

        let mut pending: FuturesUnordered<_> = calls
            .into_iter()
            .enumerate()
            .map(|(index, call)| async move {
                let result = self
                    .call_tool(&call.name, Value::Object(call.arguments))
                    .await
                    .unwrap_or_else(|e| CallToolResponse::error(e.to_string()));
                (index, result)
            })
            .collect();

        let mut results = Vec::with_capacity(pending.len());
        while let Some(item) = pending.next().await {
            results.push(item);
        }
        results.sort_by_key(|(index, _)| *index);
        results.into_iter().map(|(_, result)| result).collect()
    }

    /// Every owner's resources, with URIs rewritten to `owner://uri`.
    pub async fn list_resources(&self) -> Vec<Resource> {
        let mut resources = self.builtins.list_resources();
        for (id, client) in self.clients_snapshot().await {
            if !client.is_connected() || !client.capable(ServerCapabilityFlag::Resources) {
                continue;
            }
            match client.list_resources().await {
                Ok(listed) => resources.extend(listed.into_iter().map(|mut resource| {
                    resource.uri = qualify_uri(&id, &resource.uri);
                    resource
                })),
                Err(e) => tracing::warn!(server = %id, error = %e, "resources/list failed"),
            }
        }
        resources
    }

    /// Read an `owner://uri` resource from its owner.
    ///
    /// # Errors
    ///
    /// Returns [`ToolmeshError::ServerNotFound`] for an unknown owner, a
    /// configuration error for a URI without an owner, or the owner's error.
    pub async fn read_resource(&self, uri: &str) -> Result<Vec<ResourceContents>> {
        let (owner, original) = split_qualified_uri(uri).ok_or_else(|| {
            ToolmeshError::Config(format!("Resource URI '{}' must be of the form server://uri", uri))
        })?;

        if self.builtins.contains(owner) {
            return self.builtins.read_resource(owner, original).await;
        }

        let client = self
            .client(owner)
            .await
            .ok_or_else(|| ToolmeshError::ServerNotFound(owner.to_string()))?;
        let mut contents = client.read_resource(original).await?;
        for item in &mut contents {
            let qualified = qualify_uri(owner, item.uri());
            item.set_uri(qualified);
        }
        Ok(contents)
    }

    /// Every owner's prompts, named `owner.prompt`.
    pub async fn list_prompts(&self) -> Vec<Prompt> {
        let mut prompts = self.builtins.list_prompts();
        for (id, client) in self.clients_snapshot().await {
            if !client.is_connected() || !client.capable(ServerCapabilityFlag::Prompts) {
                continue;
            }
            match client.list_prompts().await {
                Ok(listed) => prompts.extend(listed.into_iter().map(|mut prompt| {
                    prompt.name = qualify(&id, &prompt.name);
                    prompt
                })),
                Err(e) => tracing::warn!(server = %id, error = %e, "prompts/list failed"),
            }
        }
        prompts
    }

    /// Render `owner.prompt`.
    ///
    /// # Errors
    ///
    /// Returns [`ToolmeshError::ServerNotFound`] for an unknown owner, or the
    /// owner's error.
    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: HashMap<String, String>,
    ) -> Result<GetPromptResponse> {
        if self.builtins.owns(name) {
            return self.builtins.get_prompt(name, arguments).await;
        }

        let (owner, local) = split_qualified(name).ok_or_else(|| {
            ToolmeshError::Config(format!("Prompt name '{}' must be of the form server.prompt", name))
        })?;
        let client = self
            .client(owner)
            .await
            .ok_or_else(|| ToolmeshError::ServerNotFound(owner.to_string()))?;
        let arguments = (!arguments.is_empty()).then_some(arguments);
        client.get_prompt(local, arguments).await
    }

    /// Replace one server's session with a fresh one.
    ///
    /// Other servers and the built-ins are untouched. The merged tool list
    /// is rebuilt afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`ToolmeshError::ServerNotFound`] if `id` is not configured,
    /// or the connection error. On failure the server is left without a
    /// session.
    pub async fn reconnect_server(&self, id: &str) -> Result<()> {
        let server = self
            .config
            .servers
            .iter()
            .find(|s| s.id == id)
            .ok_or_else(|| ToolmeshError::ServerNotFound(id.to_string()))?;

        let previous = self.clients.write().await.remove(id);
        if let Some(previous) = previous {
            if let Err(e) = previous.disconnect().await {
                tracing::debug!(server = %id, error = %e, "error closing previous session");
            }
        }

        let key = tools_snapshot_key(id);
        self.cache.blocking(move |c| c.delete(&key)).await;
        let result = match self.connect_server(server).await {
            Ok(client) => {
                self.clients.write().await.insert(id.to_string(), client);
                tracing::info!(server = %id, "MCP server reconnected");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(server = %id, error = %e, "reconnect failed");
                Err(e)
            }
        };

        self.refresh_tools().await;
        result
    }

    /// Run capability cache sweeps in the background until shutdown.
    pub async fn spawn_cache_maintenance(&self) {
        let handle = self
            .cache
            .spawn_cleanup(self.config.runtime.cache_cleanup_interval());
        if let Some(previous) = self.maintenance.lock().await.replace(handle) {
            previous.abort();
        }
    }

    /// Disconnect every remote session and drop the in-memory tool list.
    ///
    /// Built-ins stay usable.
    pub async fn shutdown(&self) {
        let clients: Vec<(String, Arc<McpProtocol>)> =
            self.clients.write().await.drain().collect();
        for (id, client) in clients {
            if let Err(e) = client.disconnect().await {
                tracing::debug!(server = %id, error = %e, "error during disconnect");
            }
        }
        self.tools_cache.invalidate();
        if let Some(handle) = self.maintenance.lock().await.take() {
            handle.abort();
        }
        tracing::info!("provider manager shut down");
    }

    /// Alias of [`shutdown`](Self::shutdown).
    pub async fn disconnect(&self) {
        self.shutdown().await;
    }
}
