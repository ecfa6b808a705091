//! Configuration management for Toolmesh
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from YAML files and environment variables.
//!
//! Server transports are an explicit tagged variant ([`TransportConfig`]) so
//! that a bad locator is rejected when the file is loaded rather than on
//! first use.

use crate::error::{Result, ToolmeshError};
use crate::mcp::server::{ServerDescriptor, ServerKind};
use crate::storage::StorageBackend;
use crate::tools::builtin::BUILTIN_ID_PREFIX;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/toolmesh.yaml";

/// Main configuration structure for Toolmesh
///
/// Holds the remote server list plus runtime timing, storage, and built-in
/// provider settings. Every section is optional in YAML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Remote MCP servers to connect at startup
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
    /// Timeouts and cache lifetimes
    #[serde(default)]
    pub runtime: RuntimeConfig,
    /// Storage capability selection
    #[serde(default)]
    pub storage: StorageConfig,
    /// Built-in provider settings
    #[serde(default)]
    pub builtins: BuiltinsConfig,
}

/// One configured remote server.
///
/// Either `transport` (explicit) or `url` (shorthand, transport chosen by
/// scheme) must be set, not both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Unique id; becomes the namespace prefix of the server's tools
    pub id: String,
    /// Display name; defaults to the id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Explicit transport
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<TransportConfig>,
    /// Shorthand locator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl ServerConfig {
    /// Server with an explicit transport.
    pub fn new(id: impl Into<String>, transport: TransportConfig) -> Self {
        Self {
            id: id.into(),
            name: None,
            transport: Some(transport),
            url: None,
        }
    }

    /// Display name, falling back to the id.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// Resolve the transport, expanding the `url` shorthand.
    ///
    /// # Errors
    ///
    /// Returns [`ToolmeshError::Config`] if neither or both of `transport`
    /// and `url` are set, or the shorthand scheme is not recognised.
    pub fn transport(&self) -> Result<TransportConfig> {
        match (&self.transport, &self.url) {
            (Some(transport), None) => Ok(transport.clone()),
            (None, Some(url)) => TransportConfig::from_locator(url),
            (Some(_), Some(_)) => Err(ToolmeshError::Config(format!(
                "server '{}' sets both 'transport' and 'url'",
                self.id
            ))
            .into()),
            (None, None) => Err(ToolmeshError::Config(format!(
                "server '{}' needs a 'transport' or a 'url'",
                self.id
            ))
            .into()),
        }
    }

    /// Descriptor for this server before any connection attempt.
    ///
    /// # Errors
    ///
    /// Propagates [`ServerConfig::transport`] errors.
    pub fn descriptor(&self) -> Result<ServerDescriptor> {
        let transport = self.transport()?;
        Ok(ServerDescriptor::remote(
            self.id.clone(),
            self.display_name(),
            Some(transport.locator()),
            transport.kind(),
        ))
    }
}

/// How to reach a remote server.
///
/// # Examples
///
/// ```
/// use toolmesh::config::TransportConfig;
///
/// let yaml = "type: process\ncommand: mcp-server-files\nargs: [\"/tmp\"]\n";
/// let transport: TransportConfig = serde_yaml::from_str(yaml).unwrap();
/// assert!(matches!(transport, TransportConfig::Process { .. }));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    /// Persistent WebSocket stream (`ws://` or `wss://`)
    Stream {
        /// Endpoint URL
        url: String,
    },
    /// One HTTP POST per message (`http://` or `https://`)
    Http {
        /// Endpoint URL
        url: String,
        /// Extra headers sent with every request
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        headers: HashMap<String, String>,
    },
    /// Child process speaking newline-delimited JSON on stdio
    Process {
        /// Executable to spawn
        command: String,
        /// Command-line arguments
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<String>,
        /// Extra environment variables
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        env: HashMap<String, String>,
        /// Working directory for the child
        #[serde(default, skip_serializing_if = "Option::is_none")]
        working_dir: Option<PathBuf>,
    },
}

impl TransportConfig {
    /// Choose a transport from a locator's scheme.
    ///
    /// # Errors
    ///
    /// Returns [`ToolmeshError::Config`] for an unparseable URL or an
    /// unrecognised scheme.
    ///
    /// # Examples
    ///
    /// ```
    /// use toolmesh::config::TransportConfig;
    ///
    /// assert!(matches!(
    ///     TransportConfig::from_locator("wss://host/mcp").unwrap(),
    ///     TransportConfig::Stream { .. }
    /// ));
    /// assert!(TransportConfig::from_locator("ftp://host/mcp").is_err());
    /// ```
    pub fn from_locator(locator: &str) -> Result<Self> {
        let url = Url::parse(locator).map_err(|e| {
            ToolmeshError::Config(format!("invalid server URL '{}': {}", locator, e))
        })?;
        match url.scheme() {
            "ws" | "wss" => Ok(TransportConfig::Stream {
                url: locator.to_string(),
            }),
            "http" | "https" => Ok(TransportConfig::Http {
                url: locator.to_string(),
                headers: HashMap::new(),
            }),
            other => Err(ToolmeshError::Config(format!(
                "unsupported URL scheme '{}' in '{}' (expected ws, wss, http or https)",
                other, locator
            ))
            .into()),
        }
    }

    /// Server kind this transport produces.
    pub fn kind(&self) -> ServerKind {
        match self {
            TransportConfig::Stream { .. } => ServerKind::Stream,
            TransportConfig::Http { .. } => ServerKind::RequestResponse,
            TransportConfig::Process { .. } => ServerKind::Process,
        }
    }

    /// Human-readable locator: the URL, or the command line.
    pub fn locator(&self) -> String {
        match self {
            TransportConfig::Stream { url } | TransportConfig::Http { url, .. } => url.clone(),
            TransportConfig::Process { command, args, .. } => {
                std::iter::once(command.as_str())
                    .chain(args.iter().map(String::as_str))
                    .collect::<Vec<_>>()
                    .join(" ")
            }
        }
    }

    /// Parse `url` and check its scheme matches this variant.
    ///
    /// # Errors
    ///
    /// Returns [`ToolmeshError::Config`] on a parse failure or scheme mismatch.
    pub fn parsed_url(&self, url: &str) -> Result<Url> {
        let parsed = Url::parse(url)
            .map_err(|e| ToolmeshError::Config(format!("invalid server URL '{}': {}", url, e)))?;
        let allowed: &[&str] = match self {
            TransportConfig::Stream { .. } => &["ws", "wss"],
            TransportConfig::Http { .. } => &["http", "https"],
            TransportConfig::Process { .. } => {
                return Err(ToolmeshError::Config(
                    "process transports do not take a URL".to_string(),
                )
                .into())
            }
        };
        if !allowed.contains(&parsed.scheme()) {
            return Err(ToolmeshError::Config(format!(
                "{} transport cannot use '{}' (expected {})",
                self.kind(),
                url,
                allowed.join(" or ")
            ))
            .into());
        }
        Ok(parsed)
    }

    /// Check the variant's fields.
    ///
    /// # Errors
    ///
    /// Returns [`ToolmeshError::Config`] for a mismatched URL scheme or an
    /// empty process command.
    pub fn validate(&self) -> Result<()> {
        match self {
            TransportConfig::Stream { url } | TransportConfig::Http { url, .. } => {
                self.parsed_url(url).map(|_| ())
            }
            TransportConfig::Process { command, .. } => {
                if command.trim().is_empty() {
                    return Err(ToolmeshError::Config(
                        "process transport command cannot be empty".to_string(),
                    )
                    .into());
                }
                Ok(())
            }
        }
    }
}

/// Timeouts and cache lifetimes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Per-request reply timeout
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// Bound on establishing a transport link
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
    /// In-memory merged tool list lifetime
    #[serde(default = "default_tools_cache_ttl")]
    pub tools_cache_ttl_seconds: u64,
    /// Persisted per-server tool listing lifetime
    #[serde(default = "default_tools_snapshot_ttl")]
    pub tools_snapshot_ttl_seconds: u64,
    /// Persisted per-server capability snapshot lifetime
    #[serde(default = "default_capability_snapshot_ttl")]
    pub capability_snapshot_ttl_seconds: u64,
    /// Interval between capability cache sweeps
    #[serde(default = "default_cache_cleanup_interval")]
    pub cache_cleanup_interval_seconds: u64,
}

fn default_request_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_tools_cache_ttl() -> u64 {
    30
}

fn default_tools_snapshot_ttl() -> u64 {
    3600
}

fn default_capability_snapshot_ttl() -> u64 {
    86400
}

fn default_cache_cleanup_interval() -> u64 {
    300
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            request_timeout_seconds: default_request_timeout(),
            connect_timeout_seconds: default_connect_timeout(),
            tools_cache_ttl_seconds: default_tools_cache_ttl(),
            tools_snapshot_ttl_seconds: default_tools_snapshot_ttl(),
            capability_snapshot_ttl_seconds: default_capability_snapshot_ttl(),
            cache_cleanup_interval_seconds: default_cache_cleanup_interval(),
        }
    }
}

impl RuntimeConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    pub fn tools_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.tools_cache_ttl_seconds)
    }

    pub fn tools_snapshot_ttl(&self) -> Duration {
        Duration::from_secs(self.tools_snapshot_ttl_seconds)
    }

    pub fn capability_snapshot_ttl(&self) -> Duration {
        Duration::from_secs(self.capability_snapshot_ttl_seconds)
    }

    pub fn cache_cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cache_cleanup_interval_seconds)
    }
}

/// Storage capability selection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Preferred backend; native falls back to simulated when unavailable
    #[serde(default)]
    pub backend: StorageBackend,
    /// Database path; platform data directory when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// Built-in provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltinsConfig {
    /// Register the built-in providers
    #[serde(default = "default_builtins_enabled")]
    pub enabled: bool,
    /// Database for the SQLite built-in; in-memory when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sqlite_path: Option<PathBuf>,
}

fn default_builtins_enabled() -> bool {
    true
}

impl Default for BuiltinsConfig {
    fn default() -> Self {
        Self {
            enabled: default_builtins_enabled(),
            sqlite_path: None,
        }
    }
}

impl Config {
    /// Load configuration from file with environment overrides
    ///
    /// A missing file yields the defaults with a warning. The result is
    /// validated before it is returned.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed, or validation fails
    pub fn load(path: &str) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.validate()?;

        Ok(config)
    }

    /// Parse a YAML file without applying overrides or validating.
    ///
    /// # Errors
    ///
    /// Returns [`ToolmeshError::Config`] if the file cannot be read or parsed
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ToolmeshError::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_yaml(&contents)
    }

    /// Parse YAML text.
    ///
    /// # Errors
    ///
    /// Returns [`ToolmeshError::Config`] if the text is not a valid config
    pub fn from_yaml(contents: &str) -> Result<Self> {
        serde_yaml::from_str(contents)
            .map_err(|e| ToolmeshError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(timeout) = std::env::var("TOOLMESH_REQUEST_TIMEOUT_SECONDS") {
            if let Ok(value) = timeout.parse() {
                self.runtime.request_timeout_seconds = value;
            } else {
                tracing::warn!("Invalid TOOLMESH_REQUEST_TIMEOUT_SECONDS: {}", timeout);
            }
        }

        if let Ok(timeout) = std::env::var("TOOLMESH_CONNECT_TIMEOUT_SECONDS") {
            if let Ok(value) = timeout.parse() {
                self.runtime.connect_timeout_seconds = value;
            } else {
                tracing::warn!("Invalid TOOLMESH_CONNECT_TIMEOUT_SECONDS: {}", timeout);
            }
        }

        if let Ok(backend) = std::env::var("TOOLMESH_STORAGE_BACKEND") {
            match backend.parse() {
                Ok(value) => self.storage.backend = value,
                Err(_) => tracing::warn!("Invalid TOOLMESH_STORAGE_BACKEND: {}", backend),
            }
        }

        if let Ok(path) = std::env::var("TOOLMESH_STORAGE_PATH") {
            if !path.is_empty() {
                self.storage.path = Some(PathBuf::from(path));
            }
        }

        if let Ok(enabled) = std::env::var("TOOLMESH_BUILTINS_ENABLED") {
            match enabled.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.builtins.enabled = true,
                "0" | "false" | "no" | "off" => self.builtins.enabled = false,
                _ => tracing::warn!("Invalid TOOLMESH_BUILTINS_ENABLED: {}", enabled),
            }
        }
    }

    /// Validate the configuration
    ///
    /// Checks server ids, transport locators, and that every timeout and TTL
    /// is positive.
    ///
    /// # Errors
    ///
    /// Returns [`ToolmeshError::Config`] naming the first problem found
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for server in &self.servers {
            let id = server.id.as_str();
            if id.trim().is_empty() {
                return Err(ToolmeshError::Config("server id cannot be empty".to_string()).into());
            }
            if id.contains('.') || id.contains("://") {
                return Err(ToolmeshError::Config(format!(
                    "server id '{}' must not contain '.' or '://'",
                    id
                ))
                .into());
            }
            if id.starts_with(BUILTIN_ID_PREFIX) {
                return Err(ToolmeshError::Config(format!(
                    "server id '{}' uses the reserved '{}' prefix",
                    id, BUILTIN_ID_PREFIX
                ))
                .into());
            }
            if !seen.insert(id) {
                return Err(
                    ToolmeshError::Config(format!("duplicate server id '{}'", id)).into(),
                );
            }
            server.transport()?.validate()?;
        }

        let durations = [
            ("request_timeout_seconds", self.runtime.request_timeout_seconds),
            ("connect_timeout_seconds", self.runtime.connect_timeout_seconds),
            ("tools_cache_ttl_seconds", self.runtime.tools_cache_ttl_seconds),
            ("tools_snapshot_ttl_seconds", self.runtime.tools_snapshot_ttl_seconds),
            (
                "capability_snapshot_ttl_seconds",
                self.runtime.capability_snapshot_ttl_seconds,
            ),
            (
                "cache_cleanup_interval_seconds",
                self.runtime.cache_cleanup_interval_seconds,
            ),
        ];
        for (name, value) in durations {
            if value == 0 {
                return Err(ToolmeshError::Config(format!(
                    "runtime.{} must be greater than 0",
                    name
                ))
                .into());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const FULL_YAML: &str = r#"
servers:
  - id: weather
    name: Weather
    transport:
      type: stream
      url: ws://localhost:8080/mcp
  - id: search
    transport:
      type: http
      url: https://example.com/mcp
      headers: { Authorization: "Bearer abc" }
  - id: files
    transport:
      type: process
      command: mcp-server-files
      args: ["/tmp"]
      env: { KEY: value }
      working_dir: /tmp
  - id: auto
    url: wss://host/mcp
runtime:
  request_timeout_seconds: 5
storage:
  backend: simulated
builtins:
  enabled: false
"#;

    fn clear_env() {
        for key in [
            "TOOLMESH_REQUEST_TIMEOUT_SECONDS",
            "TOOLMESH_CONNECT_TIMEOUT_SECONDS",
            "TOOLMESH_STORAGE_BACKEND",
            "TOOLMESH_STORAGE_PATH",
            "TOOLMESH_BUILTINS_ENABLED",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.servers.is_empty());
        assert_eq!(config.runtime.request_timeout_seconds, 30);
        assert_eq!(config.runtime.tools_cache_ttl_seconds, 30);
        assert_eq!(config.runtime.tools_snapshot_ttl_seconds, 3600);
        assert_eq!(config.storage.backend, StorageBackend::Native);
        assert!(config.builtins.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_yaml() {
        let config = Config::from_yaml(FULL_YAML).unwrap();
        assert_eq!(config.servers.len(), 4);
        assert_eq!(config.runtime.request_timeout_seconds, 5);
        assert_eq!(config.runtime.connect_timeout_seconds, 10);
        assert_eq!(config.storage.backend, StorageBackend::Simulated);
        assert!(!config.builtins.enabled);

        let kinds: Vec<ServerKind> = config
            .servers
            .iter()
            .map(|s| s.transport().unwrap().kind())
            .collect();
        assert_eq!(
            kinds,
            vec![
                ServerKind::Stream,
                ServerKind::RequestResponse,
                ServerKind::Process,
                ServerKind::Stream
            ]
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_descriptor_uses_locator_and_name() {
        let config = Config::from_yaml(FULL_YAML).unwrap();
        let files = config.servers[2].descriptor().unwrap();
        assert_eq!(files.name, "files");
        assert_eq!(files.locator.as_deref(), Some("mcp-server-files /tmp"));
        let weather = config.servers[0].descriptor().unwrap();
        assert_eq!(weather.name, "Weather");
        assert!(!weather.connected);
    }

    #[test]
    fn test_shorthand_with_unknown_scheme_is_rejected() {
        let config = Config::from_yaml("servers:\n  - id: x\n    url: ftp://host/mcp\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("unsupported URL scheme"), "{err}");
    }

    #[test]
    fn test_stream_transport_with_http_url_is_rejected() {
        let config = Config {
            servers: vec![ServerConfig::new(
                "x",
                TransportConfig::Stream {
                    url: "http://host/mcp".to_string(),
                },
            )],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_server_ids_are_checked() {
        let transport = TransportConfig::from_locator("ws://h/mcp").unwrap();
        for bad in ["", "a.b", "builtin-time"] {
            let config = Config {
                servers: vec![ServerConfig::new(bad, transport.clone())],
                ..Default::default()
            };
            assert!(config.validate().is_err(), "id '{}' should be rejected", bad);
        }

        let duplicate = Config {
            servers: vec![
                ServerConfig::new("a", transport.clone()),
                ServerConfig::new("a", transport),
            ],
            ..Default::default()
        };
        let err = duplicate.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_server_needs_exactly_one_locator() {
        let neither = ServerConfig {
            id: "x".into(),
            name: None,
            transport: None,
            url: None,
        };
        assert!(neither.transport().is_err());

        let both = ServerConfig {
            url: Some("ws://h".into()),
            ..ServerConfig::new("x", TransportConfig::from_locator("ws://h").unwrap())
        };
        assert!(both.transport().is_err());
    }

    #[test]
    fn test_empty_process_command_is_rejected() {
        let transport = TransportConfig::Process {
            command: "  ".into(),
            args: vec![],
            env: HashMap::new(),
            working_dir: None,
        };
        assert!(transport.validate().is_err());
    }

    #[test]
    fn test_zero_timeout_is_rejected() {
        let mut config = Config::default();
        config.runtime.connect_timeout_seconds = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("connect_timeout_seconds"));
    }

    #[test]
    #[serial]
    fn test_load_nonexistent_file_uses_defaults() {
        clear_env();
        let config = Config::load("nonexistent.yaml").unwrap();
        assert!(config.servers.is_empty());
        assert_eq!(config.runtime.request_timeout_seconds, 30);
    }

    #[test]
    #[serial]
    fn test_load_reads_file() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("toolmesh.yaml");
        std::fs::write(&path, FULL_YAML).unwrap();

        let config = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.servers.len(), 4);
    }

    #[test]
    #[serial]
    fn test_apply_env_vars_overrides_fields() {
        clear_env();
        std::env::set_var("TOOLMESH_REQUEST_TIMEOUT_SECONDS", "7");
        std::env::set_var("TOOLMESH_STORAGE_BACKEND", "Simulated");
        std::env::set_var("TOOLMESH_STORAGE_PATH", "/tmp/toolmesh-test.db");
        std::env::set_var("TOOLMESH_BUILTINS_ENABLED", "false");

        let mut config = Config::default();
        config.apply_env_vars();
        clear_env();

        assert_eq!(config.runtime.request_timeout_seconds, 7);
        assert_eq!(config.storage.backend, StorageBackend::Simulated);
        assert_eq!(
            config.storage.path.as_deref(),
            Some(Path::new("/tmp/toolmesh-test.db"))
        );
        assert!(!config.builtins.enabled);
    }

    #[test]
    #[serial]
    fn test_apply_env_vars_ignores_invalid_values() {
        clear_env();
        std::env::set_var("TOOLMESH_CONNECT_TIMEOUT_SECONDS", "soon");
        std::env::set_var("TOOLMESH_STORAGE_BACKEND", "cloud");
        std::env::set_var("TOOLMESH_BUILTINS_ENABLED", "maybe");

        let mut config = Config::default();
        config.apply_env_vars();
        clear_env();

        assert_eq!(config.runtime.connect_timeout_seconds, 10);
        assert_eq!(config.storage.backend, StorageBackend::Native);
        assert!(config.builtins.enabled);
    }
}
