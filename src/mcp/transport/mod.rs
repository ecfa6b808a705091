//! MCP transport abstraction and implementations
//!
//! This module defines the [`Transport`] trait that all transports satisfy.
//! Concrete implementations live in submodules:
//!
//! - [`websocket::WebSocketTransport`] -- persistent, server-push capable
//!   stream over `ws://` or `wss://`.
//! - [`http::HttpTransport`] -- request/response over `http://` or
//!   `https://`; each POST yields at most one reply (or a short SSE burst).
//! - [`stdio::StdioTransport`] -- spawns a child process and exchanges
//!   newline-delimited JSON over its stdin/stdout pipes.
//! - [`fake::FakeTransport`] -- in-process pair used by tests and embedders.
//!
//! # Events
//!
//! Inbound traffic is published as [`TransportEvent`]s on a
//! [`tokio::sync::broadcast`] channel. Every subscriber obtained through
//! [`Transport::subscribe`] observes every event, so any number of observers
//! (the protocol read loop, diagnostics, tests) can watch one link. Subscribe
//! before calling [`Transport::connect`] to avoid missing early messages.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::config::{ServerConfig, TransportConfig};
use crate::error::Result;
use crate::mcp::server::ServerKind;

/// Buffered events per subscriber before the slowest one starts lagging.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Something that happened on a transport link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One complete inbound message (a single JSON document).
    Message(String),
    /// The link reported a fault; a `Closed` usually follows.
    Error(String),
    /// The link is gone. No further messages will arrive.
    Closed,
}

/// Fan-out publisher shared by transport implementations.
///
/// Cloning yields another handle to the same channel.
#[derive(Debug, Clone)]
pub struct TransportEvents {
    tx: broadcast::Sender<TransportEvent>,
}

impl TransportEvents {
    /// Create a publisher with [`EVENT_CHANNEL_CAPACITY`] slots.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Register a new observer.
    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.tx.subscribe()
    }

    /// Deliver `event` to every current observer.
    ///
    /// Publishing with no observers is not an error.
    pub fn publish(&self, event: TransportEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for TransportEvents {
    fn default() -> Self {
        Self::new()
    }
}

/// Abstraction over MCP transport implementations.
///
/// All methods are `async` or non-blocking so that implementations can drive
/// I/O without stalling the Tokio executor.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// The shape of this transport.
    fn kind(&self) -> ServerKind;

    /// Establish the link.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::ToolmeshError::McpTransport`] if the peer is
    /// unreachable or does not answer within the connect timeout.
    async fn connect(&self) -> Result<()>;

    /// Send one complete JSON-RPC message.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::ToolmeshError::McpTransport`] if the link is
    /// not open or the write fails.
    async fn send(&self, message: String) -> Result<()>;

    /// Register an observer for inbound messages, errors, and closure.
    fn subscribe(&self) -> broadcast::Receiver<TransportEvent>;

    /// Release the link. Calling this more than once is a no-op.
    async fn disconnect(&self) -> Result<()>;

    /// Current link state. Never blocks.
    fn is_connected(&self) -> bool;
}

/// Builds transports for configured servers.
///
/// The provider manager receives one of these so tests can substitute
/// in-process transports for real network links.
pub trait TransportFactory: Send + Sync {
    /// Create an unconnected transport for `server`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the server's locator is unusable.
    fn create(&self, server: &ServerConfig) -> Result<Arc<dyn Transport>>;
}

/// Factory producing the real WebSocket, HTTP, and process transports.
#[derive(Debug, Clone)]
pub struct DefaultTransportFactory {
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl DefaultTransportFactory {
    /// Create a factory applying the given timeouts to every transport.
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            request_timeout,
        }
    }
}

impl TransportFactory for DefaultTransportFactory {
    fn create(&self, server: &ServerConfig) -> Result<Arc<dyn Transport>> {
        create_transport(
            &server.transport()?,
            self.connect_timeout,
            self.request_timeout,
        )
    }
}

/// Build the transport described by `config`.
///
/// The locator scheme is checked here, at construction, so an unusable URL
/// surfaces as a configuration error before any connection attempt.
///
/// # Errors
///
/// Returns [`crate::error::ToolmeshError::Config`] if the locator does not
/// parse or its scheme does not match the transport type.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use toolmesh::config::TransportConfig;
/// use toolmesh::mcp::server::ServerKind;
/// use toolmesh::mcp::transport::create_transport;
///
/// let config = TransportConfig::from_locator("ws://localhost:9000/mcp").unwrap();
/// let transport = create_transport(&config, Duration::from_secs(5), Duration::from_secs(30)).unwrap();
/// assert_eq!(transport.kind(), ServerKind::Stream);
/// assert!(!transport.is_connected());
/// ```
pub fn create_transport(
    config: &TransportConfig,
    connect_timeout: Duration,
    request_timeout: Duration,
) -> Result<Arc<dyn Transport>> {
    config.validate()?;
    match config {
        TransportConfig::Stream { url } => Ok(Arc::new(websocket::WebSocketTransport::new(
            config.parsed_url(url)?,
            connect_timeout,
        ))),
        TransportConfig::Http { url, headers } => Ok(Arc::new(http::HttpTransport::new(
            config.parsed_url(url)?,
            headers.clone(),
            connect_timeout,
            request_timeout,
        )?)),
        TransportConfig::Process {
            command,
            args,
            env,
            working_dir,
        } => Ok(Arc::new(stdio::StdioTransport::new(
            command.into(),
            args.clone(),
            env.clone(),
            working_dir.clone(),
        ))),
    }
}

pub mod fake;
pub mod http;
pub mod stdio;
pub mod websocket;

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const CT: Duration = Duration::from_secs(1);
    const RT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_every_subscriber_observes_every_event() {
        let events = TransportEvents::new();
        let mut a = events.subscribe();
        let mut b = events.subscribe();

        events.publish(TransportEvent::Message("one".into()));
        events.publish(TransportEvent::Closed);

        for rx in [&mut a, &mut b] {
            assert_eq!(rx.recv().await.unwrap(), TransportEvent::Message("one".into()));
            assert_eq!(rx.recv().await.unwrap(), TransportEvent::Closed);
        }
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let events = TransportEvents::new();
        events.publish(TransportEvent::Error("nobody listening".into()));
    }

    #[test]
    fn test_create_transport_selects_by_scheme() {
        let ws = create_transport(&TransportConfig::from_locator("wss://h/mcp").unwrap(), CT, RT)
            .unwrap();
        let http = create_transport(
            &TransportConfig::from_locator("https://h/mcp").unwrap(),
            CT,
            RT,
        )
        .unwrap();
        assert_eq!(ws.kind(), ServerKind::Stream);
        assert_eq!(http.kind(), ServerKind::RequestResponse);
    }

    #[test]
    fn test_create_transport_rejects_mismatched_scheme() {
        let config = TransportConfig::Stream {
            url: "http://localhost/mcp".to_string(),
        };
        let err = create_transport(&config, CT, RT).unwrap_err();
        assert!(err.to_string().contains("Configuration error"), "{err}");
    }

    #[test]
    fn test_create_process_transport_does_not_spawn() {
        let config = TransportConfig::Process {
            command: "/nonexistent/server".to_string(),
            args: vec![],
            env: HashMap::new(),
            working_dir: None,
        };
        let transport = create_transport(&config, CT, RT).unwrap();
        assert_eq!(transport.kind(), ServerKind::Process);
        assert!(!transport.is_connected());
    }
}
