//! WebSocket stream transport for MCP
//!
//! [`WebSocketTransport`] keeps one persistent `ws://` or `wss://` socket
//! open. Each text frame carries one JSON-RPC message in either direction,
//! so the server may push notifications at any time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::{Result, ToolmeshError};
use crate::mcp::server::ServerKind;
use crate::mcp::transport::{Transport, TransportEvent, TransportEvents};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Persistent WebSocket transport.
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use url::Url;
/// use toolmesh::mcp::transport::websocket::WebSocketTransport;
/// use toolmesh::mcp::transport::Transport;
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let transport = WebSocketTransport::new(
///     Url::parse("ws://localhost:9000/mcp")?,
///     Duration::from_secs(5),
/// );
/// transport.connect().await?;
/// # Ok(())
/// # }
/// ```
pub struct WebSocketTransport {
    url: url::Url,
    connect_timeout: Duration,
    events: TransportEvents,
    connected: Arc<AtomicBool>,
    sink: Mutex<Option<WsSink>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("url", &self.url.as_str())
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl WebSocketTransport {
    /// Create an unconnected transport for `url`.
    pub fn new(url: url::Url, connect_timeout: Duration) -> Self {
        Self {
            url,
            connect_timeout,
            events: TransportEvents::new(),
            connected: Arc::new(AtomicBool::new(false)),
            sink: Mutex::new(None),
            reader: Mutex::new(None),
        }
    }
}

#[async_trait::async_trait]
impl Transport for WebSocketTransport {
    fn kind(&self) -> ServerKind {
        ServerKind::Stream
    }

    /// Open the socket and start the reader task.
    ///
    /// # Errors
    ///
    /// Returns [`ToolmeshError::McpTransport`] if the handshake fails or
    /// does not finish within the connect timeout.
    async fn connect(&self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        let (ws, _response) = tokio::time::timeout(self.connect_timeout, connect_async(self.url.as_str()))
            .await
            .map_err(|_| {
                ToolmeshError::McpTransport(format!(
                    "timed out connecting to {} after {:?}",
                    self.url, self.connect_timeout
                ))
            })?
            .map_err(|e| {
                ToolmeshError::McpTransport(format!("failed to connect to {}: {}", self.url, e))
            })?;

        let (sink, mut stream) = ws.split();
        *self.sink.lock().await = Some(sink);
        self.connected.store(true, Ordering::SeqCst);

        let events = self.events.clone();
        let connected = Arc::clone(&self.connected);
        let url = self.url.to_string();
        let handle = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => events.publish(TransportEvent::Message(text)),
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                        Ok(text) => events.publish(TransportEvent::Message(text)),
                        Err(_) => tracing::debug!(url = %url, "dropping non-UTF-8 binary frame"),
                    },
                    Ok(Message::Close(frame)) => {
                        tracing::debug!(url = %url, ?frame, "server closed WebSocket");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        events.publish(TransportEvent::Error(e.to_string()));
                        break;
                    }
                }
            }
            if connected.swap(false, Ordering::SeqCst) {
                events.publish(TransportEvent::Closed);
            }
        });
        *self.reader.lock().await = Some(handle);

        tracing::debug!(url = %self.url, "WebSocket connected");
        Ok(())
    }

    /// Send one text frame.
    ///
    /// # Errors
    ///
    /// Returns [`ToolmeshError::McpTransport`] if the socket is not open or
    /// the write fails.
    async fn send(&self, message: String) -> Result<()> {
        if !self.is_connected() {
            return Err(ToolmeshError::McpTransport(format!("not connected to {}", self.url)).into());
        }
        let mut guard = self.sink.lock().await;
        let sink = guard
            .as_mut()
            .ok_or_else(|| ToolmeshError::McpTransport(format!("not connected to {}", self.url)))?;
        sink.send(Message::Text(message))
            .await
            .map_err(|e| ToolmeshError::McpTransport(format!("WebSocket send failed: {}", e)).into())
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    async fn disconnect(&self) -> Result<()> {
        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        if let Some(mut sink) = self.sink.lock().await.take() {
            let _ = sink.send(Message::Close(None)).await;
            let _ = sink.close().await;
        }
        if let Some(reader) = self.reader.lock().await.take() {
            reader.abort();
        }
        if was_connected {
            self.events.publish(TransportEvent::Closed);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_to_closed_port_fails() {
        let t = WebSocketTransport::new(
            url::Url::parse("ws://127.0.0.1:1/mcp").unwrap(),
            Duration::from_millis(500),
        );
        let err = t.connect().await.unwrap_err();
        assert!(err.to_string().contains("127.0.0.1:1"), "{err}");
        assert!(!t.is_connected());
    }

    #[tokio::test]
    async fn test_send_before_connect_fails() {
        let t = WebSocketTransport::new(
            url::Url::parse("ws://localhost:9/mcp").unwrap(),
            Duration::from_millis(100),
        );
        assert!(t.send("{}".into()).await.is_err());
    }

    #[tokio::test]
    async fn test_disconnect_without_connect_is_noop() {
        let t = WebSocketTransport::new(
            url::Url::parse("ws://localhost:9/mcp").unwrap(),
            Duration::from_millis(100),
        );
        let mut rx = t.subscribe();
        t.disconnect().await.unwrap();
        assert!(rx.try_recv().is_err());
    }
}
