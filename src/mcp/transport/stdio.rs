//! Stdio transport for MCP child-process servers
//!
//! [`StdioTransport`] spawns a child process and talks to it over its
//! stdin/stdout pipes using newline-delimited JSON framing.
//!
//! - Outbound messages are written to the child's stdin as a single JSON
//!   object followed by `\n`.
//! - Inbound messages are read from the child's stdout, one JSON object per
//!   line, and published as [`TransportEvent::Message`].
//! - The child's stderr is logged at `DEBUG` and never treated as an error.
//!
//! # Lifecycle
//!
//! Nothing is spawned until [`Transport::connect`]. When stdout reaches EOF
//! the transport publishes [`TransportEvent::Closed`]. `disconnect` and
//! `Drop` send a best-effort SIGTERM (Unix) or `start_kill` (elsewhere).

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, mpsc, Mutex};

use crate::error::{Result, ToolmeshError};
use crate::mcp::server::ServerKind;
use crate::mcp::transport::{Transport, TransportEvent, TransportEvents};

/// Stdio-based MCP transport that drives a child process.
///
/// # Examples
///
/// ```no_run
/// use std::collections::HashMap;
/// use toolmesh::mcp::transport::stdio::StdioTransport;
/// use toolmesh::mcp::transport::Transport;
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let transport = StdioTransport::new(
///     "npx".into(),
///     vec!["-y".into(), "@modelcontextprotocol/server-filesystem".into(), "/tmp".into()],
///     HashMap::new(),
///     None,
/// );
/// transport.connect().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct StdioTransport {
    executable: PathBuf,
    args: Vec<String>,
    env: HashMap<String, String>,
    working_dir: Option<PathBuf>,
    events: TransportEvents,
    connected: Arc<AtomicBool>,
    stdin_tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
    child: Mutex<Option<Child>>,
}

impl StdioTransport {
    /// Describe a child process without spawning it.
    ///
    /// The child's environment is cleared and rebuilt from `env`; `PATH` is
    /// carried over from the parent so bare command names still resolve.
    pub fn new(
        executable: PathBuf,
        args: Vec<String>,
        env: HashMap<String, String>,
        working_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            executable,
            args,
            env,
            working_dir,
            events: TransportEvents::new(),
            connected: Arc::new(AtomicBool::new(false)),
            stdin_tx: Mutex::new(None),
            child: Mutex::new(None),
        }
    }

    fn spawn_child(&self) -> Result<Child> {
        let mut cmd = Command::new(&self.executable);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env_clear();
        if let Some(path) = std::env::var_os("PATH") {
            cmd.env("PATH", path);
        }
        cmd.envs(&self.env);
        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }

        cmd.spawn().map_err(|e| {
            ToolmeshError::McpTransport(format!(
                "failed to spawn MCP server `{}`: {}",
                self.executable.display(),
                e
            ))
            .into()
        })
    }
}

fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // SAFETY: pid is a live process id obtained from tokio::process::Child.
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = child.start_kill();
    }
}

#[async_trait::async_trait]
impl Transport for StdioTransport {
    fn kind(&self) -> ServerKind {
        ServerKind::Process
    }

    /// Spawn the child and start the pipe pumps.
    ///
    /// # Errors
    ///
    /// Returns [`ToolmeshError::McpTransport`] if the process cannot be
    /// spawned or its stdio pipes are unavailable.
    async fn connect(&self) -> Result<()> {
        let mut child_slot = self.child.lock().await;
        if child_slot.is_some() && self.is_connected() {
            return Ok(());
        }

        let mut child = self.spawn_child()?;
        let stdin = child.stdin.take().ok_or_else(|| {
            ToolmeshError::McpTransport("child stdin unavailable after spawn".into())
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            ToolmeshError::McpTransport("child stdout unavailable after spawn".into())
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            ToolmeshError::McpTransport("child stderr unavailable after spawn".into())
        })?;

        let (stdin_tx, mut stdin_rx) = mpsc::unbounded_channel::<String>();

        let events = self.events.clone();
        tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(msg) = stdin_rx.recv().await {
                let line = format!("{}\n", msg);
                if let Err(e) = stdin.write_all(line.as_bytes()).await {
                    events.publish(TransportEvent::Error(format!("stdin write failed: {}", e)));
                    break;
                }
                let _ = stdin.flush().await;
            }
        });

        let events = self.events.clone();
        let connected = Arc::clone(&self.connected);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if !line.trim().is_empty() {
                            events.publish(TransportEvent::Message(line));
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        events.publish(TransportEvent::Error(format!("stdout read failed: {}", e)));
                        break;
                    }
                }
            }
            if connected.swap(false, Ordering::SeqCst) {
                events.publish(TransportEvent::Closed);
            }
        });

        let executable = self.executable.display().to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(server = %executable, "mcp server stderr: {}", line);
            }
        });

        *self.stdin_tx.lock().await = Some(stdin_tx);
        *child_slot = Some(child);
        self.connected.store(true, Ordering::SeqCst);
        tracing::debug!(command = %self.executable.display(), "MCP server process spawned");
        Ok(())
    }

    /// Enqueue a message for the child's stdin.
    ///
    /// # Errors
    ///
    /// Returns [`ToolmeshError::McpTransport`] if the process is not running
    /// or the background writer has exited.
    async fn send(&self, message: String) -> Result<()> {
        if !self.is_connected() {
            return Err(ToolmeshError::McpTransport("process not running".into()).into());
        }
        let guard = self.stdin_tx.lock().await;
        let tx = guard
            .as_ref()
            .ok_or_else(|| ToolmeshError::McpTransport("process not running".into()))?;
        tx.send(message).map_err(|e| {
            ToolmeshError::McpTransport(format!("stdin channel closed: {}", e)).into()
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    async fn disconnect(&self) -> Result<()> {
        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        self.stdin_tx.lock().await.take();
        if let Some(mut child) = self.child.lock().await.take() {
            terminate(&mut child);
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

impl Drop for StdioTransport {
    /// Best-effort termination of the child process. Never blocks.
    fn drop(&mut self) {
        if let Ok(mut slot) = self.child.try_lock() {
            if let Some(child) = slot.as_mut() {
                terminate(child);
            }
        }
    }
}
