//! Subprocess transport: newline-delimited JSON-RPC over stdin/stdout.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{Connection, Inbound, Transport};
use crate::error::{McpError, Result};

pub struct StdioTransport {
    server: String,
    stdin: AsyncMutex<Option<ChildStdin>>,
    child: Mutex<Option<Child>>,
    tasks: Vec<JoinHandle<()>>,
}

impl StdioTransport {
    /// Spawn the server. The child is killed if the transport is dropped.
    pub fn spawn(
        server: &str,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        cwd: Option<&Path>,
    ) -> Result<Connection> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let connection_failed = |reason: String| McpError::ConnectionFailed {
            server: server.to_string(),
            reason,
        };

        let mut child = cmd
            .spawn()
            .map_err(|e| connection_failed(format!("failed to spawn '{command}': {e}")))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| connection_failed("failed to capture server stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| connection_failed("failed to capture server stdout".into()))?;
        let stderr = child.stderr.take();

        debug!(server, command, pid = child.id(), "Spawned tool server");

        let (tx, rx) = mpsc::unbounded_channel();
        let mut tasks = Vec::with_capacity(2);

        let name = server.to_string();
        tasks.push(tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            let reason = loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<Value>(line) {
                            Ok(message) => {
                                if tx.send(Inbound::Message(message)).is_err() {
                                    return;
                                }
                            }
                            Err(e) => {
                                debug!(server = %name, line, "Skipping non-JSON output: {e}");
                            }
                        }
                    }
                    Ok(None) => break "server process closed its output".to_string(),
                    Err(e) => break format!("failed to read from server: {e}"),
                }
            };
            debug!(server = %name, "{reason}");
            let _ = tx.send(Inbound::Closed(reason));
        }));

        if let Some(stderr) = stderr {
            let name = server.to_string();
            tasks.push(tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(server = %name, "stderr: {line}");
                }
            }));
        }

        let transport = Self {
            server: server.to_string(),
            stdin: AsyncMutex::new(Some(stdin)),
            child: Mutex::new(Some(child)),
            tasks,
        };
        Ok(Connection {
            transport: Arc::new(transport),
            inbound: rx,
        })
    }

    fn take_child(&self) -> Option<Child> {
        self.child.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send(&self, message: &Value) -> Result<()> {
        let mut line = serde_json::to_string(message)
            .map_err(|e| McpError::Protocol(format!("failed to encode message: {e}")))?;
        line.push('\n');

        let mut guard = self.stdin.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or_else(|| McpError::TransportClosed("server stdin is closed".into()))?;
        let written = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await
        }
        .await;
        written.map_err(|e| {
            McpError::TransportClosed(format!("failed to write to server: {e}"))
        })
    }

    async fn close(&self) {
        // Closing stdin asks a well-behaved server to exit.
        self.stdin.lock().await.take();
        if let Some(mut child) = self.take_child() {
            if let Err(e) = child.kill().await {
                debug!(server = %self.server, "Kill failed (process may have exited): {e}");
            }
            let _ = child.wait().await;
        }
        for task in &self.tasks {
            task.abort();
        }
    }

    fn abort(&self) {
        if let Some(mut child) = self.take_child()
            && let Err(e) = child.start_kill()
        {
            warn!(server = %self.server, "Failed to kill tool server: {e}");
        }
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
