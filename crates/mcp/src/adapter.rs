//! Lifecycle of one tool-server connection.
//!
//! ```text
//! Disconnected ──start()──▶ Connecting ──ok──▶ Connected ──stop()──▶ Disconnected
//!                               │                  │
//!                               └──error──▶ Failed ◀──transport drop
//!                                             │
//!                                             └──stop()──▶ Disconnected
//! ```
//!
//! The tool list is only handed out while Connected. A dropped transport
//! moves the adapter to Failed; it never reconnects on its own. So does a
//! `start()` future dropped mid-connect.

use crewforge_core::tool::Tool;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::{McpError, Result};
use crate::protocol::{self, CallToolResult, InitializeResult, ListToolsResult, RemoteTool};
use crate::session::Session;
use crate::tool::McpTool;
use crate::transport;

/// Pagination guard for servers that keep returning a cursor.
const MAX_TOOL_PAGES: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

impl std::fmt::Display for AdapterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

enum Lifecycle {
    Disconnected,
    Connecting,
    Connected {
        session: Arc<Session>,
        tools: Vec<Arc<dyn Tool>>,
        server_info: InitializeResult,
    },
    Failed {
        reason: String,
        session: Option<Arc<Session>>,
    },
}

impl Lifecycle {
    fn state(&self) -> AdapterState {
        match self {
            Self::Disconnected => AdapterState::Disconnected,
            Self::Connecting => AdapterState::Connecting,
            Self::Connected { .. } => AdapterState::Connected,
            Self::Failed { .. } => AdapterState::Failed,
        }
    }
}

pub(crate) struct AdapterInner {
    config: ServerConfig,
    lifecycle: Mutex<Lifecycle>,
}

/// A connection to one MCP tool server.
///
/// Cheap to clone; clones share the connection.
#[derive(Clone)]
pub struct ToolServerAdapter {
    inner: Arc<AdapterInner>,
}

impl std::fmt::Debug for ToolServerAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolServerAdapter")
            .field("server", &self.inner.config.name)
            .field("transport", &self.inner.config.transport.kind())
            .field("state", &self.state())
            .finish()
    }
}

impl ToolServerAdapter {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            inner: Arc::new(AdapterInner {
                config,
                lifecycle: Mutex::new(Lifecycle::Disconnected),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<AdapterInner>) -> Self {
        Self { inner }
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Lifecycle> {
        self.inner.lifecycle.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current state. A Connected adapter whose transport has closed is
    /// reported (and recorded) as Failed.
    pub fn state(&self) -> AdapterState {
        let mut lifecycle = self.lock();
        reconcile(&mut lifecycle, &self.inner.config.name);
        lifecycle.state()
    }

    /// Why the adapter failed, while Failed.
    pub fn failure_reason(&self) -> Option<String> {
        let mut lifecycle = self.lock();
        reconcile(&mut lifecycle, &self.inner.config.name);
        match &*lifecycle {
            Lifecycle::Failed { reason, .. } => Some(reason.clone()),
            _ => None,
        }
    }

    /// Server name and version reported at handshake, while Connected.
    pub fn server_info(&self) -> Option<(String, Option<String>)> {
        match &*self.lock() {
            Lifecycle::Connected { server_info, .. } => server_info
                .server_info
                .as_ref()
                .map(|info| (info.name.clone(), info.version.clone())),
            _ => None,
        }
    }

    /// Connect, handshake and discover tools.
    ///
    /// Only valid from Disconnected. On any failure the adapter is Failed
    /// and must be stopped before it can be started again.
    pub async fn start(&self) -> Result<()> {
        let server = self.inner.config.name.clone();
        {
            let mut lifecycle = self.lock();
            match &*lifecycle {
                Lifecycle::Disconnected => *lifecycle = Lifecycle::Connecting,
                other => {
                    return Err(McpError::InvalidState {
                        server,
                        operation: "start",
                        state: other.state(),
                    });
                }
            }
        }

        info!(server = %server, transport = self.inner.config.transport.kind(), "Starting tool server");
        let mut guard = StartGuard {
            adapter: self,
            session: None,
            armed: true,
        };
        let result = self.connect(&mut guard.session).await;
        let session = guard.disarm();

        let mut lifecycle = self.lock();
        if !matches!(*lifecycle, Lifecycle::Connecting) {
            // Aborted while connecting.
            if let Some(session) = session {
                session.abort();
            }
            return Err(McpError::ConnectionFailed {
                server,
                reason: "adapter was stopped while connecting".into(),
            });
        }
        match result {
            Ok((tools, server_info)) => {
                let Some(session) = session else {
                    *lifecycle = Lifecycle::Failed {
                        reason: "no session after connect".into(),
                        session: None,
                    };
                    return Err(McpError::ConnectionFailed {
                        server,
                        reason: "no session after connect".into(),
                    });
                };
                info!(server = %server, tools = tools.len(), "Tool server connected");
                *lifecycle = Lifecycle::Connected {
                    session,
                    tools,
                    server_info,
                };
                Ok(())
            }
            Err(e) => {
                let reason = match e {
                    McpError::ConnectionFailed { reason, .. } => reason,
                    other => other.to_string(),
                };
                warn!(server = %server, %reason, "Tool server failed to start");
                if let Some(session) = &session {
                    session.abort();
                }
                *lifecycle = Lifecycle::Failed {
                    reason: reason.clone(),
                    session,
                };
                Err(McpError::ConnectionFailed { server, reason })
            }
        }
    }

    async fn connect(
        &self,
        slot: &mut Option<Arc<Session>>,
    ) -> Result<(Vec<Arc<dyn Tool>>, InitializeResult)> {
        let config = &self.inner.config;
        let connection = transport::connect(config).await?;
        let session = Arc::new(Session::new(&config.name, connection));
        *slot = Some(Arc::clone(&session));

        let handshake = async {
            let result = session
                .request(
                    protocol::INITIALIZE,
                    protocol::initialize_params(),
                    config.discovery_timeout,
                )
                .await?;
            let server_info: InitializeResult = serde_json::from_value(result)
                .map_err(|e| McpError::Protocol(format!("invalid initialize result: {e}")))?;
            if let Some(version) = &server_info.protocol_version
                && version != protocol::PROTOCOL_VERSION
            {
                debug!(server = %config.name, %version, "Server negotiated a different protocol version");
            }
            session.notify(protocol::INITIALIZED, json!({})).await?;
            let tools = self.discover(&session).await?;
            Ok::<_, McpError>((tools, server_info))
        };

        match tokio::time::timeout(config.discovery_timeout, handshake).await {
            Ok(result) => result,
            Err(_) => Err(McpError::Timeout {
                method: "initialize/tools/list".into(),
                timeout_ms: config.discovery_timeout.as_millis() as u64,
            }),
        }
    }

    /// List every tool page, then apply the filter and prefix.
    async fn discover(&self, session: &Session) -> Result<Vec<Arc<dyn Tool>>> {
        let config = &self.inner.config;
        let mut remote: Vec<RemoteTool> = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_TOOL_PAGES {
            let params = match &cursor {
                Some(cursor) => json!({ "cursor": cursor }),
                None => json!({}),
            };
            let page = session
                .request(protocol::TOOLS_LIST, params, config.discovery_timeout)
                .await?;
            let page: ListToolsResult = serde_json::from_value(page)
                .map_err(|e| McpError::Protocol(format!("invalid tools/list result: {e}")))?;
            remote.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        let weak = Arc::downgrade(&self.inner);
        let tools: Vec<Arc<dyn Tool>> = remote
            .into_iter()
            .filter(|tool| config.exposes(&tool.name))
            .map(|tool| {
                Arc::new(McpTool::new(
                    config.exposed_name(&tool.name),
                    tool,
                    Weak::clone(&weak),
                )) as Arc<dyn Tool>
            })
            .collect();
        debug!(server = %config.name, tools = tools.len(), "Discovered tools");
        Ok(tools)
    }

    /// The discovered tools. Only while Connected.
    pub fn tools(&self) -> Result<Vec<Arc<dyn Tool>>> {
        let mut lifecycle = self.lock();
        reconcile(&mut lifecycle, &self.inner.config.name);
        match &*lifecycle {
            Lifecycle::Connected { tools, .. } => Ok(tools.clone()),
            other => Err(McpError::NotConnected {
                server: self.inner.config.name.clone(),
                state: other.state(),
            }),
        }
    }

    /// Invoke a tool by the name the agent sees (prefix included).
    pub async fn invoke(&self, name: &str, arguments: Value) -> Result<String> {
        let remote_name = {
            let tools = self.tools()?;
            let tool = tools.iter().find(|t| t.name() == name).ok_or_else(|| {
                McpError::UnknownTool {
                    server: self.inner.config.name.clone(),
                    tool: name.to_string(),
                }
            })?;
            strip_prefix(&self.inner.config, tool.name()).to_string()
        };
        self.call_remote(&remote_name, arguments).await
    }

    /// `tools/call` by remote name, normalizing the result to text.
    pub(crate) async fn call_remote(&self, remote_name: &str, arguments: Value) -> Result<String> {
        let session = self.connected_session()?;
        let arguments = match arguments {
            Value::Null => json!({}),
            other => other,
        };
        let started = tokio::time::Instant::now();
        let result = session
            .request(
                protocol::TOOLS_CALL,
                json!({ "name": remote_name, "arguments": arguments }),
                self.inner.config.call_timeout,
            )
            .await;

        let result = match result {
            Ok(result) => result,
            Err(e) => {
                if matches!(e, McpError::TransportClosed(_)) {
                    let mut lifecycle = self.lock();
                    reconcile(&mut lifecycle, &self.inner.config.name);
                }
                return Err(e);
            }
        };
        debug!(
            server = %self.inner.config.name,
            tool = remote_name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Tool call returned"
        );

        let result: CallToolResult = serde_json::from_value(result)
            .map_err(|e| McpError::Protocol(format!("invalid tools/call result: {e}")))?;
        let text = protocol::extract_text(&result.content);
        if result.is_error {
            return Err(McpError::ToolFailed {
                tool: remote_name.to_string(),
                message: text.unwrap_or_else(|| "tool reported an error".into()),
            });
        }
        text.ok_or_else(|| McpError::UnsupportedOutput {
            tool: remote_name.to_string(),
        })
    }

    fn connected_session(&self) -> Result<Arc<Session>> {
        let mut lifecycle = self.lock();
        reconcile(&mut lifecycle, &self.inner.config.name);
        match &*lifecycle {
            Lifecycle::Connected { session, .. } => Ok(Arc::clone(session)),
            other => Err(McpError::NotConnected {
                server: self.inner.config.name.clone(),
                state: other.state(),
            }),
        }
    }

    /// Re-run discovery while Connected and replace the tool list.
    pub async fn refresh_tools(&self) -> Result<Vec<Arc<dyn Tool>>> {
        let session = self.connected_session()?;
        session.take_tools_changed();
        let tools = tokio::time::timeout(self.inner.config.discovery_timeout, self.discover(&session))
            .await
            .map_err(|_| McpError::Timeout {
                method: protocol::TOOLS_LIST.into(),
                timeout_ms: self.inner.config.discovery_timeout.as_millis() as u64,
            })??;

        let mut lifecycle = self.lock();
        match &mut *lifecycle {
            Lifecycle::Connected {
                session: current,
                tools: cached,
                ..
            } if Arc::ptr_eq(current, &session) => {
                *cached = tools.clone();
                Ok(tools)
            }
            other => Err(McpError::NotConnected {
                server: self.inner.config.name.clone(),
                state: other.state(),
            }),
        }
    }

    /// Whether the server announced a tool-list change since the last
    /// discovery.
    pub fn tools_changed(&self) -> bool {
        match &*self.lock() {
            Lifecycle::Connected { session, .. } => session.tools_changed(),
            _ => false,
        }
    }

    /// Disconnect. A no-op when already Disconnected; rejected while
    /// Connecting.
    pub async fn stop(&self) -> Result<()> {
        let session = {
            let mut lifecycle = self.lock();
            match &*lifecycle {
                Lifecycle::Disconnected => return Ok(()),
                Lifecycle::Connecting => {
                    return Err(McpError::InvalidState {
                        server: self.inner.config.name.clone(),
                        operation: "stop",
                        state: AdapterState::Connecting,
                    });
                }
                Lifecycle::Connected { .. } | Lifecycle::Failed { .. } => {}
            }
            match std::mem::replace(&mut *lifecycle, Lifecycle::Disconnected) {
                Lifecycle::Connected { session, .. } => Some(session),
                Lifecycle::Failed { session, .. } => session,
                _ => None,
            }
        };
        if let Some(session) = session {
            session.close().await;
        }
        info!(server = %self.inner.config.name, "Tool server stopped");
        Ok(())
    }

    /// Tear down synchronously, from any state. Used on drop paths where
    /// awaiting `stop()` is impossible.
    pub fn abort(&self) {
        let previous = std::mem::replace(&mut *self.lock(), Lifecycle::Disconnected);
        let session = match previous {
            Lifecycle::Connected { session, .. } => Some(session),
            Lifecycle::Failed { session, .. } => session,
            Lifecycle::Disconnected | Lifecycle::Connecting => None,
        };
        if let Some(session) = session {
            debug!(server = %self.inner.config.name, "Aborting tool server connection");
            session.abort();
        }
    }
}

/// Tears down a `start()` whose future is dropped before it settles,
/// leaving the adapter Failed rather than Connecting.
struct StartGuard<'a> {
    adapter: &'a ToolServerAdapter,
    session: Option<Arc<Session>>,
    armed: bool,
}

impl StartGuard<'_> {
    fn disarm(mut self) -> Option<Arc<Session>> {
        self.armed = false;
        self.session.take()
    }
}

impl Drop for StartGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Some(session) = self.session.take() {
            session.abort();
        }
        let mut lifecycle = self.adapter.lock();
        if matches!(*lifecycle, Lifecycle::Connecting) {
            warn!(server = %self.adapter.inner.config.name, "Start cancelled while connecting");
            *lifecycle = Lifecycle::Failed {
                reason: "start was cancelled".into(),
                session: None,
            };
        }
    }
}

/// Move a Connected adapter whose session closed to Failed.
fn reconcile(lifecycle: &mut Lifecycle, server: &str) {
    let reason = match lifecycle {
        Lifecycle::Connected { session, .. } => match session.close_reason() {
            Some(reason) => reason,
            None => return,
        },
        _ => return,
    };
    warn!(server, %reason, "Tool server connection lost");
    let previous = std::mem::replace(lifecycle, Lifecycle::Disconnected);
    let session = match previous {
        Lifecycle::Connected { session, .. } => Some(session),
        _ => None,
    };
    *lifecycle = Lifecycle::Failed { reason, session };
}

fn strip_prefix<'a>(config: &ServerConfig, exposed: &'a str) -> &'a str {
    match &config.tool_prefix {
        Some(prefix) => exposed.strip_prefix(prefix.as_str()).unwrap_or(exposed),
        None => exposed,
    }
}
