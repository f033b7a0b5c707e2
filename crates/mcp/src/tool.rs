use async_trait::async_trait;
use crewforge_core::error::ToolError;
use crewforge_core::tool::Tool;
use serde_json::Value;
use std::sync::Weak;

use crate::adapter::{AdapterInner, AdapterState, ToolServerAdapter};
use crate::error::McpError;
use crate::protocol::RemoteTool;

/// A tool proxied from a tool server.
///
/// Holds only a weak handle to its adapter: once the adapter is gone the
/// tool reports `NotConnected` instead of keeping the connection alive.
pub struct McpTool {
    name: String,
    remote: RemoteTool,
    description: String,
    adapter: Weak<AdapterInner>,
}

impl McpTool {
    pub(crate) fn new(name: String, remote: RemoteTool, adapter: Weak<AdapterInner>) -> Self {
        let description = remote
            .description
            .clone()
            .unwrap_or_else(|| format!("Tool '{}' from a remote tool server", remote.name));
        Self {
            name,
            remote,
            description,
            adapter,
        }
    }

    /// The tool's name on the server, before any prefix.
    pub fn remote_name(&self) -> &str {
        &self.remote.name
    }
}

impl std::fmt::Debug for McpTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpTool")
            .field("name", &self.name)
            .field("remote_name", &self.remote.name)
            .finish()
    }
}

#[async_trait]
impl Tool for McpTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.remote.input_schema.clone()
    }

    fn results_stale(&self) -> bool {
        self.adapter
            .upgrade()
            .is_some_and(|inner| ToolServerAdapter::from_inner(inner).tools_changed())
    }

    async fn invoke(&self, arguments: Value) -> Result<String, ToolError> {
        let Some(inner) = self.adapter.upgrade() else {
            return Err(McpError::NotConnected {
                server: String::new(),
                state: AdapterState::Disconnected,
            }
            .into_tool_error(&self.name));
        };
        ToolServerAdapter::from_inner(inner)
            .call_remote(&self.remote.name, arguments)
            .await
            .map_err(|e| e.into_tool_error(&self.name))
    }
}
