use crewforge_core::error::ToolError;
use thiserror::Error;

use crate::adapter::AdapterState;

/// Errors from a tool-server adapter.
#[derive(Debug, Clone, Error)]
pub enum McpError {
    #[error("Failed to connect to tool server '{server}': {reason}")]
    ConnectionFailed { server: String, reason: String },

    #[error("Tool server '{server}' is not connected (state: {state})")]
    NotConnected { server: String, state: AdapterState },

    #[error("Cannot {operation} tool server '{server}' while {state}")]
    InvalidState {
        server: String,
        operation: &'static str,
        state: AdapterState,
    },

    #[error("Transport closed: {0}")]
    TransportClosed(String),

    #[error("Request '{method}' timed out after {timeout_ms}ms")]
    Timeout { method: String, timeout_ms: u64 },

    #[error("JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Tool '{tool}' returned no text content")]
    UnsupportedOutput { tool: String },

    #[error("Tool '{tool}' reported an error: {message}")]
    ToolFailed { tool: String, message: String },

    #[error("Tool server '{server}' has no tool named '{tool}'")]
    UnknownTool { server: String, tool: String },

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl McpError {
    /// Map into the tool contract's error, naming the tool as the agent sees it.
    pub fn into_tool_error(self, tool_name: &str) -> ToolError {
        let tool_name = tool_name.to_string();
        match self {
            Self::NotConnected { .. }
            | Self::InvalidState { .. }
            | Self::ConnectionFailed { .. } => ToolError::NotConnected { tool_name },
            Self::TransportClosed(reason) => ToolError::TransportClosed { tool_name, reason },
            Self::Timeout { timeout_ms, .. } => ToolError::Timeout {
                tool_name,
                timeout_secs: timeout_ms.div_ceil(1000),
            },
            Self::UnsupportedOutput { .. } => ToolError::UnsupportedOutput { tool_name },
            Self::UnknownTool { .. } => ToolError::NotFound(tool_name),
            Self::ToolFailed { message, .. } => ToolError::Rejected {
                tool_name,
                reason: message,
            },
            other @ (Self::Rpc { .. } | Self::Protocol(_)) => ToolError::Rejected {
                tool_name,
                reason: other.to_string(),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, McpError>;
