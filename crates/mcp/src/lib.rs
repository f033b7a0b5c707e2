//! Model Context Protocol tool-server adapter.
//!
//! A [`ToolServerAdapter`] owns one connection to an MCP server, over a
//! local subprocess (stdio) or a remote event stream (SSE). Once started it
//! exposes the server's tools as ordinary [`Tool`](crewforge_core::tool::Tool)
//! objects that an agent cannot tell apart from local ones.
//!
//! ```no_run
//! # async fn demo() -> Result<(), crewforge_mcp::McpError> {
//! use crewforge_mcp::{ServerConfig, with_adapter};
//!
//! let config = ServerConfig::stdio("files", "mcp-server-filesystem").with_args(["/tmp"]);
//! let names = with_adapter(config, |adapter| async move {
//!     let tools = adapter.tools()?;
//!     Ok::<_, crewforge_mcp::McpError>(tools.iter().map(|t| t.name().to_string()).collect::<Vec<_>>())
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod config;
pub mod error;
pub mod protocol;
pub mod scope;
pub mod session;
pub mod tool;
pub mod transport;

pub use adapter::{AdapterState, ToolServerAdapter};
pub use config::{ServerConfig, TransportConfig};
pub use error::McpError;
pub use scope::{AdapterGuard, with_adapter, with_adapters};
pub use tool::McpTool;
