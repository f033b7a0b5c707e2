//! Message transports to a tool server.
//!
//! A transport moves whole JSON-RPC messages. Outbound messages go through
//! [`Transport::send`]; inbound ones arrive on the channel returned at
//! connect time, terminated by a single [`Inbound::Closed`].

pub mod sse;
pub mod stdio;

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::config::{ServerConfig, TransportConfig};
use crate::error::Result;

/// Something received from the server.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Message(Value),
    /// The connection is gone; nothing follows.
    Closed(String),
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, message: &Value) -> Result<()>;

    /// Close gracefully: stop the child or end the stream.
    async fn close(&self);

    /// Tear down without waiting. Safe to call from `Drop`.
    fn abort(&self);
}

/// A live connection: the outbound half and the inbound stream.
pub struct Connection {
    pub transport: Arc<dyn Transport>,
    pub inbound: mpsc::UnboundedReceiver<Inbound>,
}

/// Open the transport described by `config`, within its connect timeout.
pub async fn connect(config: &ServerConfig) -> Result<Connection> {
    match &config.transport {
        TransportConfig::Stdio {
            command,
            args,
            env,
            cwd,
        } => stdio::StdioTransport::spawn(&config.name, command, args, env, cwd.as_deref()),
        TransportConfig::Sse { url, headers } => {
            sse::SseTransport::connect(&config.name, url, headers, config.connect_timeout).await
        }
    }
}
