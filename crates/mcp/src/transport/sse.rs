//! HTTP+SSE transport.
//!
//! The client opens a long-lived `GET` with `Accept: text/event-stream`. The
//! server's first `endpoint` event names the URL that client messages are
//! `POST`ed to; replies come back as `message` events on the stream.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Url;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{Connection, Inbound, Transport};
use crate::error::{McpError, Result};

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Size caps for one stream line and one assembled event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SseLimits {
    pub max_line_bytes: usize,
    pub max_event_bytes: usize,
}

impl Default for SseLimits {
    fn default() -> Self {
        Self {
            max_line_bytes: 256 * 1024,
            max_event_bytes: 4 * 1024 * 1024,
        }
    }
}

/// Incremental `text/event-stream` parser.
///
/// Chunks may split lines anywhere, including inside a multi-byte
/// character: bytes are buffered and only complete lines are decoded.
/// Complete events are returned as soon as their terminating blank line
/// arrives.
#[derive(Debug, Default)]
pub struct SseDecoder {
    limits: SseLimits,
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    data_bytes: usize,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: SseLimits) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }

    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<SseEvent>> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(line_end) = self.buffer.iter().position(|b| *b == b'\n') {
            if line_end > self.limits.max_line_bytes {
                return Err(McpError::Protocol(format!(
                    "SSE line exceeds {} bytes",
                    self.limits.max_line_bytes
                )));
            }
            let raw: Vec<u8> = self.buffer.drain(..=line_end).collect();
            let line = std::str::from_utf8(&raw[..line_end])
                .map_err(|e| McpError::Protocol(format!("invalid UTF-8 in event stream: {e}")))?
                .trim_end_matches('\r');

            if line.is_empty() {
                if !self.data.is_empty() {
                    events.push(SseEvent {
                        event: self.event.take().unwrap_or_else(|| "message".into()),
                        data: self.data.join("\n"),
                    });
                }
                self.event = None;
                self.data.clear();
                self.data_bytes = 0;
                continue;
            }
            if line.starts_with(':') {
                continue;
            }
            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => {
                    self.data_bytes += value.len() + usize::from(!self.data.is_empty());
                    if self.data_bytes > self.limits.max_event_bytes {
                        return Err(McpError::Protocol(format!(
                            "SSE event exceeds {} bytes",
                            self.limits.max_event_bytes
                        )));
                    }
                    self.data.push(value.to_string());
                }
                _ => {}
            }
        }
        if self.buffer.len() > self.limits.max_line_bytes {
            return Err(McpError::Protocol(format!(
                "SSE line exceeds {} bytes",
                self.limits.max_line_bytes
            )));
        }
        Ok(events)
    }
}

pub struct SseTransport {
    server: String,
    client: reqwest::Client,
    endpoint: Url,
    headers: HashMap<String, String>,
    reader: JoinHandle<()>,
}

impl SseTransport {
    /// Open the event stream and wait for the `endpoint` event.
    pub async fn connect(
        server: &str,
        url: &str,
        headers: &HashMap<String, String>,
        connect_timeout: Duration,
    ) -> Result<Connection> {
        let connection_failed = |reason: String| McpError::ConnectionFailed {
            server: server.to_string(),
            reason,
        };

        let base = Url::parse(url).map_err(|e| connection_failed(format!("invalid url '{url}': {e}")))?;
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| connection_failed(format!("failed to build HTTP client: {e}")))?;

        let mut request = client
            .get(base.clone())
            .header(reqwest::header::ACCEPT, "text/event-stream");
        for (key, value) in headers {
            request = request.header(key.as_str(), value.as_str());
        }

        let response = tokio::time::timeout(connect_timeout, request.send())
            .await
            .map_err(|_| connection_failed(format!("no response within {connect_timeout:?}")))?
            .map_err(|e| connection_failed(format!("GET {url} failed: {e}")))?;
        if !response.status().is_success() {
            return Err(connection_failed(format!(
                "GET {url} returned {}",
                response.status()
            )));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let (endpoint_tx, endpoint_rx) = oneshot::channel::<std::result::Result<Url, String>>();
        let name = server.to_string();

        let reader = tokio::spawn(async move {
            let mut endpoint_tx = Some(endpoint_tx);
            let mut decoder = SseDecoder::new();
            let mut stream = response.bytes_stream();

            let reason = loop {
                let chunk = match stream.next().await {
                    Some(Ok(chunk)) => chunk,
                    Some(Err(e)) => break format!("event stream error: {e}"),
                    None => break "server closed the event stream".to_string(),
                };
                let events = match decoder.push(&chunk) {
                    Ok(events) => events,
                    Err(e) => break e.to_string(),
                };
                for event in events {
                    match event.event.as_str() {
                        "endpoint" => {
                            let resolved = base
                                .join(event.data.trim())
                                .map_err(|e| format!("invalid endpoint '{}': {e}", event.data));
                            match endpoint_tx.take() {
                                Some(sender) => {
                                    let _ = sender.send(resolved);
                                }
                                None => debug!(server = %name, "Ignoring repeated endpoint event"),
                            }
                        }
                        "message" => match serde_json::from_str::<Value>(&event.data) {
                            Ok(message) => {
                                if tx.send(Inbound::Message(message)).is_err() {
                                    return;
                                }
                            }
                            Err(e) => warn!(server = %name, "Invalid JSON in event: {e}"),
                        },
                        other => debug!(server = %name, event = other, "Ignoring event"),
                    }
                }
            };
            debug!(server = %name, "{reason}");
            if let Some(sender) = endpoint_tx.take() {
                let _ = sender.send(Err(reason.clone()));
            }
            let _ = tx.send(Inbound::Closed(reason));
        });

        let endpoint = match tokio::time::timeout(connect_timeout, endpoint_rx).await {
            Ok(Ok(Ok(endpoint))) => endpoint,
            Ok(Ok(Err(reason))) => {
                reader.abort();
                return Err(connection_failed(reason));
            }
            Ok(Err(_)) => {
                reader.abort();
                return Err(connection_failed("event stream ended before the endpoint event".into()));
            }
            Err(_) => {
                reader.abort();
                return Err(connection_failed(format!(
                    "no endpoint event within {connect_timeout:?}"
                )));
            }
        };
        debug!(server, endpoint = %endpoint, "SSE endpoint announced");

        let transport = Self {
            server: server.to_string(),
            client,
            endpoint,
            headers: headers.clone(),
            reader,
        };
        Ok(Connection {
            transport: Arc::new(transport),
            inbound: rx,
        })
    }
}

#[async_trait]
impl Transport for SseTransport {
    async fn send(&self, message: &Value) -> Result<()> {
        if self.reader.is_finished() {
            return Err(McpError::TransportClosed("event stream is closed".into()));
        }
        let mut request = self.client.post(self.endpoint.clone()).json(message);
        for (key, value) in &self.headers {
            request = request.header(key.as_str(), value.as_str());
        }
        let response = request
            .send()
            .await
            .map_err(|e| McpError::TransportClosed(format!("POST failed: {e}")))?;
        if !response.status().is_success() {
            return Err(McpError::TransportClosed(format!(
                "POST {} returned {}",
                self.endpoint,
                response.status()
            )));
        }
        Ok(())
    }

    async fn close(&self) {
        debug!(server = %self.server, "Closing event stream");
        self.reader.abort();
    }

    fn abort(&self) {
        self.reader.abort();
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
