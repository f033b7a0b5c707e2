//! JSON-RPC session over a transport.
//!
//! Requests are correlated to responses through a pending map keyed by a
//! per-session counter. A pump task drains the inbound channel, resolves
//! pending requests, answers server-initiated requests, and tracks tool-list
//! change notifications. When the transport closes, every pending request
//! fails with `TransportClosed` and later requests are refused.

use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{McpError, Result};
use crate::protocol::{self, Incoming};
use crate::transport::{Connection, Inbound, Transport};

type Responder = oneshot::Sender<Result<Value>>;

#[derive(Default)]
struct Pending {
    waiting: HashMap<u64, Responder>,
    /// Why the transport closed, once it has.
    closed: Option<String>,
}

impl Pending {
    fn close(&mut self, reason: &str) {
        if self.closed.is_none() {
            self.closed = Some(reason.to_string());
        }
        for (_, responder) in self.waiting.drain() {
            let _ = responder.send(Err(McpError::TransportClosed(reason.to_string())));
        }
    }
}

pub struct Session {
    server: String,
    transport: Arc<dyn Transport>,
    pending: Arc<Mutex<Pending>>,
    next_id: AtomicU64,
    tools_changed: Arc<AtomicBool>,
    pump: JoinHandle<()>,
}

impl Session {
    pub fn new(server: &str, connection: Connection) -> Self {
        let Connection { transport, inbound } = connection;
        let pending = Arc::new(Mutex::new(Pending::default()));
        let tools_changed = Arc::new(AtomicBool::new(false));

        let pump = tokio::spawn(pump(
            server.to_string(),
            inbound,
            Arc::clone(&transport),
            Arc::clone(&pending),
            Arc::clone(&tools_changed),
        ));

        Self {
            server: server.to_string(),
            transport,
            pending,
            next_id: AtomicU64::new(1),
            tools_changed,
            pump,
        }
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Send a request and wait for its response, at most `timeout`.
    ///
    /// On timeout the request is forgotten and the server is told to
    /// cancel it.
    pub async fn request(&self, method: &str, params: Value, timeout: Duration) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.lock_pending();
            if let Some(reason) = &pending.closed {
                return Err(McpError::TransportClosed(reason.clone()));
            }
            pending.waiting.insert(id, tx);
        }

        debug!(server = %self.server, id, method, "Sending request");
        if let Err(e) = self.transport.send(&protocol::request(id, method, params)).await {
            self.lock_pending().waiting.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(McpError::TransportClosed(
                self.close_reason()
                    .unwrap_or_else(|| "session ended".into()),
            )),
            Err(_) => {
                self.lock_pending().waiting.remove(&id);
                warn!(server = %self.server, id, method, "Request timed out, cancelling");
                let cancel = protocol::notification(
                    protocol::CANCELLED,
                    json!({ "requestId": id, "reason": "timeout" }),
                );
                if let Err(e) = self.transport.send(&cancel).await {
                    debug!(server = %self.server, "Could not send cancellation: {e}");
                }
                Err(McpError::Timeout {
                    method: method.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    pub async fn notify(&self, method: &str, params: Value) -> Result<()> {
        if let Some(reason) = self.close_reason() {
            return Err(McpError::TransportClosed(reason));
        }
        self.transport
            .send(&protocol::notification(method, params))
            .await
    }

    /// Why the transport closed, if it has.
    pub fn close_reason(&self) -> Option<String> {
        self.lock_pending().closed.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.lock_pending().closed.is_some()
    }

    /// Whether the server announced a tool-list change; clears the flag.
    pub fn take_tools_changed(&self) -> bool {
        self.tools_changed.swap(false, Ordering::SeqCst)
    }

    pub fn tools_changed(&self) -> bool {
        self.tools_changed.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.lock_pending().waiting.len()
    }

    pub async fn close(&self) {
        self.transport.close().await;
        self.pump.abort();
        self.lock_pending().close("session closed");
    }

    pub fn abort(&self) {
        self.transport.abort();
        self.pump.abort();
        self.lock_pending().close("session aborted");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

async fn pump(
    server: String,
    mut inbound: mpsc::UnboundedReceiver<Inbound>,
    transport: Arc<dyn Transport>,
    pending: Arc<Mutex<Pending>>,
    tools_changed: Arc<AtomicBool>,
) {
    let reason = loop {
        let message = match inbound.recv().await {
            Some(Inbound::Message(message)) => message,
            Some(Inbound::Closed(reason)) => break reason,
            None => break "transport ended".to_string(),
        };

        match Incoming::classify(message) {
            Incoming::Response { id, outcome } => {
                let responder = id.as_u64().and_then(|id| {
                    pending
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .waiting
                        .remove(&id)
                });
                match responder {
                    Some(responder) => {
                        let _ = responder.send(outcome.map_err(|e| McpError::Rpc {
                            code: e.code,
                            message: e.message,
                        }));
                    }
                    None => debug!(server = %server, %id, "Response for unknown or expired request"),
                }
            }
            Incoming::Request { id, method, .. } => {
                let reply = if method == protocol::PING {
                    protocol::response(id, json!({}))
                } else {
                    warn!(server = %server, %method, "Server sent an unsupported request");
                    protocol::error_response(
                        id,
                        protocol::METHOD_NOT_FOUND,
                        format!("client does not implement method '{method}'"),
                    )
                };
                if let Err(e) = transport.send(&reply).await {
                    debug!(server = %server, "Failed to answer server request: {e}");
                }
            }
            Incoming::Notification { method, .. } => {
                if method == protocol::TOOLS_LIST_CHANGED {
                    debug!(server = %server, "Server tool list changed");
                    tools_changed.store(true, Ordering::SeqCst);
                } else {
                    debug!(server = %server, %method, "Notification");
                }
            }
            Incoming::Invalid(message) => {
                debug!(server = %server, %message, "Ignoring message that is neither request nor response");
            }
        }
    };

    warn!(server = %server, %reason, "Tool server connection closed");
    pending
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .close(&reason);
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Records sent messages; the test plays the server through `inbound`.
    struct LoopbackTransport {
        sent: mpsc::UnboundedSender<Value>,
    }

    #[async_trait]
    impl Transport for LoopbackTransport {
        async fn send(&self, message: &Value) -> Result<()> {
            self.sent
                .send(message.clone())
                .map_err(|_| McpError::TransportClosed("test receiver gone".into()))
        }

        async fn close(&self) {}

        fn abort(&self) {}
    }

    fn session() -> (
        Session,
        mpsc::UnboundedSender<Inbound>,
        mpsc::UnboundedReceiver<Value>,
    ) {
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let session = Session::new(
            "test",
            Connection {
                transport: Arc::new(LoopbackTransport { sent: sent_tx }),
                inbound: inbound_rx,
            },
        );
        (session, inbound_tx, sent_rx)
    }

    #[tokio::test]
    async fn correlates_out_of_order_responses() {
        let (session, server, mut sent) = session();
        let server_side = async {
            let first = sent.recv().await.unwrap();
            let second = sent.recv().await.unwrap();
            // Answer the second request first.
            for request in [&second, &first] {
                let reply = protocol::response(
                    request["id"].clone(),
                    json!({ "method": request["method"] }),
                );
                server.send(Inbound::Message(reply)).unwrap();
            }
        };
        let timeout = Duration::from_secs(5);
        let (a, b, ()) = tokio::join!(
            session.request("a", json!({}), timeout),
            session.request("b", json!({}), timeout),
            server_side
        );
        assert_eq!(a.unwrap()["method"], "a");
        assert_eq!(b.unwrap()["method"], "b");
        assert_eq!(session.in_flight(), 0);
    }

    #[tokio::test]
    async fn rpc_errors_are_surfaced() {
        let (session, server, mut sent) = session();
        let server_side = async {
            let request = sent.recv().await.unwrap();
            let reply = protocol::error_response(request["id"].clone(), -32602, "bad params");
            server.send(Inbound::Message(reply)).unwrap();
        };
        let (result, ()) = tokio::join!(
            session.request("tools/call", json!({}), Duration::from_secs(5)),
            server_side
        );
        assert!(matches!(result, Err(McpError::Rpc { code: -32602, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_removes_pending_and_sends_cancel() {
        let (session, _server, mut sent) = session();
        let result = session
            .request("tools/call", json!({}), Duration::from_millis(200))
            .await;
        assert!(matches!(result, Err(McpError::Timeout { timeout_ms: 200, .. })));
        assert_eq!(session.in_flight(), 0);

        let request = sent.recv().await.unwrap();
        let cancel = sent.recv().await.unwrap();
        assert_eq!(cancel["method"], protocol::CANCELLED);
        assert_eq!(cancel["params"]["requestId"], request["id"]);
    }

    #[tokio::test]
    async fn close_fails_in_flight_and_later_requests() {
        let (session, server, mut sent) = session();
        let server_side = async {
            sent.recv().await.unwrap();
            server
                .send(Inbound::Closed("server process closed its output".into()))
                .unwrap();
        };
        let (result, ()) = tokio::join!(
            session.request("tools/call", json!({}), Duration::from_secs(5)),
            server_side
        );
        match result {
            Err(McpError::TransportClosed(reason)) => assert!(reason.contains("closed its output")),
            other => panic!("expected TransportClosed, got {other:?}"),
        }
        assert!(session.is_closed());
        let later = session
            .request("tools/list", json!({}), Duration::from_secs(5))
            .await;
        assert!(matches!(later, Err(McpError::TransportClosed(_))));
    }

    #[tokio::test]
    async fn answers_ping_and_rejects_other_server_requests() {
        let (session, server, mut sent) = session();
        server
            .send(Inbound::Message(json!({"jsonrpc": "2.0", "id": "s1", "method": "ping"})))
            .unwrap();
        server
            .send(Inbound::Message(
                json!({"jsonrpc": "2.0", "id": "s2", "method": "sampling/createMessage"}),
            ))
            .unwrap();

        let pong = sent.recv().await.unwrap();
        assert_eq!(pong["id"], "s1");
        assert_eq!(pong["result"], json!({}));
        let rejected = sent.recv().await.unwrap();
        assert_eq!(rejected["id"], "s2");
        assert_eq!(rejected["error"]["code"], protocol::METHOD_NOT_FOUND);
        drop(session);
    }

    #[tokio::test]
    async fn tracks_tool_list_changes() {
        let (session, server, mut sent) = session();
        server
            .send(Inbound::Message(protocol::notification(
                protocol::TOOLS_LIST_CHANGED,
                json!({}),
            )))
            .unwrap();
        // A round trip guarantees the pump processed the notification.
        let server_side = async {
            let request = sent.recv().await.unwrap();
            server
                .send(Inbound::Message(protocol::response(request["id"].clone(), json!({}))))
                .unwrap();
        };
        let (result, ()) = tokio::join!(
            session.request(protocol::PING, json!({}), Duration::from_secs(5)),
            server_side
        );
        result.unwrap();
        assert!(session.tools_changed());
        assert!(session.take_tools_changed());
        assert!(!session.tools_changed());
    }
}
