//! Domain event system — decoupled observation of agent runs.
//!
//! Events are published when something interesting happens during a run.
//! Subscribers (loggers, UIs, tests) react without coupling to the loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A run began
    RunStarted {
        run_id: String,
        agent_role: String,
        timestamp: DateTime<Utc>,
    },

    /// A step was appended to a run's history
    StepRecorded {
        run_id: String,
        index: usize,
        /// "tool_call", "delegation", "final_answer" or "malformed"
        action: String,
        is_error: bool,
        timestamp: DateTime<Utc>,
    },

    /// A tool was executed
    ToolExecuted {
        tool_name: String,
        success: bool,
        duration_ms: u64,
        cached: bool,
        timestamp: DateTime<Utc>,
    },

    /// The run's history was compacted to fit the context window
    ContextCompacted {
        run_id: String,
        steps_summarized: usize,
        timestamp: DateTime<Utc>,
    },

    /// A run reached a terminal result
    RunFinished {
        run_id: String,
        success: bool,
        /// Termination reason or failure kind
        outcome: String,
        steps: usize,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(DomainEvent::ToolExecuted {
            tool_name: "search".into(),
            success: true,
            duration_ms: 42,
            cached: false,
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            DomainEvent::ToolExecuted { tool_name, success, .. } => {
                assert_eq!(tool_name, "search");
                assert!(success);
            }
            _ => panic!("Expected ToolExecuted event"),
        }
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.publish(DomainEvent::RunStarted {
            run_id: "r1".into(),
            agent_role: "tester".into(),
            timestamp: Utc::now(),
        });
    }
}
