//! Tool-result cache keyed by tool name and canonical arguments.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Entries kept before the oldest is evicted.
pub const DEFAULT_CACHE_CAPACITY: usize = 256;

type Key = (String, String);

#[derive(Debug, Default)]
struct Entries {
    values: HashMap<Key, String>,
    order: VecDeque<Key>,
}

/// Successful tool outputs, shared by all runs of one agent.
///
/// Bounded: once full, the oldest entry is evicted first.
#[derive(Debug)]
pub struct ToolResultCache {
    capacity: usize,
    entries: Mutex<Entries>,
}

impl Default for ToolResultCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }
}

/// Object keys are sorted by `serde_json`, so equal arguments in any key
/// order produce the same key.
fn canonical(arguments: &serde_json::Value) -> String {
    serde_json::to_string(arguments).unwrap_or_default()
}

impl ToolResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(Entries::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, tool: &str, arguments: &serde_json::Value) -> Option<String> {
        self.lock()
            .values
            .get(&(tool.to_string(), canonical(arguments)))
            .cloned()
    }

    pub fn insert(&self, tool: &str, arguments: &serde_json::Value, output: &str) {
        let key = (tool.to_string(), canonical(arguments));
        let mut entries = self.lock();
        if entries.values.insert(key.clone(), output.to_string()).is_none() {
            entries.order.push_back(key);
        }
        while entries.values.len() > self.capacity {
            let Some(oldest) = entries.order.pop_front() else {
                break;
            };
            entries.values.remove(&oldest);
        }
    }

    /// Drop every entry for `tool`.
    pub fn forget(&self, tool: &str) {
        let mut entries = self.lock();
        entries.values.retain(|(name, _), _| name != tool);
        entries.order.retain(|(name, _)| name != tool);
    }

    pub fn len(&self) -> usize {
        self.lock().values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
