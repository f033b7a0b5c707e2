//! Memory trait — long-term storage shared across runs.
//!
//! A run appends a short summary of itself when it finishes, and later runs
//! retrieve the entries relevant to their task to enrich the prompt. Memory
//! never affects the correctness of the loop; it only adds context.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;
use crate::error::MemoryError;

/// A single memory entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Unique ID for this memory
    pub id: String,

    /// The content of the memory
    pub content: String,

    /// Source of the memory (agent role, run ID, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// When this memory was created
    pub created_at: DateTime<Utc>,

    /// Relevance score (set by retrieval)
    #[serde(default)]
    pub score: f32,
}

impl MemoryEntry {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            content: content.into(),
            source: None,
            created_at: Utc::now(),
            score: 0.0,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// The core Memory trait.
#[async_trait]
pub trait Memory: Send + Sync {
    /// The backend name (e.g., "in_memory").
    fn name(&self) -> &str;

    /// Store a run summary. Returns the entry's ID.
    async fn append(&self, entry: MemoryEntry) -> std::result::Result<String, MemoryError>;

    /// Retrieve up to `limit` entries relevant to `query`, best first.
    async fn retrieve(
        &self,
        query: &str,
        limit: usize,
    ) -> std::result::Result<Vec<MemoryEntry>, MemoryError>;
}

/// An in-memory keyword store.
/// Useful for testing and sessions where persistence isn't needed.
#[derive(Clone, Default)]
pub struct InMemoryMemory {
    entries: Arc<RwLock<Vec<MemoryEntry>>>,
}

impl InMemoryMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

/// Lowercased words worth matching on.
fn keywords(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2)
        .map(str::to_lowercase)
        .collect()
}

#[async_trait]
impl Memory for InMemoryMemory {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn append(&self, mut entry: MemoryEntry) -> std::result::Result<String, MemoryError> {
        if entry.content.trim().is_empty() {
            return Err(MemoryError::Storage("empty memory entry".into()));
        }
        if entry.id.is_empty() {
            entry.id = Uuid::new_v4().to_string();
        }
        let id = entry.id.clone();
        self.entries.write().await.push(entry);
        Ok(id)
    }

    async fn retrieve(
        &self,
        query: &str,
        limit: usize,
    ) -> std::result::Result<Vec<MemoryEntry>, MemoryError> {
        let words = keywords(query);
        if words.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let entries = self.entries.read().await;
        let mut results: Vec<MemoryEntry> = entries
            .iter()
            .filter_map(|e| {
                let content = e.content.to_lowercase();
                let hits = words.iter().filter(|w| content.contains(w.as_str())).count();
                if hits == 0 {
                    return None;
                }
                let mut e = e.clone();
                e.score = hits as f32 / words.len() as f32;
                Some(e)
            })
            .collect();

        // Newest first among equal scores.
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        results.truncate(limit);
        Ok(results)
    }
}
