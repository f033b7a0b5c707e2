//! Knowledge sources — read-only reference material bound to an agent.
//!
//! Ingestion (chunking, embedding, storage) happens elsewhere. The agent
//! only asks a source for the fragments relevant to its task and puts them
//! into the prompt.

use async_trait::async_trait;
use crate::error::MemoryError;

/// A queryable source of reference fragments.
#[async_trait]
pub trait KnowledgeSource: Send + Sync {
    /// A short name used in logs.
    fn name(&self) -> &str;

    /// Return up to `limit` fragments relevant to `text`.
    async fn query(&self, text: &str, limit: usize) -> Result<Vec<String>, MemoryError>;
}

/// A fixed list of text fragments, matched by keyword overlap.
#[derive(Debug, Clone)]
pub struct StaticKnowledge {
    name: String,
    fragments: Vec<String>,
}

impl StaticKnowledge {
    pub fn new(name: impl Into<String>, fragments: Vec<String>) -> Self {
        Self {
            name: name.into(),
            fragments,
        }
    }
}

#[async_trait]
impl KnowledgeSource for StaticKnowledge {
    fn name(&self) -> &str {
        &self.name
    }

    async fn query(&self, text: &str, limit: usize) -> Result<Vec<String>, MemoryError> {
        let words: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() > 2)
            .map(str::to_lowercase)
            .collect();

        let mut scored: Vec<(usize, &String)> = self
            .fragments
            .iter()
            .map(|f| {
                let lower = f.to_lowercase();
                (words.iter().filter(|w| lower.contains(w.as_str())).count(), f)
            })
            .filter(|(hits, _)| *hits > 0)
            .collect();

        // Stable sort keeps fragment order among ties.
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(scored.into_iter().take(limit).map(|(_, f)| f.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_knowledge_matches_keywords() {
        let kb = StaticKnowledge::new(
            "handbook",
            vec![
                "Refunds are processed within 5 days".into(),
                "Shipping is free over $50".into(),
                "Refunds require a receipt".into(),
            ],
        );
        let hits = kb.query("How do refunds work?", 5).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.contains("Refunds")));
    }

    #[tokio::test]
    async fn static_knowledge_respects_limit() {
        let kb = StaticKnowledge::new("kb", vec!["alpha one".into(), "alpha two".into()]);
        assert_eq!(kb.query("alpha", 1).await.unwrap().len(), 1);
        assert!(kb.query("zzz", 5).await.unwrap().is_empty());
    }
}
