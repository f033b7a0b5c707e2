//! Compaction of a run's step history.

use async_trait::async_trait;
use crewforge_core::error::ProviderError;
use crewforge_core::message::Message;
use crewforge_core::provider::{Provider, ProviderRequest};
use std::sync::Arc;
use tracing::{debug, warn};

use super::token::estimate_messages_tokens;
use crate::prompt::render_step;
use crate::rate_limit::RateLimiter;
use crate::step::ExecutionStep;

/// Share of the window a prompt may use before history is compacted.
pub const DEFAULT_USAGE_RATIO: f64 = 0.85;

/// Turns a block of history text into a shorter summary.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, text: &str) -> Result<String, ProviderError>;
}

/// Summarizes with the agent's own model.
///
/// Each call takes a permit from the agent's rate limiter, so compaction
/// counts against `max_requests_per_minute` like any other consultation.
pub struct ProviderSummarizer {
    provider: Arc<dyn Provider>,
    model: String,
    limiter: Option<Arc<RateLimiter>>,
}

impl ProviderSummarizer {
    pub fn new(
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        limiter: Option<Arc<RateLimiter>>,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            limiter,
        }
    }
}

#[async_trait]
impl Summarizer for ProviderSummarizer {
    async fn summarize(&self, text: &str) -> Result<String, ProviderError> {
        if let Some(limiter) = &self.limiter {
            limiter.acquire().await;
        }
        let request = ProviderRequest {
            model: self.model.clone(),
            messages: vec![
                Message::system(
                    "Summarize the following work log. Keep every fact, tool result and \
                     decision needed to continue the task. Reply with the summary only.",
                ),
                Message::user(text),
            ],
            temperature: 0.2,
            max_tokens: None,
            tools: vec![],
            stop: vec![],
        };
        let response = self.provider.complete(request).await?;
        Ok(response.message.content.trim().to_string())
    }
}

/// Result of one compaction.
#[derive(Debug, Clone, PartialEq)]
pub struct Compaction {
    /// Replaces the previous summary.
    pub summary: String,
    /// How many of the pending steps it covers (all but the last).
    pub steps_summarized: usize,
    /// The summarizer failed and the history was truncated instead.
    pub used_fallback: bool,
}

/// Decides when a prompt is too large and compacts older steps.
#[derive(Debug, Clone)]
pub struct ContextWindowManager {
    max_tokens: usize,
    usage_ratio: f64,
}

impl ContextWindowManager {
    pub fn new(max_tokens: usize) -> Self {
        Self {
            max_tokens,
            usage_ratio: DEFAULT_USAGE_RATIO,
        }
    }

    pub fn with_usage_ratio(mut self, ratio: f64) -> Self {
        self.usage_ratio = ratio.clamp(0.1, 1.0);
        self
    }

    /// Token count above which compaction kicks in.
    pub fn threshold(&self) -> usize {
        (self.max_tokens as f64 * self.usage_ratio) as usize
    }

    pub fn exceeds(&self, messages: &[Message]) -> bool {
        estimate_messages_tokens(messages) > self.threshold()
    }

    /// Fold every pending step except the most recent into a new summary.
    ///
    /// Returns `None` when there is nothing older than the latest step.
    pub async fn compact(
        &self,
        previous_summary: Option<&str>,
        pending: &[ExecutionStep],
        summarizer: Option<&dyn Summarizer>,
    ) -> Option<Compaction> {
        if pending.len() < 2 {
            return None;
        }
        let older = &pending[..pending.len() - 1];

        let mut text = String::new();
        if let Some(previous) = previous_summary {
            text.push_str(previous);
            text.push_str("\n\n");
        }
        for step in older {
            text.push_str(&render_step(step));
            text.push('\n');
        }

        let summarized = match summarizer {
            Some(s) => match s.summarize(&text).await {
                Ok(summary) if !summary.is_empty() => Some(summary),
                Ok(_) => {
                    warn!("Summarizer returned empty text, truncating history");
                    None
                }
                Err(e) => {
                    warn!("Summarization failed, truncating history: {e}");
                    None
                }
            },
            None => None,
        };

        let used_fallback = summarized.is_none();
        let summary = summarized.unwrap_or_else(|| keep_tail(&text, self.max_tokens));
        debug!(steps = older.len(), used_fallback, "Compacted step history");

        Some(Compaction {
            summary,
            steps_summarized: older.len(),
            used_fallback,
        })
    }
}

/// Keep at most `max_bytes` of the end of `text`.
fn keep_tail(text: &str, max_bytes: usize) -> String {
    let text = text.trim_end();
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut start = text.len() - max_bytes;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("[earlier steps truncated]\n{}", &text[start..])
}
