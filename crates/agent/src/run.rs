//! State of one in-progress run. Owned and mutated by a single loop.

use chrono::Utc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::context::Compaction;
use crate::step::{ExecutionStep, StepAction, StepOutcome};

#[derive(Debug)]
pub struct AgentRun {
    pub run_id: String,
    steps: Vec<ExecutionStep>,
    /// Summary standing in for `steps[..summarized]` in the prompt.
    summary: Option<String>,
    summarized: usize,
    token_estimate: usize,
    model_calls: usize,
    started_at: Instant,
    deadline: Option<Instant>,
}

impl AgentRun {
    pub fn new(max_execution_time: Option<Duration>) -> Self {
        let started_at = Instant::now();
        Self {
            run_id: Uuid::new_v4().to_string(),
            steps: Vec::new(),
            summary: None,
            summarized: 0,
            token_estimate: 0,
            model_calls: 0,
            started_at,
            deadline: max_execution_time.map(|limit| started_at + limit),
        }
    }

    /// Append a step; its index is one past the previous step's.
    pub fn record(
        &mut self,
        thought: Option<String>,
        action: StepAction,
        outcome: StepOutcome,
        from_cache: bool,
    ) -> &ExecutionStep {
        let index = self.steps.len() + 1;
        self.steps.push(ExecutionStep {
            index,
            thought,
            action,
            outcome,
            from_cache,
            recorded_at: Utc::now(),
        });
        &self.steps[index - 1]
    }

    pub fn steps(&self) -> &[ExecutionStep] {
        &self.steps
    }

    pub fn into_steps(self) -> Vec<ExecutionStep> {
        self.steps
    }

    /// Steps the prompt still shows verbatim.
    pub fn pending_steps(&self) -> &[ExecutionStep] {
        &self.steps[self.summarized..]
    }

    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    pub fn apply_compaction(&mut self, compaction: Compaction) {
        self.summarized = (self.summarized + compaction.steps_summarized).min(self.steps.len());
        self.summary = Some(compaction.summary);
    }

    pub fn token_estimate(&self) -> usize {
        self.token_estimate
    }

    pub fn set_token_estimate(&mut self, tokens: usize) {
        self.token_estimate = tokens;
    }

    pub fn model_calls(&self) -> usize {
        self.model_calls
    }

    pub fn count_model_call(&mut self) {
        self.model_calls += 1;
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn timed_out(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Text of the most recent successful tool or delegation observation.
    pub fn last_observation(&self) -> Option<&str> {
        self.steps.iter().rev().find_map(|step| match (&step.action, &step.outcome) {
            (
                StepAction::ToolCall { .. } | StepAction::Delegation { .. },
                StepOutcome::Observation { text },
            ) if !text.trim().is_empty() => Some(text.as_str()),
            _ => None,
        })
    }
}
