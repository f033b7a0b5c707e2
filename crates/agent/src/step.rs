//! Run and step records: the audit trail of one execution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What the model asked for in one iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepAction {
    ToolCall {
        tool: String,
        arguments: serde_json::Value,
    },
    Delegation {
        coworker: String,
        task: String,
    },
    FinalAnswer {
        answer: String,
    },
    /// The response could not be interpreted.
    Malformed {
        raw: String,
    },
}

impl StepAction {
    /// Short label used in events and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::ToolCall { .. } => "tool_call",
            Self::Delegation { .. } => "delegation",
            Self::FinalAnswer { .. } => "final_answer",
            Self::Malformed { .. } => "malformed",
        }
    }
}

/// Category of a recoverable step error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepErrorKind {
    UnknownTool,
    ToolError,
    DelegationDenied,
    MalformedAction,
}

/// What came back from acting on a [`StepAction`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepOutcome {
    Observation { text: String },
    Answer { text: String },
    Error { kind: StepErrorKind, message: String },
}

/// One loop iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStep {
    /// 1-based, exactly one greater than the previous step.
    pub index: usize,
    /// Reasoning text the model gave alongside its action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<String>,
    pub action: StepAction,
    pub outcome: StepOutcome,
    /// The observation was served from the tool-result cache.
    #[serde(default)]
    pub from_cache: bool,
    pub recorded_at: DateTime<Utc>,
}

impl ExecutionStep {
    pub fn is_error(&self) -> bool {
        matches!(self.outcome, StepOutcome::Error { .. })
    }

    /// The text of a successful observation or answer.
    pub fn success_text(&self) -> Option<&str> {
        match &self.outcome {
            StepOutcome::Observation { text } | StepOutcome::Answer { text } => Some(text),
            StepOutcome::Error { .. } => None,
        }
    }
}

/// Why a successful run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The model gave a final answer.
    FinalAnswer,
    /// A tool marked `result_as_answer` succeeded.
    ResultAsAnswer,
    /// `max_iterations` was reached; the answer is best effort.
    IterationLimit,
}

/// Why a run failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Model consultation failed after all retries.
    ModelUnavailable,
    /// `max_execution_time` elapsed.
    Timeout,
    /// The caller cancelled the run.
    Cancelled,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ModelUnavailable => "model_unavailable",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// The terminal result of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Success {
        answer: String,
        termination: Termination,
        steps: Vec<ExecutionStep>,
    },
    Failure {
        kind: FailureKind,
        /// Best answer available when the run stopped, if any.
        partial_answer: Option<String>,
        steps: Vec<ExecutionStep>,
        message: String,
    },
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn answer(&self) -> Option<&str> {
        match self {
            Self::Success { answer, .. } => Some(answer),
            Self::Failure { .. } => None,
        }
    }

    pub fn steps(&self) -> &[ExecutionStep] {
        match self {
            Self::Success { steps, .. } | Self::Failure { steps, .. } => steps,
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Failure { kind, .. } => Some(*kind),
            Self::Success { .. } => None,
        }
    }

    /// Label used in events: the termination reason or the failure kind.
    pub fn label(&self) -> String {
        match self {
            Self::Success { termination, .. } => {
                serde_json::to_value(termination)
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default()
            }
            Self::Failure { kind, .. } => kind.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(index: usize, outcome: StepOutcome) -> ExecutionStep {
        ExecutionStep {
            index,
            thought: None,
            action: StepAction::ToolCall {
                tool: "search".into(),
                arguments: serde_json::json!({}),
            },
            outcome,
            from_cache: false,
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn success_text_skips_errors() {
        let ok = step(1, StepOutcome::Observation { text: "found".into() });
        let err = step(
            2,
            StepOutcome::Error {
                kind: StepErrorKind::UnknownTool,
                message: "nope".into(),
            },
        );
        assert_eq!(ok.success_text(), Some("found"));
        assert!(err.success_text().is_none());
        assert!(err.is_error());
    }

    #[test]
    fn outcome_labels() {
        let success = RunOutcome::Success {
            answer: "42".into(),
            termination: Termination::IterationLimit,
            steps: vec![],
        };
        assert_eq!(success.label(), "iteration_limit");
        let failure = RunOutcome::Failure {
            kind: FailureKind::Timeout,
            partial_answer: None,
            steps: vec![],
            message: "too slow".into(),
        };
        assert_eq!(failure.label(), "timeout");
        assert_eq!(failure.failure_kind(), Some(FailureKind::Timeout));
    }

    #[test]
    fn step_serializes_tagged() {
        let json = serde_json::to_value(step(1, StepOutcome::Observation { text: "x".into() })).unwrap();
        assert_eq!(json["action"]["type"], "tool_call");
        assert_eq!(json["outcome"]["type"], "observation");
    }
}
