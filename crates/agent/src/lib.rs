//! The agent execution loop.
//!
//! An [`Agent`] is a role, a goal, a model and a set of tools. The
//! [`AgentExecutor`] runs one against a task in a bounded
//! **Thought → Action → Observation** cycle:
//!
//! 1. **Compose** the prompt (identity, tools, task, recalled memory, history)
//! 2. **Compact** older steps if the prompt would overflow the context window
//! 3. **Consult** the model, honouring the rate limit and retrying transient failures
//! 4. **Act**: return the final answer, invoke a tool, or delegate to a coworker
//! 5. **Record** the step and loop back to 1
//!
//! The loop stops at a final answer, at `max_iterations` (best-effort answer),
//! or with a [`RunOutcome::Failure`] on timeout, cancellation, or when the
//! model stays unavailable.

pub mod agent;
pub mod cache;
pub mod context;
pub mod executor;
pub mod parser;
pub mod prompt;
pub mod rate_limit;
pub mod retry;
pub mod run;
pub mod step;

#[cfg(test)]
mod test_helpers;

pub use agent::{Agent, AgentBuilder};
pub use context::{Compaction, ContextWindowManager, ProviderSummarizer, Summarizer};
pub use crewforge_tools::{CodeExecutionMode, CodeSandbox};
pub use executor::{AgentExecutor, DEFAULT_MAX_DELEGATION_DEPTH};
pub use parser::{ParseError, ParsedAction, ParsedResponse, parse_response};
pub use rate_limit::RateLimiter;
pub use retry::RetryPolicy;
pub use step::{
    ExecutionStep, FailureKind, RunOutcome, StepAction, StepErrorKind, StepOutcome, Termination,
};
pub use tokio_util::sync::CancellationToken;
