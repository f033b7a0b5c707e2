//! The bounded agent loop.
//!
//! Each iteration composes the prompt, compacts history when it would
//! overflow the context window, waits for a rate-limit permit, consults the
//! model (with retries), and acts on the parsed response: finish, invoke a
//! tool, or delegate to a coworker. The loop ends with a final answer, at
//! the iteration cap (with a best-effort answer), or with a failure.
//!
//! Every suspension point races the run's deadline and its cancellation
//! token. The deadline is checked first, so when time runs out on the same
//! step as anything else, the run reports `Timeout`.

use chrono::Utc;
use crewforge_core::error::{Error, ProviderError, Result, ToolError};
use crewforge_core::event::{DomainEvent, EventBus};
use crewforge_core::memory::{Memory, MemoryEntry};
use crewforge_core::provider::ProviderRequest;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::Agent;
use crate::context::{ContextWindowManager, ProviderSummarizer, Summarizer, estimate_messages_tokens};
use crate::parser::{OBSERVATION_STOP, ParsedAction, ParsedResponse, delegate_definition, parse_response};
use crate::prompt::{PromptInput, compose};
use crate::run::AgentRun;
use crate::step::{FailureKind, RunOutcome, StepAction, StepErrorKind, StepOutcome, Termination};

pub const DEFAULT_MAX_DELEGATION_DEPTH: usize = 3;
const DEFAULT_RECALL_LIMIT: usize = 5;
const KNOWLEDGE_LIMIT: usize = 5;

/// Why a suspension was abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    Timeout,
    Cancelled,
}

/// How the loop ended, before steps are attached.
enum Terminal {
    Success { answer: String, termination: Termination },
    Failure { kind: FailureKind, message: String },
}

impl Terminal {
    fn interrupted(agent: &Agent, interrupt: Interrupt) -> Self {
        match interrupt {
            Interrupt::Timeout => Self::Failure {
                kind: FailureKind::Timeout,
                message: format!(
                    "Run exceeded its execution time limit of {:?}",
                    agent.max_execution_time().unwrap_or_default()
                ),
            },
            Interrupt::Cancelled => Self::Failure {
                kind: FailureKind::Cancelled,
                message: "Run was cancelled".into(),
            },
        }
    }
}

struct ToolExecution {
    outcome: StepOutcome,
    from_cache: bool,
    /// Set when a `result_as_answer` tool succeeded.
    final_answer: Option<String>,
}

impl ToolExecution {
    fn error(kind: StepErrorKind, message: String) -> Self {
        Self {
            outcome: StepOutcome::Error { kind, message },
            from_cache: false,
            final_answer: None,
        }
    }
}

/// Race `fut` against the deadline and cancellation. The deadline wins ties.
async fn guard<F: Future>(
    deadline: Option<Instant>,
    cancel: &CancellationToken,
    fut: F,
) -> std::result::Result<F::Output, Interrupt> {
    let expired = async {
        match deadline {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::select! {
        biased;
        _ = expired => Err(Interrupt::Timeout),
        _ = cancel.cancelled() => Err(Interrupt::Cancelled),
        out = fut => Ok(out),
    }
}

fn interrupted(run: &AgentRun, cancel: &CancellationToken) -> Option<Interrupt> {
    if run.timed_out() {
        Some(Interrupt::Timeout)
    } else if cancel.is_cancelled() {
        Some(Interrupt::Cancelled)
    } else {
        None
    }
}

/// Runs agents against tasks.
///
/// One executor may drive many concurrent runs; per-run state lives in the
/// run's own future.
pub struct AgentExecutor {
    event_bus: Arc<EventBus>,
    memory: Option<Arc<dyn Memory>>,
    coworkers: Vec<Arc<Agent>>,
    max_delegation_depth: usize,
    recall_limit: usize,
}

impl Default for AgentExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentExecutor {
    pub fn new() -> Self {
        Self {
            event_bus: Arc::new(EventBus::default()),
            memory: None,
            coworkers: Vec::new(),
            max_delegation_depth: DEFAULT_MAX_DELEGATION_DEPTH,
            recall_limit: DEFAULT_RECALL_LIMIT,
        }
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = bus;
        self
    }

    /// Attach long-term memory for recall and run summaries.
    pub fn with_memory(mut self, memory: Arc<dyn Memory>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Agents available for delegation.
    pub fn with_coworkers(mut self, coworkers: impl IntoIterator<Item = Arc<Agent>>) -> Self {
        self.coworkers.extend(coworkers);
        self
    }

    pub fn with_max_delegation_depth(mut self, depth: usize) -> Self {
        self.max_delegation_depth = depth;
        self
    }

    pub fn with_recall_limit(mut self, limit: usize) -> Self {
        self.recall_limit = limit;
        self
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Run `agent` against `task` to a terminal outcome.
    ///
    /// Only an empty task is an error; every other way a run can end is a
    /// [`RunOutcome`].
    pub async fn run(&self, agent: &Agent, task: &str) -> Result<RunOutcome> {
        self.run_with_cancellation(agent, task, CancellationToken::new())
            .await
    }

    /// Like [`run`](Self::run), ending with `Failure(Cancelled)` once
    /// `cancel` fires.
    pub async fn run_with_cancellation(
        &self,
        agent: &Agent,
        task: &str,
        cancel: CancellationToken,
    ) -> Result<RunOutcome> {
        if task.trim().is_empty() {
            return Err(Error::config("task description must not be empty"));
        }
        Ok(self
            .execute(agent, task, cancel, vec![agent.role().to_string()])
            .await)
    }

    /// `chain` holds the roles from the root run down to `agent`.
    fn execute<'a>(
        &'a self,
        agent: &'a Agent,
        task: &'a str,
        cancel: CancellationToken,
        chain: Vec<String>,
    ) -> BoxFuture<'a, RunOutcome> {
        Box::pin(async move {
            let mut run = AgentRun::new(agent.max_execution_time());
            info!(
                run_id = %run.run_id,
                role = agent.role(),
                model = agent.model(),
                depth = chain.len() - 1,
                max_iter = agent.max_iterations(),
                "Agent run starting"
            );
            self.event_bus.publish(DomainEvent::RunStarted {
                run_id: run.run_id.clone(),
                agent_role: agent.role().to_string(),
                timestamp: Utc::now(),
            });

            let terminal = self.drive(agent, task, &cancel, &chain, &mut run).await;

            let run_id = run.run_id.clone();
            let elapsed_ms = run.elapsed().as_millis() as u64;
            let model_calls = run.model_calls();
            let outcome = match terminal {
                Terminal::Success {
                    answer,
                    termination,
                } => RunOutcome::Success {
                    answer,
                    termination,
                    steps: run.into_steps(),
                },
                Terminal::Failure { kind, message } => {
                    let partial_answer = run.last_observation().map(str::to_string);
                    RunOutcome::Failure {
                        kind,
                        partial_answer,
                        steps: run.into_steps(),
                        message,
                    }
                }
            };

            self.remember(agent, task, &outcome).await;

            let label = outcome.label();
            if outcome.is_success() {
                info!(%run_id, outcome = %label, steps = outcome.steps().len(), model_calls, elapsed_ms, "Agent run finished");
            } else {
                warn!(%run_id, outcome = %label, steps = outcome.steps().len(), model_calls, elapsed_ms, "Agent run failed");
            }
            self.event_bus.publish(DomainEvent::RunFinished {
                run_id,
                success: outcome.is_success(),
                outcome: label,
                steps: outcome.steps().len(),
                timestamp: Utc::now(),
            });
            outcome
        })
    }

    async fn drive(
        &self,
        agent: &Agent,
        task: &str,
        cancel: &CancellationToken,
        chain: &[String],
        run: &mut AgentRun,
    ) -> Terminal {
        if let Some(i) = interrupted(run, cancel) {
            return Terminal::interrupted(agent, i);
        }

        let (knowledge, memories) =
            match guard(run.deadline(), cancel, self.gather_context(agent, task)).await {
                Ok(found) => found,
                Err(i) => return Terminal::interrupted(agent, i),
            };

        let coworkers = self.coworkers_for(agent);
        let mut tool_defs = agent.tools().definitions();
        if !coworkers.is_empty() {
            let roles: Vec<&str> = coworkers.iter().map(|c| c.role()).collect();
            tool_defs.push(delegate_definition(&roles));
        }

        let window = ContextWindowManager::new(agent.context_window_tokens());
        let summarizer: &dyn Summarizer = &ProviderSummarizer::new(
            agent.provider().clone(),
            agent.model(),
            agent.rate_limiter().cloned(),
        );
        let policy = agent.retry_policy();

        loop {
            if let Some(i) = interrupted(run, cancel) {
                return Terminal::interrupted(agent, i);
            }

            // ── Compose prompt ──
            let prompt = |run: &AgentRun| {
                compose(&PromptInput {
                    agent,
                    task,
                    coworkers: &coworkers,
                    knowledge: &knowledge,
                    memories: &memories,
                    summary: run.summary(),
                    steps: run.pending_steps(),
                })
            };
            let mut messages = prompt(&*run);

            // ── Keep within the context window ──
            if agent.respect_context_window() && window.exceeds(&messages) {
                let compacted = guard(
                    run.deadline(),
                    cancel,
                    window.compact(run.summary(), run.pending_steps(), Some(summarizer)),
                )
                .await;
                match compacted {
                    Err(i) => return Terminal::interrupted(agent, i),
                    Ok(Some(compaction)) => {
                        self.event_bus.publish(DomainEvent::ContextCompacted {
                            run_id: run.run_id.clone(),
                            steps_summarized: compaction.steps_summarized,
                            timestamp: Utc::now(),
                        });
                        run.apply_compaction(compaction);
                        messages = prompt(&*run);
                    }
                    Ok(None) => {
                        debug!(run_id = %run.run_id, "Prompt exceeds window but only the latest step remains");
                    }
                }
            }
            run.set_token_estimate(estimate_messages_tokens(&messages));

            debug!(
                run_id = %run.run_id,
                iteration = run.steps().len() + 1,
                tokens = run.token_estimate(),
                "Consulting model"
            );

            // ── Consult the model ──
            let request = ProviderRequest {
                model: agent.model().to_string(),
                messages,
                temperature: agent.temperature(),
                max_tokens: agent.max_tokens(),
                tools: tool_defs.clone(),
                stop: vec![OBSERVATION_STOP.to_string()],
            };
            let request = &request;
            let limiter = agent.rate_limiter();
            let provider = agent.provider();
            let consult = policy.run(
                "model",
                move || async move {
                    if let Some(limiter) = limiter {
                        limiter.acquire().await;
                    }
                    provider.complete(request.clone()).await
                },
                ProviderError::is_retryable,
            );

            let response = match guard(run.deadline(), cancel, consult).await {
                Err(i) => return Terminal::interrupted(agent, i),
                Ok(Err(e)) => {
                    if run.timed_out() {
                        return Terminal::interrupted(agent, Interrupt::Timeout);
                    }
                    return Terminal::Failure {
                        kind: FailureKind::ModelUnavailable,
                        message: format!("Model consultation failed: {e}"),
                    };
                }
                Ok(Ok(response)) => response,
            };
            run.count_model_call();

            // ── Act ──
            match parse_response(&response.message) {
                Err(e) => {
                    warn!(run_id = %run.run_id, reason = %e.reason, "Could not parse model response");
                    self.record(
                        run,
                        e.thought.clone(),
                        StepAction::Malformed { raw: e.raw.clone() },
                        StepOutcome::Error {
                            kind: StepErrorKind::MalformedAction,
                            message: e.reason,
                        },
                        false,
                    );
                }
                Ok(ParsedResponse { thought, action }) => match action {
                    ParsedAction::FinalAnswer(answer) => {
                        self.record(
                            run,
                            thought,
                            StepAction::FinalAnswer {
                                answer: answer.clone(),
                            },
                            StepOutcome::Answer {
                                text: answer.clone(),
                            },
                            false,
                        );
                        return Terminal::Success {
                            answer,
                            termination: Termination::FinalAnswer,
                        };
                    }
                    ParsedAction::ToolCall { tool, arguments } => {
                        let execution = match guard(
                            run.deadline(),
                            cancel,
                            self.invoke_tool(agent, &tool, &arguments),
                        )
                        .await
                        {
                            Ok(execution) => execution,
                            Err(i) => return Terminal::interrupted(agent, i),
                        };
                        self.record(
                            run,
                            thought,
                            StepAction::ToolCall { tool, arguments },
                            execution.outcome,
                            execution.from_cache,
                        );
                        if let Some(answer) = execution.final_answer {
                            return Terminal::Success {
                                answer,
                                termination: Termination::ResultAsAnswer,
                            };
                        }
                    }
                    ParsedAction::Delegation {
                        coworker,
                        task: sub_task,
                        context,
                    } => {
                        let outcome = match guard(
                            run.deadline(),
                            cancel,
                            self.delegate(agent, chain, cancel, &coworker, &sub_task, context.as_deref()),
                        )
                        .await
                        {
                            Ok(outcome) => outcome,
                            Err(i) => return Terminal::interrupted(agent, i),
                        };
                        self.record(
                            run,
                            thought,
                            StepAction::Delegation {
                                coworker,
                                task: sub_task,
                            },
                            outcome,
                            false,
                        );
                    }
                },
            }

            // ── Iteration cap ──
            let max = agent.max_iterations() as usize;
            if run.steps().len() >= max {
                if let Some(i) = interrupted(run, cancel) {
                    return Terminal::interrupted(agent, i);
                }
                warn!(run_id = %run.run_id, max, "Max iterations reached, returning best-effort answer");
                let answer = run.last_observation().map(str::to_string).unwrap_or_else(|| {
                    format!(
                        "Agent stopped after reaching the limit of {max} iterations \
                         without producing a final answer."
                    )
                });
                return Terminal::Success {
                    answer,
                    termination: Termination::IterationLimit,
                };
            }
        }
    }

    fn record(
        &self,
        run: &mut AgentRun,
        thought: Option<String>,
        action: StepAction,
        outcome: StepOutcome,
        from_cache: bool,
    ) {
        let run_id = run.run_id.clone();
        let step = run.record(thought, action, outcome, from_cache);
        debug!(
            %run_id,
            index = step.index,
            action = step.action.label(),
            is_error = step.is_error(),
            from_cache,
            "Step recorded"
        );
        self.event_bus.publish(DomainEvent::StepRecorded {
            run_id,
            index: step.index,
            action: step.action.label().to_string(),
            is_error: step.is_error(),
            timestamp: Utc::now(),
        });
    }

    async fn invoke_tool(
        &self,
        agent: &Agent,
        name: &str,
        arguments: &serde_json::Value,
    ) -> ToolExecution {
        let Some(tool) = agent.tools().get(name) else {
            warn!(tool = name, "Model requested an unknown tool");
            let available = agent.tools().names();
            let available = if available.is_empty() {
                "none".to_string()
            } else {
                available.join(", ")
            };
            return ToolExecution::error(
                StepErrorKind::UnknownTool,
                format!("Tool '{name}' does not exist. Available tools: {available}"),
            );
        };

        let cache = agent.cache();
        if tool.results_stale()
            && let Some(cache) = cache
        {
            debug!(tool = name, "Tool results are stale, dropping cached entries");
            cache.forget(name);
        }
        let cache = cache.filter(|_| !tool.results_stale());

        if let Some(hit) = cache.and_then(|c| c.get(name, arguments)) {
            debug!(tool = name, "Tool result served from cache");
            self.event_bus.publish(DomainEvent::ToolExecuted {
                tool_name: name.to_string(),
                success: true,
                duration_ms: 0,
                cached: true,
                timestamp: Utc::now(),
            });
            return ToolExecution {
                final_answer: tool.result_as_answer().then(|| hit.clone()),
                outcome: StepOutcome::Observation { text: hit },
                from_cache: true,
            };
        }

        let start = Instant::now();
        let result = agent
            .retry_policy()
            .run(name, || tool.invoke(arguments.clone()), ToolError::is_transient)
            .await;
        let duration_ms = start.elapsed().as_millis() as u64;

        self.event_bus.publish(DomainEvent::ToolExecuted {
            tool_name: name.to_string(),
            success: result.is_ok(),
            duration_ms,
            cached: false,
            timestamp: Utc::now(),
        });

        match result {
            Ok(output) => {
                info!(tool = name, duration_ms, "Tool executed");
                if let Some(cache) = cache {
                    cache.insert(name, arguments, &output);
                }
                ToolExecution {
                    final_answer: tool.result_as_answer().then(|| output.clone()),
                    outcome: StepOutcome::Observation { text: output },
                    from_cache: false,
                }
            }
            Err(e) => {
                warn!(tool = name, duration_ms, "Tool failed: {e}");
                let kind = match e {
                    ToolError::NotFound(_) => StepErrorKind::UnknownTool,
                    ToolError::DelegationDenied(_) => StepErrorKind::DelegationDenied,
                    _ => StepErrorKind::ToolError,
                };
                ToolExecution::error(kind, e.to_string())
            }
        }
    }

    /// Coworkers `agent` may delegate to: none unless delegation is
    /// allowed, and never itself.
    fn coworkers_for(&self, agent: &Agent) -> Vec<Arc<Agent>> {
        if !agent.allow_delegation() {
            return Vec::new();
        }
        self.coworkers
            .iter()
            .filter(|c| !c.role().eq_ignore_ascii_case(agent.role()))
            .cloned()
            .collect()
    }

    async fn delegate(
        &self,
        agent: &Agent,
        chain: &[String],
        cancel: &CancellationToken,
        coworker: &str,
        task: &str,
        context: Option<&str>,
    ) -> StepOutcome {
        let denied = |message: String| {
            warn!(from = agent.role(), to = coworker, "Delegation denied: {message}");
            StepOutcome::Error {
                kind: StepErrorKind::DelegationDenied,
                message,
            }
        };

        if !agent.allow_delegation() {
            return denied(format!("Agent '{}' is not allowed to delegate work", agent.role()));
        }
        let Some(target) = self
            .coworkers
            .iter()
            .find(|c| c.role().eq_ignore_ascii_case(coworker.trim()))
            .cloned()
        else {
            let roles: Vec<Arc<Agent>> = self.coworkers_for(agent);
            let roles: Vec<&str> = roles.iter().map(|c| c.role()).collect();
            return StepOutcome::Error {
                kind: StepErrorKind::ToolError,
                message: format!(
                    "Unknown coworker '{coworker}'. Available coworkers: {}",
                    roles.join(", ")
                ),
            };
        };
        if target.role().eq_ignore_ascii_case(agent.role()) {
            return denied("An agent cannot delegate work to itself".into());
        }
        if chain.iter().any(|r| r.eq_ignore_ascii_case(target.role())) {
            return denied(format!(
                "Delegating to '{}' would create a cycle: {} -> {}",
                target.role(),
                chain.join(" -> "),
                target.role()
            ));
        }
        if chain.len() > self.max_delegation_depth {
            return denied(format!(
                "Maximum delegation depth of {} reached",
                self.max_delegation_depth
            ));
        }

        let sub_task = match context {
            Some(context) => format!("{task}\n\nContext:\n{context}"),
            None => task.to_string(),
        };
        let mut child_chain = chain.to_vec();
        child_chain.push(target.role().to_string());

        info!(from = agent.role(), to = target.role(), depth = chain.len(), "Delegating task");
        let outcome = self
            .execute(&target, &sub_task, cancel.child_token(), child_chain)
            .await;

        match outcome {
            RunOutcome::Success { answer, .. } => StepOutcome::Observation { text: answer },
            RunOutcome::Failure { kind, message, .. } => StepOutcome::Error {
                kind: StepErrorKind::ToolError,
                message: format!("Coworker '{}' failed ({kind}): {message}", target.role()),
            },
        }
    }

    /// Knowledge fragments and recalled memories for the prompt.
    async fn gather_context(&self, agent: &Agent, task: &str) -> (Vec<String>, Vec<String>) {
        let mut knowledge = Vec::new();
        for source in agent.knowledge() {
            match source.query(task, KNOWLEDGE_LIMIT).await {
                Ok(fragments) => knowledge.extend(fragments),
                Err(e) => warn!(source = source.name(), "Knowledge query failed: {e}"),
            }
        }

        let mut memories = Vec::new();
        if agent.memory_enabled()
            && let Some(memory) = &self.memory
        {
            match memory.retrieve(task, self.recall_limit).await {
                Ok(entries) => {
                    if !entries.is_empty() {
                        debug!(count = entries.len(), "Recalled memories for context");
                    }
                    memories.extend(entries.into_iter().map(|e| e.content));
                }
                Err(e) => warn!("Memory recall failed: {e}"),
            }
        }

        (knowledge, memories)
    }

    /// Store a summary of the finished run.
    async fn remember(&self, agent: &Agent, task: &str, outcome: &RunOutcome) {
        if !agent.memory_enabled() {
            return;
        }
        let Some(memory) = &self.memory else {
            return;
        };

        let content = match outcome {
            RunOutcome::Success { answer, .. } => {
                format!("{} completed task: {}\nResult: {}", agent.role(), task.trim(), answer)
            }
            RunOutcome::Failure { kind, message, .. } => {
                format!("{} failed task ({kind}): {}\nReason: {}", agent.role(), task.trim(), message)
            }
        };

        match memory
            .append(MemoryEntry::new(content).with_source(agent.role()))
            .await
        {
            Ok(id) => debug!(memory_id = %id, "Saved run summary to memory"),
            Err(e) => warn!("Failed to save run summary to memory: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use crewforge_core::memory::InMemoryMemory;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn agent_with(provider: Arc<SequentialMockProvider>) -> crate::agent::AgentBuilder {
        Agent::builder("Researcher", "Answer questions", "A careful analyst.")
            .provider(provider, "mock-model")
            .retry_backoff(Duration::from_millis(10), Duration::from_millis(40))
    }

    fn echo_call(text: &str) -> crewforge_core::provider::ProviderResponse {
        make_tool_call_response("echo", serde_json::json!({ "text": text }), "Let me check")
    }

    #[tokio::test]
    async fn final_answer_in_one_step() {
        let provider = Arc::new(SequentialMockProvider::single_text("Final Answer: 42"));
        let agent = agent_with(provider.clone()).build().unwrap();

        let outcome = AgentExecutor::new().run(&agent, "What is 6 * 7?").await.unwrap();

        assert_eq!(outcome.answer(), Some("42"));
        assert_eq!(outcome.steps().len(), 1);
        assert!(matches!(
            outcome,
            RunOutcome::Success { termination: Termination::FinalAnswer, .. }
        ));
        assert_eq!(provider.call_count(), 1);
        let request = &provider.requests()[0];
        assert_eq!(request.stop, vec![OBSERVATION_STOP.to_string()]);
        assert!(request.messages[1].content.contains("What is 6 * 7?"));
    }

    #[tokio::test]
    async fn empty_task_is_rejected() {
        let provider = Arc::new(SequentialMockProvider::single_text("hi"));
        let agent = agent_with(provider.clone()).build().unwrap();
        let err = AgentExecutor::new().run(&agent, "   ").await.unwrap_err();
        assert!(err.to_string().contains("task"));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn tool_then_answer() {
        let provider = Arc::new(SequentialMockProvider::new(vec![
            echo_call("hello"),
            make_text_response("Thought: done\nFinal Answer: it said hello"),
        ]));
        let echo = Arc::new(EchoTool::new());
        let agent = agent_with(provider.clone()).tool(echo.clone()).build().unwrap();

        let outcome = AgentExecutor::new().run(&agent, "Echo hello").await.unwrap();

        assert_eq!(outcome.answer(), Some("it said hello"));
        let steps = outcome.steps();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].success_text(), Some("echo: hello"));
        assert_eq!(steps[0].thought.as_deref(), Some("Let me check"));
        assert_eq!(echo.calls.load(Ordering::SeqCst), 1);

        // The observation is shown to the model on the next iteration.
        let second = &provider.requests()[1];
        assert!(second.messages.iter().any(|m| m.content == "Observation: echo: hello"));
        assert!(second.tools.iter().any(|t| t.name == "echo"));
    }

    #[tokio::test]
    async fn iteration_cap_returns_best_effort_answer() {
        let provider = Arc::new(SequentialMockProvider::new(vec![echo_call("again")]));
        let agent = agent_with(provider.clone())
            .tool(Arc::new(EchoTool::new()))
            .max_iterations(3)
            .cache_tool_results(false)
            .build()
            .unwrap();

        let outcome = AgentExecutor::new().run(&agent, "Loop forever").await.unwrap();

        assert!(matches!(
            outcome,
            RunOutcome::Success { termination: Termination::IterationLimit, .. }
        ));
        assert_eq!(outcome.steps().len(), 3);
        assert_eq!(outcome.answer(), Some("echo: again"));
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn single_iteration_with_tool_call_succeeds() {
        let provider = Arc::new(SequentialMockProvider::new(vec![echo_call("once")]));
        let agent = agent_with(provider.clone())
            .tool(Arc::new(EchoTool::new()))
            .max_iterations(1)
            .build()
            .unwrap();

        let outcome = AgentExecutor::new().run(&agent, "Do it").await.unwrap();

        assert!(outcome.is_success());
        assert_eq!(outcome.steps().len(), 1);
        assert!(!outcome.answer().unwrap().is_empty());
    }

    #[tokio::test]
    async fn iteration_cap_without_observations_still_answers() {
        let provider = Arc::new(SequentialMockProvider::new(vec![make_tool_call_response(
            "missing",
            serde_json::json!({}),
            "",
        )]));
        let agent = agent_with(provider).max_iterations(2).build().unwrap();

        let outcome = AgentExecutor::new().run(&agent, "Try").await.unwrap();
        let answer = outcome.answer().unwrap();
        assert!(answer.contains("2 iterations"));
    }

    #[tokio::test]
    async fn unknown_tool_is_recoverable() {
        let provider = Arc::new(SequentialMockProvider::new(vec![
            make_tool_call_response("does_not_exist", serde_json::json!({}), ""),
            make_text_response("Final Answer: recovered"),
        ]));
        let agent = agent_with(provider.clone())
            .tool(Arc::new(EchoTool::new()))
            .build()
            .unwrap();

        let outcome = AgentExecutor::new().run(&agent, "Task").await.unwrap();

        assert_eq!(outcome.answer(), Some("recovered"));
        let steps = outcome.steps();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps.iter().filter(|s| s.is_error()).count(), 1);
        match &steps[0].outcome {
            StepOutcome::Error { kind, message } => {
                assert_eq!(*kind, StepErrorKind::UnknownTool);
                assert!(message.contains("Available tools: echo"));
            }
            other => panic!("expected error step, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_response_is_recoverable() {
        let provider = Arc::new(SequentialMockProvider::new(vec![
            make_text_response("Action: echo\nAction Input: {}\nFinal Answer: both"),
            make_text_response("Final Answer: fixed"),
        ]));
        let agent = agent_with(provider).tool(Arc::new(EchoTool::new())).build().unwrap();

        let outcome = AgentExecutor::new().run(&agent, "Task").await.unwrap();

        assert_eq!(outcome.answer(), Some("fixed"));
        assert!(matches!(outcome.steps()[0].action, StepAction::Malformed { .. }));
    }

    #[tokio::test]
    async fn step_indices_increase_by_one() {
        let provider = Arc::new(SequentialMockProvider::new(vec![
            echo_call("a"),
            make_tool_call_response("nope", serde_json::json!({}), ""),
            echo_call("b"),
            make_text_response("Final Answer: done"),
        ]));
        let agent = agent_with(provider).tool(Arc::new(EchoTool::new())).build().unwrap();

        let outcome = AgentExecutor::new().run(&agent, "Task").await.unwrap();
        let indices: Vec<usize> = outcome.steps().iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn result_as_answer_ends_run() {
        let provider = Arc::new(SequentialMockProvider::new(vec![echo_call("final")]));
        let mut echo = EchoTool::new();
        echo.result_as_answer = true;
        let agent = agent_with(provider.clone()).tool(Arc::new(echo)).build().unwrap();

        let outcome = AgentExecutor::new().run(&agent, "Task").await.unwrap();

        assert_eq!(outcome.answer(), Some("echo: final"));
        assert!(matches!(
            outcome,
            RunOutcome::Success { termination: Termination::ResultAsAnswer, .. }
        ));
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn repeated_tool_calls_hit_cache() {
        let provider = Arc::new(SequentialMockProvider::new(vec![
            echo_call("same"),
            echo_call("same"),
            make_text_response("Final Answer: ok"),
        ]));
        let echo = Arc::new(EchoTool::new());
        let agent = agent_with(provider).tool(echo.clone()).build().unwrap();

        let outcome = AgentExecutor::new().run(&agent, "Task").await.unwrap();

        assert_eq!(echo.calls.load(Ordering::SeqCst), 1);
        assert!(!outcome.steps()[0].from_cache);
        assert!(outcome.steps()[1].from_cache);
    }

    #[tokio::test]
    async fn stale_tool_bypasses_cache() {
        let provider = Arc::new(SequentialMockProvider::new(vec![
            echo_call("same"),
            echo_call("same"),
            make_text_response("Final Answer: ok"),
        ]));
        let mut echo = EchoTool::new();
        echo.stale = true;
        let echo = Arc::new(echo);
        let agent = agent_with(provider).tool(echo.clone()).build().unwrap();
        agent.cache().unwrap().insert("echo", &serde_json::json!({"text": "same"}), "old");

        let outcome = AgentExecutor::new().run(&agent, "Task").await.unwrap();

        assert_eq!(echo.calls.load(Ordering::SeqCst), 2);
        assert!(outcome.steps().iter().all(|s| !s.from_cache));
        assert_eq!(outcome.steps()[0].success_text(), Some("echo: same"));
        assert!(agent.cache().unwrap().is_empty());
    }

    #[tokio::test]
    async fn transient_tool_failures_are_retried() {
        let provider = Arc::new(SequentialMockProvider::new(vec![
            make_tool_call_response("flaky", serde_json::json!({}), ""),
            make_text_response("Final Answer: ok"),
        ]));
        let flaky = Arc::new(FlakyTool {
            failures: 2,
            calls: AtomicUsize::new(0),
        });
        let agent = agent_with(provider).tool(flaky.clone()).build().unwrap();

        let outcome = AgentExecutor::new().run(&agent, "Task").await.unwrap();

        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
        assert_eq!(outcome.steps()[0].success_text(), Some("stable now"));
    }

    #[tokio::test]
    async fn tool_failure_after_retries_is_an_error_step() {
        let provider = Arc::new(SequentialMockProvider::new(vec![
            make_tool_call_response("flaky", serde_json::json!({}), ""),
            make_text_response("Final Answer: gave up on the tool"),
        ]));
        let flaky = Arc::new(FlakyTool {
            failures: 10,
            calls: AtomicUsize::new(0),
        });
        let agent = agent_with(provider)
            .tool(flaky.clone())
            .max_retry_limit(1)
            .build()
            .unwrap();

        let outcome = AgentExecutor::new().run(&agent, "Task").await.unwrap();

        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
        assert!(matches!(
            outcome.steps()[0].outcome,
            StepOutcome::Error { kind: StepErrorKind::ToolError, .. }
        ));
        assert!(outcome.is_success());
    }

    #[tokio::test]
    async fn model_errors_are_retried_then_fail() {
        let provider = Arc::new(SequentialMockProvider::scripted(vec![Err(
            ProviderError::Network("connection reset".into()),
        )]));
        let agent = agent_with(provider.clone()).max_retry_limit(2).build().unwrap();

        let outcome = AgentExecutor::new().run(&agent, "Task").await.unwrap();

        assert_eq!(outcome.failure_kind(), Some(FailureKind::ModelUnavailable));
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn model_recovers_within_retry_limit() {
        let provider = Arc::new(SequentialMockProvider::scripted(vec![
            Err(ProviderError::Timeout("slow".into())),
            Ok(make_text_response("Final Answer: ok")),
        ]));
        let agent = agent_with(provider.clone()).build().unwrap();

        let outcome = AgentExecutor::new().run(&agent, "Task").await.unwrap();
        assert_eq!(outcome.answer(), Some("ok"));
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn non_retryable_model_error_fails_immediately() {
        let provider = Arc::new(SequentialMockProvider::scripted(vec![Err(
            ProviderError::AuthenticationFailed("bad key".into()),
        )]));
        let agent = agent_with(provider.clone()).build().unwrap();

        let outcome = AgentExecutor::new().run(&agent, "Task").await.unwrap();
        assert_eq!(outcome.failure_kind(), Some(FailureKind::ModelUnavailable));
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn zero_execution_time_times_out_without_model_call() {
        let provider = Arc::new(SequentialMockProvider::single_text("Final Answer: never"));
        let agent = agent_with(provider.clone())
            .max_execution_time(Duration::ZERO)
            .build()
            .unwrap();

        let outcome = AgentExecutor::new().run(&agent, "Task").await.unwrap();

        assert_eq!(outcome.failure_kind(), Some(FailureKind::Timeout));
        assert!(outcome.steps().is_empty());
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_model_times_out_with_partial_answer() {
        let provider = Arc::new(
            SequentialMockProvider::new(vec![echo_call("partial"), make_text_response("Final Answer: late")])
                .with_delay(Duration::from_secs(4)),
        );
        let agent = agent_with(provider)
            .tool(Arc::new(EchoTool::new()))
            .max_execution_time(Duration::from_secs(6))
            .build()
            .unwrap();

        let outcome = AgentExecutor::new().run(&agent, "Task").await.unwrap();

        match outcome {
            RunOutcome::Failure {
                kind: FailureKind::Timeout,
                partial_answer,
                steps,
                ..
            } => {
                assert_eq!(partial_answer.as_deref(), Some("echo: partial"));
                assert_eq!(steps.len(), 1);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_wins_over_retry_exhaustion() {
        let provider = Arc::new(
            SequentialMockProvider::scripted(vec![Err(ProviderError::Network("down".into()))])
                .with_delay(Duration::from_secs(5)),
        );
        let agent = agent_with(provider)
            .max_retry_limit(1)
            .max_execution_time(Duration::from_secs(10))
            .build()
            .unwrap();

        // Two attempts of 5s each plus backoff exhaust retries right at the deadline.
        let outcome = AgentExecutor::new().run(&agent, "Task").await.unwrap();
        assert_eq!(outcome.failure_kind(), Some(FailureKind::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn model_step_ending_at_deadline_on_last_iteration_is_timeout() {
        let provider = Arc::new(
            SequentialMockProvider::new(vec![echo_call("late")]).with_delay(Duration::from_secs(4)),
        );
        let agent = agent_with(provider)
            .tool(Arc::new(EchoTool::new()))
            .max_iterations(1)
            .max_execution_time(Duration::from_secs(4))
            .build()
            .unwrap();

        let outcome = AgentExecutor::new().run(&agent, "Task").await.unwrap();

        assert_eq!(outcome.failure_kind(), Some(FailureKind::Timeout));
        assert!(!matches!(
            outcome,
            RunOutcome::Success { termination: Termination::IterationLimit, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn tool_step_ending_at_deadline_on_last_iteration_is_timeout() {
        let provider = Arc::new(
            SequentialMockProvider::new(vec![make_tool_call_response("wait", serde_json::json!({}), "")])
                .with_delay(Duration::from_secs(2)),
        );
        let wait = crewforge_tools::FunctionTool::new("wait", "Waits two seconds", |_args| async {
            tokio::time::sleep(Duration::from_secs(2)).await;
            Ok::<_, ToolError>("done".to_string())
        });
        let agent = agent_with(provider)
            .tool(Arc::new(wait))
            .max_iterations(1)
            .max_execution_time(Duration::from_secs(4))
            .build()
            .unwrap();

        let outcome = AgentExecutor::new().run(&agent, "Task").await.unwrap();

        assert_eq!(outcome.failure_kind(), Some(FailureKind::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_ends_run() {
        let provider = Arc::new(
            SequentialMockProvider::single_text("Final Answer: late").with_delay(Duration::from_secs(30)),
        );
        let agent = agent_with(provider).build().unwrap();
        let cancel = CancellationToken::new();

        let canceller = {
            let cancel = cancel.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                cancel.cancel();
            }
        };
        let executor = AgentExecutor::new();
        let (outcome, ()) = tokio::join!(
            executor.run_with_cancellation(&agent, "Task", cancel),
            canceller
        );

        assert_eq!(outcome.unwrap().failure_kind(), Some(FailureKind::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_is_shared_across_concurrent_runs() {
        let provider = Arc::new(SequentialMockProvider::new(vec![echo_call("x")]));
        let agent = agent_with(provider.clone())
            .tool(Arc::new(EchoTool::new()))
            .max_iterations(3)
            .max_requests_per_minute(2)
            .build()
            .unwrap();
        let executor = AgentExecutor::new();
        let start = Instant::now();

        let (a, b) = tokio::join!(executor.run(&agent, "First"), executor.run(&agent, "Second"));

        assert!(a.unwrap().is_success());
        assert!(b.unwrap().is_success());
        assert_eq!(provider.call_count(), 6);
        // 6 consultations at 2 per rolling minute need at least two full windows.
        assert!(start.elapsed() >= Duration::from_secs(120));
    }

    #[tokio::test]
    async fn context_window_compacts_older_steps() {
        let long = "x".repeat(400);
        // The summarizer shares this provider, so it also gets the echo
        // response and uses its thought text as the summary.
        let provider = Arc::new(SequentialMockProvider::new(vec![echo_call(&long)]));
        let agent = agent_with(provider.clone())
            .tool(Arc::new(EchoTool::new()))
            .context_window_tokens(400)
            .max_iterations(4)
            .build()
            .unwrap();
        let executor = AgentExecutor::new();
        let mut events = executor.event_bus().subscribe();

        let outcome = executor.run(&agent, "Task").await.unwrap();

        // Compaction never drops the audit trail.
        assert_eq!(outcome.steps().len(), 4);
        let mut compacted = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event.as_ref(), DomainEvent::ContextCompacted { .. }) {
                compacted += 1;
            }
        }
        assert!(compacted >= 1);
        let last = provider.requests().last().cloned().unwrap();
        assert!(
            last.messages
                .iter()
                .any(|m| m.content.starts_with("Summary of your earlier work"))
        );
        assert!(last.messages.iter().any(|m| m.content.starts_with("Observation: echo:")));
    }

    #[tokio::test]
    async fn memory_is_recalled_and_appended() {
        let memory = Arc::new(InMemoryMemory::new());
        memory
            .append(MemoryEntry::new("The launch date is March 3"))
            .await
            .unwrap();
        let provider = Arc::new(SequentialMockProvider::single_text("Final Answer: March 3"));
        let agent = agent_with(provider.clone()).build().unwrap();
        let executor = AgentExecutor::new().with_memory(memory.clone());

        executor.run(&agent, "When is the launch date?").await.unwrap();

        let system = &provider.requests()[0].messages[0].content;
        assert!(system.contains("The launch date is March 3"));
        assert_eq!(memory.len().await, 2);
    }

    #[tokio::test]
    async fn memory_disabled_skips_recall_and_append() {
        let memory = Arc::new(InMemoryMemory::new());
        let provider = Arc::new(SequentialMockProvider::single_text("Final Answer: ok"));
        let agent = agent_with(provider).memory_enabled(false).build().unwrap();
        let executor = AgentExecutor::new().with_memory(memory.clone());

        executor.run(&agent, "Anything").await.unwrap();
        assert!(memory.is_empty().await);
    }

    #[tokio::test]
    async fn events_cover_run_lifecycle() {
        let provider = Arc::new(SequentialMockProvider::new(vec![
            echo_call("hi"),
            make_text_response("Final Answer: ok"),
        ]));
        let agent = agent_with(provider).tool(Arc::new(EchoTool::new())).build().unwrap();
        let executor = AgentExecutor::new();
        let mut rx = executor.event_bus().subscribe();

        executor.run(&agent, "Task").await.unwrap();

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(match event.as_ref() {
                DomainEvent::RunStarted { .. } => "start",
                DomainEvent::StepRecorded { .. } => "step",
                DomainEvent::ToolExecuted { .. } => "tool",
                DomainEvent::ContextCompacted { .. } => "compact",
                DomainEvent::RunFinished { .. } => "finish",
            });
        }
        assert_eq!(kinds, vec!["start", "tool", "step", "step", "finish"]);
    }

    mod delegation {
        use super::*;

        fn writer(provider: Arc<SequentialMockProvider>) -> Arc<Agent> {
            Arc::new(
                Agent::builder("Writer", "Write prose", "A wordsmith.")
                    .provider(provider, "mock-model")
                    .build()
                    .unwrap(),
            )
        }

        fn delegate_call(coworker: &str) -> crewforge_core::provider::ProviderResponse {
            make_tool_call_response(
                crate::parser::DELEGATE_WORK,
                serde_json::json!({ "coworker": coworker, "task": "Write a haiku", "context": "about Rust" }),
                "",
            )
        }

        #[tokio::test]
        async fn delegated_answer_becomes_observation() {
            let writer_provider = Arc::new(SequentialMockProvider::single_text("Final Answer: a haiku"));
            let lead_provider = Arc::new(SequentialMockProvider::new(vec![
                delegate_call("writer"),
                make_text_response("Final Answer: done"),
            ]));
            let lead = agent_with(lead_provider.clone())
                .allow_delegation(true)
                .build()
                .unwrap();
            let executor = AgentExecutor::new().with_coworkers([writer(writer_provider.clone())]);

            let outcome = executor.run(&lead, "Get a poem").await.unwrap();

            assert_eq!(outcome.answer(), Some("done"));
            assert_eq!(outcome.steps()[0].success_text(), Some("a haiku"));
            assert!(matches!(outcome.steps()[0].action, StepAction::Delegation { .. }));
            let sub_task = &writer_provider.requests()[0].messages[1].content;
            assert!(sub_task.contains("Write a haiku") && sub_task.contains("about Rust"));
            assert!(lead_provider.requests()[0].tools.iter().any(|t| t.name == "delegate_work"));
        }

        #[tokio::test]
        async fn delegation_not_allowed_is_denied() {
            let writer_provider = Arc::new(SequentialMockProvider::single_text("Final Answer: x"));
            let lead_provider = Arc::new(SequentialMockProvider::new(vec![
                delegate_call("Writer"),
                make_text_response("Final Answer: alone"),
            ]));
            let lead = agent_with(lead_provider.clone()).build().unwrap();
            let executor = AgentExecutor::new().with_coworkers([writer(writer_provider.clone())]);

            let outcome = executor.run(&lead, "Get a poem").await.unwrap();

            assert_eq!(outcome.answer(), Some("alone"));
            assert!(matches!(
                outcome.steps()[0].outcome,
                StepOutcome::Error { kind: StepErrorKind::DelegationDenied, .. }
            ));
            assert_eq!(writer_provider.call_count(), 0);
            assert!(lead_provider.requests()[0].tools.is_empty());
        }

        #[tokio::test]
        async fn unknown_coworker_is_tool_error() {
            let lead_provider = Arc::new(SequentialMockProvider::new(vec![
                delegate_call("Painter"),
                make_text_response("Final Answer: ok"),
            ]));
            let lead = agent_with(lead_provider).allow_delegation(true).build().unwrap();
            let executor = AgentExecutor::new();

            let outcome = executor.run(&lead, "Task").await.unwrap();
            match &outcome.steps()[0].outcome {
                StepOutcome::Error { kind, message } => {
                    assert_eq!(*kind, StepErrorKind::ToolError);
                    assert!(message.contains("Unknown coworker 'Painter'"));
                }
                other => panic!("expected error, got {other:?}"),
            }
        }

        #[tokio::test]
        async fn self_delegation_is_denied() {
            let lead_provider = Arc::new(SequentialMockProvider::new(vec![
                delegate_call("Researcher"),
                make_text_response("Final Answer: ok"),
            ]));
            let lead = Arc::new(agent_with(lead_provider).allow_delegation(true).build().unwrap());
            let executor = AgentExecutor::new().with_coworkers([lead.clone()]);

            let outcome = executor.run(&lead, "Task").await.unwrap();
            assert!(matches!(
                outcome.steps()[0].outcome,
                StepOutcome::Error { kind: StepErrorKind::DelegationDenied, .. }
            ));
        }

        #[tokio::test]
        async fn delegation_cycle_is_denied() {
            // Researcher -> Writer -> Researcher would loop.
            let writer_provider = Arc::new(SequentialMockProvider::new(vec![
                delegate_call("Researcher"),
                make_text_response("Final Answer: wrote it myself"),
            ]));
            let writer = Arc::new(
                Agent::builder("Writer", "Write prose", "A wordsmith.")
                    .provider(writer_provider, "mock-model")
                    .allow_delegation(true)
                    .build()
                    .unwrap(),
            );
            let lead_provider = Arc::new(SequentialMockProvider::new(vec![
                delegate_call("Writer"),
                make_text_response("Final Answer: ok"),
            ]));
            let lead = Arc::new(agent_with(lead_provider.clone()).allow_delegation(true).build().unwrap());
            let executor = AgentExecutor::new().with_coworkers([lead.clone(), writer]);

            let outcome = executor.run(&lead, "Task").await.unwrap();

            assert_eq!(outcome.steps()[0].success_text(), Some("wrote it myself"));
            assert_eq!(lead_provider.call_count(), 2);
        }

        #[tokio::test]
        async fn depth_limit_is_enforced() {
            let writer_provider = Arc::new(SequentialMockProvider::single_text("Final Answer: x"));
            let lead_provider = Arc::new(SequentialMockProvider::new(vec![
                delegate_call("Writer"),
                make_text_response("Final Answer: ok"),
            ]));
            let lead = agent_with(lead_provider).allow_delegation(true).build().unwrap();
            let executor = AgentExecutor::new()
                .with_coworkers([writer(writer_provider.clone())])
                .with_max_delegation_depth(0);

            let outcome = executor.run(&lead, "Task").await.unwrap();
            assert!(matches!(
                outcome.steps()[0].outcome,
                StepOutcome::Error { kind: StepErrorKind::DelegationDenied, .. }
            ));
            assert_eq!(writer_provider.call_count(), 0);
        }

        #[tokio::test]
        async fn failed_coworker_is_tool_error() {
            let writer_provider = Arc::new(SequentialMockProvider::scripted(vec![Err(
                ProviderError::AuthenticationFailed("no key".into()),
            )]));
            let lead_provider = Arc::new(SequentialMockProvider::new(vec![
                delegate_call("Writer"),
                make_text_response("Final Answer: ok"),
            ]));
            let lead = agent_with(lead_provider).allow_delegation(true).build().unwrap();
            let executor = AgentExecutor::new().with_coworkers([writer(writer_provider)]);

            let outcome = executor.run(&lead, "Task").await.unwrap();
            match &outcome.steps()[0].outcome {
                StepOutcome::Error { kind, message } => {
                    assert_eq!(*kind, StepErrorKind::ToolError);
                    assert!(message.contains("model_unavailable"));
                }
                other => panic!("expected error, got {other:?}"),
            }
            assert!(outcome.is_success());
        }
    }
}
