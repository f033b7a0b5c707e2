//! Agent definition and builder.
//!
//! An [`Agent`] is immutable once built. Everything that may be shared
//! between its concurrent runs (the rate limiter, the tool-result cache)
//! lives behind an `Arc` inside it.

use crewforge_core::error::{Error, Result};
use crewforge_core::knowledge::KnowledgeSource;
use crewforge_core::provider::{Provider, default_temperature};
use crewforge_core::tool::{Tool, ToolRegistry};
use crewforge_tools::{CodeExecutionMode, CodeExecutionTool, CodeSandbox};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::ToolResultCache;
use crate::rate_limit::RateLimiter;
use crate::retry::RetryPolicy;

pub const DEFAULT_MAX_ITERATIONS: u32 = 20;
pub const DEFAULT_MAX_RETRY_LIMIT: u32 = 2;
pub const DEFAULT_CONTEXT_WINDOW_TOKENS: usize = 8192;
const DEFAULT_CODE_TIMEOUT: Duration = Duration::from_secs(30);

/// A configured autonomous reasoning unit.
pub struct Agent {
    role: String,
    goal: String,
    backstory: String,

    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,

    max_iterations: u32,
    max_requests_per_minute: Option<u32>,
    max_execution_time: Option<Duration>,
    retry: RetryPolicy,

    memory_enabled: bool,
    allow_delegation: bool,
    allow_code_execution: bool,
    code_execution_mode: CodeExecutionMode,
    respect_context_window: bool,
    context_window_tokens: usize,

    tools: ToolRegistry,
    knowledge: Vec<Arc<dyn KnowledgeSource>>,

    rate_limiter: Option<Arc<RateLimiter>>,
    cache: Option<Arc<ToolResultCache>>,
}

impl Agent {
    pub fn builder(
        role: impl Into<String>,
        goal: impl Into<String>,
        backstory: impl Into<String>,
    ) -> AgentBuilder {
        AgentBuilder::new(role, goal, backstory)
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn goal(&self) -> &str {
        &self.goal
    }

    pub fn backstory(&self) -> &str {
        &self.backstory
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    pub fn max_tokens(&self) -> Option<u32> {
        self.max_tokens
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    pub fn max_requests_per_minute(&self) -> Option<u32> {
        self.max_requests_per_minute
    }

    pub fn max_execution_time(&self) -> Option<Duration> {
        self.max_execution_time
    }

    pub fn max_retry_limit(&self) -> u32 {
        self.retry.max_retries
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub fn memory_enabled(&self) -> bool {
        self.memory_enabled
    }

    pub fn allow_delegation(&self) -> bool {
        self.allow_delegation
    }

    pub fn allow_code_execution(&self) -> bool {
        self.allow_code_execution
    }

    pub fn code_execution_mode(&self) -> CodeExecutionMode {
        self.code_execution_mode
    }

    pub fn respect_context_window(&self) -> bool {
        self.respect_context_window
    }

    pub fn context_window_tokens(&self) -> usize {
        self.context_window_tokens
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn knowledge(&self) -> &[Arc<dyn KnowledgeSource>] {
        &self.knowledge
    }

    /// The limiter shared by every run of this agent, if rate-limited.
    pub fn rate_limiter(&self) -> Option<&Arc<RateLimiter>> {
        self.rate_limiter.as_ref()
    }

    pub(crate) fn cache(&self) -> Option<&ToolResultCache> {
        self.cache.as_deref()
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("role", &self.role)
            .field("model", &self.model)
            .field("provider", &self.provider.name())
            .field("max_iterations", &self.max_iterations)
            .field("max_requests_per_minute", &self.max_requests_per_minute)
            .field("max_execution_time", &self.max_execution_time)
            .field("tools", &self.tools)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Agent`]. Validation happens in [`AgentBuilder::build`].
pub struct AgentBuilder {
    role: String,
    goal: String,
    backstory: String,
    provider: Option<Arc<dyn Provider>>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    max_iterations: u32,
    max_requests_per_minute: Option<u32>,
    max_execution_time: Option<Duration>,
    retry: RetryPolicy,
    memory_enabled: bool,
    allow_delegation: bool,
    allow_code_execution: bool,
    code_execution_mode: CodeExecutionMode,
    code_sandbox: Option<Arc<dyn CodeSandbox>>,
    respect_context_window: bool,
    cache_tool_results: bool,
    context_window_tokens: usize,
    tools: Vec<Arc<dyn Tool>>,
    knowledge: Vec<Arc<dyn KnowledgeSource>>,
}

impl AgentBuilder {
    pub fn new(
        role: impl Into<String>,
        goal: impl Into<String>,
        backstory: impl Into<String>,
    ) -> Self {
        Self {
            role: role.into(),
            goal: goal.into(),
            backstory: backstory.into(),
            provider: None,
            model: String::new(),
            temperature: default_temperature(),
            max_tokens: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_requests_per_minute: None,
            max_execution_time: None,
            retry: RetryPolicy::new(DEFAULT_MAX_RETRY_LIMIT),
            memory_enabled: true,
            allow_delegation: false,
            allow_code_execution: false,
            code_execution_mode: CodeExecutionMode::Safe,
            code_sandbox: None,
            respect_context_window: true,
            cache_tool_results: true,
            context_window_tokens: DEFAULT_CONTEXT_WINDOW_TOKENS,
            tools: Vec::new(),
            knowledge: Vec::new(),
        }
    }

    /// Set the model capability and the model name sent with each request.
    pub fn provider(mut self, provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        self.provider = Some(provider);
        self.model = model.into();
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn max_requests_per_minute(mut self, rpm: u32) -> Self {
        self.max_requests_per_minute = Some(rpm);
        self
    }

    /// Wall-clock budget for one run. Zero times out before the first
    /// model call.
    pub fn max_execution_time(mut self, limit: Duration) -> Self {
        self.max_execution_time = Some(limit);
        self
    }

    pub fn max_retry_limit(mut self, retries: u32) -> Self {
        self.retry.max_retries = retries;
        self
    }

    /// Override the backoff between retries.
    pub fn retry_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.retry = self.retry.with_backoff(initial, max);
        self
    }

    pub fn memory_enabled(mut self, enabled: bool) -> Self {
        self.memory_enabled = enabled;
        self
    }

    pub fn allow_delegation(mut self, allowed: bool) -> Self {
        self.allow_delegation = allowed;
        self
    }

    pub fn allow_code_execution(mut self, allowed: bool) -> Self {
        self.allow_code_execution = allowed;
        self
    }

    pub fn code_execution_mode(mut self, mode: CodeExecutionMode) -> Self {
        self.code_execution_mode = mode;
        self
    }

    /// Sandbox used when code execution runs in safe mode.
    pub fn code_sandbox(mut self, sandbox: Arc<dyn CodeSandbox>) -> Self {
        self.code_sandbox = Some(sandbox);
        self
    }

    pub fn respect_context_window(mut self, enabled: bool) -> Self {
        self.respect_context_window = enabled;
        self
    }

    pub fn cache_tool_results(mut self, enabled: bool) -> Self {
        self.cache_tool_results = enabled;
        self
    }

    pub fn context_window_tokens(mut self, tokens: usize) -> Self {
        self.context_window_tokens = tokens;
        self
    }

    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn tools(mut self, tools: impl IntoIterator<Item = Arc<dyn Tool>>) -> Self {
        self.tools.extend(tools);
        self
    }

    pub fn knowledge(mut self, source: Arc<dyn KnowledgeSource>) -> Self {
        self.knowledge.push(source);
        self
    }

    pub fn build(self) -> Result<Agent> {
        for (field, value) in [
            ("role", &self.role),
            ("goal", &self.goal),
            ("backstory", &self.backstory),
        ] {
            if value.trim().is_empty() {
                return Err(Error::config(format!("agent {field} must not be empty")));
            }
        }
        let provider = self
            .provider
            .ok_or_else(|| Error::config(format!("agent '{}' has no model provider", self.role)))?;
        if self.max_iterations == 0 {
            return Err(Error::config("max_iterations must be at least 1"));
        }
        if self.max_requests_per_minute == Some(0) {
            return Err(Error::config("max_requests_per_minute must be at least 1"));
        }
        if self.context_window_tokens == 0 {
            return Err(Error::config("context_window_tokens must be at least 1"));
        }

        let mut tools = ToolRegistry::new();
        for tool in self.tools {
            tools.try_register(tool)?;
        }

        if self.allow_code_execution {
            let tool = match self.code_execution_mode {
                CodeExecutionMode::Safe => {
                    let sandbox = self.code_sandbox.ok_or_else(|| {
                        Error::config("safe code execution requires a code sandbox")
                    })?;
                    CodeExecutionTool::sandboxed(sandbox)
                }
                CodeExecutionMode::Unsafe => {
                    tracing::warn!(role = %self.role, "Code execution enabled without a sandbox");
                    CodeExecutionTool::direct(DEFAULT_CODE_TIMEOUT)
                }
            };
            tools.try_register(Arc::new(tool))?;
        }

        Ok(Agent {
            role: self.role.trim().to_string(),
            goal: self.goal,
            backstory: self.backstory,
            provider,
            model: self.model,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            max_iterations: self.max_iterations,
            max_requests_per_minute: self.max_requests_per_minute,
            max_execution_time: self.max_execution_time,
            retry: self.retry,
            memory_enabled: self.memory_enabled,
            allow_delegation: self.allow_delegation,
            allow_code_execution: self.allow_code_execution,
            code_execution_mode: self.code_execution_mode,
            respect_context_window: self.respect_context_window,
            context_window_tokens: self.context_window_tokens,
            tools,
            knowledge: self.knowledge,
            rate_limiter: self
                .max_requests_per_minute
                .map(|rpm| Arc::new(RateLimiter::per_minute(rpm))),
            cache: self
                .cache_tool_results
                .then(|| Arc::new(ToolResultCache::new())),
        })
    }
}
