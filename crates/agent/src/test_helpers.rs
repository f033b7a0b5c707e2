//! Shared test helpers for executor tests.

use crewforge_core::error::{ProviderError, ToolError};
use crewforge_core::message::{Message, MessageToolCall};
use crewforge_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use crewforge_core::tool::Tool;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// A mock provider that returns a sequence of scripted responses.
///
/// Each call to `complete` returns the next entry in the queue; once the
/// queue is exhausted the last entry repeats. Every request is recorded.
pub struct SequentialMockProvider {
    responses: Vec<Result<ProviderResponse, ProviderError>>,
    call_count: AtomicUsize,
    requests: Mutex<Vec<ProviderRequest>>,
    delay: Option<Duration>,
}

impl SequentialMockProvider {
    pub fn new(responses: Vec<ProviderResponse>) -> Self {
        Self::scripted(responses.into_iter().map(Ok).collect())
    }

    pub fn scripted(responses: Vec<Result<ProviderResponse, ProviderError>>) -> Self {
        Self {
            responses,
            call_count: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Create a provider that always returns the same text.
    pub fn single_text(text: &str) -> Self {
        Self::new(vec![make_text_response(text)])
    }

    /// Sleep this long inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Provider for SequentialMockProvider {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let n = self.call_count.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let index = n.min(self.responses.len().saturating_sub(1));
        match self.responses.get(index) {
            Some(response) => response.clone(),
            None => panic!("SequentialMockProvider: no responses scripted"),
        }
    }
}

/// Create a simple text response (no tool calls).
pub fn make_text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock-model".into(),
    }
}

/// Create a response with a native tool call and optional thought content.
pub fn make_tool_call_response(name: &str, args: serde_json::Value, thought: &str) -> ProviderResponse {
    let mut msg = Message::assistant(thought);
    msg.tool_calls = vec![MessageToolCall {
        id: format!("call_{name}"),
        name: name.to_string(),
        arguments: serde_json::to_string(&args).unwrap(),
    }];
    ProviderResponse {
        message: msg,
        usage: None,
        model: "mock-model".into(),
    }
}

/// A tool that echoes its `text` argument and counts invocations.
pub struct EchoTool {
    pub calls: AtomicUsize,
    pub result_as_answer: bool,
    pub stale: bool,
}

impl EchoTool {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            result_as_answer: false,
            stale: false,
        }
    }
}

#[async_trait::async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echoes back the text argument"
    }

    fn result_as_answer(&self) -> bool {
        self.result_as_answer
    }

    fn results_stale(&self) -> bool {
        self.stale
    }

    async fn invoke(&self, arguments: serde_json::Value) -> Result<String, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("echo: {}", arguments["text"].as_str().unwrap_or("")))
    }
}

/// A tool that fails transiently a fixed number of times, then succeeds.
pub struct FlakyTool {
    pub failures: usize,
    pub calls: AtomicUsize,
}

#[async_trait::async_trait]
impl Tool for FlakyTool {
    fn name(&self) -> &str {
        "flaky"
    }

    fn description(&self) -> &str {
        "Fails a few times before succeeding"
    }

    async fn invoke(&self, _arguments: serde_json::Value) -> Result<String, ToolError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            Err(ToolError::ExecutionFailed {
                tool_name: "flaky".into(),
                reason: format!("attempt {n} failed"),
            })
        } else {
            Ok("stable now".into())
        }
    }
}
