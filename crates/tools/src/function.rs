//! Function tool — a tool backed by an in-process async closure.

use async_trait::async_trait;
use crewforge_core::error::ToolError;
use crewforge_core::tool::Tool;
use futures::future::BoxFuture;
use std::sync::Arc;

type Handler =
    Arc<dyn Fn(serde_json::Value) -> BoxFuture<'static, Result<String, ToolError>> + Send + Sync>;

/// A local tool whose behavior is an async function of its JSON arguments.
#[derive(Clone)]
pub struct FunctionTool {
    name: String,
    description: String,
    parameters: serde_json::Value,
    result_as_answer: bool,
    handler: Handler,
}

impl FunctionTool {
    pub fn new<F, Fut>(name: impl Into<String>, description: impl Into<String>, handler: F) -> Self
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<String, ToolError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: serde_json::json!({ "type": "object", "properties": {} }),
            result_as_answer: false,
            handler: Arc::new(move |args| Box::pin(handler(args))),
        }
    }

    /// Set the JSON Schema of the arguments.
    pub fn with_parameters(mut self, schema: serde_json::Value) -> Self {
        self.parameters = schema;
        self
    }

    /// Make a successful result end the run as its final answer.
    pub fn with_result_as_answer(mut self, enabled: bool) -> Self {
        self.result_as_answer = enabled;
        self
    }
}

impl std::fmt::Debug for FunctionTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionTool")
            .field("name", &self.name)
            .field("result_as_answer", &self.result_as_answer)
            .finish()
    }
}

#[async_trait]
impl Tool for FunctionTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> serde_json::Value {
        self.parameters.clone()
    }

    fn result_as_answer(&self) -> bool {
        self.result_as_answer
    }

    async fn invoke(&self, arguments: serde_json::Value) -> Result<String, ToolError> {
        (self.handler)(arguments).await
    }
}
