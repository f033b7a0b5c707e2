//! Tool trait — the abstraction over agent capabilities.
//!
//! Tools are what give the agent the ability to act in the world. A tool
//! may be backed by an in-process function or proxied from an external
//! tool server; both satisfy the same trait and callers cannot tell them
//! apart.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use crate::error::{Error, ToolError};
use crate::provider::ToolDefinition;

/// The core Tool trait.
///
/// Tools are registered in a [`ToolRegistry`] and made available to the
/// agent loop, which looks them up by the name the model asked for.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "web_search").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    /// Invoke the tool and return its text result.
    async fn invoke(&self, arguments: serde_json::Value) -> std::result::Result<String, ToolError>;

    /// Whether a successful result of this tool is the final answer of the run.
    fn result_as_answer(&self) -> bool {
        false
    }

    /// Whether earlier results may no longer hold, e.g. because the server
    /// behind the tool announced a change. Cached results are not reused
    /// while this is true.
    fn results_stale(&self) -> bool {
        false
    }

    /// Convert this tool into a ToolDefinition for sending to the model.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// An ordered registry of available tools.
///
/// The agent loop uses this to:
/// 1. Get tool definitions to describe to the model
/// 2. Look up and invoke tools when the model requests them
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Replaces any existing tool with the same name,
    /// keeping its position.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        match self.index.get(&name) {
            Some(&slot) => self.tools[slot] = tool,
            None => {
                self.index.insert(name, self.tools.len());
                self.tools.push(tool);
            }
        }
    }

    /// Register a tool, rejecting a name that is already taken.
    pub fn try_register(&mut self, tool: Arc<dyn Tool>) -> Result<(), Error> {
        if self.index.contains_key(tool.name()) {
            return Err(Error::config(format!(
                "duplicate tool name '{}'",
                tool.name()
            )));
        }
        self.register(tool);
        Ok(())
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.index.get(name).map(|&slot| Arc::clone(&self.tools[slot]))
    }

    /// Get all tool definitions in registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.to_definition()).collect()
    }

    /// Invoke a tool by name.
    pub async fn invoke(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> std::result::Result<String, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        tool.invoke(arguments).await
    }

    /// List all registered tool names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// Iterate over the registered tools in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Tool>> {
        self.tools.iter()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
