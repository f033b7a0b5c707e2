//! Code execution tool — lets the agent run code it wrote.
//!
//! The agent never executes code itself; it only decides whether this
//! capability is offered. In safe mode every snippet goes to an isolated
//! [`CodeSandbox`] supplied by the host. In unsafe mode the snippet runs
//! directly through a local interpreter.

use async_trait::async_trait;
use crewforge_core::error::ToolError;
use crewforge_core::tool::Tool;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

pub const TOOL_NAME: &str = "code_interpreter";

/// Where model-written code runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeExecutionMode {
    /// Through an isolated sandbox
    #[default]
    Safe,
    /// Directly on the host
    Unsafe,
}

/// An isolated execution environment (container, VM, remote runner).
#[async_trait]
pub trait CodeSandbox: Send + Sync {
    fn name(&self) -> &str;

    /// Run `code` written in `language` and return its combined output.
    async fn execute(&self, language: &str, code: &str) -> Result<String, ToolError>;
}

enum Backend {
    Sandbox(Arc<dyn CodeSandbox>),
    Direct { timeout: Duration },
}

/// Runs code snippets for the agent.
pub struct CodeExecutionTool {
    backend: Backend,
}

impl CodeExecutionTool {
    /// Route execution through `sandbox`.
    pub fn sandboxed(sandbox: Arc<dyn CodeSandbox>) -> Self {
        Self {
            backend: Backend::Sandbox(sandbox),
        }
    }

    /// Run snippets directly on the host, each bounded by `timeout`.
    pub fn direct(timeout: Duration) -> Self {
        Self {
            backend: Backend::Direct { timeout },
        }
    }

    pub fn mode(&self) -> CodeExecutionMode {
        match self.backend {
            Backend::Sandbox(_) => CodeExecutionMode::Safe,
            Backend::Direct { .. } => CodeExecutionMode::Unsafe,
        }
    }

    fn interpreter(language: &str) -> Option<(&'static str, &'static str)> {
        match language.to_ascii_lowercase().as_str() {
            "python" | "python3" | "py" => Some(("python3", "-c")),
            "sh" | "shell" | "bash" => Some(("sh", "-c")),
            "javascript" | "js" | "node" => Some(("node", "-e")),
            _ => None,
        }
    }

    async fn run_direct(&self, language: &str, code: &str, timeout: Duration) -> Result<String, ToolError> {
        let (program, flag) = Self::interpreter(language).ok_or_else(|| {
            ToolError::InvalidArguments(format!("Unsupported language '{language}'"))
        })?;

        debug!(language, program, "Executing code directly");

        let mut command = Command::new(program);
        command.args([flag, code]).kill_on_drop(true);

        let output = match tokio::time::timeout(timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(ToolError::ExecutionFailed {
                    tool_name: TOOL_NAME.into(),
                    reason: format!("failed to start {program}: {e}"),
                });
            }
            Err(_) => {
                return Err(ToolError::Timeout {
                    tool_name: TOOL_NAME.into(),
                    timeout_secs: timeout.as_secs(),
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        let text = if output.status.success() {
            if stderr.is_empty() {
                stdout
            } else {
                format!("{stdout}\n[stderr]: {stderr}")
            }
        } else {
            let code = output.status.code().unwrap_or(-1);
            warn!(language, exit_code = code, "Code execution failed");
            format!("[exit code: {code}]\n{stdout}\n{stderr}")
        };
        Ok(text.trim().to_string())
    }
}

#[async_trait]
impl Tool for CodeExecutionTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "Execute a code snippet and return its output. Supported languages: python, sh, javascript."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "language": {
                    "type": "string",
                    "description": "The language of the snippet (python, sh, javascript)"
                },
                "code": {
                    "type": "string",
                    "description": "The code to execute"
                }
            },
            "required": ["code"]
        })
    }

    async fn invoke(&self, arguments: serde_json::Value) -> Result<String, ToolError> {
        let code = arguments["code"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'code' argument".into()))?;
        let language = arguments["language"].as_str().unwrap_or("python");

        match &self.backend {
            Backend::Sandbox(sandbox) => {
                debug!(language, sandbox = sandbox.name(), "Executing code in sandbox");
                sandbox.execute(language, code).await
            }
            Backend::Direct { timeout } => self.run_direct(language, code, *timeout).await,
        }
    }
}
