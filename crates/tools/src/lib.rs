//! Local tool implementations for crewforge.
//!
//! Local tools run in-process and satisfy the same `Tool` contract as
//! tools proxied from an MCP server:
//! - [`FunctionTool`] wraps an async closure
//! - [`CodeExecutionTool`] runs model-written code, either through a
//!   [`CodeSandbox`] or directly on the host

pub mod code_execution;
pub mod function;

pub use code_execution::{CodeExecutionMode, CodeExecutionTool, CodeSandbox};
pub use function::FunctionTool;
