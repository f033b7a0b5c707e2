//! # crewforge core
//!
//! Domain types, traits, and error definitions for the crewforge agent
//! execution layer. This crate has no framework dependencies: it defines
//! the domain model that every other crate implements against.
//!
//! ## Design Philosophy
//!
//! Every collaborator of the agent loop is a trait here: the model
//! (`Provider`), capabilities (`Tool`), long-term `Memory` and
//! `KnowledgeSource`. Implementations live in their respective crates, so
//! tests can swap in scripted stand-ins.

pub mod error;
pub mod event;
pub mod knowledge;
pub mod memory;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, MemoryError, ProviderError, Result, ToolError};
pub use event::{DomainEvent, EventBus};
pub use knowledge::{KnowledgeSource, StaticKnowledge};
pub use memory::{InMemoryMemory, Memory, MemoryEntry};
pub use message::{Message, MessageToolCall, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, ToolDefinition, Usage};
pub use tool::{Tool, ToolRegistry};
