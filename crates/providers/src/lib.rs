//! Model provider implementations for crewforge.
//!
//! All providers implement the `crewforge_core::provider::Provider` trait.
//! The agent loop only ever sees that trait; the CLI picks the concrete
//! provider from configuration.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatProvider;
