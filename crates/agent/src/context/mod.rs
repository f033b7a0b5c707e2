//! Context-window tracking for a run.
//!
//! The prompt grows by one step per iteration. Before it would overflow
//! the agent's window, older steps are folded into a running summary; the
//! most recent step is always kept verbatim.

pub mod token;
pub mod window;

pub use token::{estimate_message_tokens, estimate_messages_tokens, estimate_tokens};
pub use window::{Compaction, ContextWindowManager, ProviderSummarizer, Summarizer};
