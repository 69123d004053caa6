//! LLM provider facade for the atelier engine.
//!
//! The engine never talks to a provider directly: nodes and the supervisor
//! go through [`AgentAdapter`], which handles per-agent provider
//! selection, bounded retries with exponential backoff, per-attempt
//! timeouts, cooperative cancellation, and schema-validated structured
//! output.
//!
//! Two providers ship with the crate: [`providers::OpenAiCompatModel`] for
//! any `/chat/completions`-compatible endpoint, and
//! [`providers::ScriptedModel`] for tests and offline runs. Anything else
//! plugs in by implementing [`ChatModel`].

pub mod adapter;
pub mod error;
pub mod model;
pub mod providers;
pub mod retry;
pub mod types;

pub use adapter::AgentAdapter;
pub use error::{LlmError, Result};
pub use model::ChatModel;
pub use providers::{OpenAiCompatConfig, OpenAiCompatModel, ScriptedFailure, ScriptedModel};
pub use retry::RetryPolicy;
pub use types::{
    ChatMessage, ChatRequest, ChatResponse, FinishReason, MessageRole, ToolCallRequest, ToolSpec,
    Usage,
};
