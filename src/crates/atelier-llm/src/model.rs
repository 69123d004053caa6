//! The provider trait.
//!
//! The engine is an orchestration framework, not an LLM client library:
//! the core exposes this trait and the adapter on top of it, and concrete
//! providers (the bundled OpenAI-compatible client, the scripted model, or
//! anything downstream) implement it.

use crate::error::Result;
use crate::types::{ChatRequest, ChatResponse};
use async_trait::async_trait;

/// Core trait for chat-based language models.
///
/// Implementations must be `Send + Sync`; the adapter shares them as
/// `Arc<dyn ChatModel>` across agent roles and workflows.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Generate a complete response for one request.
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse>;

    /// Provider name, used in logs and diagnostics.
    fn name(&self) -> &str;

    /// Whether the provider supports schema-constrained JSON output
    /// natively. When it does not, the adapter enforces the text-protocol
    /// convention and validates the reply itself.
    fn supports_structured_output(&self) -> bool {
        false
    }
}
