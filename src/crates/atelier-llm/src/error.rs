//! Error types for LLM provider implementations.

use atelier_core::ErrorKind;
use thiserror::Error;

/// Result type for LLM operations.
pub type Result<T> = std::result::Result<T, LlmError>;

/// Errors that can occur when working with LLM providers.
#[derive(Debug, Error)]
pub enum LlmError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Failed to serialize/deserialize data.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// API authentication failed.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// API key not found in environment.
    #[error("API key not found: {0}")]
    ApiKeyNotFound(String),

    /// Provider service unavailable.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Rate limit exceeded.
    #[error("rate limit exceeded: {0}")]
    RateLimited(String),

    /// Invalid request parameters.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Invalid or schema-violating response from the provider.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Request timeout.
    #[error("request timeout: {0}")]
    Timeout(String),

    /// The invocation was cancelled cooperatively.
    #[error("invocation cancelled")]
    Cancelled,

    /// General provider error.
    #[error("provider error: {0}")]
    Provider(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl LlmError {
    /// Whether this error is worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::Http(_)
                | LlmError::ServiceUnavailable(_)
                | LlmError::Timeout(_)
                | LlmError::RateLimited(_)
        )
    }

    /// Whether this error is due to authentication.
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            LlmError::Authentication(_) | LlmError::ApiKeyNotFound(_)
        )
    }

    /// Classification used for state error entries and events.
    pub fn error_kind(&self) -> ErrorKind {
        if matches!(self, LlmError::Cancelled) {
            ErrorKind::Cancelled
        } else if self.is_retryable() {
            ErrorKind::TransientLlmError
        } else {
            ErrorKind::PermanentLlmError
        }
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(err: serde_json::Error) -> Self {
        LlmError::Serialization(err.to_string())
    }
}
