//! Deterministic scripted provider.
//!
//! Replays a fixed queue of canned responses. Used by the scenario tests
//! and by offline smoke runs; also the fallback provider when no real one
//! is configured.

use crate::error::{LlmError, Result};
use crate::model::ChatModel;
use crate::types::{ChatRequest, ChatResponse};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Failure mode for a scripted model built with [`ScriptedModel::failing`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedFailure {
    /// Retryable service failure.
    Transient,
    /// Permanent authentication failure.
    Auth,
}

/// A provider that replays canned responses in order.
pub struct ScriptedModel {
    responses: Mutex<VecDeque<ChatResponse>>,
    cycle: bool,
    leading_failures: AtomicUsize,
    always_fail: Option<ScriptedFailure>,
    calls: AtomicUsize,
}

impl ScriptedModel {
    /// Replay these responses once, in order; an exhausted script is a
    /// provider error.
    pub fn new(responses: Vec<ChatResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            cycle: false,
            leading_failures: AtomicUsize::new(0),
            always_fail: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Replay these responses in a loop, never exhausting.
    pub fn looping(responses: Vec<ChatResponse>) -> Self {
        Self {
            cycle: true,
            ..Self::new(responses)
        }
    }

    /// A model that fails every call with the given failure mode.
    pub fn failing(mode: ScriptedFailure) -> Self {
        Self {
            always_fail: Some(mode),
            ..Self::new(Vec::new())
        }
    }

    /// Fail the first `n` calls with a transient error before the script
    /// starts answering.
    pub fn with_leading_failures(self, n: usize) -> Self {
        self.leading_failures.store(n, Ordering::SeqCst);
        self
    }

    /// How many times `chat` has been called.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn chat(&self, _request: ChatRequest) -> Result<ChatResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(mode) = self.always_fail {
            return Err(match mode {
                ScriptedFailure::Transient => {
                    LlmError::ServiceUnavailable("scripted failure".to_string())
                }
                ScriptedFailure::Auth => LlmError::Authentication("scripted failure".to_string()),
            });
        }

        let remaining = self.leading_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.leading_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(LlmError::ServiceUnavailable(
                "scripted transient failure".to_string(),
            ));
        }

        let mut responses = self.responses.lock().expect("script queue poisoned");
        match responses.pop_front() {
            Some(response) => {
                if self.cycle {
                    responses.push_back(response.clone());
                }
                Ok(response)
            }
            None => Err(LlmError::Provider("script exhausted".to_string())),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }

    fn supports_structured_output(&self) -> bool {
        // The canned replies are authored against the schema already.
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replays_in_order_then_exhausts() {
        let model = ScriptedModel::new(vec![
            ChatResponse::text("one"),
            ChatResponse::text("two"),
        ]);
        let request = ChatRequest::from_prompt("s", "u");

        assert_eq!(model.chat(request.clone()).await.unwrap().content, "one");
        assert_eq!(model.chat(request.clone()).await.unwrap().content, "two");
        assert!(model.chat(request).await.is_err());
        assert_eq!(model.call_count(), 3);
    }

    #[tokio::test]
    async fn test_looping_never_exhausts() {
        let model = ScriptedModel::looping(vec![ChatResponse::text("again")]);
        let request = ChatRequest::from_prompt("s", "u");

        for _ in 0..5 {
            assert_eq!(model.chat(request.clone()).await.unwrap().content, "again");
        }
    }

    #[tokio::test]
    async fn test_leading_failures_then_success() {
        let model =
            ScriptedModel::new(vec![ChatResponse::text("ok")]).with_leading_failures(1);
        let request = ChatRequest::from_prompt("s", "u");

        assert!(model.chat(request.clone()).await.unwrap_err().is_retryable());
        assert_eq!(model.chat(request).await.unwrap().content, "ok");
    }
}
