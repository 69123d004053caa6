//! The agent adapter: one async facade over heterogeneous providers.
//!
//! Responsibilities:
//! - per-agent provider selection (a default model plus role overrides),
//! - retries with capped exponential backoff for transient failures,
//!   fail-fast for permanent ones,
//! - independent per-attempt timeouts,
//! - cooperative cancellation at every await,
//! - structured output: schema-constrained decoding where the provider
//!   supports it, schema validation of the reply either way.

use crate::error::{LlmError, Result};
use crate::model::ChatModel;
use crate::retry::RetryPolicy;
use crate::types::{ChatMessage, ChatRequest, ChatResponse};
use atelier_core::{AgentKind, CancellationFlag, EngineEvent, EventSink};
use jsonschema::JSONSchema;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(120);

/// Uniform async facade over the configured LLM providers.
#[derive(Clone)]
pub struct AgentAdapter {
    default_model: Arc<dyn ChatModel>,
    models: BTreeMap<String, Arc<dyn ChatModel>>,
    retry: RetryPolicy,
    attempt_timeout: Duration,
    events: Option<EventSink>,
    cancel: CancellationFlag,
}

impl AgentAdapter {
    pub fn new(default_model: Arc<dyn ChatModel>) -> Self {
        Self {
            default_model,
            models: BTreeMap::new(),
            retry: RetryPolicy::default(),
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            events: None,
            cancel: CancellationFlag::new(),
        }
    }

    /// Override the provider for one agent role (`supervisor`, `research`,
    /// ...).
    pub fn with_model(mut self, role: impl Into<String>, model: Arc<dyn ChatModel>) -> Self {
        self.models.insert(role.into(), model);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    fn model_for(&self, role: &str) -> Arc<dyn ChatModel> {
        self.models
            .get(role)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.default_model))
    }

    fn emit_thinking(&self, role: &str, message: &str) {
        if let (Some(events), Some(agent)) = (&self.events, AgentKind::parse(role)) {
            events.publish(EngineEvent::AgentThinking {
                agent,
                message: message.to_string(),
            });
        }
    }

    /// Invoke the provider configured for `role`, retrying transient
    /// failures.
    pub async fn invoke(&self, role: &str, request: ChatRequest) -> Result<ChatResponse> {
        let model = self.model_for(role);
        self.emit_thinking(role, &format!("consulting {}", model.name()));

        let mut attempts = 0usize;
        loop {
            if self.cancel.is_cancelled() {
                return Err(LlmError::Cancelled);
            }
            attempts += 1;

            let attempt = tokio::select! {
                result = tokio::time::timeout(self.attempt_timeout, model.chat(request.clone())) => {
                    match result {
                        Ok(inner) => inner,
                        Err(_) => Err(LlmError::Timeout(format!(
                            "attempt {attempts} exceeded {}s",
                            self.attempt_timeout.as_secs()
                        ))),
                    }
                }
                _ = self.cancel.cancelled() => return Err(LlmError::Cancelled),
            };

            match attempt {
                Ok(response) => {
                    debug!(
                        role,
                        model = model.name(),
                        attempts,
                        tokens = response.usage.map(|u| u.output_tokens).unwrap_or(0),
                        "invocation complete"
                    );
                    return Ok(response);
                }
                Err(e) if e.is_retryable() && self.retry.should_retry(attempts) => {
                    let delay = self.retry.calculate_delay(attempts - 1);
                    warn!(
                        role,
                        model = model.name(),
                        attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient provider failure, retrying"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.cancel.cancelled() => return Err(LlmError::Cancelled),
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Invoke with schema-constrained output and validate the reply.
    ///
    /// One corrective round trip is granted when the reply fails to parse
    /// or validate; a second failure is a permanent `InvalidResponse`.
    pub async fn invoke_structured(
        &self,
        role: &str,
        mut request: ChatRequest,
        schema: &Value,
    ) -> Result<Value> {
        let compiled = JSONSchema::compile(schema)
            .map_err(|e| LlmError::Config(format!("invalid output schema: {e}")))?;
        request.response_schema = Some(schema.clone());

        let response = self.invoke(role, request.clone()).await?;
        match decode_and_validate(&compiled, &response.content) {
            Ok(value) => Ok(value),
            Err(first_failure) => {
                debug!(role, error = %first_failure, "structured reply invalid, issuing corrective turn");
                request.push_message(ChatMessage::assistant(response.content));
                request.push_message(ChatMessage::user(format!(
                    "That reply was not valid for the required JSON schema ({first_failure}). \
                     Answer again with a single JSON object only."
                )));
                let retry = self.invoke(role, request).await?;
                decode_and_validate(&compiled, &retry.content)
            }
        }
    }
}

/// Parse model output as JSON (tolerating markdown fences) and validate it.
fn decode_and_validate(schema: &JSONSchema, content: &str) -> Result<Value> {
    let value = extract_json(content)?;
    let errors: Vec<String> = match schema.validate(&value) {
        Ok(()) => Vec::new(),
        Err(errors) => errors.map(|e| e.to_string()).collect(),
    };
    if errors.is_empty() {
        Ok(value)
    } else {
        Err(LlmError::InvalidResponse(errors.join("; ")))
    }
}

/// Pull a JSON object out of model text, stripping code fences if present.
fn extract_json(content: &str) -> Result<Value> {
    let trimmed = content.trim();

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }

    // ```json ... ``` fences.
    if let Some(stripped) = trimmed.strip_prefix("```") {
        let body = stripped
            .trim_start_matches(|c: char| c.is_ascii_alphanumeric())
            .trim_start();
        if let Some(end) = body.rfind("```") {
            if let Ok(value) = serde_json::from_str::<Value>(body[..end].trim()) {
                return Ok(value);
            }
        }
    }

    // Last resort: the outermost brace span.
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(value) = serde_json::from_str::<Value>(&trimmed[start..=end]) {
                return Ok(value);
            }
        }
    }

    let snippet: String = trimmed.chars().take(120).collect();
    Err(LlmError::InvalidResponse(format!(
        "no JSON object found in reply: {snippet}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{ScriptedFailure, ScriptedModel};
    use serde_json::json;

    fn decision_schema() -> Value {
        json!({
            "type": "object",
            "required": ["action"],
            "properties": {
                "action": { "type": "string" }
            }
        })
    }

    #[tokio::test]
    async fn test_invoke_uses_role_override() {
        let fallback = Arc::new(ScriptedModel::new(vec![ChatResponse::text("default")]));
        let special = Arc::new(ScriptedModel::new(vec![ChatResponse::text("special")]));
        let adapter = AgentAdapter::new(fallback).with_model("supervisor", special);

        let response = adapter
            .invoke("supervisor", ChatRequest::from_prompt("s", "u"))
            .await
            .unwrap();
        assert_eq!(response.content, "special");

        let response = adapter
            .invoke("research", ChatRequest::from_prompt("s", "u"))
            .await
            .unwrap();
        assert_eq!(response.content, "default");
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let model = Arc::new(
            ScriptedModel::new(vec![ChatResponse::text("recovered")])
                .with_leading_failures(2),
        );
        let adapter = AgentAdapter::new(model).with_retry_policy(
            RetryPolicy::new(3)
                .with_initial_interval(0.001)
                .with_jitter(false),
        );

        let response = adapter
            .invoke("research", ChatRequest::from_prompt("s", "u"))
            .await
            .unwrap();
        assert_eq!(response.content, "recovered");
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let model = Arc::new(
            ScriptedModel::new(vec![ChatResponse::text("never")]).with_leading_failures(10),
        );
        let adapter = AgentAdapter::new(model).with_retry_policy(
            RetryPolicy::new(2)
                .with_initial_interval(0.001)
                .with_jitter(false),
        );

        let err = adapter
            .invoke("research", ChatRequest::from_prompt("s", "u"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_permanent_errors_fail_fast() {
        let model = Arc::new(ScriptedModel::failing(ScriptedFailure::Auth));
        let adapter = AgentAdapter::new(model);

        let err = adapter
            .invoke("research", ChatRequest::from_prompt("s", "u"))
            .await
            .unwrap_err();
        assert!(err.is_auth_error());
    }

    #[tokio::test]
    async fn test_invoke_structured_accepts_valid_json() {
        let model = Arc::new(ScriptedModel::new(vec![ChatResponse::text(
            r#"{"action": "continue"}"#,
        )]));
        let adapter = AgentAdapter::new(model);

        let value = adapter
            .invoke_structured(
                "supervisor",
                ChatRequest::from_prompt("s", "u"),
                &decision_schema(),
            )
            .await
            .unwrap();
        assert_eq!(value["action"], "continue");
    }

    #[tokio::test]
    async fn test_invoke_structured_corrective_retry() {
        let model = Arc::new(ScriptedModel::new(vec![
            ChatResponse::text("definitely not json"),
            ChatResponse::text(r#"```json
{"action": "finish"}
```"#),
        ]));
        let adapter = AgentAdapter::new(model);

        let value = adapter
            .invoke_structured(
                "supervisor",
                ChatRequest::from_prompt("s", "u"),
                &decision_schema(),
            )
            .await
            .unwrap();
        assert_eq!(value["action"], "finish");
    }

    #[tokio::test]
    async fn test_invoke_structured_rejects_schema_violation_twice() {
        let model = Arc::new(ScriptedModel::new(vec![
            ChatResponse::text(r#"{"wrong": 1}"#),
            ChatResponse::text(r#"{"still_wrong": 2}"#),
        ]));
        let adapter = AgentAdapter::new(model);

        let err = adapter
            .invoke_structured(
                "supervisor",
                ChatRequest::from_prompt("s", "u"),
                &decision_schema(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_cancelled_adapter_refuses_invocation() {
        let cancel = CancellationFlag::new();
        cancel.cancel();
        let model = Arc::new(ScriptedModel::new(vec![ChatResponse::text("x")]));
        let adapter = AgentAdapter::new(model).with_cancellation(cancel);

        let err = adapter
            .invoke("research", ChatRequest::from_prompt("s", "u"))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Cancelled));
    }

    #[test]
    fn test_extract_json_variants() {
        assert!(extract_json(r#"{"a": 1}"#).is_ok());
        assert!(extract_json("```json\n{\"a\": 1}\n```").is_ok());
        assert!(extract_json("Here you go: {\"a\": 1} hope that helps").is_ok());
        assert!(extract_json("no json here").is_err());
    }
}
