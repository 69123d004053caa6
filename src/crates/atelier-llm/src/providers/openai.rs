//! OpenAI-compatible chat-completions client.
//!
//! Works against any endpoint speaking the `/chat/completions` dialect
//! (OpenAI itself, most local inference servers, gateway proxies). Native
//! tool calling and `response_format` JSON-schema output are used when the
//! request asks for them.

use crate::error::{LlmError, Result};
use crate::model::ChatModel;
use crate::types::{
    ChatRequest, ChatResponse, FinishReason, MessageRole, ToolCallRequest, Usage,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Client configuration.
#[derive(Debug, Clone)]
pub struct OpenAiCompatConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
}

impl OpenAiCompatConfig {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Read the API key from an environment variable.
    pub fn from_env(
        key_var: &str,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self> {
        let api_key = std::env::var(key_var)
            .map_err(|_| LlmError::ApiKeyNotFound(key_var.to_string()))?;
        Ok(Self::new(base_url, api_key, model))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// OpenAI-compatible API client.
#[derive(Clone)]
pub struct OpenAiCompatModel {
    config: OpenAiCompatConfig,
    client: Client,
}

impl OpenAiCompatModel {
    pub fn new(config: OpenAiCompatConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Config(format!("HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    fn build_body(&self, request: &ChatRequest) -> Value {
        let messages: Vec<Value> = request
            .messages
            .iter()
            .map(|m| {
                json!({
                    "role": match m.role {
                        MessageRole::System => "system",
                        MessageRole::User => "user",
                        MessageRole::Assistant => "assistant",
                        MessageRole::Tool => "tool",
                    },
                    "content": m.content,
                })
            })
            .collect();

        let mut body = json!({
            "model": self.config.model,
            "messages": messages,
        });

        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if !request.tools.is_empty() {
            body["tools"] = Value::Array(
                request
                    .tools
                    .iter()
                    .map(|t| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": t.name,
                                "description": t.description,
                                "parameters": t.input_schema,
                            }
                        })
                    })
                    .collect(),
            );
        }
        if let Some(schema) = &request.response_schema {
            body["response_format"] = json!({
                "type": "json_schema",
                "json_schema": {
                    "name": "response",
                    "schema": schema,
                    "strict": true,
                }
            });
        }

        body
    }
}

#[async_trait]
impl ChatModel for OpenAiCompatModel {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let body = self.build_body(&request);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let snippet = text.chars().take(300).collect::<String>();
            return Err(match status.as_u16() {
                401 | 403 => LlmError::Authentication(snippet),
                429 => LlmError::RateLimited(snippet),
                400 | 404 | 422 => LlmError::InvalidRequest(snippet),
                _ => LlmError::ServiceUnavailable(format!("HTTP {status}: {snippet}")),
            });
        }

        let wire: WireResponse = serde_json::from_str(&text).map_err(|e| {
            let snippet: String = text.chars().take(200).collect();
            LlmError::InvalidResponse(format!("{e}: {snippet}"))
        })?;
        let choice = wire
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("no choices in response".to_string()))?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| {
                let arguments = serde_json::from_str(&call.function.arguments)
                    .unwrap_or(Value::String(call.function.arguments));
                ToolCallRequest {
                    id: call.id,
                    name: call.function.name,
                    arguments,
                }
            })
            .collect();

        Ok(ChatResponse {
            content: choice.message.content.unwrap_or_default(),
            tool_calls,
            usage: wire.usage.map(|u| Usage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            }),
            finish_reason: choice
                .finish_reason
                .as_deref()
                .map(FinishReason::from_provider)
                .unwrap_or(FinishReason::Other),
        })
    }

    fn name(&self) -> &str {
        &self.config.model
    }

    fn supports_structured_output(&self) -> bool {
        true
    }
}

// Wire format of the chat-completions response, reduced to what we read.

#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize, Serialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Debug, Deserialize, Serialize)]
struct WireFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolSpec;

    fn model() -> OpenAiCompatModel {
        OpenAiCompatModel::new(OpenAiCompatConfig::new(
            "https://example.invalid/v1",
            "sk-test",
            "test-model",
        ))
        .unwrap()
    }

    #[test]
    fn test_body_includes_schema_when_structured() {
        let request = ChatRequest::from_prompt("s", "u")
            .with_response_schema(json!({"type": "object"}));
        let body = model().build_body(&request);
        assert_eq!(body["response_format"]["type"], "json_schema");
    }

    #[test]
    fn test_body_includes_tools() {
        let request = ChatRequest::from_prompt("s", "u").with_tools(vec![ToolSpec {
            name: "search".to_string(),
            description: "web search".to_string(),
            input_schema: json!({"type": "object"}),
        }]);
        let body = model().build_body(&request);
        assert_eq!(body["tools"][0]["function"]["name"], "search");
    }

    #[test]
    fn test_wire_response_parses() {
        let text = r#"{
            "choices": [{
                "message": {
                    "content": "hello",
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "search", "arguments": "{\"q\": \"rust\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 12, "completion_tokens": 34}
        }"#;
        let wire: WireResponse = serde_json::from_str(text).unwrap();
        assert_eq!(wire.choices[0].message.content.as_deref(), Some("hello"));
        assert_eq!(wire.usage.as_ref().unwrap().completion_tokens, 34);
    }
}
