//! Model gateway: plain and tool-augmented chat completions over an
//! OpenAI-compatible HTTP API.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use frontdesk_core::config::LlmConfig;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::error::LlmError;
use crate::retry::RetryPolicy;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON text as produced by the model; may be malformed.
    pub arguments: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self::text(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(ChatRole::Assistant, content)
    }

    pub fn text(role: ChatRole, content: impl Into<String>) -> Self {
        Self { role, content: Some(content.into()), tool_calls: Vec::new(), tool_call_id: None }
    }

    /// The assistant turn that requested tools, echoed back for the follow-up call.
    pub fn tool_request(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self { role: ChatRole::Assistant, content, tool_calls, tool_call_id: None }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Tool,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    Other(String),
}

impl FinishReason {
    fn parse(value: Option<&str>) -> Self {
        match value {
            Some("stop") | None => Self::Stop,
            Some("tool_calls") => Self::ToolCalls,
            Some("length") => Self::Length,
            Some(other) => Self::Other(other.to_string()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatCompletion {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: FinishReason,
}

impl ChatCompletion {
    pub fn text(content: impl Into<String>) -> Self {
        Self { content: Some(content.into()), tool_calls: Vec::new(), finish_reason: FinishReason::Stop }
    }

    pub fn tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self { content: None, tool_calls, finish_reason: FinishReason::ToolCalls }
    }
}

/// Function declaration offered to the model.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolSchema {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

#[async_trait]
pub trait LlmGateway: Send + Sync {
    /// Text-only completion. An empty reply is returned as an empty string.
    async fn complete(&self, system_prompt: &str, messages: &[ChatMessage])
        -> Result<String, LlmError>;

    /// Completion with the given tools available and `tool_choice = auto`.
    async fn complete_with_tools(
        &self,
        system_prompt: &str,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
    ) -> Result<ChatCompletion, LlmError>;
}

pub struct OpenAiCompatibleGateway {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<SecretString>,
    model: String,
    max_tokens: u32,
    timeout: Duration,
    retry: RetryPolicy,
    breaker: CircuitBreaker,
}

impl OpenAiCompatibleGateway {
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|error| LlmError::Configuration(format!("cannot build http client: {error}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            timeout: Duration::from_secs(config.timeout_secs),
            retry: RetryPolicy::with_retries(config.max_retries),
            breaker: CircuitBreaker::new(CircuitBreakerConfig {
                failure_threshold: config.breaker_failure_threshold,
                reset_after: Duration::from_secs(config.breaker_reset_secs),
                ..CircuitBreakerConfig::default()
            }),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    fn request_body(
        &self,
        system_prompt: &str,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
    ) -> Value {
        let mut wire: Vec<WireMessage<'_>> = Vec::with_capacity(messages.len() + 1);
        wire.push(WireMessage {
            role: ChatRole::System,
            content: Some(system_prompt),
            tool_calls: None,
            tool_call_id: None,
        });
        wire.extend(messages.iter().map(WireMessage::from));

        let mut body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": wire,
        });
        if !tools.is_empty() {
            body["tools"] = tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.parameters,
                        }
                    })
                })
                .collect();
            body["tool_choice"] = json!("auto");
        }
        body
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = &self.api_key {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", key.expose_secret())) {
                headers.insert(AUTHORIZATION, value);
            }
        }
        headers
    }

    async fn send(&self, body: &Value) -> Result<ChatCompletion, LlmError> {
        if !self.breaker.is_allowed() {
            return Err(LlmError::CircuitOpen);
        }

        let result = self.retry.execute(|| self.send_once(body)).await;
        match &result {
            Ok(_) => self.breaker.record_success(),
            Err(error) if error.is_retryable() => self.breaker.record_failure(),
            Err(_) => {}
        }
        result
    }

    async fn send_once(&self, body: &Value) -> Result<ChatCompletion, LlmError> {
        let timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
        let request = self.client.post(&self.endpoint).headers(self.headers()).json(body).send();
        let response = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| LlmError::Timeout(timeout_ms))??;

        let status = response.status().as_u16();
        let text = tokio::time::timeout(self.timeout, response.text())
            .await
            .map_err(|_| LlmError::Timeout(timeout_ms))??;
        if !(200..300).contains(&status) {
            return Err(status_to_error(status, &text));
        }

        let parsed: WireResponse = serde_json::from_str(&text)
            .map_err(|error| LlmError::InvalidResponse(error.to_string()))?;
        parsed.into_completion()
    }
}

#[async_trait]
impl LlmGateway for OpenAiCompatibleGateway {
    async fn complete(
        &self,
        system_prompt: &str,
        messages: &[ChatMessage],
    ) -> Result<String, LlmError> {
        let body = self.request_body(system_prompt, messages, &[]);
        let completion = self.send(&body).await?;
        Ok(completion.content.unwrap_or_default())
    }

    async fn complete_with_tools(
        &self,
        system_prompt: &str,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
    ) -> Result<ChatCompletion, LlmError> {
        let body = self.request_body(system_prompt, messages, tools);
        self.send(&body).await
    }
}

pub fn status_to_error(status: u16, body: &str) -> LlmError {
    match status {
        401 | 403 => LlmError::Authentication(body.to_string()),
        429 => LlmError::RateLimited { retry_after_ms: retry_after_ms(body) },
        _ => LlmError::Api { status, message: body.to_string() },
    }
}

fn retry_after_ms(body: &str) -> Option<u64> {
    serde_json::from_str::<Value>(body)
        .ok()?
        .get("error")?
        .get("retry_after")?
        .as_f64()
        .map(|seconds| (seconds * 1000.0) as u64)
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: ChatRole,
    content: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<&'a str>,
}

impl<'a> From<&'a ChatMessage> for WireMessage<'a> {
    fn from(message: &'a ChatMessage) -> Self {
        let tool_calls = (!message.tool_calls.is_empty()).then(|| {
            message
                .tool_calls
                .iter()
                .map(|call| {
                    json!({
                        "id": call.id,
                        "type": "function",
                        "function": { "name": call.name, "arguments": call.arguments },
                    })
                })
                .collect()
        });
        Self {
            role: message.role,
            content: message.content.as_deref(),
            tool_calls,
            tool_call_id: message.tool_call_id.as_deref(),
        }
    }
}

#[derive(Deserialize)]
struct WireResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: String,
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

impl WireResponse {
    fn into_completion(self) -> Result<ChatCompletion, LlmError> {
        let choice = self
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("response has no choices".to_string()))?;

        Ok(ChatCompletion {
            content: choice.message.content,
            tool_calls: choice
                .message
                .tool_calls
                .into_iter()
                .map(|call| ToolCall {
                    id: call.id,
                    name: call.function.name,
                    arguments: call.function.arguments,
                })
                .collect(),
            finish_reason: FinishReason::parse(choice.finish_reason.as_deref()),
        })
    }
}

/// Replays queued responses in order. Used by tests and offline runs.
#[derive(Default)]
pub struct ScriptedGateway {
    completions: Mutex<VecDeque<Result<ChatCompletion, LlmError>>>,
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

/// What the scripted gateway was asked.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedCall {
    pub system_prompt: String,
    pub messages: Vec<ChatMessage>,
    pub with_tools: bool,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_completion(&self, completion: ChatCompletion) -> &Self {
        if let Ok(mut queue) = self.completions.lock() {
            queue.push_back(Ok(completion));
        }
        self
    }

    pub fn push_completion_error(&self, error: LlmError) -> &Self {
        if let Ok(mut queue) = self.completions.lock() {
            queue.push_back(Err(error));
        }
        self
    }

    pub fn push_reply(&self, reply: impl Into<String>) -> &Self {
        if let Ok(mut queue) = self.replies.lock() {
            queue.push_back(Ok(reply.into()));
        }
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    fn record(&self, system_prompt: &str, messages: &[ChatMessage], with_tools: bool) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                system_prompt: system_prompt.to_string(),
                messages: messages.to_vec(),
                with_tools,
            });
        }
    }
}

#[async_trait]
impl LlmGateway for ScriptedGateway {
    async fn complete(
        &self,
        system_prompt: &str,
        messages: &[ChatMessage],
    ) -> Result<String, LlmError> {
        self.record(system_prompt, messages, false);
        self.replies
            .lock()
            .ok()
            .and_then(|mut queue| queue.pop_front())
            .unwrap_or_else(|| Err(LlmError::InvalidResponse("no scripted reply left".to_string())))
    }

    async fn complete_with_tools(
        &self,
        system_prompt: &str,
        messages: &[ChatMessage],
        _tools: &[ToolSchema],
    ) -> Result<ChatCompletion, LlmError> {
        self.record(system_prompt, messages, true);
        self.completions.lock().ok().and_then(|mut queue| queue.pop_front()).unwrap_or_else(|| {
            Err(LlmError::InvalidResponse("no scripted completion left".to_string()))
        })
    }
}
