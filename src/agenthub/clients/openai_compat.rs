//! Client for OpenAI-compatible chat-completions servers.
//!
//! Works against any endpoint speaking the `/chat/completions` wire format,
//! which covers hosted providers as well as local servers (LM Studio,
//! Ollama, llama.cpp, vLLM). Native function calling is used for tools; the
//! response's tool calls come back with parsed JSON arguments.
//!
//! Transport failures are classified into [`LlmError`] variants so the step
//! loop's retry decorator can tell transient failures from permanent ones.

use crate::agenthub::event::ContentBlock;
use crate::agenthub::llm::{
    LlmClient, LlmClientFactory, LlmConfig, LlmError, LlmMessage, LlmResponse, LlmRole,
    LlmToolCall,
};
use crate::agenthub::state::TokenUsage;
use crate::agenthub::tool::ToolDefinition;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiCompatClient {
    http: reqwest::Client,
    config: LlmConfig,
    base_url: String,
}

impl OpenAiCompatClient {
    pub fn new(config: LlmConfig) -> Self {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self {
            http: reqwest::Client::new(),
            config,
            base_url,
        }
    }

    fn render_content(content: &[ContentBlock]) -> String {
        let mut text = String::new();
        for block in content {
            match block {
                ContentBlock::Text { text: t } => {
                    if !text.is_empty() {
                        text.push('\n');
                    }
                    text.push_str(t);
                }
                ContentBlock::Image { image_urls } => {
                    for url in image_urls {
                        if !text.is_empty() {
                            text.push('\n');
                        }
                        text.push_str(url);
                    }
                }
            }
        }
        text
    }

    fn render_messages(messages: &[LlmMessage]) -> Vec<serde_json::Value> {
        messages
            .iter()
            .map(|message| match &message.role {
                LlmRole::System => json!({
                    "role": "system",
                    "content": Self::render_content(&message.content),
                }),
                LlmRole::User => json!({
                    "role": "user",
                    "content": Self::render_content(&message.content),
                }),
                LlmRole::Assistant => {
                    let mut body = json!({
                        "role": "assistant",
                        "content": Self::render_content(&message.content),
                    });
                    if !message.tool_calls.is_empty() {
                        body["tool_calls"] = message
                            .tool_calls
                            .iter()
                            .map(|call| {
                                json!({
                                    "id": call.id,
                                    "type": "function",
                                    "function": {
                                        "name": call.name,
                                        "arguments": call.arguments.to_string(),
                                    }
                                })
                            })
                            .collect();
                    }
                    body
                }
                LlmRole::Tool { tool_call_id } => json!({
                    "role": "tool",
                    "tool_call_id": tool_call_id,
                    "name": message.name,
                    "content": Self::render_content(&message.content),
                }),
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

#[async_trait]
impl LlmClient for OpenAiCompatClient {
    async fn complete(
        &self,
        messages: &[LlmMessage],
        tools: &[ToolDefinition],
    ) -> Result<LlmResponse, LlmError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let mut body = json!({
            "model": self.config.model,
            "messages": Self::render_messages(messages),
        });
        if let Some(temperature) = self.config.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = self.config.max_output_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if !tools.is_empty() {
            body["tools"] = tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.parameters_schema,
                        }
                    })
                })
                .collect();
            body["tool_choice"] = json!("auto");
        }

        let mut request = self.http.post(&url).timeout(REQUEST_TIMEOUT).json(&body);
        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(|err| {
            if err.is_timeout() {
                LlmError::Timeout(err.to_string())
            } else {
                LlmError::Connection(err.to_string())
            }
        })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(LlmError::RateLimited(status.to_string()));
        }
        if status.is_server_error() {
            return Err(LlmError::ServerError(status.to_string()));
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(LlmError::InvalidRequest(format!("{}: {}", status, detail)));
        }

        let wire: WireResponse = response
            .json()
            .await
            .map_err(|err| LlmError::Provider(format!("malformed response body: {}", err)))?;
        let choice = wire.choices.into_iter().next().ok_or(LlmError::EmptyChoices)?;

        let tool_calls = choice
            .message
            .tool_calls
            .into_iter()
            .map(|call| {
                let arguments = serde_json::from_str(&call.function.arguments)
                    .unwrap_or(serde_json::Value::Null);
                LlmToolCall {
                    id: call.id,
                    name: call.function.name,
                    arguments,
                }
            })
            .collect();

        let content = match choice.message.content {
            Some(text) if !text.is_empty() => vec![ContentBlock::text(text)],
            _ => vec![],
        };

        Ok(LlmResponse {
            response_id: wire
                .id
                .unwrap_or_else(|| Uuid::new_v4().simple().to_string()),
            content,
            reasoning_content: choice.message.reasoning_content,
            thinking_blocks: vec![],
            tool_calls,
            usage: wire.usage.map(|usage| TokenUsage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
            }),
        })
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

/// Factory producing [`OpenAiCompatClient`]s; the composition root's default.
pub struct OpenAiCompatFactory;

impl LlmClientFactory for OpenAiCompatFactory {
    fn create(&self, config: &LlmConfig) -> Result<Arc<dyn LlmClient>, LlmError> {
        Ok(Arc::new(OpenAiCompatClient::new(config.clone())))
    }
}
