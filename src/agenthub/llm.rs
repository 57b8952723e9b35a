//! Provider-agnostic LLM client seam.
//!
//! The runtime never talks to a provider directly. Each conversation holds an
//! `Arc<dyn LlmClient>` built by an [`LlmClientFactory`] from the
//! conversation's [`LlmConfig`], and the agent step converts the current
//! [`View`] into a flat list of [`LlmMessage`]s before calling
//! [`LlmClient::complete`].
//!
//! Error classification matters here: [`LlmError::is_retryable`] drives the
//! step loop's backoff decorator. Rate limits, transient 5xx responses,
//! connection failures, timeouts, and empty-choices responses are retried;
//! everything else surfaces as an agent error event.

use crate::agenthub::event::{ContentBlock, Event, MessageRole};
use crate::agenthub::state::TokenUsage;
use crate::agenthub::tool::{Action, ToolDefinition};
use crate::agenthub::view::View;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// Role of a message in the provider wire format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmRole {
    System,
    User,
    Assistant,
    /// A tool-result message correlating with a prior assistant tool call.
    Tool { tool_call_id: String },
}

/// A single tool call returned by the LLM in a native function-calling
/// response.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmToolCall {
    /// Provider-assigned call id, e.g. `"call_abc123"`.
    pub id: String,
    /// Tool name matching one of the definitions sent with the request.
    pub name: String,
    /// Parsed JSON arguments supplied by the LLM for this call.
    pub arguments: serde_json::Value,
}

/// A message in the provider-facing conversation transcript.
#[derive(Debug, Clone)]
pub struct LlmMessage {
    pub role: LlmRole,
    pub content: Vec<ContentBlock>,
    /// Tool calls attached to an assistant message.
    pub tool_calls: Vec<LlmToolCall>,
    /// Reasoning content replayed to reasoning models.
    pub reasoning_content: Option<String>,
    /// Opaque provider thinking blocks replayed verbatim.
    pub thinking_blocks: Vec<serde_json::Value>,
    /// Tool name on tool-result messages.
    pub name: Option<String>,
}

impl LlmMessage {
    pub fn text(role: LlmRole, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![ContentBlock::text(text)],
            tool_calls: vec![],
            reasoning_content: None,
            thinking_blocks: vec![],
            name: None,
        }
    }
}

/// A complete (non-streaming) response from the provider.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    /// Provider response id; shared by every action parsed from this
    /// response so views can treat the batch atomically.
    pub response_id: String,
    pub content: Vec<ContentBlock>,
    pub reasoning_content: Option<String>,
    pub thinking_blocks: Vec<serde_json::Value>,
    pub tool_calls: Vec<LlmToolCall>,
    pub usage: Option<TokenUsage>,
}

/// Failure modes of an LLM round trip.
#[derive(Debug, Clone)]
pub enum LlmError {
    /// Provider returned 429 or an equivalent throttle signal.
    RateLimited(String),
    /// Transient provider-side failure (5xx).
    ServerError(String),
    /// The request never reached the provider.
    Connection(String),
    /// The request exceeded its deadline.
    Timeout(String),
    /// Response contained no choices.
    EmptyChoices,
    /// The request was rejected as malformed; retrying will not help.
    InvalidRequest(String),
    /// Any other provider-reported failure.
    Provider(String),
}

impl LlmError {
    /// Whether the step loop's backoff decorator should retry this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited(_)
                | LlmError::ServerError(_)
                | LlmError::Connection(_)
                | LlmError::Timeout(_)
                | LlmError::EmptyChoices
        )
    }
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmError::RateLimited(msg) => write!(f, "Rate limited: {}", msg),
            LlmError::ServerError(msg) => write!(f, "Provider server error: {}", msg),
            LlmError::Connection(msg) => write!(f, "Connection error: {}", msg),
            LlmError::Timeout(msg) => write!(f, "Request timed out: {}", msg),
            LlmError::EmptyChoices => write!(f, "Provider returned no choices"),
            LlmError::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            LlmError::Provider(msg) => write!(f, "Provider error: {}", msg),
        }
    }
}

impl Error for LlmError {}

/// Trait-driven abstraction over a concrete provider.
///
/// Implementations translate requests into the provider wire format and
/// return responses in a uniform shape. They must be thread-safe so a single
/// client can be shared between conversations.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send one full request/response chat completion.
    async fn complete(
        &self,
        messages: &[LlmMessage],
        tools: &[ToolDefinition],
    ) -> Result<LlmResponse, LlmError>;

    /// Identifier used to select the upstream model.
    fn model_name(&self) -> &str;
}

/// Per-conversation LLM configuration stored in conversation metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmConfig {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u64>,
}

/// Builds clients from stored configuration. The composition root supplies
/// one implementation for the whole process.
pub trait LlmClientFactory: Send + Sync {
    fn create(&self, config: &LlmConfig) -> Result<Arc<dyn LlmClient>, LlmError>;
}

/// Serialize an action back into the raw tool-call arguments the provider
/// originally sent, stripping the internal discriminator.
pub fn action_to_arguments(action: &Action) -> serde_json::Value {
    match action {
        Action::Custom { args, .. } => args.clone(),
        other => {
            let mut value = serde_json::to_value(other).unwrap_or(serde_json::Value::Null);
            if let Some(map) = value.as_object_mut() {
                map.remove("kind");
            }
            value
        }
    }
}

/// Convert a view into the provider-facing message transcript.
///
/// Consecutive action events sharing an `llm_response_id` collapse into one
/// assistant message carrying every tool call of the batch, mirroring how the
/// provider originally emitted them.
pub fn view_to_messages(view: &View) -> Vec<LlmMessage> {
    let mut messages: Vec<LlmMessage> = Vec::new();
    let mut index = 0;
    let events = &view.events;

    while index < events.len() {
        match &events[index] {
            Event::SystemPrompt(system) => {
                messages.push(LlmMessage::text(LlmRole::System, system.system_prompt.clone()));
                index += 1;
            }
            Event::Message(message) => {
                let role = match message.role {
                    MessageRole::User => LlmRole::User,
                    MessageRole::Assistant => LlmRole::Assistant,
                    MessageRole::System => LlmRole::System,
                    MessageRole::Tool => LlmRole::User,
                };
                let mut content = message.content.clone();
                content.extend(message.extended_content.iter().cloned());
                messages.push(LlmMessage {
                    role,
                    content,
                    tool_calls: vec![],
                    reasoning_content: None,
                    thinking_blocks: vec![],
                    name: None,
                });
                index += 1;
            }
            Event::Action(first) => {
                // Gather the whole batch of consecutive sibling actions.
                let response_id = first.llm_response_id.clone();
                let mut tool_calls = Vec::new();
                let mut end = index;
                while end < events.len() {
                    match &events[end] {
                        Event::Action(action) if action.llm_response_id == response_id => {
                            tool_calls.push(LlmToolCall {
                                id: action.tool_call_id.clone(),
                                name: action.tool_name.clone(),
                                arguments: action_to_arguments(&action.action),
                            });
                            end += 1;
                        }
                        _ => break,
                    }
                }
                messages.push(LlmMessage {
                    role: LlmRole::Assistant,
                    content: first.thought.clone(),
                    tool_calls,
                    reasoning_content: first.reasoning_content.clone(),
                    thinking_blocks: first.thinking_blocks.clone(),
                    name: None,
                });
                index = end;
            }
            Event::Observation(observation) => {
                messages.push(LlmMessage {
                    role: LlmRole::Tool {
                        tool_call_id: observation.tool_call_id.clone(),
                    },
                    content: observation.observation.to_llm_content(),
                    tool_calls: vec![],
                    reasoning_content: None,
                    thinking_blocks: vec![],
                    name: Some(observation.tool_name.clone()),
                });
                index += 1;
            }
            Event::UserReject(reject) => {
                messages.push(LlmMessage {
                    role: LlmRole::Tool {
                        tool_call_id: reject.tool_call_id.clone(),
                    },
                    content: vec![ContentBlock::text(format!(
                        "Action rejected: {}",
                        reject.rejection_reason
                    ))],
                    tool_calls: vec![],
                    reasoning_content: None,
                    thinking_blocks: vec![],
                    name: Some(reject.tool_name.clone()),
                });
                index += 1;
            }
            Event::AgentError(error) => {
                match &error.tool_call_id {
                    Some(tool_call_id) => messages.push(LlmMessage {
                        role: LlmRole::Tool {
                            tool_call_id: tool_call_id.clone(),
                        },
                        content: vec![ContentBlock::text(error.error.clone())],
                        tool_calls: vec![],
                        reasoning_content: None,
                        thinking_blocks: vec![],
                        name: error.tool_name.clone(),
                    }),
                    None => messages.push(LlmMessage::text(
                        LlmRole::User,
                        format!("Agent error: {}", error.error),
                    )),
                }
                index += 1;
            }
            Event::CondensationSummary(summary) => {
                messages.push(LlmMessage::text(
                    LlmRole::User,
                    format!("Conversation summary: {}", summary.summary),
                ));
                index += 1;
            }
            // Non-convertible events never appear in a view; skip defensively.
            _ => {
                index += 1;
            }
        }
    }

    messages
}
