//! Request/response models shared by the services and the HTTP surface.

use crate::agenthub::event::{ContentBlock, MessageRole};
use crate::agenthub::llm::LlmConfig;
use crate::agenthub::state::{ConfirmationPolicy, ConversationStats, ExecutionStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sort orders for conversation listings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConversationSortOrder {
    CreatedAt,
    UpdatedAt,
    CreatedAtDesc,
    UpdatedAtDesc,
}

impl Default for ConversationSortOrder {
    fn default() -> Self {
        ConversationSortOrder::CreatedAtDesc
    }
}

/// Sort orders for event listings. Timestamp order is insertion order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventSortOrder {
    #[default]
    Timestamp,
    TimestampDesc,
}

/// Everything needed to instantiate the agent behind a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentSpec {
    pub llm: LlmConfig,
    /// Names of tools from the process-wide registry this agent may call.
    #[serde(default)]
    pub tools: Vec<String>,
    pub system_prompt: String,
}

/// Payload to send a message to the agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SendMessageRequest {
    #[serde(default = "default_role")]
    pub role: MessageRole,
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    /// If true, immediately run the agent after sending the message.
    #[serde(default = "default_true")]
    pub run: bool,
}

fn default_role() -> MessageRole {
    MessageRole::User
}

fn default_true() -> bool {
    true
}

/// Payload to create a new conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StartConversationRequest {
    pub agent: AgentSpec,
    #[serde(default)]
    pub confirmation_policy: ConfirmationPolicy,
    /// Max step iterations per run, as a guard against infinite loops.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_message: Option<SendMessageRequest>,
}

fn default_max_iterations() -> u64 {
    500
}

/// Stored details about a conversation; the content of `meta.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredConversation {
    pub id: Uuid,
    pub agent: AgentSpec,
    pub confirmation_policy: ConfirmationPolicy,
    pub max_iterations: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_message: Option<SendMessageRequest>,
    #[serde(default)]
    pub stats: ConversationStats,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredConversation {
    pub fn new(id: Uuid, request: StartConversationRequest) -> Self {
        let now = Utc::now();
        Self {
            id,
            agent: request.agent,
            confirmation_policy: request.confirmation_policy,
            max_iterations: request.max_iterations,
            initial_message: request.initial_message,
            stats: ConversationStats::default(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// A stored conversation plus its live execution status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationInfo {
    #[serde(flatten)]
    pub stored: StoredConversation,
    pub status: ExecutionStatus,
}

/// One page of conversation listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationPage {
    pub items: Vec<ConversationInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_id: Option<String>,
}

/// One page of event listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventPage {
    pub items: Vec<crate::agenthub::event::Event>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_id: Option<String>,
}

/// Payload to accept or reject a pending action in confirmation mode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfirmationResponseRequest {
    pub accept: bool,
    #[serde(default = "default_rejection_reason")]
    pub reason: String,
}

fn default_rejection_reason() -> String {
    "User rejected the action.".to_string()
}

/// Generic success response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Success {
    pub success: bool,
}

impl Default for Success {
    fn default() -> Self {
        Self { success: true }
    }
}

// Bash subsystem models.

/// Payload to execute a bash command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecuteBashRequest {
    pub command: String,
    /// Seconds before the command is killed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
}

/// A command submitted for execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BashCommand {
    pub id: String,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// A chunk of output from a running command. The final chunk carries the
/// exit code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BashOutput {
    pub id: String,
    pub command_id: String,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub timeout_occurred: bool,
    /// Sequence of this chunk within the command's output.
    #[serde(default)]
    pub order: u64,
    pub timestamp: DateTime<Utc>,
}

/// A bash event: either a submitted command or an output chunk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind")]
pub enum BashEvent {
    BashCommand(BashCommand),
    BashOutput(BashOutput),
}

impl BashEvent {
    pub fn id(&self) -> &str {
        match self {
            BashEvent::BashCommand(c) => &c.id,
            BashEvent::BashOutput(o) => &o.id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            BashEvent::BashCommand(c) => c.timestamp,
            BashEvent::BashOutput(o) => o.timestamp,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            BashEvent::BashCommand(_) => "BashCommand",
            BashEvent::BashOutput(_) => "BashOutput",
        }
    }

    pub fn command_id(&self) -> &str {
        match self {
            BashEvent::BashCommand(c) => &c.id,
            BashEvent::BashOutput(o) => &o.command_id,
        }
    }
}

/// Sort orders for bash event listings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BashEventSortOrder {
    #[default]
    Timestamp,
    TimestampDesc,
}

/// One page of bash event listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BashEventPage {
    pub items: Vec<BashEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_message_request_defaults() {
        let request: SendMessageRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(request.role, MessageRole::User);
        assert!(request.run);
        assert!(request.content.is_empty());
    }

    #[test]
    fn start_conversation_request_defaults() {
        let request: StartConversationRequest = serde_json::from_value(serde_json::json!({
            "agent": {
                "llm": {"model": "test-model"},
                "system_prompt": "be helpful"
            }
        }))
        .unwrap();
        assert_eq!(request.max_iterations, 500);
        assert_eq!(request.confirmation_policy, ConfirmationPolicy::NeverConfirm);
        assert!(request.initial_message.is_none());
    }

    #[test]
    fn conversation_info_flattens_stored_fields() {
        let request: StartConversationRequest = serde_json::from_value(serde_json::json!({
            "agent": {"llm": {"model": "m"}, "system_prompt": "p"}
        }))
        .unwrap();
        let info = ConversationInfo {
            stored: StoredConversation::new(Uuid::new_v4(), request),
            status: ExecutionStatus::Idle,
        };
        let json = serde_json::to_value(&info).unwrap();
        assert!(json.get("id").is_some());
        assert_eq!(json["status"], "IDLE");
    }

    #[test]
    fn bash_event_round_trips() {
        let event = BashEvent::BashCommand(BashCommand {
            id: "cmd1".to_string(),
            command: "echo hi".to_string(),
            timeout: Some(30),
            cwd: None,
            timestamp: Utc::now(),
        });
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"kind\":\"BashCommand\""));
        let back: BashEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn confirmation_response_default_reason() {
        let request: ConfirmationResponseRequest =
            serde_json::from_str(r#"{"accept": false}"#).unwrap();
        assert!(!request.accept);
        assert_eq!(request.reason, "User rejected the action.");
    }
}
