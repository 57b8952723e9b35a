//! The conversation event model.
//!
//! Every conversation owns an ordered, append-only log of [`Event`]s, and
//! that log is the single source of truth for everything else: the view sent
//! to the LLM, the state streamed to subscribers, and the files persisted on
//! disk. Events are a sealed sum type keyed by the string discriminator
//! `kind`; parsers fail closed on unknown kinds.
//!
//! Two variants are synthesized rather than persisted:
//! [`Event::CondensationSummary`] exists only inside a derived view, and
//! [`Event::ConversationStateUpdate`] is broadcast to subscribers whenever
//! the status, stats, or confirmation policy changes but never enters the
//! log.
//!
//! Events reference each other only by opaque id. The one back-reference is
//! `ObservationEvent.action_id`, pointing at the action the observation
//! answers.

use crate::agenthub::state::{
    ConfirmationPolicy, ConversationStats, ExecutionStatus, SecurityRisk,
};
use crate::agenthub::tool::{Action, Observation};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque unique identifier of an event within a conversation.
///
/// Ids sort in assignment order (zero-padded sequence number plus a random
/// suffix), which is what lets the log rebuild its ordering from a directory
/// scan on startup.
pub type EventId = String;

/// Identifier correlating a tool call with its observation.
pub type ToolCallId = String;

/// Allocate the id for the event at the given log position.
pub fn new_event_id(seq: usize) -> EventId {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{:08}-{}", seq, &suffix[..8])
}

/// Who produced an event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    User,
    Agent,
    Environment,
}

/// Fields shared by every event variant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventMeta {
    pub id: EventId,
    pub timestamp: DateTime<Utc>,
    pub source: SourceType,
}

impl EventMeta {
    pub fn new(seq: usize, source: SourceType) -> Self {
        Self {
            id: new_event_id(seq),
            timestamp: Utc::now(),
            source,
        }
    }
}

/// One unit of message content: plain text or image references.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    Image { image_urls: Vec<String> },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }
}

/// Role of a message participant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Tool,
}

/// Emitted exactly once when a conversation first starts: the system prompt
/// and the tool schemas the agent was configured with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SystemPromptEvent {
    #[serde(flatten)]
    pub meta: EventMeta,
    pub system_prompt: String,
    pub tools: Vec<crate::agenthub::tool::ToolDefinition>,
}

/// A plain chat message from the user, the assistant, or the system.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageEvent {
    #[serde(flatten)]
    pub meta: EventMeta,
    pub role: MessageRole,
    pub content: Vec<ContentBlock>,
    /// Names of microagents whose knowledge was activated by this message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub activated_microagents: Vec<String>,
    /// Extra text blocks appended when the message is converted for the LLM.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extended_content: Vec<ContentBlock>,
    /// Identifier of the sending agent when messages are delegated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
}

/// A single tool call produced by the LLM.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionEvent {
    #[serde(flatten)]
    pub meta: EventMeta,
    /// The thought process of the agent before taking this action.
    pub thought: Vec<ContentBlock>,
    /// Intermediate reasoning content from reasoning models.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    /// Opaque provider thinking blocks carried through for the next request.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub thinking_blocks: Vec<serde_json::Value>,
    pub action: Action,
    pub tool_name: String,
    /// Unique id the provider assigned to this tool call.
    pub tool_call_id: ToolCallId,
    /// Groups actions parsed from the same LLM response. Views include or
    /// exclude such a batch atomically.
    pub llm_response_id: String,
    #[serde(default)]
    pub security_risk: SecurityRisk,
}

/// The result of executing an action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObservationEvent {
    #[serde(flatten)]
    pub meta: EventMeta,
    pub observation: Observation,
    /// Id of the [`ActionEvent`] this observation answers.
    pub action_id: EventId,
    pub tool_name: String,
    pub tool_call_id: ToolCallId,
}

/// Produced when the user declines a pending action in confirmation mode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserRejectObservation {
    #[serde(flatten)]
    pub meta: EventMeta,
    pub rejection_reason: String,
    pub action_id: EventId,
    pub tool_name: String,
    pub tool_call_id: ToolCallId,
}

/// A scaffold level failure, distinct from anything the LLM said.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentErrorEvent {
    #[serde(flatten)]
    pub meta: EventMeta,
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<ToolCallId>,
}

/// Recorded when the user pauses the conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PauseEvent {
    #[serde(flatten)]
    pub meta: EventMeta,
}

/// Marks a prefix of the log as forgotten, optionally substituting a summary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Condensation {
    #[serde(flatten)]
    pub meta: EventMeta,
    pub forgotten_event_ids: Vec<EventId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Offset in the kept sequence where the summary is inserted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_offset: Option<usize>,
}

/// Marker asking the agent to run its condenser at the next step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CondensationRequestEvent {
    #[serde(flatten)]
    pub meta: EventMeta,
}

/// Synthesized inside a view to stand in for forgotten events. Never
/// persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CondensationSummaryEvent {
    #[serde(flatten)]
    pub meta: EventMeta,
    pub summary: String,
}

/// Broadcast to subscribers whenever status, stats, or confirmation policy
/// changes. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationStateUpdateEvent {
    #[serde(flatten)]
    pub meta: EventMeta,
    pub status: ExecutionStatus,
    pub confirmation_policy: ConfirmationPolicy,
    pub stats: ConversationStats,
}

/// A single entry in a conversation's event log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind")]
pub enum Event {
    SystemPrompt(SystemPromptEvent),
    Message(MessageEvent),
    Action(ActionEvent),
    Observation(ObservationEvent),
    UserReject(UserRejectObservation),
    AgentError(AgentErrorEvent),
    Pause(PauseEvent),
    Condensation(Condensation),
    CondensationRequest(CondensationRequestEvent),
    CondensationSummary(CondensationSummaryEvent),
    ConversationStateUpdate(ConversationStateUpdateEvent),
}

impl Event {
    pub fn meta(&self) -> &EventMeta {
        match self {
            Event::SystemPrompt(e) => &e.meta,
            Event::Message(e) => &e.meta,
            Event::Action(e) => &e.meta,
            Event::Observation(e) => &e.meta,
            Event::UserReject(e) => &e.meta,
            Event::AgentError(e) => &e.meta,
            Event::Pause(e) => &e.meta,
            Event::Condensation(e) => &e.meta,
            Event::CondensationRequest(e) => &e.meta,
            Event::CondensationSummary(e) => &e.meta,
            Event::ConversationStateUpdate(e) => &e.meta,
        }
    }

    pub fn id(&self) -> &EventId {
        &self.meta().id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.meta().timestamp
    }

    pub fn source(&self) -> SourceType {
        self.meta().source
    }

    /// The serde discriminator for this variant, as used by kind filters.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::SystemPrompt(_) => "SystemPrompt",
            Event::Message(_) => "Message",
            Event::Action(_) => "Action",
            Event::Observation(_) => "Observation",
            Event::UserReject(_) => "UserReject",
            Event::AgentError(_) => "AgentError",
            Event::Pause(_) => "Pause",
            Event::Condensation(_) => "Condensation",
            Event::CondensationRequest(_) => "CondensationRequest",
            Event::CondensationSummary(_) => "CondensationSummary",
            Event::ConversationStateUpdate(_) => "ConversationStateUpdate",
        }
    }

    /// Whether this event belongs in the persistent log. Synthesized
    /// variants are broadcast only.
    pub fn is_persisted(&self) -> bool {
        !matches!(
            self,
            Event::CondensationSummary(_) | Event::ConversationStateUpdate(_)
        )
    }

    /// Whether this event can be converted into LLM input.
    pub fn is_llm_convertible(&self) -> bool {
        matches!(
            self,
            Event::SystemPrompt(_)
                | Event::Message(_)
                | Event::Action(_)
                | Event::Observation(_)
                | Event::UserReject(_)
                | Event::AgentError(_)
                | Event::CondensationSummary(_)
        )
    }
}
