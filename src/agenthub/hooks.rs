//! Lifecycle hooks that can veto actions and user messages.
//!
//! Hooks run at two points: just after the LLM proposes actions
//! (pre-tool-use) and just after the user submits a message
//! (user-prompt-submit). A blocking decision does not remove the event from
//! the log; it records the event id in the corresponding blocked map, and
//! the step loop turns blocked actions into rejection observations instead
//! of executing them, while blocked messages are simply never processed.
//!
//! The blocked maps are part of conversation state and persist across
//! restarts in `base_state.json`.

use crate::agenthub::event::{ActionEvent, EventId, MessageEvent};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Outcome of a hook evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookDecision {
    /// Proceed normally.
    Continue,
    /// Stop the event from taking effect; the reason is surfaced to the LLM
    /// on the next turn.
    Block { reason: String },
}

/// Evaluated before an action executes.
#[async_trait]
pub trait PreToolUseHook: Send + Sync {
    async fn on_pre_tool_use(&self, action: &ActionEvent) -> HookDecision;
}

/// Evaluated when a user message is submitted.
#[async_trait]
pub trait UserPromptSubmitHook: Send + Sync {
    async fn on_user_prompt_submit(&self, message: &MessageEvent) -> HookDecision;
}

/// The persisted portion of hook state.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BlockedState {
    /// Action id to block reason.
    #[serde(default)]
    pub blocked_actions: HashMap<EventId, String>,
    /// Message id to block reason.
    #[serde(default)]
    pub blocked_messages: HashMap<EventId, String>,
}

/// Hook registry plus the blocked-id bookkeeping for one conversation.
#[derive(Default)]
pub struct HookProcessor {
    pre_tool_use: Vec<Arc<dyn PreToolUseHook>>,
    user_prompt_submit: Vec<Arc<dyn UserPromptSubmitHook>>,
    state: BlockedState,
}

impl HookProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore a processor from persisted blocked state.
    pub fn with_state(state: BlockedState) -> Self {
        Self {
            state,
            ..Self::default()
        }
    }

    pub fn add_pre_tool_use(&mut self, hook: Arc<dyn PreToolUseHook>) {
        self.pre_tool_use.push(hook);
    }

    pub fn add_user_prompt_submit(&mut self, hook: Arc<dyn UserPromptSubmitHook>) {
        self.user_prompt_submit.push(hook);
    }

    pub fn state(&self) -> &BlockedState {
        &self.state
    }

    /// Run pre-tool-use hooks for an action. The first blocking decision
    /// wins and is recorded against the action id.
    pub async fn evaluate_action(&mut self, action: &ActionEvent) -> Option<String> {
        for hook in &self.pre_tool_use {
            if let HookDecision::Block { reason } = hook.on_pre_tool_use(action).await {
                log::info!(
                    "pre_tool_use hook blocked action {}: {}",
                    action.meta.id,
                    reason
                );
                self.state
                    .blocked_actions
                    .insert(action.meta.id.clone(), reason.clone());
                return Some(reason);
            }
        }
        None
    }

    /// Run user-prompt-submit hooks for a message. The first blocking
    /// decision wins and is recorded against the message id.
    pub async fn evaluate_message(&mut self, message: &MessageEvent) -> Option<String> {
        for hook in &self.user_prompt_submit {
            if let HookDecision::Block { reason } = hook.on_user_prompt_submit(message).await {
                log::info!(
                    "user_prompt_submit hook blocked message {}: {}",
                    message.meta.id,
                    reason
                );
                self.state
                    .blocked_messages
                    .insert(message.meta.id.clone(), reason.clone());
                return Some(reason);
            }
        }
        None
    }

    /// Reason an action was blocked with, if any.
    pub fn blocked_action_reason(&self, action_id: &str) -> Option<&String> {
        self.state.blocked_actions.get(action_id)
    }

    pub fn is_message_blocked(&self, message_id: &str) -> bool {
        self.state.blocked_messages.contains_key(message_id)
    }
}
