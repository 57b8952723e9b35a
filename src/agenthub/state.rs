//! Conversation execution state and confirmation policy.
//!
//! [`ExecutionStatus`] is the externally visible state of a conversation's
//! step loop. It is always *derived* from three independent facts rather than
//! stored directly: whether the loop is inside a step, whether a batch of
//! actions is waiting for user confirmation, and whether an advisory pause
//! flag is set. Keeping the facts separate is what makes the
//! pause-during-confirmation invariant hold: a pause request while actions
//! are pending never demotes the status to `Paused`.
//!
//! [`ConfirmationPolicy`] decides whether a batch of actions produced by a
//! single LLM response must be confirmed by the user before execution.

use serde::{Deserialize, Serialize};

/// Externally visible execution status of a conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    /// No step is in progress and nothing is pending.
    Idle,
    /// A step iteration is currently executing.
    Running,
    /// A batch of actions awaits user confirmation.
    WaitingForConfirmation,
    /// The user paused the conversation.
    Paused,
    /// The agent produced a terminal response or executed a finish tool.
    Finished,
    /// The conversation hit an unrecoverable error (e.g. persistence failure).
    Error,
}

/// Terminal outcomes a run can reach. `Error` is sticky; `Finished` is
/// cleared when a new user message starts another run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminal {
    Finished,
    Error,
}

/// Derive the visible [`ExecutionStatus`] from the underlying facts.
///
/// Precedence: a terminal state wins outright, then a pending confirmation,
/// then the advisory pause flag, then whether a step is in flight.
pub fn derive_status(
    terminal: Option<Terminal>,
    waiting_for_confirmation: bool,
    paused: bool,
    in_step: bool,
) -> ExecutionStatus {
    match terminal {
        Some(Terminal::Finished) => ExecutionStatus::Finished,
        Some(Terminal::Error) => ExecutionStatus::Error,
        None if waiting_for_confirmation => ExecutionStatus::WaitingForConfirmation,
        None if paused => ExecutionStatus::Paused,
        None if in_step => ExecutionStatus::Running,
        None => ExecutionStatus::Idle,
    }
}

/// The LLM's assessment of how dangerous an action is.
///
/// Ordered so that policies can compare against a threshold:
/// `Unknown < Low < Medium < High`.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Default,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityRisk {
    #[default]
    Unknown,
    Low,
    Medium,
    High,
}

/// Policy deciding whether a batch of actions requires user confirmation
/// before execution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConfirmationPolicy {
    /// Execute every batch immediately.
    #[default]
    NeverConfirm,
    /// Every batch waits for the user.
    AlwaysConfirm,
    /// Only batches containing an action at or above `threshold` wait.
    ConfirmRisky { threshold: SecurityRisk },
}

impl ConfirmationPolicy {
    /// Whether a batch with the given per-action risks must be confirmed.
    pub fn requires_confirmation(&self, risks: &[SecurityRisk]) -> bool {
        match self {
            ConfirmationPolicy::NeverConfirm => false,
            ConfirmationPolicy::AlwaysConfirm => true,
            ConfirmationPolicy::ConfirmRisky { threshold } => {
                risks.iter().any(|risk| risk >= threshold)
            }
        }
    }
}

/// How many tokens were spent on prompt vs. completion, accumulated across
/// every LLM call a conversation has made.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TokenUsage {
    /// Number of prompt/input tokens billed by the provider.
    pub input_tokens: u64,
    /// Number of generated/output tokens billed by the provider.
    pub output_tokens: u64,
    /// Convenience total equal to `input_tokens + output_tokens`.
    pub total_tokens: u64,
}

impl TokenUsage {
    /// Fold another usage report into this accumulator.
    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Usage metrics accumulated over the lifetime of a conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ConversationStats {
    pub usage: TokenUsage,
    /// Number of completed step iterations.
    pub iterations: u64,
}
