//! Pluggable condensers that shrink long event histories.
//!
//! When a view reports an unhandled condensation request, the step loop asks
//! the configured [`Condenser`] for a [`Condensation`] instead of calling the
//! LLM. The condensation marks a set of earlier events as forgotten and may
//! substitute a summary at a given offset. Two implementations ship here;
//! summarizing condensers that call an LLM are external collaborators.

use crate::agenthub::event::{Condensation, Event, EventId};
use crate::agenthub::view::View;
use async_trait::async_trait;
use std::error::Error;

/// Strategy deciding which events to forget when condensation is requested.
///
/// Returning `None` means no condensation is necessary for this view.
/// Implementations build the [`Condensation`] payload only; the caller
/// allocates the event envelope and appends it to the log.
#[async_trait]
pub trait Condenser: Send + Sync {
    async fn condense(
        &self,
        view: &View,
    ) -> Result<Option<CondensationOutcome>, Box<dyn Error + Send + Sync>>;

    /// Human-readable name for logging and diagnostics.
    fn name(&self) -> &str;
}

/// The payload of a condensation decision, minus the event envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct CondensationOutcome {
    pub forgotten_event_ids: Vec<EventId>,
    pub summary: Option<String>,
    pub summary_offset: Option<usize>,
}

impl CondensationOutcome {
    /// Attach an event envelope, producing the persistable condensation.
    pub fn into_condensation(self, meta: crate::agenthub::event::EventMeta) -> Condensation {
        Condensation {
            meta,
            forgotten_event_ids: self.forgotten_event_ids,
            summary: self.summary,
            summary_offset: self.summary_offset,
        }
    }
}

/// Condenser that never condenses.
pub struct NoOpCondenser;

#[async_trait]
impl Condenser for NoOpCondenser {
    async fn condense(
        &self,
        _view: &View,
    ) -> Result<Option<CondensationOutcome>, Box<dyn Error + Send + Sync>> {
        Ok(None)
    }

    fn name(&self) -> &str {
        "NoOpCondenser"
    }
}

/// Deterministic condenser that keeps the head and tail of the view and
/// forgets the middle, replacing it with a count summary.
///
/// The head is typically the system prompt plus the opening exchange; the
/// tail is the recent context the agent still needs verbatim.
pub struct TruncationCondenser {
    pub keep_first: usize,
    pub keep_last: usize,
}

impl Default for TruncationCondenser {
    fn default() -> Self {
        Self {
            keep_first: 2,
            keep_last: 10,
        }
    }
}

#[async_trait]
impl Condenser for TruncationCondenser {
    async fn condense(
        &self,
        view: &View,
    ) -> Result<Option<CondensationOutcome>, Box<dyn Error + Send + Sync>> {
        let total = view.events.len();
        if total <= self.keep_first + self.keep_last {
            return Ok(None);
        }

        let forgotten: Vec<EventId> = view.events[self.keep_first..total - self.keep_last]
            .iter()
            // Synthesized summaries have no persisted event to forget.
            .filter(|event| !matches!(event, Event::CondensationSummary(_)))
            .map(|event| event.id().clone())
            .collect();
        if forgotten.is_empty() {
            return Ok(None);
        }

        log::debug!(
            "{}: forgetting {} of {} events",
            self.name(),
            forgotten.len(),
            total
        );
        Ok(Some(CondensationOutcome {
            summary: Some(format!(
                "{} earlier events were condensed away.",
                forgotten.len()
            )),
            summary_offset: Some(self.keep_first),
            forgotten_event_ids: forgotten,
        }))
    }

    fn name(&self) -> &str {
        "TruncationCondenser"
    }
}
