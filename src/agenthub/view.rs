//! Derivation of the linear event sequence sent to the LLM.
//!
//! A [`View`] is recomputed from the raw log on every step and never cached
//! across steps. Building one applies, in order:
//!
//! 1. Collect condensations and union their forgotten ids together with the
//!    ids of the condensation and condensation-request events themselves.
//! 2. Enforce batch atomicity: forgetting any action of a multi-action batch
//!    forgets the whole batch, so thinking blocks are never separated from
//!    their sibling tool calls.
//! 3. Keep only events that are convertible to LLM input.
//! 4. Insert the most recent condensation's summary at its recorded offset.
//! 5. Drop actions without a matching observation and observations without a
//!    matching action.
//! 6. Flag an unhandled condensation request when one trails the last
//!    condensation.

use crate::agenthub::event::{
    Condensation, CondensationSummaryEvent, Event, EventId, EventMeta, SourceType, ToolCallId,
};
use std::collections::{HashMap, HashSet};

/// Linearly ordered view of events, ready to convert into LLM input.
#[derive(Debug, Clone)]
pub struct View {
    pub events: Vec<Event>,
    /// Whether a condensation request trails the last condensation.
    pub unhandled_condensation_request: bool,
    /// The condensations that were applied to produce this view.
    pub condensations: Vec<Condensation>,
}

impl View {
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// The most recent condensation, if any.
    pub fn most_recent_condensation(&self) -> Option<&Condensation> {
        self.condensations.last()
    }

    /// Create a view from the raw log, respecting condensation semantics.
    pub fn from_events(events: &[Event]) -> View {
        let mut forgotten: HashSet<EventId> = HashSet::new();
        let mut condensations: Vec<Condensation> = Vec::new();

        for event in events {
            match event {
                Event::Condensation(c) => {
                    condensations.push(c.clone());
                    forgotten.extend(c.forgotten_event_ids.iter().cloned());
                    // The condensation itself is never shown to the LLM.
                    forgotten.insert(c.meta.id.clone());
                }
                Event::CondensationRequest(r) => {
                    forgotten.insert(r.meta.id.clone());
                }
                _ => {}
            }
        }

        let forgotten = enforce_batch_atomicity(events, forgotten);

        let mut kept: Vec<Event> = events
            .iter()
            .filter(|event| !forgotten.contains(event.id()) && event.is_llm_convertible())
            .cloned()
            .collect();

        // The relevant summary always comes from the most recent condensation.
        let summary = events.iter().rev().find_map(|event| match event {
            Event::Condensation(c) => match (&c.summary, c.summary_offset) {
                (Some(summary), Some(offset)) => Some((summary.clone(), offset)),
                _ => None,
            },
            _ => None,
        });

        if let Some((summary, offset)) = summary {
            let offset = offset.min(kept.len());
            kept.insert(
                offset,
                Event::CondensationSummary(CondensationSummaryEvent {
                    meta: EventMeta::new(0, SourceType::Environment),
                    summary,
                }),
            );
        }

        // An unhandled request is one closer to the end of the log than any
        // condensation.
        let mut unhandled_condensation_request = false;
        for event in events.iter().rev() {
            match event {
                Event::Condensation(_) => break,
                Event::CondensationRequest(_) => {
                    unhandled_condensation_request = true;
                    break;
                }
                _ => {}
            }
        }

        View {
            events: filter_unmatched_tool_calls(kept),
            unhandled_condensation_request,
            condensations,
        }
    }
}

/// Expand the forgotten set so that partial batches never survive: if any
/// action of an `llm_response_id` batch is forgotten, every action in that
/// batch is forgotten.
fn enforce_batch_atomicity(
    events: &[Event],
    forgotten: HashSet<EventId>,
) -> HashSet<EventId> {
    let mut batches: HashMap<String, Vec<EventId>> = HashMap::new();
    for event in events {
        if let Event::Action(action) = event {
            batches
                .entry(action.llm_response_id.clone())
                .or_default()
                .push(action.meta.id.clone());
        }
    }

    let mut updated = forgotten;
    for (llm_response_id, batch_ids) in batches {
        if batch_ids.iter().any(|id| updated.contains(id)) {
            log::debug!(
                "enforcing batch atomicity: forgetting entire batch llm_response_id={} ({} events)",
                llm_response_id,
                batch_ids.len()
            );
            updated.extend(batch_ids);
        }
    }
    updated
}

/// Drop actions whose tool call has no observation and observations whose
/// tool call has no action.
fn filter_unmatched_tool_calls(events: Vec<Event>) -> Vec<Event> {
    let action_ids: HashSet<ToolCallId> = events
        .iter()
        .filter_map(|event| match event {
            Event::Action(a) => Some(a.tool_call_id.clone()),
            _ => None,
        })
        .collect();
    let observation_ids: HashSet<ToolCallId> = events
        .iter()
        .filter_map(|event| match event {
            Event::Observation(o) => Some(o.tool_call_id.clone()),
            Event::UserReject(r) => Some(r.tool_call_id.clone()),
            Event::AgentError(e) => e.tool_call_id.clone(),
            _ => None,
        })
        .collect();

    events
        .into_iter()
        .filter(|event| match event {
            Event::Action(a) => observation_ids.contains(&a.tool_call_id),
            Event::Observation(o) => action_ids.contains(&o.tool_call_id),
            Event::UserReject(r) => action_ids.contains(&r.tool_call_id),
            _ => true,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agenthub::event::{
        ActionEvent, CondensationRequestEvent, ContentBlock, MessageEvent, MessageRole,
        ObservationEvent,
    };
    use crate::agenthub::state::SecurityRisk;
    use crate::agenthub::tool::{Action, Observation};

    fn meta(seq: usize, source: SourceType) -> EventMeta {
        EventMeta::new(seq, source)
    }

    fn user_message(seq: usize, text: &str) -> Event {
        Event::Message(MessageEvent {
            meta: meta(seq, SourceType::User),
            role: MessageRole::User,
            content: vec![ContentBlock::text(text)],
            activated_microagents: vec![],
            extended_content: vec![],
            sender: None,
        })
    }

    fn action(seq: usize, call_id: &str, response_id: &str) -> Event {
        Event::Action(ActionEvent {
            meta: meta(seq, SourceType::Agent),
            thought: vec![],
            reasoning_content: None,
            thinking_blocks: vec![],
            action: Action::Bash {
                command: "true".to_string(),
                timeout_secs: None,
                cwd: None,
            },
            tool_name: "bash".to_string(),
            tool_call_id: call_id.to_string(),
            llm_response_id: response_id.to_string(),
            security_risk: SecurityRisk::Unknown,
        })
    }

    fn observation(seq: usize, call_id: &str, action_id: &EventId) -> Event {
        Event::Observation(ObservationEvent {
            meta: meta(seq, SourceType::Environment),
            observation: Observation::Bash {
                stdout: String::new(),
                stderr: String::new(),
                exit_code: Some(0),
                timeout_occurred: false,
                is_error: false,
            },
            action_id: action_id.clone(),
            tool_name: "bash".to_string(),
            tool_call_id: call_id.to_string(),
        })
    }

    fn condensation(seq: usize, forgotten: Vec<EventId>) -> Event {
        Event::Condensation(Condensation {
            meta: meta(seq, SourceType::Agent),
            forgotten_event_ids: forgotten,
            summary: None,
            summary_offset: None,
        })
    }

    #[test]
    fn plain_messages_pass_through() {
        let events = vec![user_message(0, "a"), user_message(1, "b")];
        let view = View::from_events(&events);
        assert_eq!(view.len(), 2);
        assert!(!view.unhandled_condensation_request);
    }

    #[test]
    fn forgotten_events_are_dropped_along_with_the_condensation() {
        let first = user_message(0, "a");
        let first_id = first.id().clone();
        let events = vec![first, user_message(1, "b"), condensation(2, vec![first_id])];
        let view = View::from_events(&events);
        assert_eq!(view.len(), 1);
        assert_eq!(view.condensations.len(), 1);
    }

    #[test]
    fn condensation_forgetting_one_action_drops_whole_batch_and_observation() {
        // Scenario S8: A1 and A2 share a response id, O1 matches A1. A
        // condensation forgetting only A1 must remove A1, A2, and O1.
        let a1 = action(0, "call_1", "resp");
        let a2 = action(1, "call_2", "resp");
        let a1_id = a1.id().clone();
        let o1 = observation(2, "call_1", &a1_id);
        let events = vec![a1, a2, o1, condensation(3, vec![a1_id])];
        let view = View::from_events(&events);
        assert!(view.events.is_empty());
    }

    #[test]
    fn actions_without_observations_are_filtered() {
        let a = action(0, "call_1", "resp");
        let events = vec![user_message(1, "hi"), a];
        let view = View::from_events(&events);
        assert_eq!(view.len(), 1);
        assert!(matches!(view.events[0], Event::Message(_)));
    }

    #[test]
    fn matched_pairs_are_kept() {
        let a = action(0, "call_1", "resp");
        let a_id = a.id().clone();
        let o = observation(1, "call_1", &a_id);
        let view = View::from_events(&[a, o]);
        assert_eq!(view.len(), 2);
    }

    #[test]
    fn summary_is_inserted_at_offset() {
        let first = user_message(0, "a");
        let first_id = first.id().clone();
        let events = vec![
            first,
            user_message(1, "b"),
            user_message(2, "c"),
            Event::Condensation(Condensation {
                meta: meta(3, SourceType::Agent),
                forgotten_event_ids: vec![first_id],
                summary: Some("earlier chatter".to_string()),
                summary_offset: Some(1),
            }),
        ];
        let view = View::from_events(&events);
        assert_eq!(view.len(), 3);
        let Event::CondensationSummary(summary) = &view.events[1] else {
            panic!("expected summary at offset 1, got {:?}", view.events[1].kind());
        };
        assert_eq!(summary.summary, "earlier chatter");
    }

    #[test]
    fn trailing_request_is_flagged_until_condensed() {
        let mut events = vec![
            user_message(0, "a"),
            Event::CondensationRequest(CondensationRequestEvent {
                meta: meta(1, SourceType::User),
            }),
        ];
        let view = View::from_events(&events);
        assert!(view.unhandled_condensation_request);
        // Request events themselves are never shown to the LLM.
        assert_eq!(view.len(), 1);

        events.push(condensation(2, vec![]));
        let view = View::from_events(&events);
        assert!(!view.unhandled_condensation_request);
    }
}
