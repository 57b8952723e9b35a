//! Append-only, disk-backed event log.
//!
//! One log per conversation. Events live in memory as an ordered `Vec` and
//! on disk as one JSON file per event under the conversation's
//! `event_service/events/` directory. Because event ids sort in assignment
//! order, reopening a log is a directory scan followed by an id sort.
//!
//! Appends are the only mutation. Each append persists the event file
//! atomically before the event becomes visible, then invokes the registered
//! on-append callback synchronously.

use crate::agenthub::event::{Event, EventId};
use crate::agenthub::models::{EventPage, EventSortOrder};
use crate::agenthub::persist;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::fs;
use std::io;
use std::path::PathBuf;

/// Errors surfaced by log reads.
#[derive(Debug, Clone)]
pub enum EventLogError {
    /// The supplied page cursor could not be interpreted.
    InvalidCursor(String),
    /// The requested index is past the end of the log.
    OutOfRange(usize),
    /// No event with the requested id exists.
    NotFound(String),
}

impl fmt::Display for EventLogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventLogError::InvalidCursor(cursor) => write!(f, "Invalid page cursor: {}", cursor),
            EventLogError::OutOfRange(index) => write!(f, "Event index out of range: {}", index),
            EventLogError::NotFound(id) => write!(f, "Event not found: {}", id),
        }
    }
}

impl Error for EventLogError {}

type OnAppend = Box<dyn Fn(&Event) + Send + Sync>;

/// The ordered, persistent event sequence of one conversation.
pub struct EventLog {
    events_dir: PathBuf,
    events: Vec<Event>,
    index_by_id: HashMap<EventId, usize>,
    on_append: Option<OnAppend>,
}

impl EventLog {
    /// Open (or create) the log rooted at `events_dir`, rebuilding indices
    /// by scanning existing event files.
    pub fn open(events_dir: PathBuf) -> io::Result<Self> {
        fs::create_dir_all(&events_dir)?;
        let mut events: Vec<Event> = Vec::new();
        for entry in fs::read_dir(&events_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let event: Event = persist::read_json(&path)?;
            events.push(event);
        }
        // Ids sort in assignment order, so an id sort restores the log order.
        events.sort_by(|a, b| a.id().cmp(b.id()));
        let index_by_id = events
            .iter()
            .enumerate()
            .map(|(index, event)| (event.id().clone(), index))
            .collect();
        Ok(Self {
            events_dir,
            events,
            index_by_id,
            on_append: None,
        })
    }

    /// Register the callback invoked synchronously after every append.
    pub fn set_on_append(&mut self, callback: OnAppend) {
        self.on_append = Some(callback);
    }

    /// Sequence number the next appended event will occupy.
    pub fn next_seq(&self) -> usize {
        self.events.len()
    }

    /// Append an event: persist it, index it, fire the callback, return the
    /// assigned index. Fails only on persistence errors.
    pub fn append(&mut self, event: Event) -> io::Result<usize> {
        debug_assert!(event.is_persisted(), "synthesized events are not logged");
        let path = self.events_dir.join(format!("{}.json", event.id()));
        persist::write_json_atomic(&path, &event)?;

        let index = self.events.len();
        self.index_by_id.insert(event.id().clone(), index);
        self.events.push(event);
        if let Some(callback) = &self.on_append {
            callback(&self.events[index]);
        }
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// All events in order. Used to build views.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn get_by_index(&self, index: usize) -> Result<&Event, EventLogError> {
        self.events.get(index).ok_or(EventLogError::OutOfRange(index))
    }

    pub fn get_by_id(&self, id: &str) -> Result<&Event, EventLogError> {
        self.index_by_id
            .get(id)
            .map(|index| &self.events[*index])
            .ok_or_else(|| EventLogError::NotFound(id.to_string()))
    }

    /// Fetch a batch of events by id, aligned with the input. Missing
    /// entries are `None`.
    pub fn batch_get(&self, ids: &[String]) -> Vec<Option<Event>> {
        ids.iter()
            .map(|id| {
                self.index_by_id
                    .get(id.as_str())
                    .map(|index| self.events[*index].clone())
            })
            .collect()
    }

    /// Exact count of events matching the kind filter.
    pub fn count(&self, kind_filter: Option<&str>) -> usize {
        match kind_filter {
            None => self.events.len(),
            Some(kind) => self.events.iter().filter(|e| e.kind() == kind).count(),
        }
    }

    /// Paged, filtered search. The cursor encodes the log index of the next
    /// item for the given sort order, so it stays valid across appends.
    pub fn search(
        &self,
        page_id: Option<&str>,
        limit: usize,
        kind_filter: Option<&str>,
        sort_order: EventSortOrder,
    ) -> Result<EventPage, EventLogError> {
        let cursor = match page_id {
            None => None,
            Some(raw) => Some(
                raw.parse::<usize>()
                    .map_err(|_| EventLogError::InvalidCursor(raw.to_string()))?,
            ),
        };

        let matching: Vec<usize> = self
            .events
            .iter()
            .enumerate()
            .filter(|(_, event)| kind_filter.map_or(true, |kind| event.kind() == kind))
            .map(|(index, _)| index)
            .collect();

        let ordered: Vec<usize> = match sort_order {
            EventSortOrder::Timestamp => matching,
            EventSortOrder::TimestampDesc => matching.into_iter().rev().collect(),
        };

        let start = match cursor {
            None => 0,
            Some(cursor_index) => ordered
                .iter()
                .position(|&index| index == cursor_index)
                .ok_or_else(|| EventLogError::InvalidCursor(cursor_index.to_string()))?,
        };

        let items: Vec<Event> = ordered
            .iter()
            .skip(start)
            .take(limit)
            .map(|&index| self.events[index].clone())
            .collect();
        let next_page_id = ordered.get(start + items.len()).map(|i| i.to_string());

        Ok(EventPage {
            items,
            next_page_id,
        })
    }
}
