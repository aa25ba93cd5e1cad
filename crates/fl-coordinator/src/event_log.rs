//! Bounded event ring buffer: push, then evict from the front once over
//! capacity. Backed by a `VecDeque` so front-eviction is O(1).

use std::collections::VecDeque;
use std::sync::Mutex;

use fl_common::{EventRecord, EventSink, EventType};
use uuid::Uuid;

const CAPACITY: usize = 1000;

pub struct EventLog {
    events: Mutex<VecDeque<EventRecord>>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(CAPACITY)),
        }
    }

    pub fn push(&self, event_type: EventType, details: serde_json::Value) -> EventRecord {
        let record = EventRecord::new(event_type, details);
        let mut events = self.events.lock().unwrap();
        events.push_back(record.clone());
        if events.len() > CAPACITY {
            events.pop_front();
        }
        record
    }

    /// Events after `since_event_id` (exclusive), oldest-first, capped at
    /// `limit`. If `since_event_id` is `None` or no longer in the window
    /// (evicted), returns from the oldest event still held. Returns the
    /// id of the last event in the page alongside the page itself, for
    /// the caller to pass back as the next `since_event_id`.
    pub fn since(&self, since_event_id: Option<Uuid>, limit: usize) -> (Vec<EventRecord>, Option<Uuid>) {
        let events = self.events.lock().unwrap();
        let start_index = match since_event_id {
            Some(id) => events
                .iter()
                .position(|e| e.event_id == id)
                .map(|idx| idx + 1)
                .unwrap_or(0),
            None => 0,
        };

        let page: Vec<EventRecord> = events.iter().skip(start_index).take(limit).cloned().collect();
        let last_id = page.last().map(|e| e.event_id);
        (page, last_id)
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventSink for EventLog {
    fn emit(&self, event_type: EventType, details: serde_json::Value) {
        self.push(event_type, details);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_beyond_capacity_evicts_from_the_front() {
        let log = EventLog::new();
        let mut first_id = None;
        for i in 0..CAPACITY + 5 {
            let record = log.push(EventType::RoundCompleted, serde_json::json!({"i": i}));
            if i == 0 {
                first_id = Some(record.event_id);
            }
        }
        assert_eq!(log.len(), CAPACITY);
        let (page, _) = log.since(None, CAPACITY);
        assert!(!page.iter().any(|e| Some(e.event_id) == first_id));
    }

    #[test]
    fn since_returns_events_strictly_after_the_given_id() {
        let log = EventLog::new();
        let a = log.push(EventType::RoundCompleted, serde_json::json!({}));
        let _b = log.push(EventType::RoundCompleted, serde_json::json!({}));
        let c = log.push(EventType::RoundCompleted, serde_json::json!({}));

        let (page, last_id) = log.since(Some(a.event_id), 10);
        assert_eq!(page.len(), 2);
        assert_eq!(last_id, Some(c.event_id));
    }

    #[test]
    fn since_with_no_cursor_returns_everything() {
        let log = EventLog::new();
        log.push(EventType::TrainingPaused, serde_json::json!({}));
        log.push(EventType::TrainingResumed, serde_json::json!({}));
        let (page, _) = log.since(None, 10);
        assert_eq!(page.len(), 2);
    }

    #[test]
    fn since_respects_limit() {
        let log = EventLog::new();
        for _ in 0..5 {
            log.push(EventType::RoundCompleted, serde_json::json!({}));
        }
        let (page, _) = log.since(None, 2);
        assert_eq!(page.len(), 2);
    }
}
