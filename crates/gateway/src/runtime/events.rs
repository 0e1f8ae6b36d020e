//! Per-session event queue for background-to-foreground injection.
//!
//! Cron results, spawn completions, and other background producers push
//! short texts here; the next agent turn drains them into one synthetic
//! `[SYSTEM EVENT]` user message. Bounded at 20 entries (oldest dropped);
//! consecutive identical texts are deduplicated at enqueue time.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use bc_domain::Result;
use bc_state::{read_json, write_json_atomic, StateLayout};

pub const MAX_QUEUED_EVENTS: usize = 20;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedEvent {
    pub text: String,
    pub ts: i64,
}

pub struct EventQueues {
    layout: StateLayout,
    guards: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl EventQueues {
    pub fn new(layout: StateLayout) -> Self {
        Self {
            layout,
            guards: Mutex::new(HashMap::new()),
        }
    }

    fn guard(&self, session_key: &str) -> Arc<Mutex<()>> {
        self.guards
            .lock()
            .entry(session_key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn path(&self, session_key: &str) -> std::path::PathBuf {
        self.layout
            .events_dir()
            .join(format!("{}.json", bc_state::safe_key(session_key)))
    }

    /// Enqueue an event text for a session.
    pub fn enqueue(&self, session_key: &str, text: &str) -> Result<()> {
        let guard = self.guard(session_key);
        let _held = guard.lock();

        let path = self.path(session_key);
        let mut events: Vec<QueuedEvent> = read_json(&path)?.unwrap_or_default();

        // Consecutive identical text is dropped.
        if events.last().map(|e| e.text.as_str()) == Some(text) {
            return Ok(());
        }

        events.push(QueuedEvent {
            text: text.to_string(),
            ts: Utc::now().timestamp_millis(),
        });
        if events.len() > MAX_QUEUED_EVENTS {
            let overflow = events.len() - MAX_QUEUED_EVENTS;
            events.drain(0..overflow);
        }
        write_json_atomic(&path, &events)
    }

    /// Drain all queued events for a session.
    pub fn drain(&self, session_key: &str) -> Result<Vec<QueuedEvent>> {
        let guard = self.guard(session_key);
        let _held = guard.lock();

        let path = self.path(session_key);
        let events: Vec<QueuedEvent> = read_json(&path)?.unwrap_or_default();
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(events)
    }

    /// Render drained events as one synthetic user message, or `None`
    /// when the queue was empty.
    pub fn drain_as_message(&self, session_key: &str) -> Result<Option<String>> {
        let events = self.drain(session_key)?;
        if events.is_empty() {
            return Ok(None);
        }
        let body: Vec<String> = events.into_iter().map(|e| e.text).collect();
        Ok(Some(format!("[SYSTEM EVENT]\n{}", body.join("\n"))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queues() -> (tempfile::TempDir, EventQueues) {
        let dir = tempfile::tempdir().unwrap();
        let layout = StateLayout::new(dir.path()).unwrap();
        (dir, EventQueues::new(layout))
    }

    #[test]
    fn enqueue_then_drain_in_order() {
        let (_dir, q) = queues();
        q.enqueue("s1", "first").unwrap();
        q.enqueue("s1", "second").unwrap();

        let drained = q.drain("s1").unwrap();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].text, "first");
        assert!(q.drain("s1").unwrap().is_empty());
    }

    #[test]
    fn consecutive_duplicates_are_dropped() {
        let (_dir, q) = queues();
        q.enqueue("s1", "tick").unwrap();
        q.enqueue("s1", "tick").unwrap();
        q.enqueue("s1", "tock").unwrap();
        q.enqueue("s1", "tick").unwrap();

        let drained = q.drain("s1").unwrap();
        let texts: Vec<&str> = drained.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["tick", "tock", "tick"]);
    }

    #[test]
    fn queue_is_bounded_oldest_dropped() {
        let (_dir, q) = queues();
        for i in 0..25 {
            q.enqueue("s1", &format!("event-{i}")).unwrap();
        }
        let drained = q.drain("s1").unwrap();
        assert_eq!(drained.len(), MAX_QUEUED_EVENTS);
        assert_eq!(drained[0].text, "event-5");
        assert_eq!(drained.last().unwrap().text, "event-24");
    }

    #[test]
    fn drain_as_message_formats_system_event() {
        let (_dir, q) = queues();
        assert!(q.drain_as_message("s1").unwrap().is_none());

        q.enqueue("s1", "cron job done").unwrap();
        q.enqueue("s1", "spawn finished").unwrap();
        let msg = q.drain_as_message("s1").unwrap().unwrap();
        assert!(msg.starts_with("[SYSTEM EVENT]\n"));
        assert!(msg.contains("cron job done"));
        assert!(msg.contains("spawn finished"));
    }
}
