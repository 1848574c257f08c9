//! Broadcast of run events with a history ring buffer.
//!
//! The bus is the kernel's [`RunObserver`]: every lifecycle event and
//! progress update the executor emits is wrapped in an [`Event`], stored in
//! the history buffer, and broadcast to subscribers.

use std::collections::VecDeque;
use std::sync::Mutex;
use taskloom_runtime::observer::RunObserver;
use taskloom_types::event::{Event, EventPayload, RunEvent};
use taskloom_types::run::{ProgressUpdate, RunId};
use tokio::sync::broadcast;
use tracing::debug;

/// Default number of events retained in the history ring buffer.
pub const HISTORY_SIZE: usize = 1000;

/// Broadcast capacity per subscriber before lagging.
const CHANNEL_CAPACITY: usize = 1024;

pub struct EventBus {
    sender: broadcast::Sender<Event>,
    history: Mutex<VecDeque<Event>>,
    capacity: usize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_history(HISTORY_SIZE)
    }

    /// Create a bus retaining at most `capacity` events.
    pub fn with_history(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            history: Mutex::new(VecDeque::with_capacity(capacity.min(HISTORY_SIZE))),
            capacity,
        }
    }

    /// Record and broadcast an event.
    pub fn publish(&self, payload: EventPayload) {
        let event = Event::new(payload);
        debug!(event_id = %event.id, run_id = %event.run_id, "Publishing event");

        if self.capacity > 0 {
            let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
            if history.len() >= self.capacity {
                history.pop_front();
            }
            history.push_back(event.clone());
        }

        // No subscribers is fine.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Most recent events, newest first.
    pub fn history(&self, limit: usize) -> Vec<Event> {
        let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        history.iter().rev().take(limit).cloned().collect()
    }

    /// Every retained event for one run, oldest first.
    pub fn history_for(&self, run_id: RunId) -> Vec<Event> {
        let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        history
            .iter()
            .filter(|e| e.run_id == run_id)
            .cloned()
            .collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl RunObserver for EventBus {
    fn on_progress(&self, update: &ProgressUpdate) {
        self.publish(EventPayload::Progress(update.clone()));
    }

    fn on_event(&self, event: &RunEvent) {
        self.publish(EventPayload::Run(event.clone()));
    }
}
