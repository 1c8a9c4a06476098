//! Per-message state publication
//!
//! Cache and playback both describe the same message, so their updates are
//! merged into one [`MessageState`] per message and the full snapshot is
//! published on every change. Messages back in the default state are
//! forgotten, keeping memory proportional to messages with live state.

use crate::cache::entry::MessageId;
use core_runtime::events::{
    CacheEvent, CoreEvent, EventBus, EventSeverity, EventStream, MessageState, Receiver,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{debug, info, trace, warn};

pub struct StateNotifier {
    bus: EventBus,
    states: Mutex<HashMap<MessageId, MessageState>>,
}

impl StateNotifier {
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Apply `change` to the message's state and publish the result.
    pub fn update<F>(&self, message_id: &MessageId, change: F) -> MessageState
    where
        F: FnOnce(&mut MessageState),
    {
        let mut states = self.states.lock();
        let state = states
            .entry(message_id.clone())
            .or_insert_with(|| MessageState::new(message_id.as_str()));
        change(state);
        let snapshot = state.clone();

        if snapshot.is_default() {
            states.remove(message_id);
        }

        // Published under the lock so subscribers see updates for one
        // message in the order they were applied.
        let delivered = self.bus.emit(CoreEvent::MessageState(snapshot.clone())).unwrap_or(0);
        trace!(
            message_id = %message_id,
            cache_state = ?snapshot.cache_state,
            playback_state = ?snapshot.playback_state,
            delivered,
            "Published message state"
        );
        snapshot
    }

    /// Current state, or the default state for unknown messages.
    pub fn snapshot(&self, message_id: &MessageId) -> MessageState {
        self.states
            .lock()
            .get(message_id)
            .cloned()
            .unwrap_or_else(|| MessageState::new(message_id.as_str()))
    }

    pub fn publish_cache_event(&self, event: CacheEvent) {
        let event = CoreEvent::Cache(event);
        let message_id = event.message_id().unwrap_or("-").to_string();
        match event.severity() {
            EventSeverity::Error | EventSeverity::Warning => {
                warn!(message_id = %message_id, "{}", event.description())
            }
            EventSeverity::Info => info!("{}", event.description()),
            EventSeverity::Debug => debug!(message_id = %message_id, "{}", event.description()),
        }
        let _ = self.bus.emit(event);
    }

    /// Number of messages with non-default state.
    pub fn tracked(&self) -> usize {
        self.states.lock().len()
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.bus.subscribe()
    }

    pub fn subscribe_message(&self, message_id: &MessageId) -> EventStream {
        self.bus.subscribe_message(message_id.as_str())
    }
}

impl Default for StateNotifier {
    fn default() -> Self {
        Self::new(EventBus::default())
    }
}

impl std::fmt::Debug for StateNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateNotifier")
            .field("tracked", &self.tracked())
            .finish()
    }
}
