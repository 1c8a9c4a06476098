//! # Event Bus System
//!
//! Provides an event-driven architecture for the voice messaging core using
//! `tokio::sync::broadcast`. The cache manager and the playback coordinator
//! publish through it; the UI layer subscribes.
//!
//! ## Overview
//!
//! [`CoreEvent`] carries either a full [`MessageState`] snapshot (built from
//! [`CacheState`], [`PlaybackState`] and [`ErrorKind`]) or a cache-wide
//! [`CacheEvent`]. [`EventBus`] fans events out; [`EventStream`] narrows a
//! subscription, typically to one message.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐    emit      ┌───────────┐
//! │ Cache Manager ├─────────────>│           │     subscribe    ┌────────────┐
//! └───────────────┘              │ EventBus  ├─────────────────>│  UI layer  │
//!                                │ (broadcast│                  └────────────┘
//! ┌───────────────┐    emit      │  channel) │     subscribe    ┌────────────┐
//! │  Coordinator  ├─────────────>│           ├─────────────────>│ Subscriber │
//! └───────────────┘              └───────────┘                  └────────────┘
//! ```
//!
//! ## Usage
//!
//! ### Following one message
//!
//! ```rust
//! use core_runtime::events::{EventBus, EventStream};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let event_bus = EventBus::new(100);
//! let mut stream = EventStream::new(event_bus.subscribe()).for_message("msg-42");
//!
//! tokio::spawn(async move {
//!     while let Ok(event) = stream.recv().await {
//!         println!("msg-42 changed: {:?}", event);
//!     }
//! });
//! # }
//! ```
//!
//! ## Error Handling
//!
//! A subscriber that falls more than the buffer size behind gets
//! `RecvError::Lagged(n)`. Keep reading: each [`MessageState`] is a full
//! snapshot, so the next event for a message is self-contained.
//! `RecvError::Closed` means the core was dropped.
//!
//! ## Defaults
//!
//! Every state enum has an explicit default (`NotCached`, `Idle`). A message
//! the core knows nothing about is reported with those defaults, never as
//! cached or playing.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Per-subscriber buffer.
///
/// Position polling publishes a few events per second per playing message;
/// download progress publishes per percent. Subscribers that can't keep up
/// receive `RecvError::Lagged`.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 256;

/// Default playback rate.
pub const DEFAULT_SPEED: f32 = 1.0;

// ============================================================================
// Shared state vocabulary
// ============================================================================

/// Cache-side state of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CacheState {
    /// No local file and no live download.
    #[default]
    NotCached,
    /// A download task exists but no worker has picked it up yet.
    Queued,
    /// A worker is transferring bytes.
    Downloading,
    /// A verified local file is registered.
    Cached,
    /// The last download attempt ended in a terminal failure.
    Failed,
}

/// Playback-side state of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PlaybackState {
    #[default]
    Idle,
    Preparing,
    Ready,
    Playing,
    Paused,
    Completed,
    Error,
}

/// Failure category reported alongside a state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Connection trouble or a retryable server answer, after the retry
    /// ceiling was exhausted.
    NetworkTransient,
    /// The server answered with a permanent failure (e.g. 404).
    NetworkPermanent,
    /// Writing or promoting the local file failed.
    Storage,
    /// A cached file did not match its recorded size.
    CorruptFile,
    /// The audio engine failed to load or play the file.
    Engine,
    /// The download was cancelled by a caller.
    Cancelled,
}

/// Full snapshot of one message's observable state.
///
/// Published on every transition so subscribers never need to merge partial
/// updates themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageState {
    pub message_id: String,
    pub cache_state: CacheState,
    pub playback_state: PlaybackState,
    pub position_ms: u64,
    pub duration_ms: u64,
    /// Download progress in percent (0-100). Meaningful while `Downloading`.
    pub download_pct: u8,
    /// Normalised peak amplitudes in `[0, 1]`, empty until extracted.
    pub waveform_samples: Vec<f32>,
    pub speed: f32,
    pub error_kind: Option<ErrorKind>,
}

impl MessageState {
    /// State of a message the core has no record of.
    pub fn new(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            cache_state: CacheState::default(),
            playback_state: PlaybackState::default(),
            position_ms: 0,
            duration_ms: 0,
            download_pct: 0,
            waveform_samples: Vec::new(),
            speed: DEFAULT_SPEED,
            error_kind: None,
        }
    }

    /// Returns `true` when nothing distinguishes this message from an unknown one.
    pub fn is_default(&self) -> bool {
        self.cache_state == CacheState::NotCached
            && self.playback_state == PlaybackState::Idle
            && self.position_ms == 0
            && self.error_kind.is_none()
            && (self.speed - DEFAULT_SPEED).abs() < f32::EPSILON
    }
}

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum published and received through the event bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// A message's cache or playback state changed.
    MessageState(MessageState),
    /// Cache-wide housekeeping happened.
    Cache(CacheEvent),
}

impl CoreEvent {
    /// Short log line for the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::MessageState(state) if state.error_kind.is_some() => {
                "Message entered an error state"
            }
            CoreEvent::MessageState(_) => "Message state changed",
            CoreEvent::Cache(e) => e.description(),
        }
    }

    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::MessageState(state) if state.error_kind.is_some() => EventSeverity::Error,
            CoreEvent::Cache(CacheEvent::CorruptionDetected { .. }) => EventSeverity::Warning,
            CoreEvent::Cache(CacheEvent::Cleared { .. })
            | CoreEvent::Cache(CacheEvent::Reconciled { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }

    /// Message id the event refers to, if it is about a single message.
    pub fn message_id(&self) -> Option<&str> {
        match self {
            CoreEvent::MessageState(state) => Some(&state.message_id),
            CoreEvent::Cache(CacheEvent::Evicted { message_id, .. })
            | CoreEvent::Cache(CacheEvent::CorruptionDetected { message_id, .. }) => {
                Some(message_id)
            }
            CoreEvent::Cache(_) => None,
        }
    }
}

/// Log level used when the core records an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

/// Why an entry was evicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvictionReason {
    /// Entry count exceeded `max_cache_entries`.
    CountLimit,
    /// Total size exceeded `max_cache_bytes`.
    SizeLimit,
    /// Entry was older than the retention window at startup.
    Retention,
}

/// Cache-wide notifications.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum CacheEvent {
    /// An entry and its file were removed by the eviction policy.
    Evicted {
        message_id: String,
        size_bytes: u64,
        reason: EvictionReason,
    },
    /// A cached file no longer matched its recorded size and was discarded.
    CorruptionDetected {
        message_id: String,
        expected_bytes: u64,
        actual_bytes: u64,
    },
    /// `clear_cache` finished.
    Cleared {
        removed: usize,
        freed_bytes: u64,
        /// Entries kept because they were playing or downloading.
        skipped: usize,
    },
    /// Startup reconciliation finished.
    Reconciled {
        loaded: usize,
        dropped_missing: usize,
        expired: usize,
        orphans_removed: usize,
    },
}

impl CacheEvent {
    fn description(&self) -> &str {
        match self {
            CacheEvent::Evicted { .. } => "Cache entry evicted",
            CacheEvent::CorruptionDetected { .. } => "Corrupted cache file discarded",
            CacheEvent::Cleared { .. } => "Cache cleared",
            CacheEvent::Reconciled { .. } => "Cache reconciled at startup",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Broadcast channel shared by the cache manager, the coordinator and every
/// UI subscriber. Clones publish into the same channel.
///
/// # Example
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, MessageState};
///
/// # #[tokio::main]
/// # async fn main() {
/// let bus = EventBus::new(16);
/// let mut ui = bus.subscribe();
///
/// bus.emit(CoreEvent::MessageState(MessageState::new("msg-1"))).ok();
///
/// let event = ui.recv().await.unwrap();
/// assert_eq!(event.message_id(), Some("msg-1"));
/// # }
/// ```
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// `capacity` events are buffered per subscriber (at least one).
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Returns how many subscribers got the event. Fails only when nobody
    /// is listening, which publishers ignore.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Events published from now on; nothing is replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Creates a filtered stream for a single message id.
    pub fn subscribe_message(&self, message_id: impl Into<String>) -> EventStream {
        EventStream::new(self.subscribe()).for_message(message_id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A subscription that skips events rejected by its filter.
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Replace the filter; `recv` only returns events it accepts.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    /// Keeps only events about `message_id`.
    pub fn for_message(self, message_id: impl Into<String>) -> Self {
        let message_id = message_id.into();
        self.filter(move |event| event.message_id() == Some(message_id.as_str()))
    }

    fn matches(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Next accepted event. Lag and closure are passed through unchanged.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.matches(&event) {
                return Ok(event);
            }
        }
    }

    /// Non-blocking [`recv`](Self::recv); `None` when the buffer is drained.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.matches(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
