//! # Event Bus System
//!
//! Broadcast channel through which the player core tells the host what
//! changed: playback status, queue edits, Listen Together session activity and
//! segmented-startup progress.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     emit      ┌───────────┐
//! │ AudioEngine  ├──────────────>│           │
//! └──────────────┘               │           │     subscribe    ┌──────────┐
//!                                │ EventBus  ├─────────────────>│ Host UI  │
//! ┌──────────────┐     emit      │ (broadcast│                  └──────────┘
//! │ Controller   ├──────────────>│  channel) │     subscribe    ┌──────────┐
//! └──────────────┘               │           ├─────────────────>│ Telemetry│
//! ┌──────────────┐     emit      │           │                  └──────────┘
//! │ Group client ├──────────────>│           │
//! └──────────────┘               └───────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, QueueEvent};
//!
//! let bus = EventBus::new(64);
//! let mut rx = bus.subscribe();
//!
//! bus.emit(CoreEvent::Queue(QueueEvent::ShuffleChanged { enabled: true })).ok();
//! assert!(rx.try_recv().is_ok());
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber fell behind and missed `n`
//!   events. Non-fatal; keep receiving.
//! - **`RecvError::Closed`**: every sender was dropped. Treat as shutdown.
//!
//! Emitting with no subscribers returns an error; producers ignore it.

use core_async::sync::broadcast;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use core_async::sync::broadcast::error::{RecvError, SendError};
pub use core_async::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum published on the bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Live playback changes
    Playback(PlaybackEvent),
    /// Queue, shuffle and repeat changes
    Queue(QueueEvent),
    /// Shared listening session activity
    ListenTogether(ListenTogetherEvent),
    /// Segmented streaming startup and recovery
    Startup(StartupEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Playback(e) => e.description(),
            CoreEvent::Queue(e) => e.description(),
            CoreEvent::ListenTogether(e) => e.description(),
            CoreEvent::Startup(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Playback(PlaybackEvent::Error { .. }) => EventSeverity::Error,
            CoreEvent::Startup(StartupEvent::Exhausted { .. }) => EventSeverity::Error,
            CoreEvent::ListenTogether(ListenTogetherEvent::CommandFailed { .. }) => {
                EventSeverity::Warning
            }
            CoreEvent::Startup(StartupEvent::RetryScheduled { .. })
            | CoreEvent::Startup(StartupEvent::SessionReset { .. }) => EventSeverity::Warning,
            CoreEvent::ListenTogether(ListenTogetherEvent::Joined { .. })
            | CoreEvent::ListenTogether(ListenTogetherEvent::Left { .. })
            | CoreEvent::ListenTogether(ListenTogetherEvent::Ended { .. }) => EventSeverity::Info,
            CoreEvent::Playback(PlaybackEvent::TrackLoaded { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Playback Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum PlaybackEvent {
    /// The playback state machine moved to a new state.
    StatusChanged {
        track_id: Option<String>,
        /// Lowercase state name (`idle`, `loading`, `buffering`, `playing`, `paused`, `error`).
        status: String,
    },
    /// A track finished loading and reported its duration.
    TrackLoaded { track_id: String, duration_secs: f64 },
    /// A track reached its natural end.
    TrackEnded { track_id: String },
    /// Playback position changed (seek or progression).
    PositionChanged {
        track_id: String,
        position_secs: f64,
        duration_secs: f64,
    },
    /// Output volume or mute changed.
    VolumeChanged { volume: f32, muted: bool },
    /// Playback failed and surfaced an audio error.
    Error {
        track_id: Option<String>,
        message: String,
        recoverable: bool,
    },
    /// The surfaced audio error was cleared by an explicit reset.
    ErrorCleared,
}

impl PlaybackEvent {
    fn description(&self) -> &str {
        match self {
            PlaybackEvent::StatusChanged { .. } => "Playback status changed",
            PlaybackEvent::TrackLoaded { .. } => "Track loaded",
            PlaybackEvent::TrackEnded { .. } => "Track ended",
            PlaybackEvent::PositionChanged { .. } => "Playback position changed",
            PlaybackEvent::VolumeChanged { .. } => "Volume changed",
            PlaybackEvent::Error { .. } => "Playback error",
            PlaybackEvent::ErrorCleared => "Playback error cleared",
        }
    }
}

// ============================================================================
// Queue Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum QueueEvent {
    /// The queue was replaced or edited.
    Changed {
        length: usize,
        current_index: Option<usize>,
    },
    /// The current track moved.
    CurrentChanged { index: usize, track_id: String },
    ShuffleChanged { enabled: bool },
    /// Repeat mode changed (`off`, `one`, `all`).
    RepeatChanged { mode: String },
}

impl QueueEvent {
    fn description(&self) -> &str {
        match self {
            QueueEvent::Changed { .. } => "Queue changed",
            QueueEvent::CurrentChanged { .. } => "Current track changed",
            QueueEvent::ShuffleChanged { .. } => "Shuffle toggled",
            QueueEvent::RepeatChanged { .. } => "Repeat mode changed",
        }
    }
}

// ============================================================================
// Listen Together Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum ListenTogetherEvent {
    /// Socket connectivity changed.
    Connection { connected: bool },
    /// Joined (or rejoined) a group.
    Joined {
        group_id: String,
        host_id: String,
        is_host: bool,
    },
    /// Left a group voluntarily.
    Left { group_id: String },
    /// The host ended the group.
    Ended { group_id: String },
    MemberJoined { group_id: String, user_id: String },
    MemberLeft { group_id: String, user_id: String },
    /// An authoritative snapshot or delta was applied.
    StateApplied { group_id: String, state_version: u64 },
    /// A host command was rejected or exhausted its retries.
    CommandFailed { command: String, message: String },
}

impl ListenTogetherEvent {
    fn description(&self) -> &str {
        match self {
            ListenTogetherEvent::Connection { .. } => "Group connection changed",
            ListenTogetherEvent::Joined { .. } => "Joined listening group",
            ListenTogetherEvent::Left { .. } => "Left listening group",
            ListenTogetherEvent::Ended { .. } => "Listening group ended",
            ListenTogetherEvent::MemberJoined { .. } => "Member joined",
            ListenTogetherEvent::MemberLeft { .. } => "Member left",
            ListenTogetherEvent::StateApplied { .. } => "Group state applied",
            ListenTogetherEvent::CommandFailed { .. } => "Group command failed",
        }
    }
}

// ============================================================================
// Startup Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum StartupEvent {
    /// A segmented streaming session was created.
    SessionCreated { track_id: String, session_id: String },
    /// A stage failed and will be retried after `delay_ms`.
    RetryScheduled {
        track_id: String,
        stage: String,
        attempt: u32,
        delay_ms: u64,
    },
    /// A stage exhausted its budget and the session is being recreated.
    SessionReset { track_id: String, resets_used: u32 },
    /// Startup finished and the engine is playing the session.
    Ready { track_id: String },
    /// Startup gave up; a fresh session is required.
    Exhausted { track_id: String, reason: String },
}

impl StartupEvent {
    fn description(&self) -> &str {
        match self {
            StartupEvent::SessionCreated { .. } => "Streaming session created",
            StartupEvent::RetryScheduled { .. } => "Startup retry scheduled",
            StartupEvent::SessionReset { .. } => "Streaming session reset",
            StartupEvent::Ready { .. } => "Streaming startup ready",
            StartupEvent::Exhausted { .. } => "Streaming startup exhausted",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to events.
///
/// Cloning the bus clones the sender; every `subscribe()` creates an
/// independent receiver that sees all future events.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// when nobody is subscribed.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
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

/// A `broadcast::Receiver` with an optional predicate.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let bus = EventBus::new(16);
/// let group_only = EventStream::new(bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::ListenTogether(_)));
/// ```
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

    /// Only events matching `predicate` are returned by `recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next event that passes the filter.
    ///
    /// # Errors
    ///
    /// `RecvError::Lagged(n)` if the subscriber fell behind by `n` events,
    /// `RecvError::Closed` once all senders are gone.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Non-blocking receive. `None` when nothing matching is buffered.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
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
