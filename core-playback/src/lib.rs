//! # Playback Module
//!
//! Local playback building blocks for the player core.
//!
//! ## Overview
//!
//! This module handles:
//! - The audio engine adapter around the platform's native sound primitive
//!   (load/retry/preload/seek-lock/cleanup)
//! - The playback state machine (`Idle`, `Loading`, `Buffering`, `Playing`,
//!   `Paused`, `Error`)
//! - The play queue with shuffle, repeat and the "Up Next" cursor
//! - Segmented streaming startup: the session client, the pure recovery
//!   policy and the staged runner that applies it
//!
//! Decoding is left entirely to the native primitive behind
//! [`bridge_traits::NativeAudioBackend`].

pub mod config;
pub mod engine;
pub mod error;
pub mod navigation;
pub mod queue;
pub mod retry_hint;
pub mod segmented_session;
pub mod segmented_startup;
pub mod shuffle;
pub mod startup_recovery;
pub mod state_machine;
pub mod track;

pub use config::{AudioEngineConfig, StartupRecoveryPolicy};
pub use engine::{AudioEngine, EngineEvent, LoadOptions};
pub use error::{PlaybackError, Result};
pub use navigation::{resolve_queue_navigation_index, NavigationAction, RepeatMode};
pub use queue::{QueueState, RemoveOutcome};
pub use retry_hint::{parse_retry_hint, RetryHint, RetryHintBounds};
pub use segmented_session::{
    SegmentedSession, SegmentedSessionClient, SessionRequest, StreamQuality,
};
pub use segmented_startup::SegmentedStartupRunner;
pub use shuffle::generate_separated_shuffle_indices;
pub use startup_recovery::{
    resolve_handoff_recovery_startup_eligibility, resolve_segmented_startup_recovery_backoff_delay_ms,
    resolve_startup_recovery_decision, should_attempt_segmented_recovery_on_unexpected_pause,
    SegmentedStartupRecoveryState, StartupRecoveryAction, StartupRecoveryDecision, StartupStage,
};
pub use state_machine::{PlaybackInput, PlaybackLocalState, PlaybackStateMachine, PlaybackStatus};
pub use track::{AlbumRef, ArtistRef, SharedTrack, StreamSource, Track};
