//! # Playback Error Types
//!
//! Error types for the audio engine, queue and segmented startup.

use crate::retry_hint::RetryHint;
use bridge_traits::BridgeError;
use thiserror::Error;

/// Errors that can occur during playback operations.
#[derive(Error, Debug)]
pub enum PlaybackError {
    // ========================================================================
    // Engine Errors
    // ========================================================================
    /// The native primitive could not load the source (after any retries).
    #[error("Failed to load audio source: {0}")]
    LoadFailed(String),

    /// The native primitive refused to start playback.
    #[error("Playback refused: {0}")]
    PlayFailed(String),

    /// Playback is waiting for the platform to unlock audio output.
    #[error("Playback blocked until audio is unlocked")]
    PlayBlocked,

    /// A newer load replaced this one before it finished.
    #[error("Load superseded by a newer request")]
    Superseded,

    /// Attempted operation when no track is loaded.
    #[error("No track loaded")]
    NoTrackLoaded,

    /// Invalid volume value (must be in range [0.0, 1.0]).
    #[error("Invalid volume: {0} (must be between 0.0 and 1.0)")]
    InvalidVolume(f32),

    // ========================================================================
    // Queue Errors
    // ========================================================================
    /// Index outside the current queue.
    #[error("Queue index {index} out of bounds (length {len})")]
    IndexOutOfBounds { index: usize, len: usize },

    /// Operation needs a non-empty queue.
    #[error("Queue is empty")]
    EmptyQueue,

    // ========================================================================
    // Segmented Streaming Errors
    // ========================================================================
    /// Session creation returned an unusable response.
    #[error("Streaming session request failed (status {status}): {message}")]
    SessionRequestFailed {
        status: u16,
        message: String,
        hint: Option<RetryHint>,
    },

    /// The manifest never became ready within the stage budget.
    #[error("Manifest not ready: {0}")]
    ManifestNotReady(String),

    /// Startup gave up; a fresh session is required.
    #[error("Streaming startup exhausted at {stage}: {reason}")]
    StartupExhausted { stage: String, reason: String },

    /// Track has no source that can be streamed.
    #[error("Track has no playable source: {0}")]
    NoPlayableSource(String),

    // ========================================================================
    // Generic Errors
    // ========================================================================
    /// Error surfaced by a host bridge.
    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    /// Configuration value rejected by `validate()`.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Internal error (should not occur in normal operation).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PlaybackError {
    /// Returns `true` if this error is transient and the operation can be retried.
    pub fn is_transient(&self) -> bool {
        match self {
            PlaybackError::ManifestNotReady(_) | PlaybackError::PlayBlocked => true,
            PlaybackError::SessionRequestFailed { status, hint, .. } => match hint {
                Some(hint) => hint.should_retry(),
                None => *status == 0 || *status == 408 || *status == 429 || *status >= 500,
            },
            PlaybackError::Bridge(BridgeError::Network(_))
            | PlaybackError::Bridge(BridgeError::Timeout(_)) => true,
            _ => false,
        }
    }

    /// Server-suggested delay before retrying, if any.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            PlaybackError::SessionRequestFailed {
                hint: Some(hint), ..
            } => hint.retry_after_ms,
            _ => None,
        }
    }

    /// Returns `true` for terminal startup outcomes that require a new session.
    pub fn requires_fresh_session(&self) -> bool {
        matches!(self, PlaybackError::StartupExhausted { .. })
    }
}

/// Result type for playback operations.
pub type Result<T> = std::result::Result<T, PlaybackError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(PlaybackError::ManifestNotReady("404".into()).is_transient());
        assert!(PlaybackError::SessionRequestFailed {
            status: 503,
            message: "busy".into(),
            hint: None,
        }
        .is_transient());
        assert!(!PlaybackError::SessionRequestFailed {
            status: 403,
            message: "forbidden".into(),
            hint: None,
        }
        .is_transient());
        assert!(PlaybackError::Bridge(BridgeError::Timeout("ack".into())).is_transient());
        assert!(!PlaybackError::LoadFailed("decode".into()).is_transient());
    }

    #[test]
    fn retry_hint_overrides_status() {
        let err = PlaybackError::SessionRequestFailed {
            status: 409,
            message: "session warming".into(),
            hint: Some(RetryHint {
                retryable: Some(true),
                retry_after_ms: Some(750),
            }),
        };
        assert!(err.is_transient());
        assert_eq!(err.retry_after_ms(), Some(750));
    }

    #[test]
    fn exhausted_startup_requires_fresh_session() {
        let err = PlaybackError::StartupExhausted {
            stage: "engine_load".into(),
            reason: "exhausted_stage".into(),
        };
        assert!(err.requires_fresh_session());
        assert!(!err.is_transient());
        assert!(err.to_string().contains("engine_load"));
    }
}
