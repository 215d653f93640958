//! # Playback Configuration
//!
//! Tunables for the audio engine adapter and the segmented startup recovery
//! policy.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Audio engine adapter configuration.
///
/// Controls load retries, play retries, the seek lock and the cleanup fade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioEngineConfig {
    /// Maximum load retries on platforms that report transient load errors.
    ///
    /// Default: 3.
    #[serde(default = "default_max_load_retries")]
    pub max_load_retries: u32,

    /// Base delay of the linear load backoff (`attempt * base`).
    ///
    /// Default: 500 ms.
    #[serde(default = "default_load_retry_base_delay_ms")]
    pub load_retry_base_delay_ms: u64,

    /// Fixed delay before the single play retry.
    ///
    /// Default: 250 ms.
    #[serde(default = "default_play_retry_delay_ms")]
    pub play_retry_delay_ms: u64,

    /// How long a seek suppresses far-away position reports.
    ///
    /// Default: 300 ms.
    #[serde(default = "default_seek_lock_timeout_ms")]
    pub seek_lock_timeout_ms: u64,

    /// Distance from the seek target (seconds) a reported position may have
    /// and still count as confirming the seek.
    ///
    /// Default: 2.0 s.
    #[serde(default = "default_seek_tolerance_secs")]
    pub seek_tolerance_secs: f64,

    /// Fade-out applied before tearing down a handle.
    ///
    /// Default: 10 ms.
    #[serde(default = "default_fade_duration_ms")]
    pub fade_duration_ms: u64,
}

impl Default for AudioEngineConfig {
    fn default() -> Self {
        Self {
            max_load_retries: default_max_load_retries(),
            load_retry_base_delay_ms: default_load_retry_base_delay_ms(),
            play_retry_delay_ms: default_play_retry_delay_ms(),
            seek_lock_timeout_ms: default_seek_lock_timeout_ms(),
            seek_tolerance_secs: default_seek_tolerance_secs(),
            fade_duration_ms: default_fade_duration_ms(),
        }
    }
}

impl AudioEngineConfig {
    /// Configuration for tests and hosts without real I/O: no delays.
    pub fn immediate() -> Self {
        Self {
            load_retry_base_delay_ms: 0,
            play_retry_delay_ms: 0,
            fade_duration_ms: 0,
            ..Default::default()
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.seek_lock_timeout_ms == 0 {
            return Err("seek_lock_timeout_ms must be > 0".to_string());
        }

        if !self.seek_tolerance_secs.is_finite() || self.seek_tolerance_secs < 0.0 {
            return Err("seek_tolerance_secs must be a non-negative number".to_string());
        }

        if self.max_load_retries > 10 {
            return Err("max_load_retries cannot exceed 10".to_string());
        }

        Ok(())
    }

    pub fn load_retry_delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.load_retry_base_delay_ms.saturating_mul(attempt as u64))
    }

    pub fn play_retry_delay(&self) -> Duration {
        Duration::from_millis(self.play_retry_delay_ms)
    }

    pub fn fade_duration(&self) -> Duration {
        Duration::from_millis(self.fade_duration_ms)
    }
}

/// Segmented startup recovery policy.
///
/// Per-stage retry budgets, the overall recovery window, the session reset
/// budget and backoff parameters. Consumed by
/// [`resolve_startup_recovery_decision`](crate::startup_recovery::resolve_startup_recovery_decision).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartupRecoveryPolicy {
    /// Attempts allowed for session creation before a reset.
    #[serde(default = "default_session_create_limit")]
    pub session_create_limit: i64,

    /// Attempts allowed while waiting for the manifest.
    #[serde(default = "default_manifest_readiness_limit")]
    pub manifest_readiness_limit: i64,

    /// Attempts allowed for the engine load.
    #[serde(default = "default_engine_load_limit")]
    pub engine_load_limit: i64,

    /// Overall recovery window. Default: 45 s.
    #[serde(default = "default_window_max_ms")]
    pub window_max_ms: u64,

    /// Session resets allowed inside one window. Default: 1.
    #[serde(default = "default_max_session_resets")]
    pub max_session_resets: u32,

    #[serde(default = "default_backoff_base_delay_ms")]
    pub backoff_base_delay_ms: u64,

    #[serde(default = "default_backoff_max_delay_ms")]
    pub backoff_max_delay_ms: u64,

    /// Jitter fraction in `[0, 1]`.
    #[serde(default = "default_backoff_jitter_ratio")]
    pub backoff_jitter_ratio: f64,

    /// Buffered-ahead ceiling under which an unexpected pause counts as a
    /// startup stall. Default: 1.0 s.
    #[serde(default = "default_max_buffered_ahead_secs")]
    pub max_buffered_ahead_secs: f64,

    /// Playback must progress this long before handoff recovery is allowed.
    ///
    /// Default: 8 s.
    #[serde(default = "default_minimum_stable_playback_ms")]
    pub minimum_stable_playback_ms: i64,
}

impl Default for StartupRecoveryPolicy {
    fn default() -> Self {
        Self {
            session_create_limit: default_session_create_limit(),
            manifest_readiness_limit: default_manifest_readiness_limit(),
            engine_load_limit: default_engine_load_limit(),
            window_max_ms: default_window_max_ms(),
            max_session_resets: default_max_session_resets(),
            backoff_base_delay_ms: default_backoff_base_delay_ms(),
            backoff_max_delay_ms: default_backoff_max_delay_ms(),
            backoff_jitter_ratio: default_backoff_jitter_ratio(),
            max_buffered_ahead_secs: default_max_buffered_ahead_secs(),
            minimum_stable_playback_ms: default_minimum_stable_playback_ms(),
        }
    }
}

impl StartupRecoveryPolicy {
    /// Policy for flaky mobile networks.
    ///
    /// - More manifest polls
    /// - Two session resets
    /// - Longer window
    pub fn patient() -> Self {
        Self {
            manifest_readiness_limit: 8,
            max_session_resets: 2,
            window_max_ms: 90_000,
            backoff_max_delay_ms: 8_000,
            ..Default::default()
        }
    }

    /// Policy that gives up quickly; useful for previews.
    pub fn fail_fast() -> Self {
        Self {
            session_create_limit: 1,
            manifest_readiness_limit: 2,
            engine_load_limit: 1,
            max_session_resets: 0,
            window_max_ms: 10_000,
            ..Default::default()
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.window_max_ms == 0 {
            return Err("window_max_ms must be > 0".to_string());
        }

        if self.backoff_max_delay_ms < self.backoff_base_delay_ms {
            return Err("backoff_max_delay_ms cannot be lower than backoff_base_delay_ms".to_string());
        }

        if !(0.0..=1.0).contains(&self.backoff_jitter_ratio) {
            return Err("backoff_jitter_ratio must be between 0.0 and 1.0".to_string());
        }

        if !self.max_buffered_ahead_secs.is_finite() || self.max_buffered_ahead_secs < 0.0 {
            return Err("max_buffered_ahead_secs must be a non-negative number".to_string());
        }

        Ok(())
    }
}

// ============================================================================
// Default Functions (for serde)
// ============================================================================

fn default_max_load_retries() -> u32 {
    3
}

fn default_load_retry_base_delay_ms() -> u64 {
    500
}

fn default_play_retry_delay_ms() -> u64 {
    250
}

fn default_seek_lock_timeout_ms() -> u64 {
    300
}

fn default_seek_tolerance_secs() -> f64 {
    2.0
}

fn default_fade_duration_ms() -> u64 {
    10
}

fn default_session_create_limit() -> i64 {
    3
}

fn default_manifest_readiness_limit() -> i64 {
    5
}

fn default_engine_load_limit() -> i64 {
    2
}

fn default_window_max_ms() -> u64 {
    45_000
}

fn default_max_session_resets() -> u32 {
    1
}

fn default_backoff_base_delay_ms() -> u64 {
    500
}

fn default_backoff_max_delay_ms() -> u64 {
    4_000
}

fn default_backoff_jitter_ratio() -> f64 {
    0.5
}

fn default_max_buffered_ahead_secs() -> f64 {
    1.0
}

fn default_minimum_stable_playback_ms() -> i64 {
    8_000
}
