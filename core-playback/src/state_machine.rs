//! # Playback State Machine
//!
//! Single source of truth for "is audio playing, buffering or broken".
//!
//! ```text
//! Idle → Loading → Buffering ⇄ Playing ⇄ Paused
//!   any → Error
//!   Error → Idle   (explicit reset only)
//! ```
//!
//! Inputs are engine events and orchestrator intents. While `Loading`, the
//! play intent requested before the load is preserved so load completion can
//! auto-play without another user action.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, trace};

/// Raw state of the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackStatus {
    Idle,
    Loading,
    Buffering,
    Playing,
    Paused,
    Error,
}

impl PlaybackStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackStatus::Idle => "idle",
            PlaybackStatus::Loading => "loading",
            PlaybackStatus::Buffering => "buffering",
            PlaybackStatus::Playing => "playing",
            PlaybackStatus::Paused => "paused",
            PlaybackStatus::Error => "error",
        }
    }

    /// Returns `true` if only an explicit reset can leave this state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PlaybackStatus::Error)
    }

    pub fn is_buffering(&self) -> bool {
        matches!(self, PlaybackStatus::Loading | PlaybackStatus::Buffering)
    }
}

impl fmt::Display for PlaybackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlaybackStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "idle" => Ok(PlaybackStatus::Idle),
            "loading" => Ok(PlaybackStatus::Loading),
            "buffering" => Ok(PlaybackStatus::Buffering),
            "playing" => Ok(PlaybackStatus::Playing),
            "paused" => Ok(PlaybackStatus::Paused),
            "error" => Ok(PlaybackStatus::Error),
            other => Err(format!("unknown playback status: {other}")),
        }
    }
}

/// Inputs accepted by [`PlaybackStateMachine::apply`].
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackInput {
    // Orchestrator intents
    LoadRequested,
    PlayRequested,
    PauseRequested,
    Reset,

    // Engine events
    Loaded { duration: f64 },
    Played,
    Paused,
    Buffering,
    Ended,
    Stopped,
    PlayBlocked,
    PlayError(String),
    LoadError(String),
}

/// Read-only snapshot of live playback for UI collaborators.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaybackLocalState {
    pub is_playing: bool,
    pub current_time: f64,
    pub duration: f64,
    pub is_buffering: bool,
    pub error: Option<String>,
    pub is_seek_locked: bool,
    pub seek_target: Option<f64>,
    pub state: PlaybackStatus,
}

/// Playback state machine.
#[derive(Debug, Clone)]
pub struct PlaybackStateMachine {
    status: PlaybackStatus,
    play_intent: bool,
    error: Option<String>,
    current_time: f64,
    duration: f64,
    seek_target: Option<f64>,
}

impl Default for PlaybackStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackStateMachine {
    pub fn new() -> Self {
        Self {
            status: PlaybackStatus::Idle,
            play_intent: false,
            error: None,
            current_time: 0.0,
            duration: 0.0,
            seek_target: None,
        }
    }

    pub fn status(&self) -> PlaybackStatus {
        self.status
    }

    pub fn is_playing(&self) -> bool {
        match self.status {
            PlaybackStatus::Loading => self.play_intent,
            status => status == PlaybackStatus::Playing,
        }
    }

    pub fn is_buffering(&self) -> bool {
        self.status.is_buffering()
    }

    pub fn play_intent(&self) -> bool {
        self.play_intent
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn current_time(&self) -> f64 {
        self.current_time
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn set_current_time(&mut self, seconds: f64) {
        if seconds.is_finite() {
            self.current_time = seconds.max(0.0);
        }
    }

    pub fn set_duration(&mut self, seconds: f64) {
        if seconds.is_finite() && seconds >= 0.0 {
            self.duration = seconds;
        }
    }

    /// Mirrors the engine's seek lock into the snapshot.
    pub fn set_seek_lock(&mut self, target: Option<f64>) {
        self.seek_target = target;
    }

    /// Applies one input. Returns `true` when the status changed.
    pub fn apply(&mut self, input: PlaybackInput) -> bool {
        let before = self.status;

        if self.status == PlaybackStatus::Error {
            match input {
                PlaybackInput::Reset => self.reset(),
                PlaybackInput::PlayError(message) | PlaybackInput::LoadError(message) => {
                    self.error = Some(message);
                }
                other => {
                    trace!(input = ?other, "Ignoring input while in error state");
                }
            }
            return self.finish(before);
        }

        match input {
            PlaybackInput::LoadRequested => {
                self.status = PlaybackStatus::Loading;
                self.current_time = 0.0;
                self.seek_target = None;
            }
            PlaybackInput::PlayRequested => {
                self.play_intent = true;
                if matches!(self.status, PlaybackStatus::Paused) {
                    self.status = PlaybackStatus::Buffering;
                }
            }
            PlaybackInput::PauseRequested => {
                self.play_intent = false;
                if matches!(self.status, PlaybackStatus::Playing | PlaybackStatus::Buffering) {
                    self.status = PlaybackStatus::Paused;
                }
            }
            PlaybackInput::Reset => self.reset(),
            PlaybackInput::Loaded { duration } => {
                self.set_duration(duration);
                if matches!(self.status, PlaybackStatus::Loading | PlaybackStatus::Idle) {
                    self.status = if self.play_intent {
                        PlaybackStatus::Buffering
                    } else {
                        PlaybackStatus::Paused
                    };
                }
            }
            PlaybackInput::Played => {
                self.play_intent = true;
                self.status = PlaybackStatus::Playing;
            }
            PlaybackInput::Paused => {
                self.play_intent = false;
                if self.status != PlaybackStatus::Loading {
                    self.status = PlaybackStatus::Paused;
                }
            }
            PlaybackInput::Buffering => {
                if self.status == PlaybackStatus::Playing {
                    self.status = PlaybackStatus::Buffering;
                }
            }
            PlaybackInput::Ended => {
                self.play_intent = false;
                self.current_time = self.duration;
                self.status = PlaybackStatus::Idle;
            }
            PlaybackInput::Stopped => {
                self.play_intent = false;
                self.current_time = 0.0;
                self.status = PlaybackStatus::Idle;
            }
            PlaybackInput::PlayBlocked => {
                self.play_intent = false;
                self.status = PlaybackStatus::Paused;
            }
            PlaybackInput::PlayError(message) | PlaybackInput::LoadError(message) => {
                self.play_intent = false;
                self.error = Some(message);
                self.status = PlaybackStatus::Error;
            }
        }

        self.finish(before)
    }

    pub fn snapshot(&self) -> PlaybackLocalState {
        PlaybackLocalState {
            is_playing: self.is_playing(),
            current_time: self.current_time,
            duration: self.duration,
            is_buffering: self.is_buffering(),
            error: self.error.clone(),
            is_seek_locked: self.seek_target.is_some(),
            seek_target: self.seek_target,
            state: self.status,
        }
    }

    fn reset(&mut self) {
        self.status = PlaybackStatus::Idle;
        self.error = None;
        self.play_intent = false;
        self.seek_target = None;
    }

    fn finish(&self, before: PlaybackStatus) -> bool {
        let changed = before != self.status;
        if changed {
            debug!(from = %before, to = %self.status, "Playback status changed");
        }
        changed
    }
}
