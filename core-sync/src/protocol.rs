//! # Listen Together Wire Protocol
//!
//! Event names, payload shapes and ack classification for the group socket.
//! Payload fields are camelCase on the wire.

use crate::error::{Result, SyncError};
use core_playback::retry_hint::{parse_retry_hint, RetryHintBounds};
use core_playback::Track;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

// ============================================================================
// Event names
// ============================================================================

pub const JOIN_GROUP: &str = "join-group";
pub const LEAVE_GROUP: &str = "leave-group";
pub const PLAYBACK: &str = "playback";
pub const QUEUE: &str = "queue";
pub const READY: &str = "ready";
pub const PING: &str = "lt-ping";

pub const GROUP_STATE: &str = "group:state";
pub const GROUP_PLAYBACK_DELTA: &str = "group:playback-delta";
pub const GROUP_QUEUE_DELTA: &str = "group:queue-delta";
pub const GROUP_WAITING: &str = "group:waiting";
pub const GROUP_PLAY_AT: &str = "group:play-at";
pub const GROUP_MEMBER_JOINED: &str = "group:member-joined";
pub const GROUP_MEMBER_LEFT: &str = "group:member-left";
pub const GROUP_ENDED: &str = "group:ended";

// ============================================================================
// Outbound commands
// ============================================================================

/// Host transport command, sent on the `playback` event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum PlaybackCommand {
    Play,
    Pause,
    Seek {
        #[serde(rename = "positionMs")]
        position_ms: u64,
    },
    Next,
    Previous,
    SetTrack {
        index: usize,
        #[serde(rename = "trackId", skip_serializing_if = "Option::is_none")]
        track_id: Option<String>,
    },
}

impl PlaybackCommand {
    pub fn name(&self) -> &'static str {
        match self {
            PlaybackCommand::Play => "play",
            PlaybackCommand::Pause => "pause",
            PlaybackCommand::Seek { .. } => "seek",
            PlaybackCommand::Next => "next",
            PlaybackCommand::Previous => "previous",
            PlaybackCommand::SetTrack { .. } => "set-track",
        }
    }

    /// Track navigation commands go through the latest-operation coalescer.
    pub fn is_navigation(&self) -> bool {
        matches!(
            self,
            PlaybackCommand::Next | PlaybackCommand::Previous | PlaybackCommand::SetTrack { .. }
        )
    }
}

/// Shared queue edit, sent on the `queue` event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum QueueCommand {
    Add { tracks: Vec<Track> },
    InsertNext { tracks: Vec<Track> },
    Remove { index: usize },
    Reorder { from: usize, to: usize },
    Clear,
}

impl QueueCommand {
    pub fn name(&self) -> &'static str {
        match self {
            QueueCommand::Add { .. } => "add",
            QueueCommand::InsertNext { .. } => "insert-next",
            QueueCommand::Remove { .. } => "remove",
            QueueCommand::Reorder { .. } => "reorder",
            QueueCommand::Clear => "clear",
        }
    }

    /// Followers may only add tracks.
    pub fn allowed_for_follower(&self) -> bool {
        matches!(self, QueueCommand::Add { .. } | QueueCommand::InsertNext { .. })
    }
}

/// Serializes `command` and tags it with the group id.
pub fn command_payload<C: Serialize>(group_id: &str, command: &C) -> Result<Value> {
    let mut payload =
        serde_json::to_value(command).map_err(|e| SyncError::invalid_payload("command", e))?;
    match payload.as_object_mut() {
        Some(object) => {
            object.insert("groupId".to_string(), Value::String(group_id.to_string()));
            Ok(payload)
        }
        None => Ok(json!({ "groupId": group_id, "command": payload })),
    }
}

// ============================================================================
// Acknowledgements
// ============================================================================

/// Classified server acknowledgement.
#[derive(Debug, Clone, PartialEq)]
pub enum AckOutcome {
    Accepted(Value),
    /// Concurrent command collision; retry after the optional hinted delay.
    Conflict { retry_after_ms: Option<u64> },
    Rejected {
        code: Option<String>,
        message: String,
    },
}

/// Classifies an ack shaped `{ok?, error?, code?, transient?, retryable?,
/// retryAfterMs?}`.
///
/// An ack without `error` and without `ok: false` is accepted. A failed ack
/// is a conflict when it is flagged transient or retryable (string booleans
/// included) or its code names a conflict.
pub fn classify_ack(ack: &Value) -> AckOutcome {
    let Some(object) = ack.as_object() else {
        return AckOutcome::Accepted(ack.clone());
    };

    let error = object.get("error").filter(|value| !value.is_null());
    let failed = error.is_some() || object.get("ok").and_then(Value::as_bool) == Some(false);
    if !failed {
        return AckOutcome::Accepted(ack.clone());
    }

    let code = object.get("code").and_then(Value::as_str).map(str::to_string);
    let hint = parse_retry_hint(ack, &RetryHintBounds::default());
    let conflict_code = code
        .as_deref()
        .is_some_and(|code| code.to_ascii_lowercase().contains("conflict"));

    if hint.is_some_and(|hint| hint.retryable == Some(true)) || conflict_code {
        return AckOutcome::Conflict {
            retry_after_ms: hint.and_then(|hint| hint.retry_after_ms),
        };
    }

    let message = match error {
        Some(Value::String(message)) => message.clone(),
        Some(Value::Object(inner)) => inner
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("command rejected")
            .to_string(),
        _ => object
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("command rejected")
            .to_string(),
    };
    AckOutcome::Rejected { code, message }
}

// ============================================================================
// Inbound payloads
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMember {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// Full authoritative group state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSnapshot {
    pub group_id: String,
    pub host_id: String,
    #[serde(default)]
    pub queue: Vec<Track>,
    #[serde(default)]
    pub current_index: usize,
    #[serde(default)]
    pub is_playing: bool,
    #[serde(default)]
    pub position_ms: f64,
    #[serde(default)]
    pub server_time_ms: i64,
    pub state_version: u64,
    #[serde(default)]
    pub members: Vec<GroupMember>,
}

impl GroupSnapshot {
    pub fn current_track(&self) -> Option<&Track> {
        self.queue.get(self.current_index)
    }

    /// Known duration of the current track in seconds.
    pub fn current_duration(&self) -> Option<f64> {
        self.current_track()
            .map(|track| track.duration)
            .filter(|duration| duration.is_finite() && *duration > 0.0)
    }

    pub(crate) fn apply_playback(&mut self, delta: &PlaybackDelta) {
        self.state_version = delta.state_version;
        self.is_playing = delta.is_playing;
        self.position_ms = delta.position_ms;
        self.server_time_ms = delta.server_time_ms;
        if let Some(index) = delta.current_index {
            self.current_index = index;
        }
    }

    pub(crate) fn apply_queue(&mut self, delta: &QueueDelta) {
        self.state_version = delta.state_version;
        self.queue = delta.queue.clone();
        self.current_index = delta.current_index;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackDelta {
    pub state_version: u64,
    pub is_playing: bool,
    #[serde(default)]
    pub position_ms: f64,
    #[serde(default)]
    pub server_time_ms: i64,
    #[serde(default)]
    pub current_index: Option<usize>,
    #[serde(default)]
    pub track_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueDelta {
    pub state_version: u64,
    pub queue: Vec<Track>,
    #[serde(default)]
    pub current_index: usize,
}

/// The server is waiting for members to report `ready`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitingNotice {
    #[serde(default)]
    pub track_id: Option<String>,
    #[serde(default)]
    pub waiting_for: Vec<String>,
}

/// Coordinated start: begin playing `position_ms` at server time `start_at_ms`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayAtNotice {
    pub start_at_ms: i64,
    #[serde(default)]
    pub position_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndedNotice {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingAck {
    pub server_time: i64,
}

pub fn parse_payload<T: DeserializeOwned>(event: &str, payload: Value) -> Result<T> {
    serde_json::from_value(payload).map_err(|e| SyncError::invalid_payload(event, e))
}

// ============================================================================
// Timeline math
// ============================================================================

/// Follower position (seconds) for an authoritative playback report.
///
/// `elapsed = is_playing ? max(0, local_now - server_time) : 0`, then
/// `(position_ms + elapsed) / 1000`, clamped to `[0, duration]` when the
/// duration is known.
pub fn follower_target_seconds(
    position_ms: f64,
    server_time_ms: i64,
    local_now_ms: i64,
    is_playing: bool,
    duration_secs: Option<f64>,
) -> f64 {
    let elapsed = if is_playing {
        local_now_ms.saturating_sub(server_time_ms).max(0) as f64
    } else {
        0.0
    };
    let position = if position_ms.is_finite() { position_ms } else { 0.0 };
    let target = ((position + elapsed) / 1000.0).max(0.0);
    match duration_secs {
        Some(duration) if duration.is_finite() && duration > 0.0 => target.min(duration),
        _ => target,
    }
}

/// Offset to add to the local clock to get server time, from one ping round
/// trip. Assumes a symmetric path.
pub fn estimate_clock_offset(sent_at_ms: i64, received_at_ms: i64, server_time_ms: i64) -> i64 {
    let midpoint = sent_at_ms + (received_at_ms.saturating_sub(sent_at_ms)) / 2;
    server_time_ms - midpoint
}
