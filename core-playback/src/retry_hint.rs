//! Defensive parsing of retry hints embedded in server error payloads.
//!
//! Hints may appear at the top level, under `hints`, under `details` or under
//! `details.hints`. Booleans may be real booleans, `0`/`1`, or the strings
//! `"true"`, `"1"`, `"yes"` (and their negative counterparts). Delays are
//! clamped to [`RetryHintBounds`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const RETRYABLE_KEYS: &[&str] = &["retryable", "transient", "retry", "shouldRetry", "should_retry"];
const DELAY_KEYS: &[&str] = &[
    "retryAfterMs",
    "retry_after_ms",
    "retryDelayMs",
    "retry_delay_ms",
    "retryInMs",
];

/// Clamp bounds for hinted delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryHintBounds {
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryHintBounds {
    fn default() -> Self {
        Self {
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_min_delay_ms() -> u64 {
    1
}

fn default_max_delay_ms() -> u64 {
    30_000
}

/// A recognized retry hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RetryHint {
    pub retryable: Option<bool>,
    pub retry_after_ms: Option<u64>,
}

impl RetryHint {
    /// A hint is actionable when it says "retryable" or carries a delay.
    pub fn should_retry(&self) -> bool {
        self.retryable.unwrap_or(self.retry_after_ms.is_some())
    }
}

/// Extracts a retry hint from `payload`, or `None` when nothing recognizable
/// is present.
pub fn parse_retry_hint(payload: &Value, bounds: &RetryHintBounds) -> Option<RetryHint> {
    let root = payload.as_object()?;
    let details = root.get("details").and_then(Value::as_object);
    let containers = [
        Some(root),
        root.get("hints").and_then(Value::as_object),
        details,
        details.and_then(|d| d.get("hints")).and_then(Value::as_object),
    ];

    let mut hint = RetryHint::default();
    for container in containers.into_iter().flatten() {
        if hint.retryable.is_none() {
            hint.retryable = find(container, RETRYABLE_KEYS, parse_bool);
        }
        if hint.retry_after_ms.is_none() {
            hint.retry_after_ms = find(container, DELAY_KEYS, |value| parse_delay(value, bounds));
        }
    }

    (hint.retryable.is_some() || hint.retry_after_ms.is_some()).then_some(hint)
}

/// Parses a JSON body string; unparsable bodies yield `None`.
pub fn parse_retry_hint_from_body(body: &str, bounds: &RetryHintBounds) -> Option<RetryHint> {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| parse_retry_hint(&value, bounds))
}

fn find<T>(
    container: &Map<String, Value>,
    keys: &[&str],
    parse: impl Fn(&Value) -> Option<T>,
) -> Option<T> {
    keys.iter()
        .filter_map(|key| container.get(*key))
        .find_map(parse)
}

fn parse_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(flag) => Some(*flag),
        Value::Number(n) => match n.as_f64() {
            Some(v) if v == 1.0 => Some(true),
            Some(v) if v == 0.0 => Some(false),
            _ => None,
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn parse_delay(value: &Value, bounds: &RetryHintBounds) -> Option<u64> {
    let raw = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !raw.is_finite() {
        return None;
    }
    let min = bounds.min_delay_ms as f64;
    let max = (bounds.max_delay_ms as f64).max(min);
    Some(raw.round().clamp(min, max) as u64)
}
