//! # Listen Together Configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for the group synchronization client.
///
/// The conflict retry ceiling and jitter are operational knobs, not protocol
/// invariants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListenTogetherConfig {
    /// Retries of a command whose ack reports a transient conflict.
    ///
    /// Default: 12.
    #[serde(default = "default_conflict_max_retries")]
    pub conflict_max_retries: u32,

    /// Default: 100 ms.
    #[serde(default = "default_conflict_base_delay_ms")]
    pub conflict_base_delay_ms: u64,

    /// Default: 2000 ms.
    #[serde(default = "default_conflict_max_delay_ms")]
    pub conflict_max_delay_ms: u64,

    /// Default: 0.3.
    #[serde(default = "default_conflict_jitter_ratio")]
    pub conflict_jitter_ratio: f64,

    /// Interval between `lt-ping` clock probes.
    ///
    /// Default: 15 s.
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,

    /// Followers only reseek when local playback drifts further than this
    /// from the authoritative position.
    ///
    /// Default: 750 ms.
    #[serde(default = "default_drift_tolerance_ms")]
    pub drift_tolerance_ms: u64,
}

impl Default for ListenTogetherConfig {
    fn default() -> Self {
        Self {
            conflict_max_retries: default_conflict_max_retries(),
            conflict_base_delay_ms: default_conflict_base_delay_ms(),
            conflict_max_delay_ms: default_conflict_max_delay_ms(),
            conflict_jitter_ratio: default_conflict_jitter_ratio(),
            ping_interval_ms: default_ping_interval_ms(),
            drift_tolerance_ms: default_drift_tolerance_ms(),
        }
    }
}

impl ListenTogetherConfig {
    /// No backoff between conflict retries.
    pub fn immediate() -> Self {
        Self {
            conflict_base_delay_ms: 0,
            conflict_max_delay_ms: 0,
            conflict_jitter_ratio: 0.0,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.conflict_max_delay_ms < self.conflict_base_delay_ms {
            return Err("conflict_max_delay_ms cannot be lower than conflict_base_delay_ms".to_string());
        }

        if !(0.0..=1.0).contains(&self.conflict_jitter_ratio) {
            return Err("conflict_jitter_ratio must be between 0.0 and 1.0".to_string());
        }

        if self.ping_interval_ms == 0 {
            return Err("ping_interval_ms must be > 0".to_string());
        }

        Ok(())
    }

    /// Capped exponential delay before conflict retry `attempt` (1-based),
    /// with `random` in `[0, 1)` scaling the jitter.
    pub fn conflict_delay(&self, attempt: u32, random: f64) -> Duration {
        let exponent = attempt.max(1).saturating_sub(1).min(31);
        let delay = self
            .conflict_base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.conflict_max_delay_ms) as f64;
        let jitter = delay * self.conflict_jitter_ratio.clamp(0.0, 1.0) * random.clamp(0.0, 1.0);
        Duration::from_millis((delay + jitter).round() as u64)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }
}

fn default_conflict_max_retries() -> u32 {
    12
}

fn default_conflict_base_delay_ms() -> u64 {
    100
}

fn default_conflict_max_delay_ms() -> u64 {
    2_000
}

fn default_conflict_jitter_ratio() -> f64 {
    0.3
}

fn default_ping_interval_ms() -> u64 {
    15_000
}

fn default_drift_tolerance_ms() -> u64 {
    750
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = ListenTogetherConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.conflict_max_retries, 12);
        assert!(ListenTogetherConfig::immediate().validate().is_ok());
    }

    #[test]
    fn conflict_delay_doubles_and_caps() {
        let config = ListenTogetherConfig {
            conflict_jitter_ratio: 0.0,
            ..Default::default()
        };
        assert_eq!(config.conflict_delay(1, 0.9), Duration::from_millis(100));
        assert_eq!(config.conflict_delay(3, 0.9), Duration::from_millis(400));
        assert_eq!(config.conflict_delay(10, 0.9), Duration::from_millis(2_000));
    }

    #[test]
    fn conflict_delay_adds_jitter() {
        let config = ListenTogetherConfig::default();
        assert_eq!(config.conflict_delay(2, 0.5), Duration::from_millis(230));
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config: ListenTogetherConfig =
            serde_json::from_str(r#"{"conflict_max_retries": 3}"#).unwrap();
        assert_eq!(config.conflict_max_retries, 3);
        assert_eq!(config.ping_interval_ms, 15_000);
    }

    #[test]
    fn rejects_inverted_backoff() {
        let config = ListenTogetherConfig {
            conflict_base_delay_ms: 500,
            conflict_max_delay_ms: 100,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
