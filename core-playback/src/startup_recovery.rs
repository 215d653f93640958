//! # Segmented Startup Recovery Policy
//!
//! Pure decision functions for the staged startup of a segmented streaming
//! session (session creation, manifest readiness, engine load).
//!
//! After every failed stage the runner asks
//! [`resolve_startup_recovery_decision`] whether to retry the stage, reset the
//! whole session and retry, or give up. Nothing in this module performs I/O
//! or reads the clock; `now_ms` and the jitter random value are inputs.

use crate::config::StartupRecoveryPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A startup phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartupStage {
    SessionCreate,
    ManifestReadiness,
    EngineLoad,
}

impl StartupStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            StartupStage::SessionCreate => "session_create",
            StartupStage::ManifestReadiness => "manifest_readiness",
            StartupStage::EngineLoad => "engine_load",
        }
    }
}

impl fmt::Display for StartupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attempts used per stage inside the current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StageAttempts {
    pub session_create: u32,
    pub manifest_readiness: u32,
    pub engine_load: u32,
}

impl StageAttempts {
    pub fn get(&self, stage: StartupStage) -> u32 {
        match stage {
            StartupStage::SessionCreate => self.session_create,
            StartupStage::ManifestReadiness => self.manifest_readiness,
            StartupStage::EngineLoad => self.engine_load,
        }
    }

    fn with(mut self, stage: StartupStage, value: u32) -> Self {
        match stage {
            StartupStage::SessionCreate => self.session_create = value,
            StartupStage::ManifestReadiness => self.manifest_readiness = value,
            StartupStage::EngineLoad => self.engine_load = value,
        }
        self
    }
}

/// Configured attempt limits. Non-positive limits mean zero attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageLimits {
    pub session_create: i64,
    pub manifest_readiness: i64,
    pub engine_load: i64,
}

impl StageLimits {
    pub fn limit(&self, stage: StartupStage) -> u32 {
        let raw = match stage {
            StartupStage::SessionCreate => self.session_create,
            StartupStage::ManifestReadiness => self.manifest_readiness,
            StartupStage::EngineLoad => self.engine_load,
        };
        raw.clamp(0, u32::MAX as i64) as u32
    }
}

impl From<&StartupRecoveryPolicy> for StageLimits {
    fn from(policy: &StartupRecoveryPolicy) -> Self {
        Self {
            session_create: policy.session_create_limit,
            manifest_readiness: policy.manifest_readiness_limit,
            engine_load: policy.engine_load_limit,
        }
    }
}

/// Exponential backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffParams {
    pub attempt: u32,
    pub base_delay_ms: f64,
    pub max_delay_ms: f64,
    pub jitter_ratio: f64,
    /// Value in `[0, 1)` used for jitter; drawn from the thread RNG when `None`.
    pub random_value: Option<f64>,
}

/// `min(max, base * 2^(attempt - 1))` plus `delay * jitter_ratio * random`,
/// rounded to whole milliseconds.
///
/// Inputs are clamped: `attempt >= 1`, `base >= 0`, `max >= base`,
/// `jitter_ratio` in `[0, 1]`.
pub fn resolve_segmented_startup_recovery_backoff_delay_ms(params: &BackoffParams) -> u64 {
    let attempt = params.attempt.max(1);
    let base = finite_or_zero(params.base_delay_ms).max(0.0);
    let max = finite_or_zero(params.max_delay_ms).max(base);
    let jitter = finite_or_zero(params.jitter_ratio).clamp(0.0, 1.0);
    let random = params
        .random_value
        .unwrap_or_else(rand::random::<f64>);
    let random = finite_or_zero(random).clamp(0.0, 1.0);

    let exponent = (attempt - 1).min(62) as i32;
    let delay = (base * 2f64.powi(exponent)).min(max);
    let total = delay + delay * jitter * random;
    total.round() as u64
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartupRecoveryAction {
    Retry,
    ResetSessionAndRetry,
    ExhaustedStage,
    ExhaustedWindow,
}

impl StartupRecoveryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            StartupRecoveryAction::Retry => "retry",
            StartupRecoveryAction::ResetSessionAndRetry => "reset_session_and_retry",
            StartupRecoveryAction::ExhaustedStage => "exhausted_stage",
            StartupRecoveryAction::ExhaustedWindow => "exhausted_window",
        }
    }

    /// Returns `true` for outcomes that end the startup.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StartupRecoveryAction::ExhaustedStage | StartupRecoveryAction::ExhaustedWindow
        )
    }
}

/// Everything [`resolve_startup_recovery_decision`] needs.
#[derive(Debug, Clone, Copy)]
pub struct StartupRecoveryInput {
    pub stage: StartupStage,
    pub stage_attempts: StageAttempts,
    pub stage_limits: StageLimits,
    pub window_started_at_ms: i64,
    pub window_max_ms: i64,
    pub session_resets_used: u32,
    pub max_session_resets: u32,
    pub base_delay_ms: f64,
    pub max_delay_ms: f64,
    pub jitter_ratio: f64,
    pub random_value: Option<f64>,
    pub now_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StartupRecoveryDecision {
    pub action: StartupRecoveryAction,
    /// `None` for terminal outcomes.
    pub delay_ms: Option<u64>,
    pub next_stage_attempts: StageAttempts,
    pub next_session_resets_used: u32,
}

/// Decides what to do after `input.stage` failed.
///
/// 1. Window exceeded: `ExhaustedWindow`.
/// 2. Stage budget used: `ResetSessionAndRetry` while resets remain (all
///    counters cleared, backoff for attempt 1), else `ExhaustedStage`.
/// 3. Otherwise `Retry` with the stage counter incremented.
pub fn resolve_startup_recovery_decision(input: &StartupRecoveryInput) -> StartupRecoveryDecision {
    let elapsed = input.now_ms.saturating_sub(input.window_started_at_ms);
    if elapsed > input.window_max_ms {
        return StartupRecoveryDecision {
            action: StartupRecoveryAction::ExhaustedWindow,
            delay_ms: None,
            next_stage_attempts: input.stage_attempts,
            next_session_resets_used: input.session_resets_used,
        };
    }

    let backoff = |attempt: u32| {
        resolve_segmented_startup_recovery_backoff_delay_ms(&BackoffParams {
            attempt,
            base_delay_ms: input.base_delay_ms,
            max_delay_ms: input.max_delay_ms,
            jitter_ratio: input.jitter_ratio,
            random_value: input.random_value,
        })
    };

    let used = input.stage_attempts.get(input.stage);
    if used >= input.stage_limits.limit(input.stage) {
        if input.session_resets_used < input.max_session_resets {
            return StartupRecoveryDecision {
                action: StartupRecoveryAction::ResetSessionAndRetry,
                delay_ms: Some(backoff(1)),
                next_stage_attempts: StageAttempts::default(),
                next_session_resets_used: input.session_resets_used + 1,
            };
        }
        return StartupRecoveryDecision {
            action: StartupRecoveryAction::ExhaustedStage,
            delay_ms: None,
            next_stage_attempts: input.stage_attempts,
            next_session_resets_used: input.session_resets_used,
        };
    }

    let attempt = used + 1;
    StartupRecoveryDecision {
        action: StartupRecoveryAction::Retry,
        delay_ms: Some(backoff(attempt)),
        next_stage_attempts: input.stage_attempts.with(input.stage, attempt),
        next_session_resets_used: input.session_resets_used,
    }
}

/// An unexpected pause only counts as a startup stall when the buffered-ahead
/// amount is known, finite and at most `max_buffered_ahead_secs`.
pub fn should_attempt_segmented_recovery_on_unexpected_pause(
    buffered_ahead_secs: Option<f64>,
    max_buffered_ahead_secs: f64,
) -> bool {
    match buffered_ahead_secs {
        Some(ahead) if ahead.is_finite() => ahead <= max_buffered_ahead_secs,
        _ => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffIneligibleReason {
    StartupStabilizingNoProgress,
    StartupStabilizing,
}

impl HandoffIneligibleReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandoffIneligibleReason::StartupStabilizingNoProgress => {
                "startup_stabilizing_no_progress"
            }
            HandoffIneligibleReason::StartupStabilizing => "startup_stabilizing",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HandoffEligibility {
    pub eligible: bool,
    pub reason: Option<HandoffIneligibleReason>,
    pub stable_for_ms: Option<i64>,
}

/// Handoff recovery is only safe once playback has progressed for at least
/// `minimum_stable_playback_ms` (negative values clamp to zero).
pub fn resolve_handoff_recovery_startup_eligibility(
    startup_progress_at_ms: Option<i64>,
    minimum_stable_playback_ms: i64,
    now_ms: i64,
) -> HandoffEligibility {
    let Some(progress_at) = startup_progress_at_ms else {
        return HandoffEligibility {
            eligible: false,
            reason: Some(HandoffIneligibleReason::StartupStabilizingNoProgress),
            stable_for_ms: None,
        };
    };

    let minimum = minimum_stable_playback_ms.max(0);
    let stable_for = now_ms.saturating_sub(progress_at).max(0);
    if stable_for < minimum {
        return HandoffEligibility {
            eligible: false,
            reason: Some(HandoffIneligibleReason::StartupStabilizing),
            stable_for_ms: Some(stable_for),
        };
    }

    HandoffEligibility {
        eligible: true,
        reason: None,
        stable_for_ms: Some(stable_for),
    }
}

/// Mutable recovery bookkeeping for one track's startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SegmentedStartupRecoveryState {
    pub attempts: StageAttempts,
    pub session_resets_used: u32,
    pub window_started_at_ms: i64,
}

impl SegmentedStartupRecoveryState {
    /// Starts a fresh startup window.
    pub fn begin(now_ms: i64) -> Self {
        Self {
            window_started_at_ms: now_ms,
            ..Default::default()
        }
    }

    /// Consults the policy for a failure in `stage` and applies the decision.
    pub fn record_failure(
        &mut self,
        stage: StartupStage,
        policy: &StartupRecoveryPolicy,
        now_ms: i64,
        random_value: Option<f64>,
    ) -> StartupRecoveryDecision {
        let decision = resolve_startup_recovery_decision(&StartupRecoveryInput {
            stage,
            stage_attempts: self.attempts,
            stage_limits: StageLimits::from(policy),
            window_started_at_ms: self.window_started_at_ms,
            window_max_ms: policy.window_max_ms.min(i64::MAX as u64) as i64,
            session_resets_used: self.session_resets_used,
            max_session_resets: policy.max_session_resets,
            base_delay_ms: policy.backoff_base_delay_ms as f64,
            max_delay_ms: policy.backoff_max_delay_ms as f64,
            jitter_ratio: policy.backoff_jitter_ratio,
            random_value,
            now_ms,
        });
        self.attempts = decision.next_stage_attempts;
        self.session_resets_used = decision.next_session_resets_used;
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(stage: StartupStage, attempts: StageAttempts) -> StartupRecoveryInput {
        StartupRecoveryInput {
            stage,
            stage_attempts: attempts,
            stage_limits: StageLimits {
                session_create: 3,
                manifest_readiness: 3,
                engine_load: 2,
            },
            window_started_at_ms: 1_000,
            window_max_ms: 30_000,
            session_resets_used: 0,
            max_session_resets: 1,
            base_delay_ms: 500.0,
            max_delay_ms: 4_000.0,
            jitter_ratio: 0.5,
            random_value: Some(0.0),
            now_ms: 2_000,
        }
    }

    #[test]
    fn backoff_matches_reference_value() {
        let delay = resolve_segmented_startup_recovery_backoff_delay_ms(&BackoffParams {
            attempt: 3,
            base_delay_ms: 500.0,
            max_delay_ms: 4_000.0,
            jitter_ratio: 0.5,
            random_value: Some(0.4),
        });
        assert_eq!(delay, 2400);
    }

    #[test]
    fn backoff_clamps_inputs() {
        let delay = resolve_segmented_startup_recovery_backoff_delay_ms(&BackoffParams {
            attempt: 0,
            base_delay_ms: -10.0,
            max_delay_ms: -20.0,
            jitter_ratio: 3.0,
            random_value: Some(0.5),
        });
        assert_eq!(delay, 0);

        let delay = resolve_segmented_startup_recovery_backoff_delay_ms(&BackoffParams {
            attempt: 10,
            base_delay_ms: 500.0,
            max_delay_ms: 100.0,
            jitter_ratio: 0.0,
            random_value: None,
        });
        // max is raised to base
        assert_eq!(delay, 500);
    }

    #[test]
    fn first_failure_retries_the_stage() {
        let decision =
            resolve_startup_recovery_decision(&input(StartupStage::ManifestReadiness, StageAttempts::default()));
        assert_eq!(decision.action, StartupRecoveryAction::Retry);
        assert_eq!(decision.next_stage_attempts.manifest_readiness, 1);
        assert_eq!(decision.next_stage_attempts.session_create, 0);
        assert_eq!(decision.next_stage_attempts.engine_load, 0);
        assert_eq!(decision.delay_ms, Some(500));
    }

    #[test]
    fn exhausted_stage_resets_session_when_budget_remains() {
        let attempts = StageAttempts {
            session_create: 1,
            manifest_readiness: 2,
            engine_load: 2,
        };
        let decision = resolve_startup_recovery_decision(&input(StartupStage::EngineLoad, attempts));
        assert_eq!(decision.action, StartupRecoveryAction::ResetSessionAndRetry);
        assert_eq!(decision.next_stage_attempts, StageAttempts::default());
        assert_eq!(decision.next_session_resets_used, 1);
        assert_eq!(decision.delay_ms, Some(500));
    }

    #[test]
    fn exhausted_stage_without_reset_budget_is_terminal() {
        let attempts = StageAttempts {
            engine_load: 2,
            ..Default::default()
        };
        let mut request = input(StartupStage::EngineLoad, attempts);
        request.session_resets_used = 1;
        let decision = resolve_startup_recovery_decision(&request);
        assert_eq!(decision.action, StartupRecoveryAction::ExhaustedStage);
        assert_eq!(decision.delay_ms, None);
        assert_eq!(decision.next_stage_attempts, attempts);
        assert!(decision.action.is_terminal());
    }

    #[test]
    fn window_overrun_wins_over_stage_budget() {
        let mut request = input(StartupStage::SessionCreate, StageAttempts::default());
        request.now_ms = request.window_started_at_ms + request.window_max_ms + 1;
        let decision = resolve_startup_recovery_decision(&request);
        assert_eq!(decision.action, StartupRecoveryAction::ExhaustedWindow);
        assert_eq!(decision.delay_ms, None);
    }

    #[test]
    fn non_positive_limits_exhaust_immediately() {
        let mut request = input(StartupStage::SessionCreate, StageAttempts::default());
        request.stage_limits.session_create = -4;
        request.max_session_resets = 0;
        let decision = resolve_startup_recovery_decision(&request);
        assert_eq!(decision.action, StartupRecoveryAction::ExhaustedStage);
    }

    #[test]
    fn unexpected_pause_gate() {
        assert!(!should_attempt_segmented_recovery_on_unexpected_pause(None, 1.0));
        assert!(!should_attempt_segmented_recovery_on_unexpected_pause(Some(f64::NAN), 1.0));
        assert!(should_attempt_segmented_recovery_on_unexpected_pause(Some(0.25), 1.0));
        assert!(!should_attempt_segmented_recovery_on_unexpected_pause(Some(2.0), 1.0));
    }

    #[test]
    fn handoff_eligibility() {
        let no_progress = resolve_handoff_recovery_startup_eligibility(None, 8_000, 18_000);
        assert!(!no_progress.eligible);
        assert_eq!(
            no_progress.reason,
            Some(HandoffIneligibleReason::StartupStabilizingNoProgress)
        );
        assert_eq!(no_progress.stable_for_ms, None);

        let stabilizing = resolve_handoff_recovery_startup_eligibility(Some(10_000), 8_000, 17_000);
        assert_eq!(stabilizing.reason, Some(HandoffIneligibleReason::StartupStabilizing));

        let eligible = resolve_handoff_recovery_startup_eligibility(Some(10_000), 8_000, 18_000);
        assert!(eligible.eligible);
        assert_eq!(eligible.stable_for_ms, Some(8_000));

        let clamped = resolve_handoff_recovery_startup_eligibility(Some(10_000), -5, 10_000);
        assert!(clamped.eligible);
    }

    #[test]
    fn state_tracks_decisions() {
        let policy = StartupRecoveryPolicy {
            engine_load_limit: 1,
            max_session_resets: 1,
            ..Default::default()
        };
        let mut state = SegmentedStartupRecoveryState::begin(0);
        let first = state.record_failure(StartupStage::EngineLoad, &policy, 10, Some(0.0));
        assert_eq!(first.action, StartupRecoveryAction::Retry);
        assert_eq!(state.attempts.engine_load, 1);

        let second = state.record_failure(StartupStage::EngineLoad, &policy, 20, Some(0.0));
        assert_eq!(second.action, StartupRecoveryAction::ResetSessionAndRetry);
        assert_eq!(state.session_resets_used, 1);
        assert_eq!(state.attempts, StageAttempts::default());
    }
}
