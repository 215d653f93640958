//! # Segmented Startup Runner
//!
//! Drives the three startup stages of a segmented streaming session:
//!
//! 1. `session_create` - request a session from the API.
//! 2. `manifest_readiness` - probe the manifest until it is served.
//! 3. `engine_load` - load the manifest into the audio engine.
//!
//! Every failure is handed to the recovery policy
//! ([`SegmentedStartupRecoveryState::record_failure`]); its decision is
//! applied here. Terminal decisions surface as
//! [`PlaybackError::StartupExhausted`], which callers must treat as
//! requiring a fresh session.

use crate::config::StartupRecoveryPolicy;
use crate::engine::{AudioEngine, LoadOptions};
use crate::error::{PlaybackError, Result};
use crate::segmented_session::{
    SegmentedSession, SegmentedSessionClient, SessionRequest, SESSION_TOKEN_HEADER,
};
use crate::startup_recovery::{SegmentedStartupRecoveryState, StartupRecoveryAction, StartupStage};
use bridge_traits::time::Clock;
use core_async::time::{sleep, Duration};
use core_runtime::events::{CoreEvent, EventBus, StartupEvent};
use std::sync::Arc;
use tracing::{info, instrument, trace, warn};

const MANIFEST_FORMAT_HINT: &str = "hls";

pub struct SegmentedStartupRunner {
    sessions: SegmentedSessionClient,
    engine: AudioEngine,
    clock: Arc<dyn Clock>,
    policy: StartupRecoveryPolicy,
    events: Option<EventBus>,
}

impl SegmentedStartupRunner {
    pub fn new(
        sessions: SegmentedSessionClient,
        engine: AudioEngine,
        clock: Arc<dyn Clock>,
        policy: StartupRecoveryPolicy,
    ) -> Self {
        Self {
            sessions,
            engine,
            clock,
            policy,
            events: None,
        }
    }

    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn policy(&self) -> &StartupRecoveryPolicy {
        &self.policy
    }

    /// Runs the staged startup for one track and returns the session that
    /// ended up playing.
    #[instrument(skip(self, request, options), fields(track_id = %request.track_id))]
    pub async fn start(&self, request: &SessionRequest, options: LoadOptions) -> Result<SegmentedSession> {
        let track_id = request.track_id.as_str();
        let mut recovery = SegmentedStartupRecoveryState::begin(self.clock.unix_timestamp_millis());
        let mut session: Option<SegmentedSession> = None;
        let mut engine_attempted = false;

        loop {
            let current = match session.clone() {
                Some(existing) => existing,
                None => match self.sessions.create_session(request).await {
                    Ok(created) => {
                        self.emit(StartupEvent::SessionCreated {
                            track_id: track_id.to_string(),
                            session_id: created.session_id.clone(),
                        });
                        engine_attempted = false;
                        session = Some(created.clone());
                        created
                    }
                    Err(e) => {
                        self.recover(StartupStage::SessionCreate, &mut recovery, &mut session, track_id, &e)
                            .await?;
                        continue;
                    }
                },
            };

            if let Err(e) = self.sessions.probe_manifest(&current).await {
                self.recover(StartupStage::ManifestReadiness, &mut recovery, &mut session, track_id, &e)
                    .await?;
                continue;
            }

            let mut load_options = options
                .clone()
                .with_format_hint(Some(MANIFEST_FORMAT_HINT.to_string()));
            if let Some(token) = &current.session_token {
                load_options
                    .headers
                    .insert(SESSION_TOKEN_HEADER.to_string(), token.clone());
            }
            if engine_attempted {
                load_options = load_options.retry();
            }
            engine_attempted = true;

            match self.engine.load(&current.manifest_url, load_options).await {
                Ok(()) => {
                    info!(session_id = %current.session_id, "Segmented startup ready");
                    self.emit(StartupEvent::Ready {
                        track_id: track_id.to_string(),
                    });
                    return Ok(current);
                }
                Err(PlaybackError::Superseded) => return Err(PlaybackError::Superseded),
                // Autoplay problems are the engine's to report; the stream itself is up.
                Err(PlaybackError::PlayBlocked) | Err(PlaybackError::PlayFailed(_)) => {
                    return Ok(current);
                }
                Err(e) => {
                    self.recover(StartupStage::EngineLoad, &mut recovery, &mut session, track_id, &e)
                        .await?;
                }
            }
        }
    }

    async fn recover(
        &self,
        stage: StartupStage,
        recovery: &mut SegmentedStartupRecoveryState,
        session: &mut Option<SegmentedSession>,
        track_id: &str,
        error: &PlaybackError,
    ) -> Result<()> {
        if let PlaybackError::SessionRequestFailed {
            hint: Some(hint), ..
        } = error
        {
            if hint.retryable == Some(false) {
                return Err(self.exhausted(track_id, stage, "not_retryable"));
            }
        }

        let now = self.clock.unix_timestamp_millis();
        let decision = recovery.record_failure(stage, &self.policy, now, None);
        let hinted = error.retry_after_ms().unwrap_or(0);

        let delay_ms = match decision.action {
            StartupRecoveryAction::Retry => {
                let delay = decision.delay_ms.unwrap_or(0).max(hinted);
                warn!(%stage, attempt = recovery.attempts.get(stage), delay_ms = delay, error = %error, "Startup stage failed, retrying");
                self.emit(StartupEvent::RetryScheduled {
                    track_id: track_id.to_string(),
                    stage: stage.to_string(),
                    attempt: recovery.attempts.get(stage),
                    delay_ms: delay,
                });
                delay
            }
            StartupRecoveryAction::ResetSessionAndRetry => {
                let delay = decision.delay_ms.unwrap_or(0).max(hinted);
                warn!(%stage, resets_used = recovery.session_resets_used, error = %error, "Startup stage exhausted, resetting session");
                *session = None;
                self.emit(StartupEvent::SessionReset {
                    track_id: track_id.to_string(),
                    resets_used: recovery.session_resets_used,
                });
                delay
            }
            action => {
                return Err(self.exhausted(track_id, stage, action.as_str()));
            }
        };

        if delay_ms > 0 {
            sleep(Duration::from_millis(delay_ms)).await;
        }
        Ok(())
    }

    fn exhausted(&self, track_id: &str, stage: StartupStage, reason: &str) -> PlaybackError {
        warn!(%stage, reason, "Segmented startup exhausted");
        self.emit(StartupEvent::Exhausted {
            track_id: track_id.to_string(),
            reason: reason.to_string(),
        });
        PlaybackError::StartupExhausted {
            stage: stage.to_string(),
            reason: reason.to_string(),
        }
    }

    fn emit(&self, event: StartupEvent) {
        if let Some(bus) = &self.events {
            if let Err(e) = bus.emit(CoreEvent::Startup(event)) {
                trace!(event = e.0.description(), "No subscribers for startup event");
            }
        }
    }
}
