//! Engine event handling: state machine transitions, track end and
//! unexpected-pause recovery.

use crate::controller::{session_request, ControllerInner, PlayerController, Selection};
use crate::group::Authority;
use core_async::sync::broadcast;
use core_playback::{
    resolve_handoff_recovery_startup_eligibility,
    should_attempt_segmented_recovery_on_unexpected_pause, EngineEvent, LoadOptions,
    NavigationAction, PlaybackError, PlaybackInput, PlaybackStatus, RepeatMode,
};
use core_runtime::events::{CoreEvent, PlaybackEvent};
use core_sync::PlaybackCommand;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use tracing::{debug, info, trace, warn};

impl PlayerController {
    pub(crate) fn start_engine_pump(&self) {
        let events = self.inner.engine.subscribe();
        core_async::task::spawn(pump_engine_events(Arc::downgrade(&self.inner), events));
    }

    pub(crate) async fn handle_engine_event(&self, event: EngineEvent) {
        let loading = self.inner.state.lock().machine.status() == PlaybackStatus::Loading;

        match event {
            // Load outcomes belong to whoever issued the load.
            EngineEvent::Load { .. } | EngineEvent::LoadError { .. } => {}
            EngineEvent::Play
            | EngineEvent::Pause
            | EngineEvent::Buffering
            | EngineEvent::Stop
            | EngineEvent::Ended
                if loading =>
            {
                trace!(?event, "Ignoring transport event while loading");
            }
            EngineEvent::Play => {
                self.apply_input(PlaybackInput::Played);
                let now = self.inner.clock.unix_timestamp_millis();
                self.inner
                    .state
                    .lock()
                    .progress_at_ms
                    .get_or_insert(now);
            }
            EngineEvent::Pause => {
                let unexpected = self.inner.state.lock().machine.play_intent();
                self.apply_input(PlaybackInput::Paused);
                if unexpected {
                    debug!("Playback paused without a pause request");
                    self.save_resume_position().await;
                    self.recover_from_unexpected_pause().await;
                }
            }
            EngineEvent::Buffering => {
                self.apply_input(PlaybackInput::Buffering);
            }
            EngineEvent::Stop => {
                self.apply_input(PlaybackInput::Stopped);
            }
            EngineEvent::PlayBlocked => {
                info!("Autoplay blocked until user interaction");
                self.apply_input(PlaybackInput::PlayBlocked);
            }
            EngineEvent::PlayError { message } => {
                self.surface_error(message, false, false);
            }
            EngineEvent::Ended => self.on_track_ended().await,
        }
    }

    async fn on_track_ended(&self) {
        let track = self.inner.state.lock().loaded.clone();
        self.apply_input(PlaybackInput::Ended);

        if let Some(track) = &track {
            self.publish(CoreEvent::Playback(PlaybackEvent::TrackEnded {
                track_id: track.id.clone(),
            }));
            if let Some(resume) = &self.inner.resume {
                resume.clear(&track.id).await;
            }
        }

        let authority = self.authority();
        if let Authority::Follower(_) = authority {
            // The host decides what plays next.
            return;
        }

        let repeat = self.inner.state.lock().queue.repeat();
        if repeat == RepeatMode::One {
            debug!("Repeating track");
            if let Err(e) = self.seek_local(0.0).await {
                warn!(error = %e, "Failed to rewind for repeat");
            }
            self.apply_input(PlaybackInput::PlayRequested);
            if let Some(client) = authority.host() {
                self.dispatch(
                    client,
                    vec![
                        PlaybackCommand::Seek { position_ms: 0 }.into(),
                        PlaybackCommand::Play.into(),
                    ],
                );
            }
            if let Err(e) = self.inner.engine.play().await {
                debug!(error = %e, "Repeat play not started");
            }
            return;
        }

        if self.inner.state.lock().queue.advance(NavigationAction::Next).is_none() {
            debug!("Reached the end of the queue");
            return;
        }
        self.publish_current();
        if let Some(client) = authority.host() {
            self.dispatch_current_track(client);
        }
        if let Err(e) = self
            .load_current(authority.selection(Selection::Automatic), true)
            .await
        {
            warn!(error = %e, "Failed to advance to the next track");
        }
    }

    /// Restarts a segmented track that stalled on an empty buffer.
    async fn recover_from_unexpected_pause(&self) {
        if !self.inner.features.enable_unexpected_pause_recovery {
            return;
        }
        let Some(runner) = &self.inner.startup else {
            return;
        };

        let (track, progress_at) = {
            let state = self.inner.state.lock();
            if state.recovering || state.starting {
                return;
            }
            (state.loaded.clone(), state.progress_at_ms)
        };
        let Some(track) = track else {
            return;
        };

        let policy = runner.policy();
        let buffered = self.inner.engine.buffered_ahead().await;
        if !should_attempt_segmented_recovery_on_unexpected_pause(
            buffered,
            policy.max_buffered_ahead_secs,
        ) {
            debug!(?buffered, "Buffer is healthy, not recovering");
            return;
        }

        let now = self.inner.clock.unix_timestamp_millis();
        let eligibility = resolve_handoff_recovery_startup_eligibility(
            progress_at,
            policy.minimum_stable_playback_ms,
            now,
        );
        if !eligibility.eligible {
            debug!(
                reason = eligibility.reason.map(|reason| reason.as_str()),
                stable_for_ms = eligibility.stable_for_ms,
                "Playback not stable yet, not recovering"
            );
            return;
        }

        let position = match self.inner.engine.poll_position().await {
            Ok(Some(position)) => position,
            _ => self.inner.state.lock().machine.current_time(),
        };
        info!(track_id = %track.id, position, ?buffered, "Restarting segmented session after unexpected pause");

        let generation = self.inner.load_generation.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut state = self.inner.state.lock();
            state.recovering = true;
            state.progress_at_ms = None;
        }
        self.apply_input(PlaybackInput::LoadRequested);
        self.apply_input(PlaybackInput::PlayRequested);

        let result = runner
            .start(
                &session_request(&track, generation),
                LoadOptions::autoplay().retry(),
            )
            .await;
        self.inner.state.lock().recovering = false;
        if self.is_superseded(generation) {
            return;
        }

        match result {
            Ok(_) | Err(PlaybackError::PlayBlocked) | Err(PlaybackError::PlayFailed(_)) => {
                let duration = self.inner.engine.duration().unwrap_or(track.duration);
                self.apply_input(PlaybackInput::Loaded { duration });
                if position > 0.0 {
                    if let Err(e) = self.seek_local(position).await {
                        warn!(error = %e, "Failed to restore position after recovery");
                    }
                }
            }
            Err(PlaybackError::Superseded) => {}
            Err(e) => self.surface_error(e.to_string(), true, false),
        }
    }
}

async fn pump_engine_events(
    inner: Weak<ControllerInner>,
    mut events: broadcast::Receiver<EngineEvent>,
) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Engine event pump lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        let Some(inner) = inner.upgrade() else {
            break;
        };
        PlayerController { inner }.handle_engine_event(event).await;
    }
}
