//! # Player Controller
//!
//! The orchestrator: composes the audio engine, the playback state machine,
//! the play queue, segmented startup and the Listen Together client behind
//! one command API. It is the only component that knows whether playback is
//! solo or driven by a listening group, and whether this client hosts it.
//!
//! ## Commands
//!
//! Every command mutates local state first (queue edits, state machine
//! intents) and then awaits the engine. While this client hosts a group the
//! matching network command is dispatched in the background; a follower may
//! only add tracks, everything else fails with
//! [`SyncError::NotHost`](core_sync::SyncError::NotHost).
//!
//! ## Audio errors
//!
//! Load and play failures that survive the engine's own retries put the
//! state machine in `Error` and are published as
//! [`PlaybackEvent::Error`]. Only an explicit user command (or
//! [`PlayerController::clear_audio_error`]) resets it.
//!
//! ## Resume positions
//!
//! With resume positions enabled, the position of a track is stored when
//! playback pauses or moves away from it. An explicit user selection clears
//! the stored position of the selected track; automatic advance and group
//! driven selection leave it alone; [`PlayerController::resume`] restores it.

use crate::error::{CoreError, Result};
use crate::group::Authority;
use crate::resume::ResumePositions;
use bridge_traits::audio::{NativeAudioEvent, SoundHandleId};
use bridge_traits::time::Clock;
use core_playback::{
    AudioEngine, AudioEngineConfig, LoadOptions, NavigationAction, PlaybackError, PlaybackInput,
    PlaybackLocalState, PlaybackStateMachine, QueueState, RepeatMode, SegmentedSessionClient,
    SegmentedStartupRunner, SessionRequest, SharedTrack, StartupRecoveryPolicy, StreamSource, Track,
};
use core_runtime::config::{CoreConfig, FeatureFlags};
use core_runtime::events::{CoreEvent, EventBus, PlaybackEvent, QueueEvent};
use core_sync::{ListenTogetherClient, ListenTogetherConfig, PlaybackCommand, QueueCommand, SyncError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument, trace, warn};
use url::Url;

/// Tunables for the components the controller owns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSettings {
    #[serde(default)]
    pub engine: AudioEngineConfig,
    #[serde(default)]
    pub startup: StartupRecoveryPolicy,
    #[serde(default)]
    pub listen_together: ListenTogetherConfig,
    /// Preload the next track of direct streams for a gapless switch.
    #[serde(default = "default_preload_next")]
    pub preload_next: bool,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            engine: AudioEngineConfig::default(),
            startup: StartupRecoveryPolicy::default(),
            listen_together: ListenTogetherConfig::default(),
            preload_next: default_preload_next(),
        }
    }
}

fn default_preload_next() -> bool {
    true
}

impl PlayerSettings {
    /// No fades, retry delays or conflict backoff. Meant for tests.
    pub fn immediate() -> Self {
        Self {
            engine: AudioEngineConfig::immediate(),
            listen_together: ListenTogetherConfig::immediate(),
            ..Self::default()
        }
    }

    pub fn with_preload_next(mut self, enabled: bool) -> Self {
        self.preload_next = enabled;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.engine
            .validate()
            .and_then(|()| self.startup.validate())
            .map_err(|message| CoreError::Playback(PlaybackError::InvalidConfig(message)))?;
        self.listen_together
            .validate()
            .map_err(|message| CoreError::Sync(SyncError::InvalidConfig(message)))
    }
}

/// How the current track came to be selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Selection {
    /// Picked by the user while playing solo. Clears the stored position.
    Explicit,
    /// Continue where the track was left.
    Resume,
    /// Advanced after the previous track ended or was removed.
    Automatic,
    /// Applied locally by the host ahead of the group's confirmation.
    Optimistic,
    /// Dictated by the group's authoritative state.
    Remote,
}

#[derive(Debug, Default)]
pub(crate) struct ControllerState {
    pub(crate) queue: QueueState,
    pub(crate) machine: PlaybackStateMachine,
    /// Track handed to the engine most recently.
    pub(crate) loaded: Option<SharedTrack>,
    /// A segmented startup is in flight.
    pub(crate) starting: bool,
    /// Unexpected-pause recovery is in flight.
    pub(crate) recovering: bool,
    /// When the loaded track first reported playing.
    pub(crate) progress_at_ms: Option<i64>,
}

pub(crate) struct ControllerInner {
    pub(crate) engine: AudioEngine,
    pub(crate) startup: Option<SegmentedStartupRunner>,
    pub(crate) group: Option<ListenTogetherClient>,
    pub(crate) resume: Option<ResumePositions>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) bus: EventBus,
    pub(crate) settings: PlayerSettings,
    pub(crate) features: FeatureFlags,
    stream_base: Url,
    pub(crate) state: Mutex<ControllerState>,
    /// Bumped by every load; a load whose generation is no longer current
    /// was superseded and must not touch state.
    pub(crate) load_generation: AtomicU64,
}

/// Player orchestrator. Cloning shares the same player.
#[derive(Clone)]
pub struct PlayerController {
    pub(crate) inner: Arc<ControllerInner>,
}

impl PlayerController {
    /// Builds the player from host bridges.
    ///
    /// Spawns the engine and group event pumps, so on native targets this
    /// must run inside a Tokio runtime.
    pub fn new(config: &CoreConfig, settings: PlayerSettings, bus: EventBus) -> Result<Self> {
        settings.validate()?;

        let engine = AudioEngine::new(
            config.audio_backend.clone(),
            config.clock.clone(),
            settings.engine.clone(),
        );

        let startup = if config.features.enable_segmented_streaming {
            let sessions = SegmentedSessionClient::new(config.http_client.clone(), &config.api_base_url)?;
            Some(
                SegmentedStartupRunner::new(
                    sessions,
                    engine.clone(),
                    config.clock.clone(),
                    settings.startup.clone(),
                )
                .with_event_bus(bus.clone()),
            )
        } else {
            None
        };

        let group = match (&config.realtime_socket, &config.user_id) {
            (Some(socket), Some(user_id)) if config.features.enable_listen_together => Some(
                ListenTogetherClient::new(
                    socket.clone(),
                    config.clock.clone(),
                    user_id.clone(),
                    settings.listen_together.clone(),
                )?
                .with_event_bus(bus.clone()),
            ),
            _ => None,
        };

        let resume = config
            .settings_store
            .clone()
            .filter(|_| config.features.enable_resume_positions)
            .map(ResumePositions::new);

        let mut base = config.api_base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let stream_base = Url::parse(&base)
            .map_err(|e| CoreError::InitializationFailed(format!("invalid api base url: {e}")))?;

        let controller = Self {
            inner: Arc::new(ControllerInner {
                engine,
                startup,
                group,
                resume,
                clock: config.clock.clone(),
                bus,
                settings,
                features: config.features,
                stream_base,
                state: Mutex::new(ControllerState::default()),
                load_generation: AtomicU64::new(0),
            }),
        };
        controller.start_engine_pump();
        controller.start_group_pump();

        info!(
            segmented = controller.inner.startup.is_some(),
            listen_together = controller.inner.group.is_some(),
            resume_positions = controller.inner.resume.is_some(),
            "Player controller ready"
        );
        Ok(controller)
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    pub fn engine(&self) -> &AudioEngine {
        &self.inner.engine
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn settings(&self) -> &PlayerSettings {
        &self.inner.settings
    }

    pub fn listen_together(&self) -> Option<&ListenTogetherClient> {
        self.inner.group.as_ref()
    }

    /// Live playback snapshot for UI collaborators.
    pub fn playback_state(&self) -> PlaybackLocalState {
        self.inner.state.lock().machine.snapshot()
    }

    pub fn audio_error(&self) -> Option<String> {
        self.inner.state.lock().machine.error().map(str::to_string)
    }

    pub fn queue(&self) -> Vec<SharedTrack> {
        self.inner.state.lock().queue.tracks().to_vec()
    }

    pub fn current_index(&self) -> Option<usize> {
        self.inner.state.lock().queue.current_index()
    }

    pub fn current_track(&self) -> Option<SharedTrack> {
        self.inner.state.lock().queue.current_track().cloned()
    }

    /// Tracks after the current one, in play order.
    pub fn upcoming(&self) -> Vec<SharedTrack> {
        self.inner.state.lock().queue.upcoming()
    }

    pub fn is_shuffle(&self) -> bool {
        self.inner.state.lock().queue.is_shuffle()
    }

    pub fn repeat(&self) -> RepeatMode {
        self.inner.state.lock().queue.repeat()
    }

    pub fn volume(&self) -> f32 {
        self.inner.engine.volume()
    }

    pub fn is_muted(&self) -> bool {
        self.inner.engine.is_muted()
    }

    // ========================================================================
    // Queue replacement and insertion
    // ========================================================================

    pub async fn play_track(&self, track: Track) -> Result<()> {
        self.play_tracks(vec![track], 0).await
    }

    /// Replaces the queue with `tracks` and plays from `start`.
    #[instrument(skip(self, tracks), fields(count = tracks.len()))]
    pub async fn play_tracks(&self, tracks: Vec<Track>, start: usize) -> Result<()> {
        let authority = self.authority();
        authority.require_host("play-tracks")?;
        if tracks.is_empty() {
            return Err(PlaybackError::EmptyQueue.into());
        }

        let shared: Vec<SharedTrack> = tracks.into_iter().map(Arc::new).collect();
        let current = {
            let mut state = self.inner.state.lock();
            state.queue.replace(shared.clone(), start);
            state.queue.current_index().unwrap_or(0)
        };
        self.publish_queue();
        self.publish_current();

        if let Some(client) = authority.host() {
            self.dispatch_queue_snapshot(client, &shared, current);
        }
        self.load_current(authority.selection(Selection::Explicit), true).await
    }

    /// Inserts `track` right after the current one and jumps to it.
    #[instrument(skip(self, track), fields(track_id = %track.id))]
    pub async fn play_now(&self, track: Track) -> Result<()> {
        let authority = self.authority();
        authority.require_host("play-now")?;

        let shared = Arc::new(track);
        let index = self.inner.state.lock().queue.play_now(shared.clone());
        self.publish_queue();
        self.publish_current();

        if let Some(client) = authority.host() {
            self.dispatch(
                client,
                vec![
                    QueueCommand::InsertNext {
                        tracks: vec![Track::clone(&shared)],
                    }
                    .into(),
                    PlaybackCommand::SetTrack {
                        index,
                        track_id: Some(shared.id.clone()),
                    }
                    .into(),
                ],
            );
        }
        self.load_current(authority.selection(Selection::Explicit), true).await
    }

    /// Inserts `track` right after the current one.
    pub async fn play_next(&self, track: Track) -> Result<()> {
        let authority = self.authority();
        if let Authority::Follower(client) = &authority {
            client
                .queue(QueueCommand::InsertNext {
                    tracks: vec![track],
                })
                .await?;
            return Ok(());
        }

        let shared = Arc::new(track);
        self.inner.state.lock().queue.play_next(shared.clone());
        self.publish_queue();

        if let Some(client) = authority.host() {
            self.dispatch(
                client,
                vec![QueueCommand::InsertNext {
                    tracks: vec![Track::clone(&shared)],
                }
                .into()],
            );
        }
        Ok(())
    }

    /// Appends at the "Up Next" cursor so consecutive additions keep their
    /// order.
    pub async fn add_to_queue(&self, tracks: Vec<Track>) -> Result<()> {
        if tracks.is_empty() {
            return Ok(());
        }
        let authority = self.authority();
        if let Authority::Follower(client) = &authority {
            client.queue(QueueCommand::Add { tracks }).await?;
            return Ok(());
        }

        let shared: Vec<SharedTrack> = tracks.iter().cloned().map(Arc::new).collect();
        self.inner.state.lock().queue.add_to_queue(shared);
        self.publish_queue();

        if let Some(client) = authority.host() {
            self.dispatch(client, vec![QueueCommand::Add { tracks }.into()]);
        }
        Ok(())
    }

    pub async fn remove_from_queue(&self, index: usize) -> Result<()> {
        let authority = self.authority();
        authority.require_host("remove")?;

        let (outcome, now_empty, was_playing) = {
            let mut state = self.inner.state.lock();
            let was_playing = state.machine.play_intent();
            let outcome = state.queue.remove(index)?;
            (outcome, state.queue.is_empty(), was_playing)
        };
        debug!(track_id = %outcome.removed.id, index, "Removed from queue");
        self.publish_queue();

        if let Some(client) = authority.host() {
            self.dispatch(client, vec![QueueCommand::Remove { index }.into()]);
        }

        if !outcome.removed_current {
            return Ok(());
        }
        if now_empty {
            self.stop_playback().await;
            return Ok(());
        }
        self.publish_current();
        self.load_current(authority.selection(Selection::Automatic), was_playing)
            .await
    }

    pub async fn clear_queue(&self) -> Result<()> {
        let authority = self.authority();
        authority.require_host("clear")?;

        self.inner.state.lock().queue.clear();
        self.publish_queue();
        if let Some(client) = authority.host() {
            self.dispatch(client, vec![QueueCommand::Clear.into()]);
        }
        self.stop_playback().await;
        Ok(())
    }

    /// Replaces everything after the current track, in play order.
    pub async fn set_upcoming(&self, tracks: Vec<Track>) -> Result<()> {
        let authority = self.authority();
        authority.require_host("set-upcoming")?;

        let (queue, current) = {
            let mut state = self.inner.state.lock();
            state
                .queue
                .set_upcoming(tracks.into_iter().map(Arc::new).collect());
            (
                state.queue.tracks().to_vec(),
                state.queue.current_index().unwrap_or(0),
            )
        };
        self.publish_queue();

        if let Some(client) = authority.host() {
            self.dispatch_queue_snapshot(client, &queue, current);
        }
        Ok(())
    }

    // ========================================================================
    // Navigation and modes
    // ========================================================================

    pub async fn next(&self) -> Result<()> {
        self.navigate(NavigationAction::Next).await
    }

    pub async fn previous(&self) -> Result<()> {
        self.navigate(NavigationAction::Previous).await
    }

    #[instrument(skip(self))]
    async fn navigate(&self, action: NavigationAction) -> Result<()> {
        let authority = self.authority();
        authority.require_host(match action {
            NavigationAction::Next => PlaybackCommand::Next.name(),
            NavigationAction::Previous => PlaybackCommand::Previous.name(),
        })?;

        if self.inner.state.lock().queue.advance(action).is_none() {
            debug!("No navigation destination");
            return Ok(());
        }
        self.publish_current();

        if let Some(client) = authority.host() {
            self.dispatch_current_track(client);
        }
        self.load_current(authority.selection(Selection::Explicit), true).await
    }

    /// Toggles shuffle and returns the new state. Shared queues keep their
    /// order, so shuffle is unavailable in a group.
    pub fn toggle_shuffle(&self) -> Result<bool> {
        if !matches!(self.authority(), Authority::Solo) {
            return Err(CoreError::UnavailableInGroup("shuffle"));
        }
        let enabled = self.inner.state.lock().queue.toggle_shuffle();
        self.publish(CoreEvent::Queue(QueueEvent::ShuffleChanged { enabled }));
        Ok(enabled)
    }

    /// Cycles `Off → All → One → Off`.
    pub fn toggle_repeat(&self) -> RepeatMode {
        let mode = self.inner.state.lock().queue.cycle_repeat();
        self.publish(CoreEvent::Queue(QueueEvent::RepeatChanged {
            mode: mode.as_str().to_string(),
        }));
        mode
    }

    // ========================================================================
    // Transport
    // ========================================================================

    /// Plays the loaded track, or loads the current track from the top.
    pub async fn play(&self) -> Result<()> {
        self.start_playing(Selection::Explicit).await
    }

    /// Plays the loaded track, or loads the current track at its stored
    /// resume position.
    pub async fn resume(&self) -> Result<()> {
        self.start_playing(Selection::Resume).await
    }

    async fn start_playing(&self, selection: Selection) -> Result<()> {
        let authority = self.authority();
        authority.require_host("play")?;
        let had_error = self.reset_audio_error();

        if had_error || self.inner.engine.current_src().is_none() {
            if let Some(client) = authority.host() {
                self.dispatch(client, vec![PlaybackCommand::Play.into()]);
            }
            return self.load_current(authority.selection(selection), true).await;
        }

        self.apply_input(PlaybackInput::PlayRequested);
        if let Some(client) = authority.host() {
            self.dispatch(client, vec![PlaybackCommand::Play.into()]);
        }
        match self.inner.engine.play().await {
            // Surfaced through the engine event pump.
            Ok(()) | Err(PlaybackError::PlayBlocked) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn pause(&self) -> Result<()> {
        let authority = self.authority();
        authority.require_host("pause")?;

        self.apply_input(PlaybackInput::PauseRequested);
        self.inner.engine.pause().await?;
        self.save_resume_position().await;
        if let Some(client) = authority.host() {
            self.dispatch(client, vec![PlaybackCommand::Pause.into()]);
        }
        Ok(())
    }

    pub async fn seek(&self, position_secs: f64) -> Result<()> {
        let authority = self.authority();
        authority.require_host("seek")?;

        self.seek_local(position_secs).await?;
        if let Some(client) = authority.host() {
            let position_ms = (position_secs.max(0.0) * 1000.0).round() as u64;
            self.dispatch(client, vec![PlaybackCommand::Seek { position_ms }.into()]);
        }
        Ok(())
    }

    pub async fn set_volume(&self, volume: f32) -> Result<()> {
        self.inner.engine.set_volume(volume).await?;
        self.publish_volume();
        Ok(())
    }

    /// Returns the new mute state.
    pub async fn toggle_mute(&self) -> Result<bool> {
        let muted = !self.inner.engine.is_muted();
        self.inner.engine.set_muted(muted).await?;
        self.publish_volume();
        Ok(muted)
    }

    /// Leaves the `Error` state. Returns `false` when there was no error.
    pub fn clear_audio_error(&self) -> bool {
        self.reset_audio_error()
    }

    /// Polls the playhead and publishes it. Hosts call this on their UI
    /// timer.
    pub async fn tick(&self) -> Result<Option<f64>> {
        let Some(position) = self.inner.engine.poll_position().await? else {
            return Ok(None);
        };
        let seek_target = self.inner.engine.seek_lock_target();
        let (track_id, duration) = {
            let mut state = self.inner.state.lock();
            state.machine.set_current_time(position);
            state.machine.set_seek_lock(seek_target);
            (
                state.loaded.as_ref().map(|track| track.id.clone()),
                state.machine.duration(),
            )
        };
        if let Some(track_id) = track_id {
            self.publish(CoreEvent::Playback(PlaybackEvent::PositionChanged {
                track_id,
                position_secs: position,
                duration_secs: duration,
            }));
        }
        Ok(Some(position))
    }

    /// Forwards a spontaneous native event for `handle` to the engine.
    pub fn on_native_event(&self, handle: SoundHandleId, event: NativeAudioEvent) {
        self.inner.engine.on_native_event(handle, event);
    }

    // ========================================================================
    // Loading
    // ========================================================================

    /// Loads the queue's current track.
    pub(crate) async fn load_current(&self, selection: Selection, autoplay: bool) -> Result<()> {
        let generation = self.inner.load_generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.reset_audio_error();

        let (track, previous) = {
            let mut state = self.inner.state.lock();
            let Some(track) = state.queue.current_track().cloned() else {
                return Err(PlaybackError::EmptyQueue.into());
            };
            let position = state.machine.current_time();
            let duration = state.machine.duration();
            let previous = state
                .loaded
                .replace(track.clone())
                .filter(|previous| previous.id != track.id)
                .map(|previous| (previous, position, duration));
            state.progress_at_ms = None;
            (track, previous)
        };
        debug!(track_id = %track.id, ?selection, autoplay, "Loading track");

        self.apply_input(PlaybackInput::LoadRequested);
        self.apply_input(if autoplay {
            PlaybackInput::PlayRequested
        } else {
            PlaybackInput::PauseRequested
        });

        let switching = previous.is_some();
        let mut resume_at = None;
        if let Some(resume) = &self.inner.resume {
            if let Some((previous, position, duration)) = previous {
                resume.save(&previous.id, position, duration).await;
            }
            match selection {
                Selection::Explicit => resume.clear(&track.id).await,
                Selection::Resume => resume_at = resume.load(&track.id).await,
                Selection::Automatic | Selection::Optimistic | Selection::Remote => {}
            }
        }

        // Switching away from another track skips the cleanup fade.
        let options = LoadOptions {
            autoplay,
            immediate: switching,
            ..LoadOptions::default()
        };
        if !self.start_track(&track, options, generation).await? {
            return Ok(());
        }
        self.preload_upcoming(generation);

        if let Some(position) = resume_at {
            debug!(track_id = %track.id, position, "Restoring resume position");
            if let Err(e) = self.seek_local(position).await {
                warn!(track_id = %track.id, error = %e, "Failed to restore resume position");
            }
        }
        self.signal_ready(&track);
        Ok(())
    }

    /// Hands `track` to the segmented startup runner or the engine. Returns
    /// `false` when a newer load superseded this one.
    pub(crate) async fn start_track(
        &self,
        track: &SharedTrack,
        options: LoadOptions,
        generation: u64,
    ) -> Result<bool> {
        let result = match &self.inner.startup {
            Some(runner) => {
                self.inner.state.lock().starting = true;
                runner
                    .start(&session_request(track, generation), options)
                    .await
                    .map(|_| ())
            }
            None => match self.stream_url(track) {
                Ok(url) => self.inner.engine.load(&url, options).await,
                Err(e) => Err(e),
            },
        };

        if self.is_superseded(generation) {
            debug!(track_id = %track.id, "Load superseded");
            return Ok(false);
        }
        self.inner.state.lock().starting = false;

        match result {
            // Autoplay refusals are reported by the engine event pump.
            Ok(()) | Err(PlaybackError::PlayBlocked) | Err(PlaybackError::PlayFailed(_)) => {}
            Err(PlaybackError::Superseded) => return Ok(false),
            Err(e) => {
                self.surface_error(e.to_string(), true, e.is_transient());
                return Err(e.into());
            }
        }

        let duration = self
            .inner
            .engine
            .duration()
            .filter(|duration| *duration > 0.0)
            .unwrap_or(track.duration);
        self.apply_input(PlaybackInput::Loaded { duration });
        self.publish(CoreEvent::Playback(PlaybackEvent::TrackLoaded {
            track_id: track.id.clone(),
            duration_secs: duration,
        }));
        Ok(true)
    }

    /// Preloads the track `next` would move to. Segmented sessions and
    /// followers never preload.
    fn preload_upcoming(&self, generation: u64) {
        if !self.inner.settings.preload_next || self.inner.startup.is_some() {
            return;
        }
        if let Authority::Follower(_) = self.authority() {
            return;
        }
        let upcoming = {
            let state = self.inner.state.lock();
            let current = state.queue.current_track().map(|track| track.id.clone());
            state
                .queue
                .peek(NavigationAction::Next)
                .and_then(|index| state.queue.track_at(index).cloned())
                .filter(|track| Some(&track.id) != current.as_ref())
        };
        let Some(track) = upcoming else {
            return;
        };
        let src = match self.stream_url(&track) {
            Ok(src) => src,
            Err(e) => {
                debug!(track_id = %track.id, error = %e, "Nothing to preload");
                return;
            }
        };

        let controller = self.clone();
        core_async::task::spawn(async move {
            if controller.is_superseded(generation) {
                return;
            }
            debug!(track_id = %track.id, "Preloading next track");
            if let Err(e) = controller.inner.engine.preload(&src, None).await {
                debug!(track_id = %track.id, error = %e, "Preload failed");
            }
        });
    }

    pub(crate) fn is_superseded(&self, generation: u64) -> bool {
        self.inner.load_generation.load(Ordering::SeqCst) != generation
    }

    fn stream_url(&self, track: &Track) -> std::result::Result<String, PlaybackError> {
        let path = match &track.stream_source {
            Some(StreamSource::Provider {
                provider,
                external_id,
            }) => format!("providers/{provider}/tracks/{external_id}/stream"),
            Some(StreamSource::Library) | None => format!("tracks/{}/stream", track.id),
        };
        self.inner
            .stream_base
            .join(&path)
            .map(String::from)
            .map_err(|e| PlaybackError::NoPlayableSource(format!("{}: {e}", track.id)))
    }

    /// Seeks the engine and mirrors the seek lock into the state machine.
    pub(crate) async fn seek_local(&self, position_secs: f64) -> Result<()> {
        self.inner.engine.seek(position_secs).await?;
        let target = self.inner.engine.seek_lock_target();
        let (track_id, position, duration) = {
            let mut state = self.inner.state.lock();
            state.machine.set_seek_lock(target);
            if let Some(target) = target {
                state.machine.set_current_time(target);
            }
            (
                state.loaded.as_ref().map(|track| track.id.clone()),
                state.machine.current_time(),
                state.machine.duration(),
            )
        };
        if let Some(track_id) = track_id {
            self.publish(CoreEvent::Playback(PlaybackEvent::PositionChanged {
                track_id,
                position_secs: position,
                duration_secs: duration,
            }));
        }
        Ok(())
    }

    /// Releases every handle and returns to `Idle`.
    pub(crate) async fn stop_playback(&self) {
        self.save_resume_position().await;
        self.inner.load_generation.fetch_add(1, Ordering::SeqCst);
        self.inner.engine.unload(false).await;
        {
            let mut state = self.inner.state.lock();
            state.loaded = None;
            state.starting = false;
            state.progress_at_ms = None;
        }
        self.apply_input(PlaybackInput::Stopped);
    }

    pub(crate) async fn save_resume_position(&self) {
        let Some(resume) = &self.inner.resume else {
            return;
        };
        let snapshot = {
            let state = self.inner.state.lock();
            state.loaded.clone().map(|track| {
                (
                    track,
                    state.machine.current_time(),
                    state.machine.duration(),
                )
            })
        };
        if let Some((track, position, duration)) = snapshot {
            resume.save(&track.id, position, duration).await;
        }
    }

    // ========================================================================
    // State machine and events
    // ========================================================================

    /// Applies `input` and publishes the status when it changed.
    pub(crate) fn apply_input(&self, input: PlaybackInput) -> bool {
        let (changed, status, track_id) = {
            let mut state = self.inner.state.lock();
            let changed = state.machine.apply(input);
            (
                changed,
                state.machine.status(),
                state.loaded.as_ref().map(|track| track.id.clone()),
            )
        };
        if changed {
            self.publish(CoreEvent::Playback(PlaybackEvent::StatusChanged {
                track_id,
                status: status.as_str().to_string(),
            }));
        }
        changed
    }

    /// Moves the state machine to `Error` and publishes the audio error.
    pub(crate) fn surface_error(&self, message: String, load: bool, recoverable: bool) {
        let (duplicate, track_id) = {
            let state = self.inner.state.lock();
            (
                state.machine.status().is_terminal()
                    && state.machine.error() == Some(message.as_str()),
                state.loaded.as_ref().map(|track| track.id.clone()),
            )
        };
        if duplicate {
            return;
        }
        warn!(track_id = ?track_id, %message, "Audio error");
        self.apply_input(if load {
            PlaybackInput::LoadError(message.clone())
        } else {
            PlaybackInput::PlayError(message.clone())
        });
        self.publish(CoreEvent::Playback(PlaybackEvent::Error {
            track_id,
            message,
            recoverable,
        }));
    }

    fn reset_audio_error(&self) -> bool {
        let had_error = self.inner.state.lock().machine.status().is_terminal();
        if had_error {
            info!("Clearing audio error");
            self.apply_input(PlaybackInput::Reset);
            self.publish(CoreEvent::Playback(PlaybackEvent::ErrorCleared));
        }
        had_error
    }

    pub(crate) fn publish(&self, event: CoreEvent) {
        if let Err(e) = self.inner.bus.emit(event) {
            trace!(event = e.0.description(), "No subscribers for player event");
        }
    }

    pub(crate) fn publish_queue(&self) {
        let (length, current_index) = {
            let state = self.inner.state.lock();
            (state.queue.len(), state.queue.current_index())
        };
        self.publish(CoreEvent::Queue(QueueEvent::Changed {
            length,
            current_index,
        }));
    }

    pub(crate) fn publish_current(&self) {
        let current = {
            let state = self.inner.state.lock();
            state
                .queue
                .current_index()
                .zip(state.queue.current_track().map(|track| track.id.clone()))
        };
        if let Some((index, track_id)) = current {
            self.publish(CoreEvent::Queue(QueueEvent::CurrentChanged { index, track_id }));
        }
    }

    fn publish_volume(&self) {
        self.publish(CoreEvent::Playback(PlaybackEvent::VolumeChanged {
            volume: self.inner.engine.volume(),
            muted: self.inner.engine.is_muted(),
        }));
    }
}

pub(crate) fn session_request(track: &Track, load_id: u64) -> SessionRequest {
    let source_type = track
        .stream_source
        .as_ref()
        .map_or("library", StreamSource::source_type);
    SessionRequest::new(track.id.clone(), source_type).with_diagnostics(Some(load_id as f64), None)
}
