//! # Audio Engine Adapter
//!
//! Wraps the platform's native sound primitive ([`NativeAudioBackend`]).
//!
//! ## Ownership
//!
//! The engine owns at most one *active* handle and at most one *preload*
//! handle. Handles are always taken out of the shared state before any
//! `.await`, so every handle is released exactly once no matter how quickly
//! loads and cleanups interleave.
//!
//! ## Concurrency
//!
//! - A monotonically increasing load generation tags every load. A load
//!   whose generation is no longer current when the native call returns is
//!   superseded: its handle is released and never becomes active.
//! - `is_loading` / `is_preloading` mirror the in-flight work.
//! - The state mutex is a `parking_lot::Mutex` and is never held across an
//!   `.await`.
//!
//! ## Events
//!
//! Lifecycle events are broadcast as [`EngineEvent`]. For a given handle they
//! are emitted in the order the native primitive reports them; events for a
//! handle that is no longer active are dropped.

use crate::config::AudioEngineConfig;
use crate::error::{PlaybackError, Result};
use bridge_traits::audio::{LoadRequest, NativeAudioBackend, NativeAudioEvent, SoundHandleId};
use bridge_traits::time::Clock;
use core_async::sync::broadcast;
use core_async::time::{sleep, Duration};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, trace, warn};

const EVENT_CAPACITY: usize = 64;

/// Lifecycle events emitted by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// A source became active. Carries its duration in seconds.
    Load { src: String, duration: f64 },
    /// Loading failed after any retries.
    LoadError { src: String, message: String },
    Play,
    Pause,
    Stop,
    /// Playback refused after the bounded retry.
    PlayError { message: String },
    /// Playback refused; a retry is armed for the platform unlock signal.
    PlayBlocked,
    Ended,
    Buffering,
}

/// Options for [`AudioEngine::load`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadOptions {
    pub autoplay: bool,
    pub format_hint: Option<String>,
    /// Force a fresh native load even when `src` is already loaded.
    pub is_retry: bool,
    pub headers: HashMap<String, String>,
    /// Skip the fade-out when tearing down the previous handle.
    pub immediate: bool,
}

impl LoadOptions {
    pub fn autoplay() -> Self {
        Self {
            autoplay: true,
            ..Default::default()
        }
    }

    pub fn with_format_hint(mut self, hint: Option<String>) -> Self {
        self.format_hint = hint;
        self
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn immediate(mut self, immediate: bool) -> Self {
        self.immediate = immediate;
        self
    }

    pub fn retry(mut self) -> Self {
        self.is_retry = true;
        self
    }
}

#[derive(Debug, Clone)]
struct ActiveSound {
    handle: SoundHandleId,
    src: String,
    duration: f64,
}

#[derive(Debug, Clone)]
struct PreloadSlot {
    src: String,
    /// `None` while the preload is still in flight.
    handle: Option<SoundHandleId>,
    duration: f64,
}

#[derive(Debug, Clone, Copy)]
struct SeekLock {
    target: f64,
    expires_at_ms: i64,
}

#[derive(Debug)]
struct EngineState {
    active: Option<ActiveSound>,
    preload: Option<PreloadSlot>,
    is_loading: bool,
    loading_src: Option<String>,
    is_preloading: bool,
    load_generation: u64,
    preload_generation: u64,
    volume: f32,
    muted: bool,
    seek_lock: Option<SeekLock>,
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            active: None,
            preload: None,
            is_loading: false,
            loading_src: None,
            is_preloading: false,
            load_generation: 0,
            preload_generation: 0,
            volume: 1.0,
            muted: false,
            seek_lock: None,
        }
    }
}

struct EngineInner {
    backend: Arc<dyn NativeAudioBackend>,
    clock: Arc<dyn Clock>,
    config: AudioEngineConfig,
    state: Mutex<EngineState>,
    events: broadcast::Sender<EngineEvent>,
}

/// Audio engine adapter. Cloning shares the same engine.
#[derive(Clone)]
pub struct AudioEngine {
    inner: Arc<EngineInner>,
}

enum LoadPlan {
    AlreadyLoaded { play: bool },
    AdoptPreload {
        sound: ActiveSound,
        previous: Option<SoundHandleId>,
        volume: f32,
        muted: bool,
    },
    Fresh {
        generation: u64,
        previous: Option<SoundHandleId>,
        stale_preload: Option<SoundHandleId>,
        volume: f32,
        muted: bool,
    },
}

impl AudioEngine {
    pub fn new(
        backend: Arc<dyn NativeAudioBackend>,
        clock: Arc<dyn Clock>,
        config: AudioEngineConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(EngineInner {
                backend,
                clock,
                config,
                state: Mutex::new(EngineState::default()),
                events,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.events.subscribe()
    }

    pub fn config(&self) -> &AudioEngineConfig {
        &self.inner.config
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    pub fn is_loading(&self) -> bool {
        self.inner.state.lock().is_loading
    }

    pub fn is_preloading(&self) -> bool {
        self.inner.state.lock().is_preloading
    }

    pub fn current_src(&self) -> Option<String> {
        self.inner.state.lock().active.as_ref().map(|a| a.src.clone())
    }

    pub fn preloaded_src(&self) -> Option<String> {
        let state = self.inner.state.lock();
        state
            .preload
            .as_ref()
            .filter(|slot| slot.handle.is_some())
            .map(|slot| slot.src.clone())
    }

    pub fn active_handle(&self) -> Option<SoundHandleId> {
        self.inner.state.lock().active.as_ref().map(|a| a.handle)
    }

    pub fn duration(&self) -> Option<f64> {
        self.inner.state.lock().active.as_ref().map(|a| a.duration)
    }

    pub fn volume(&self) -> f32 {
        self.inner.state.lock().volume
    }

    pub fn is_muted(&self) -> bool {
        self.inner.state.lock().muted
    }

    /// Current seek-lock target, `None` once released or expired.
    pub fn seek_lock_target(&self) -> Option<f64> {
        let now = self.inner.clock.unix_timestamp_millis();
        let mut state = self.inner.state.lock();
        match state.seek_lock {
            Some(lock) if now < lock.expires_at_ms => Some(lock.target),
            Some(_) => {
                state.seek_lock = None;
                None
            }
            None => None,
        }
    }

    // ========================================================================
    // Loading
    // ========================================================================

    /// Loads `src` into the active slot.
    ///
    /// Returns [`PlaybackError::Superseded`] when a newer load replaced this
    /// one before it finished.
    #[instrument(skip(self, options), fields(autoplay = options.autoplay))]
    pub async fn load(&self, src: &str, options: LoadOptions) -> Result<()> {
        let plan = self.plan_load(src, &options);

        match plan {
            LoadPlan::AlreadyLoaded { play } => {
                if play {
                    self.play().await?;
                }
                Ok(())
            }
            LoadPlan::AdoptPreload {
                sound,
                previous,
                volume,
                muted,
            } => {
                if let Some(handle) = previous {
                    self.cleanup(handle, options.immediate).await;
                }
                let backend = &self.inner.backend;
                if let Err(e) = backend.set_volume(sound.handle, volume).await {
                    debug!(error = %e, "Failed to restore volume on preloaded sound");
                }
                if let Err(e) = backend.set_muted(sound.handle, muted).await {
                    debug!(error = %e, "Failed to unmute preloaded sound");
                }
                info!(src = %sound.src, "Switched to preloaded sound");
                self.emit(EngineEvent::Load {
                    src: sound.src.clone(),
                    duration: sound.duration,
                });
                if options.autoplay {
                    self.play().await?;
                }
                Ok(())
            }
            LoadPlan::Fresh {
                generation,
                previous,
                stale_preload,
                volume,
                muted,
            } => {
                if let Some(handle) = stale_preload {
                    self.cleanup(handle, true).await;
                }
                if let Some(handle) = previous {
                    self.cleanup(handle, options.immediate).await;
                }
                self.load_fresh(src, &options, generation, volume, muted)
                    .await
            }
        }
    }

    fn plan_load(&self, src: &str, options: &LoadOptions) -> LoadPlan {
        let mut state = self.inner.state.lock();

        if !options.is_retry {
            if state.active.as_ref().is_some_and(|a| a.src == src) {
                return LoadPlan::AlreadyLoaded {
                    play: options.autoplay,
                };
            }
            if state.is_loading && state.loading_src.as_deref() == Some(src) {
                return LoadPlan::AlreadyLoaded { play: false };
            }
        }

        state.seek_lock = None;
        state.load_generation += 1;
        let previous = state.active.take().map(|a| a.handle);

        let ready_preload = state
            .preload
            .as_ref()
            .is_some_and(|slot| slot.src == src && slot.handle.is_some());
        if ready_preload && !options.is_retry {
            if let Some(PreloadSlot {
                src,
                handle: Some(handle),
                duration,
            }) = state.preload.take()
            {
                state.preload_generation += 1;
                state.is_preloading = false;
                state.is_loading = false;
                state.loading_src = None;
                let sound = ActiveSound {
                    handle,
                    src,
                    duration,
                };
                state.active = Some(sound.clone());
                return LoadPlan::AdoptPreload {
                    sound,
                    previous,
                    volume: state.volume,
                    muted: state.muted,
                };
            }
        }

        // A preload for the same source that is not ready yet would only
        // duplicate this load.
        let mut stale_preload = None;
        if state.preload.as_ref().is_some_and(|slot| slot.src == src) {
            stale_preload = state.preload.take().and_then(|slot| slot.handle);
            state.preload_generation += 1;
            state.is_preloading = false;
        }

        state.is_loading = true;
        state.loading_src = Some(src.to_string());
        LoadPlan::Fresh {
            generation: state.load_generation,
            previous,
            stale_preload,
            volume: state.volume,
            muted: state.muted,
        }
    }

    async fn load_fresh(
        &self,
        src: &str,
        options: &LoadOptions,
        generation: u64,
        volume: f32,
        muted: bool,
    ) -> Result<()> {
        let backend = &self.inner.backend;
        let quirks = backend.quirks();
        let mut attempt: u32 = 0;

        loop {
            let request = LoadRequest::new(src)
                .with_format_hint(options.format_hint.clone())
                .with_headers(options.headers.clone())
                .with_volume(volume)
                .muted(muted);

            match backend.load(request).await {
                Ok(loaded) => {
                    let adopted = {
                        let mut state = self.inner.state.lock();
                        if state.load_generation == generation {
                            state.active = Some(ActiveSound {
                                handle: loaded.handle,
                                src: src.to_string(),
                                duration: loaded.duration_secs,
                            });
                            state.is_loading = false;
                            state.loading_src = None;
                            true
                        } else {
                            false
                        }
                    };

                    if !adopted {
                        debug!(src, "Load superseded, releasing handle");
                        self.release(loaded.handle).await;
                        return Err(PlaybackError::Superseded);
                    }

                    info!(src, duration = loaded.duration_secs, "Sound loaded");
                    self.emit(EngineEvent::Load {
                        src: src.to_string(),
                        duration: loaded.duration_secs,
                    });
                    if options.autoplay {
                        self.play().await?;
                    }
                    return Ok(());
                }
                Err(e) => {
                    if self.inner.state.lock().load_generation != generation {
                        return Err(PlaybackError::Superseded);
                    }

                    if quirks.transient_load_errors && attempt < self.inner.config.max_load_retries {
                        attempt += 1;
                        let delay = self.inner.config.load_retry_delay(attempt);
                        warn!(src, attempt, delay_ms = delay.as_millis() as u64, error = %e, "Load failed, retrying");
                        pause_for(delay).await;
                        if self.inner.state.lock().load_generation != generation {
                            return Err(PlaybackError::Superseded);
                        }
                        continue;
                    }

                    {
                        let mut state = self.inner.state.lock();
                        if state.load_generation == generation {
                            state.is_loading = false;
                            state.loading_src = None;
                            state.active = None;
                        }
                    }
                    warn!(src, attempts = attempt + 1, error = %e, "Load failed");
                    self.emit(EngineEvent::LoadError {
                        src: src.to_string(),
                        message: e.to_string(),
                    });
                    return Err(PlaybackError::LoadFailed(e.to_string()));
                }
            }
        }
    }

    /// Loads `src` into the muted preload slot for a gapless switch later.
    ///
    /// Replaces any earlier preload. Failures are not surfaced as events.
    #[instrument(skip(self, format_hint))]
    pub async fn preload(&self, src: &str, format_hint: Option<String>) -> Result<()> {
        let (generation, previous) = {
            let mut state = self.inner.state.lock();
            if state.active.as_ref().is_some_and(|a| a.src == src)
                || state.preload.as_ref().is_some_and(|p| p.src == src)
            {
                return Ok(());
            }
            state.preload_generation += 1;
            let previous = state.preload.take().and_then(|slot| slot.handle);
            state.preload = Some(PreloadSlot {
                src: src.to_string(),
                handle: None,
                duration: 0.0,
            });
            state.is_preloading = true;
            (state.preload_generation, previous)
        };

        if let Some(handle) = previous {
            self.cleanup(handle, true).await;
        }

        let request = LoadRequest::new(src)
            .with_format_hint(format_hint)
            .with_volume(0.0)
            .muted(true);

        match self.inner.backend.load(request).await {
            Ok(loaded) => {
                let kept = {
                    let mut state = self.inner.state.lock();
                    if state.preload_generation == generation {
                        if let Some(slot) = state.preload.as_mut() {
                            slot.handle = Some(loaded.handle);
                            slot.duration = loaded.duration_secs;
                        }
                        state.is_preloading = false;
                        true
                    } else {
                        false
                    }
                };
                if !kept {
                    self.release(loaded.handle).await;
                } else {
                    debug!(src, "Preload ready");
                }
                Ok(())
            }
            Err(e) => {
                let mut state = self.inner.state.lock();
                if state.preload_generation == generation {
                    state.preload = None;
                    state.is_preloading = false;
                }
                debug!(src, error = %e, "Preload failed");
                Err(PlaybackError::LoadFailed(e.to_string()))
            }
        }
    }

    // ========================================================================
    // Transport
    // ========================================================================

    /// Starts playback of the active sound.
    ///
    /// Idempotent when the native primitive already reports playing. A
    /// refused play gets one retry after a short delay; on platforms with an
    /// unlock signal a further retry is armed for that signal.
    #[instrument(skip(self))]
    pub async fn play(&self) -> Result<()> {
        let Some(handle) = self.active_handle() else {
            if self.is_loading() {
                trace!("Play requested while loading");
                return Ok(());
            }
            return Err(PlaybackError::NoTrackLoaded);
        };
        let backend = &self.inner.backend;

        if backend.is_playing(handle).await.unwrap_or(false) {
            self.emit(EngineEvent::Play);
            return Ok(());
        }

        let first_error = match backend.play(handle).await {
            Ok(()) => {
                self.emit(EngineEvent::Play);
                return Ok(());
            }
            Err(e) => e,
        };

        warn!(error = %first_error, "Play refused, retrying once");
        pause_for(self.inner.config.play_retry_delay()).await;
        if self.active_handle() != Some(handle) {
            return Ok(());
        }

        match backend.play(handle).await {
            Ok(()) => {
                self.emit(EngineEvent::Play);
                Ok(())
            }
            Err(e) if backend.quirks().unlock_signal => {
                info!(error = %e, "Play blocked, waiting for audio unlock");
                self.emit(EngineEvent::PlayBlocked);
                self.arm_unlock_retry(handle);
                Err(PlaybackError::PlayBlocked)
            }
            Err(e) => {
                warn!(error = %e, "Play failed after retry");
                self.emit(EngineEvent::PlayError {
                    message: e.to_string(),
                });
                Err(PlaybackError::PlayFailed(e.to_string()))
            }
        }
    }

    fn arm_unlock_retry(&self, handle: SoundHandleId) {
        let engine = self.clone();
        core_async::task::spawn(async move {
            if let Err(e) = engine.inner.backend.wait_for_unlock().await {
                debug!(error = %e, "Unlock signal unavailable");
                return;
            }
            if engine.active_handle() != Some(handle) {
                return;
            }
            match engine.inner.backend.play(handle).await {
                Ok(()) => engine.emit(EngineEvent::Play),
                Err(e) => engine.emit(EngineEvent::PlayError {
                    message: e.to_string(),
                }),
            }
        });
    }

    pub async fn pause(&self) -> Result<()> {
        let Some(handle) = self.active_handle() else {
            return Ok(());
        };
        self.inner.backend.pause(handle).await?;
        self.emit(EngineEvent::Pause);
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        let Some(handle) = self.active_handle() else {
            return Ok(());
        };
        self.inner.backend.stop(handle).await?;
        self.inner.state.lock().seek_lock = None;
        self.emit(EngineEvent::Stop);
        Ok(())
    }

    /// Seeks and installs the seek lock.
    pub async fn seek(&self, position_secs: f64) -> Result<()> {
        let Some((handle, duration)) = self
            .inner
            .state
            .lock()
            .active
            .as_ref()
            .map(|a| (a.handle, a.duration))
        else {
            return Ok(());
        };

        let mut target = if position_secs.is_finite() {
            position_secs.max(0.0)
        } else {
            0.0
        };
        if duration > 0.0 {
            target = target.min(duration);
        }

        let expires_at_ms = self.inner.clock.unix_timestamp_millis()
            + self.inner.config.seek_lock_timeout_ms as i64;
        self.inner.state.lock().seek_lock = Some(SeekLock {
            target,
            expires_at_ms,
        });
        self.inner.backend.seek(handle, target).await?;
        Ok(())
    }

    /// Reads the native position, honoring the seek lock.
    ///
    /// While the lock holds, positions further than the configured tolerance
    /// from the target are replaced by the target. A confirming position or
    /// the lock timeout releases the lock.
    pub async fn poll_position(&self) -> Result<Option<f64>> {
        let Some(handle) = self.active_handle() else {
            return Ok(None);
        };
        let reported = self.inner.backend.position(handle).await?;
        let now = self.inner.clock.unix_timestamp_millis();

        let mut state = self.inner.state.lock();
        let Some(lock) = state.seek_lock else {
            return Ok(Some(reported));
        };
        if now >= lock.expires_at_ms {
            trace!("Seek lock expired");
            state.seek_lock = None;
            return Ok(Some(reported));
        }
        if (reported - lock.target).abs() <= self.inner.config.seek_tolerance_secs {
            state.seek_lock = None;
            return Ok(Some(reported));
        }
        Ok(Some(lock.target))
    }

    /// Seconds buffered ahead of the playhead, when the platform knows.
    pub async fn buffered_ahead(&self) -> Option<f64> {
        let handle = self.active_handle()?;
        self.inner.backend.buffered_ahead(handle).await.ok().flatten()
    }

    pub async fn set_volume(&self, volume: f32) -> Result<()> {
        if !(0.0..=1.0).contains(&volume) {
            return Err(PlaybackError::InvalidVolume(volume));
        }
        let handle = {
            let mut state = self.inner.state.lock();
            state.volume = volume;
            state.active.as_ref().map(|a| a.handle)
        };
        if let Some(handle) = handle {
            self.inner.backend.set_volume(handle, volume).await?;
        }
        Ok(())
    }

    pub async fn set_muted(&self, muted: bool) -> Result<()> {
        let handle = {
            let mut state = self.inner.state.lock();
            state.muted = muted;
            state.active.as_ref().map(|a| a.handle)
        };
        if let Some(handle) = handle {
            self.inner.backend.set_muted(handle, muted).await?;
        }
        Ok(())
    }

    /// Tears down the active and preload handles and cancels in-flight loads.
    pub async fn unload(&self, immediate: bool) {
        let (active, preload) = {
            let mut state = self.inner.state.lock();
            state.load_generation += 1;
            state.preload_generation += 1;
            state.is_loading = false;
            state.loading_src = None;
            state.is_preloading = false;
            state.seek_lock = None;
            (
                state.active.take().map(|a| a.handle),
                state.preload.take().and_then(|slot| slot.handle),
            )
        };
        if let Some(handle) = preload {
            self.cleanup(handle, true).await;
        }
        if let Some(handle) = active {
            self.cleanup(handle, immediate).await;
            self.emit(EngineEvent::Stop);
        }
    }

    // ========================================================================
    // Native events
    // ========================================================================

    /// Routes a spontaneous native event. Events for any handle other than
    /// the active one are dropped.
    pub fn on_native_event(&self, handle: SoundHandleId, event: NativeAudioEvent) {
        if self.active_handle() != Some(handle) {
            trace!(%handle, ?event, "Ignoring event for stale handle");
            return;
        }
        let mapped = match event {
            NativeAudioEvent::Ended => EngineEvent::Ended,
            NativeAudioEvent::Paused => EngineEvent::Pause,
            NativeAudioEvent::Playing => EngineEvent::Play,
            NativeAudioEvent::Waiting => EngineEvent::Buffering,
        };
        self.emit(mapped);
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Fades out (unless `immediate`), stops and releases a handle that has
    /// already been removed from the state.
    async fn cleanup(&self, handle: SoundHandleId, immediate: bool) {
        let fade = self.inner.config.fade_duration();
        if !immediate && !fade.is_zero() {
            let volume = self.volume();
            if let Err(e) = self.inner.backend.fade(handle, volume, 0.0, fade).await {
                trace!(error = %e, "Fade before cleanup failed");
            }
            pause_for(fade).await;
        }
        if let Err(e) = self.inner.backend.stop(handle).await {
            trace!(error = %e, "Stop before cleanup failed");
        }
        self.release(handle).await;
    }

    async fn release(&self, handle: SoundHandleId) {
        if let Err(e) = self.inner.backend.unload(handle).await {
            warn!(%handle, error = %e, "Failed to release native sound");
        }
    }

    fn emit(&self, event: EngineEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }
}

async fn pause_for(duration: Duration) {
    if !duration.is_zero() {
        sleep(duration).await;
    }
}
