//! Native sound-playback bridge.
//!
//! The host owns the actual decoder and output device (an `HTMLAudioElement`,
//! AVPlayer, ExoPlayer, a desktop mixer). The core addresses each loaded
//! source through an opaque [`SoundHandleId`] and never touches samples.
//!
//! Spontaneous native events (track end, OS-initiated pause, stalls) are
//! reported by the host back to the core's audio engine together with the
//! handle they belong to, so late events from a released handle can be
//! recognized and dropped.

use crate::{
    error::{BridgeError, Result},
    platform::PlatformSendSync,
};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Opaque identifier for a sound loaded by a [`NativeAudioBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SoundHandleId(Uuid);

impl SoundHandleId {
    /// Generate a new handle identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Construct an identifier from an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Borrow the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SoundHandleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SoundHandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Request to create a native sound for a source URL.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadRequest {
    /// Source URL (direct file, manifest URL or blob URL).
    pub src: String,
    /// Container/codec hint such as `"mp3"` or `"hls"`.
    pub format_hint: Option<String>,
    /// Extra request headers the host should attach when fetching `src`.
    pub headers: HashMap<String, String>,
    /// Initial volume in `0.0..=1.0`.
    pub volume: f32,
    /// Whether the sound starts muted (preloads always do).
    pub muted: bool,
}

impl LoadRequest {
    pub fn new(src: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            format_hint: None,
            headers: HashMap::new(),
            volume: 1.0,
            muted: false,
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

    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = volume.clamp(0.0, 1.0);
        self
    }

    pub fn muted(mut self, muted: bool) -> Self {
        self.muted = muted;
        self
    }
}

/// Result of a successful native load.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadedSound {
    pub handle: SoundHandleId,
    /// Duration in seconds as reported by the native primitive.
    pub duration_secs: f64,
}

/// Known platform behaviors the engine must compensate for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlatformQuirks {
    /// Loads fail spuriously and succeed on retry (mobile Safari).
    pub transient_load_errors: bool,
    /// Playback may be refused until a user gesture unlocks audio; the
    /// backend then resolves [`NativeAudioBackend::wait_for_unlock`].
    pub unlock_signal: bool,
}

/// Events the native primitive raises on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeAudioEvent {
    /// Playback reached the end of the source.
    Ended,
    /// Playback paused without a core request (OS interruption, headset).
    Paused,
    /// Playback started or resumed.
    Playing,
    /// Playback stalled waiting for data.
    Waiting,
}

/// Trait for the platform's native sound primitive.
///
/// All positions and durations are in seconds.
#[cfg_attr(target_arch = "wasm32", async_trait::async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait::async_trait)]
pub trait NativeAudioBackend: PlatformSendSync {
    /// Quirks of the running platform.
    fn quirks(&self) -> PlatformQuirks {
        PlatformQuirks::default()
    }

    /// Create a sound and wait until it is ready to play.
    async fn load(&self, request: LoadRequest) -> Result<LoadedSound>;

    async fn play(&self, handle: SoundHandleId) -> Result<()>;

    async fn pause(&self, handle: SoundHandleId) -> Result<()>;

    /// Stop playback and rewind to the start.
    async fn stop(&self, handle: SoundHandleId) -> Result<()>;

    async fn seek(&self, handle: SoundHandleId, position_secs: f64) -> Result<()>;

    async fn set_volume(&self, handle: SoundHandleId, volume: f32) -> Result<()>;

    async fn set_muted(&self, handle: SoundHandleId, muted: bool) -> Result<()>;

    /// Ramp volume from `from` to `to` over `duration`.
    async fn fade(
        &self,
        handle: SoundHandleId,
        from: f32,
        to: f32,
        duration: Duration,
    ) -> Result<()> {
        let _ = (from, duration);
        self.set_volume(handle, to).await
    }

    /// Current playback position.
    async fn position(&self, handle: SoundHandleId) -> Result<f64>;

    /// Whether the native primitive currently reports active playback.
    async fn is_playing(&self, handle: SoundHandleId) -> Result<bool>;

    /// Seconds buffered ahead of the playhead, `None` when unknown.
    async fn buffered_ahead(&self, handle: SoundHandleId) -> Result<Option<f64>> {
        let _ = handle;
        Ok(None)
    }

    /// Release every native resource held by the sound.
    async fn unload(&self, handle: SoundHandleId) -> Result<()>;

    /// Resolves once the platform unlocks audio output after a user gesture.
    async fn wait_for_unlock(&self) -> Result<()> {
        Err(BridgeError::NotAvailable(
            "Platform has no audio unlock signal".to_string(),
        ))
    }
}
