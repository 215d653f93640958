//! Shared fakes for core-playback integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use bridge_traits::audio::{
    LoadRequest, LoadedSound, NativeAudioBackend, PlatformQuirks, SoundHandleId,
};
use bridge_traits::error::{BridgeError, Result};
use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse};
use bridge_traits::time::Clock;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

// ============================================================================
// Fake native audio backend
// ============================================================================

#[derive(Debug, Clone)]
struct FakeSound {
    src: String,
    playing: bool,
    muted: bool,
    volume: f32,
}

#[derive(Default)]
struct FakeState {
    sounds: HashMap<SoundHandleId, FakeSound>,
    load_calls: Vec<String>,
    last_request: Option<LoadRequest>,
    unloaded: Vec<String>,
    double_releases: u32,
    load_failures: u32,
    play_failures: u32,
    play_calls: u32,
    position: f64,
    buffered: Option<f64>,
}

#[derive(Default)]
pub struct FakeAudioBackend {
    quirks: PlatformQuirks,
    duration: f64,
    state: Mutex<FakeState>,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
    unlock: Notify,
}

impl FakeAudioBackend {
    pub fn new() -> Arc<Self> {
        Self::with_quirks(PlatformQuirks::default())
    }

    pub fn with_quirks(quirks: PlatformQuirks) -> Arc<Self> {
        Arc::new(Self {
            quirks,
            duration: 180.0,
            ..Default::default()
        })
    }

    /// Makes the next load of `src` wait until the returned notify fires.
    pub fn gate(&self, src: &str) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        self.gates.lock().insert(src.to_string(), notify.clone());
        notify
    }

    pub fn fail_next_loads(&self, count: u32) {
        self.state.lock().load_failures = count;
    }

    pub fn fail_next_plays(&self, count: u32) {
        self.state.lock().play_failures = count;
    }

    pub fn unlock(&self) {
        self.unlock.notify_one();
    }

    pub fn set_position(&self, position: f64) {
        self.state.lock().position = position;
    }

    pub fn set_buffered(&self, buffered: Option<f64>) {
        self.state.lock().buffered = buffered;
    }

    pub fn load_calls(&self) -> Vec<String> {
        self.state.lock().load_calls.clone()
    }

    pub fn last_request(&self) -> Option<LoadRequest> {
        self.state.lock().last_request.clone()
    }

    pub fn unloaded(&self) -> Vec<String> {
        self.state.lock().unloaded.clone()
    }

    pub fn double_releases(&self) -> u32 {
        self.state.lock().double_releases
    }

    pub fn play_calls(&self) -> u32 {
        self.state.lock().play_calls
    }

    pub fn live_sounds(&self) -> usize {
        self.state.lock().sounds.len()
    }

    pub fn is_muted(&self, handle: SoundHandleId) -> Option<bool> {
        self.state.lock().sounds.get(&handle).map(|s| s.muted)
    }

    pub fn is_sound_playing(&self, handle: SoundHandleId) -> bool {
        self.state
            .lock()
            .sounds
            .get(&handle)
            .is_some_and(|s| s.playing)
    }

    fn with_sound<T>(&self, handle: SoundHandleId, f: impl FnOnce(&mut FakeSound) -> T) -> Result<T> {
        let mut state = self.state.lock();
        state
            .sounds
            .get_mut(&handle)
            .map(f)
            .ok_or_else(|| BridgeError::OperationFailed(format!("unknown handle {handle}")))
    }
}

#[async_trait]
impl NativeAudioBackend for FakeAudioBackend {
    fn quirks(&self) -> PlatformQuirks {
        self.quirks
    }

    async fn load(&self, request: LoadRequest) -> Result<LoadedSound> {
        {
            let mut state = self.state.lock();
            state.load_calls.push(request.src.clone());
            state.last_request = Some(request.clone());
        }

        let gate = self.gates.lock().remove(&request.src);
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let mut state = self.state.lock();
        if state.load_failures > 0 {
            state.load_failures -= 1;
            return Err(BridgeError::OperationFailed("MEDIA_ERR_DECODE".to_string()));
        }
        let handle = SoundHandleId::new();
        state.sounds.insert(
            handle,
            FakeSound {
                src: request.src,
                playing: false,
                muted: request.muted,
                volume: request.volume,
            },
        );
        Ok(LoadedSound {
            handle,
            duration_secs: self.duration,
        })
    }

    async fn play(&self, handle: SoundHandleId) -> Result<()> {
        {
            let mut state = self.state.lock();
            state.play_calls += 1;
            if state.play_failures > 0 {
                state.play_failures -= 1;
                return Err(BridgeError::OperationFailed("NotAllowedError".to_string()));
            }
        }
        self.with_sound(handle, |sound| sound.playing = true)
    }

    async fn pause(&self, handle: SoundHandleId) -> Result<()> {
        self.with_sound(handle, |sound| sound.playing = false)
    }

    async fn stop(&self, handle: SoundHandleId) -> Result<()> {
        self.with_sound(handle, |sound| sound.playing = false)
    }

    async fn seek(&self, handle: SoundHandleId, position_secs: f64) -> Result<()> {
        self.with_sound(handle, |_| ())?;
        self.state.lock().position = position_secs;
        Ok(())
    }

    async fn set_volume(&self, handle: SoundHandleId, volume: f32) -> Result<()> {
        self.with_sound(handle, |sound| sound.volume = volume)
    }

    async fn set_muted(&self, handle: SoundHandleId, muted: bool) -> Result<()> {
        self.with_sound(handle, |sound| sound.muted = muted)
    }

    async fn position(&self, _handle: SoundHandleId) -> Result<f64> {
        Ok(self.state.lock().position)
    }

    async fn is_playing(&self, handle: SoundHandleId) -> Result<bool> {
        self.with_sound(handle, |sound| sound.playing)
    }

    async fn buffered_ahead(&self, _handle: SoundHandleId) -> Result<Option<f64>> {
        Ok(self.state.lock().buffered)
    }

    async fn unload(&self, handle: SoundHandleId) -> Result<()> {
        let mut state = self.state.lock();
        match state.sounds.remove(&handle) {
            Some(sound) => {
                state.unloaded.push(sound.src);
                Ok(())
            }
            None => {
                state.double_releases += 1;
                Err(BridgeError::OperationFailed("double release".to_string()))
            }
        }
    }

    async fn wait_for_unlock(&self) -> Result<()> {
        if !self.quirks.unlock_signal {
            return Err(BridgeError::NotAvailable("no unlock signal".to_string()));
        }
        self.unlock.notified().await;
        Ok(())
    }
}

// ============================================================================
// Manual clock
// ============================================================================

pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Arc<Self> {
        Arc::new(Self {
            millis: AtomicI64::new(start_ms),
        })
    }

    pub fn advance(&self, ms: i64) {
        self.millis.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.millis.load(Ordering::SeqCst))
            .single()
            .expect("valid timestamp")
    }
}

// ============================================================================
// Scripted HTTP client
// ============================================================================

#[derive(Default)]
pub struct ScriptedHttp {
    responses: Mutex<VecDeque<HttpResponse>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedHttp {
    pub fn new(responses: Vec<(u16, &str)>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(
                responses
                    .into_iter()
                    .map(|(status, body)| HttpResponse::new(status, body.to_string()))
                    .collect(),
            ),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().len()
    }
}

#[async_trait]
impl HttpClient for ScriptedHttp {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.requests.lock().push(request);
        self.responses
            .lock()
            .pop_front()
            .ok_or_else(|| BridgeError::Network("no scripted response".to_string()))
    }
}

pub fn session_body(id: &str) -> String {
    format!(
        r#"{{"sessionId":"{id}","manifestUrl":"/v1/manifests/{id}.m3u8","sessionToken":"tok-{id}"}}"#
    )
}
