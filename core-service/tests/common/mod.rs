//! Fakes for driving the player controller end to end.
#![allow(dead_code)]

use async_trait::async_trait;
use bridge_traits::audio::{LoadRequest, LoadedSound, NativeAudioBackend, SoundHandleId};
use bridge_traits::error::{BridgeError, Result};
use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse};
use bridge_traits::socket::{RealtimeSocket, SocketEventStream, SocketMessage};
use bridge_traits::storage::SettingsStore;
use bridge_traits::time::Clock;
use chrono::{DateTime, TimeZone, Utc};
use core_playback::Track;
use core_runtime::config::{CoreConfig, FeatureFlags};
use core_runtime::events::{CoreEvent, Receiver};
use core_service::{CoreService, PlayerSettings};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub const API_BASE: &str = "https://api.example.com/v1";

// ============================================================================
// Audio backend
// ============================================================================

#[derive(Default)]
struct BackendState {
    sounds: HashMap<SoundHandleId, String>,
    playing: HashMap<SoundHandleId, bool>,
    loads: Vec<String>,
    preloads: Vec<String>,
    fades: u32,
    load_failures: u32,
    position: f64,
    buffered: Option<f64>,
    volume: f32,
}

#[derive(Default)]
pub struct FakeAudioBackend {
    state: Mutex<BackendState>,
}

impl FakeAudioBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Sources requested for playback, excluding preloads.
    pub fn loads(&self) -> Vec<String> {
        self.state.lock().loads.clone()
    }

    /// Sources requested muted at zero volume.
    pub fn preloads(&self) -> Vec<String> {
        self.state.lock().preloads.clone()
    }

    pub fn fades(&self) -> u32 {
        self.state.lock().fades
    }

    pub fn fail_next_loads(&self, count: u32) {
        self.state.lock().load_failures = count;
    }

    pub fn set_position(&self, position: f64) {
        self.state.lock().position = position;
    }

    pub fn set_buffered(&self, buffered: Option<f64>) {
        self.state.lock().buffered = buffered;
    }

    pub fn position(&self) -> f64 {
        self.state.lock().position
    }

    pub fn is_playing(&self) -> bool {
        self.state.lock().playing.values().any(|playing| *playing)
    }

    pub fn live_sounds(&self) -> usize {
        self.state.lock().sounds.len()
    }

    fn set_playing(&self, handle: SoundHandleId, playing: bool) -> Result<()> {
        let mut state = self.state.lock();
        if !state.sounds.contains_key(&handle) {
            return Err(BridgeError::OperationFailed(format!("unknown handle {handle}")));
        }
        state.playing.insert(handle, playing);
        Ok(())
    }
}

#[async_trait]
impl NativeAudioBackend for FakeAudioBackend {
    async fn load(&self, request: LoadRequest) -> Result<LoadedSound> {
        let mut state = self.state.lock();
        if request.muted && request.volume == 0.0 {
            state.preloads.push(request.src.clone());
        } else {
            state.loads.push(request.src.clone());
        }
        if state.load_failures > 0 {
            state.load_failures -= 1;
            return Err(BridgeError::OperationFailed("MEDIA_ERR_SRC_NOT_SUPPORTED".to_string()));
        }
        let handle = SoundHandleId::new();
        state.sounds.insert(handle, request.src);
        state.position = 0.0;
        Ok(LoadedSound {
            handle,
            duration_secs: 180.0,
        })
    }

    async fn play(&self, handle: SoundHandleId) -> Result<()> {
        self.set_playing(handle, true)
    }

    async fn pause(&self, handle: SoundHandleId) -> Result<()> {
        self.set_playing(handle, false)
    }

    async fn stop(&self, handle: SoundHandleId) -> Result<()> {
        self.set_playing(handle, false)
    }

    async fn seek(&self, _handle: SoundHandleId, position_secs: f64) -> Result<()> {
        self.state.lock().position = position_secs;
        Ok(())
    }

    async fn set_volume(&self, _handle: SoundHandleId, volume: f32) -> Result<()> {
        self.state.lock().volume = volume;
        Ok(())
    }

    async fn set_muted(&self, _handle: SoundHandleId, _muted: bool) -> Result<()> {
        Ok(())
    }

    async fn fade(&self, handle: SoundHandleId, _from: f32, to: f32, _duration: Duration) -> Result<()> {
        self.state.lock().fades += 1;
        self.set_volume(handle, to).await
    }

    async fn position(&self, _handle: SoundHandleId) -> Result<f64> {
        Ok(self.state.lock().position)
    }

    async fn is_playing(&self, handle: SoundHandleId) -> Result<bool> {
        Ok(self.state.lock().playing.get(&handle).copied().unwrap_or(false))
    }

    async fn buffered_ahead(&self, _handle: SoundHandleId) -> Result<Option<f64>> {
        Ok(self.state.lock().buffered)
    }

    async fn unload(&self, handle: SoundHandleId) -> Result<()> {
        let mut state = self.state.lock();
        state.playing.remove(&handle);
        state
            .sounds
            .remove(&handle)
            .map(|_| ())
            .ok_or_else(|| BridgeError::OperationFailed("double release".to_string()))
    }
}

// ============================================================================
// HTTP
// ============================================================================

#[derive(Default)]
pub struct ScriptedHttp {
    responses: Mutex<VecDeque<HttpResponse>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedHttp {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, status: u16, body: &str) {
        self.responses
            .lock()
            .push_back(HttpResponse::new(status, body.to_string()));
    }

    /// Scripts one successful segmented startup for session `id`.
    pub fn script_session(&self, id: &str) {
        self.push(
            201,
            &format!(
                r#"{{"sessionId":"{id}","manifestUrl":"/v1/manifests/{id}.m3u8","sessionToken":"tok-{id}"}}"#
            ),
        );
        self.push(200, "#EXTM3U");
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
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

// ============================================================================
// Settings store
// ============================================================================

#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn value(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }
}

#[async_trait]
impl SettingsStore for MemoryStore {
    async fn set_string(&self, key: &str, value: &str) -> Result<()> {
        self.values.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get_string(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.lock().get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.values.lock().remove(key);
        Ok(())
    }
}

// ============================================================================
// Group socket
// ============================================================================

#[derive(Default)]
pub struct FakeSocket {
    connected: AtomicBool,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<SocketMessage>>>,
    acks: Mutex<HashMap<String, VecDeque<Value>>>,
    sent: Mutex<Vec<(String, Value)>>,
}

impl FakeSocket {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, event: &str, ack: Value) {
        self.acks
            .lock()
            .entry(event.to_string())
            .or_default()
            .push_back(ack);
    }

    pub fn push_event(&self, name: &str, payload: Value) {
        let message = SocketMessage::Event {
            name: name.to_string(),
            payload,
        };
        self.subscribers
            .lock()
            .retain(|tx| tx.send(message.clone()).is_ok());
    }

    pub fn sent_on(&self, event: &str) -> Vec<Value> {
        self.sent
            .lock()
            .iter()
            .filter(|(name, _)| name == event)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    pub fn actions_on(&self, event: &str) -> Vec<String> {
        self.sent_on(event)
            .iter()
            .filter_map(|payload| payload["action"].as_str().map(str::to_string))
            .collect()
    }
}

struct FakeStream {
    rx: mpsc::UnboundedReceiver<SocketMessage>,
}

#[async_trait]
impl SocketEventStream for FakeStream {
    async fn next(&mut self) -> Option<SocketMessage> {
        self.rx.recv().await
    }
}

#[async_trait]
impl RealtimeSocket for FakeSocket {
    async fn connect(&self) -> Result<()> {
        if !self.connected.swap(true, Ordering::SeqCst) {
            self.subscribers
                .lock()
                .retain(|tx| tx.send(SocketMessage::Connected).is_ok());
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn emit(&self, event: &str, payload: Value) -> Result<()> {
        self.sent.lock().push((event.to_string(), payload));
        Ok(())
    }

    async fn emit_with_ack(&self, event: &str, payload: Value) -> Result<Value> {
        self.sent.lock().push((event.to_string(), payload));
        let ack = self
            .acks
            .lock()
            .get_mut(event)
            .and_then(VecDeque::pop_front);
        Ok(ack.unwrap_or_else(|| json!({ "ok": true })))
    }

    fn subscribe(&self) -> Box<dyn SocketEventStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        Box::new(FakeStream { rx })
    }
}

// ============================================================================
// Clock
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
// Harness
// ============================================================================

pub struct Harness {
    pub core: CoreService,
    pub audio: Arc<FakeAudioBackend>,
    pub http: Arc<ScriptedHttp>,
    pub store: Arc<MemoryStore>,
    pub socket: Arc<FakeSocket>,
    pub clock: Arc<ManualClock>,
    pub events: Receiver<CoreEvent>,
}

/// Direct streaming, resume positions on, no group.
pub fn solo() -> Harness {
    harness(FeatureFlags {
        enable_listen_together: false,
        enable_segmented_streaming: false,
        enable_resume_positions: true,
        enable_unexpected_pause_recovery: true,
    })
}

pub fn grouped() -> Harness {
    harness(FeatureFlags {
        enable_listen_together: true,
        enable_segmented_streaming: false,
        enable_resume_positions: false,
        enable_unexpected_pause_recovery: false,
    })
}

/// Direct streaming with next-track preloading and a cleanup fade.
pub fn gapless() -> Harness {
    let mut settings = PlayerSettings::immediate();
    settings.engine.fade_duration_ms = 5;
    harness_with(
        FeatureFlags {
            enable_listen_together: false,
            enable_segmented_streaming: false,
            enable_resume_positions: false,
            enable_unexpected_pause_recovery: false,
        },
        settings,
    )
}

pub fn harness(features: FeatureFlags) -> Harness {
    harness_with(features, PlayerSettings::immediate().with_preload_next(false))
}

pub fn harness_with(features: FeatureFlags, settings: PlayerSettings) -> Harness {
    let audio = FakeAudioBackend::new();
    let http = ScriptedHttp::new();
    let store = MemoryStore::new();
    let socket = FakeSocket::new();
    let clock = ManualClock::new(100_000);

    let config = CoreConfig::builder()
        .api_base_url(API_BASE)
        .user_id("me")
        .audio_backend(audio.clone())
        .http_client(http.clone())
        .realtime_socket(socket.clone())
        .settings_store(store.clone())
        .clock(clock.clone())
        .features(features)
        .build()
        .unwrap();
    let core = CoreService::new(config, settings).unwrap();
    let events = core.subscribe();

    Harness {
        core,
        audio,
        http,
        store,
        socket,
        clock,
        events,
    }
}

impl Harness {
    pub fn drain(&mut self) -> Vec<CoreEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

// ============================================================================
// Builders
// ============================================================================

pub fn track(id: &str) -> Track {
    let mut track = Track::new(id, format!("Song {id}"), format!("Artist {id}"));
    track.duration = 180.0;
    track
}

pub fn tracks(ids: &[&str]) -> Vec<Track> {
    ids.iter().map(|id| track(id)).collect()
}

pub fn stream_url(id: &str) -> String {
    format!("{API_BASE}/tracks/{id}/stream")
}

pub fn group_state(host_id: &str, version: u64, current: usize, position_ms: f64, server_time_ms: i64) -> Value {
    json!({
        "groupId": "g1",
        "hostId": host_id,
        "stateVersion": version,
        "currentIndex": current,
        "isPlaying": true,
        "positionMs": position_ms,
        "serverTimeMs": server_time_ms,
        "queue": [
            { "id": "a", "title": "A", "artist": { "name": "X" }, "duration": 180.0 },
            { "id": "b", "title": "B", "artist": { "name": "Y" }, "duration": 200.0 }
        ],
        "members": [{ "userId": host_id }, { "userId": "me" }]
    })
}

/// Lets the controller's background pumps catch up.
pub async fn settle() {
    for _ in 0..3 {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
}
