//! Shared fakes for core-sync integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result};
use bridge_traits::socket::{RealtimeSocket, SocketEventStream, SocketMessage};
use bridge_traits::time::Clock;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

// ============================================================================
// Fake group socket
// ============================================================================

#[derive(Default)]
pub struct FakeSocket {
    connected: AtomicBool,
    connects: AtomicUsize,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<SocketMessage>>>,
    acks: Mutex<HashMap<String, VecDeque<Value>>>,
    sent: Mutex<Vec<(String, Value)>>,
}

impl FakeSocket {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queues an ack for the next `event` emit. Unscripted emits get
    /// `{"ok": true}`.
    pub fn script(&self, event: &str, ack: Value) {
        self.acks
            .lock()
            .entry(event.to_string())
            .or_default()
            .push_back(ack);
    }

    /// Delivers a server-pushed event to every subscriber.
    pub fn push_event(&self, name: &str, payload: Value) {
        self.broadcast(SocketMessage::Event {
            name: name.to_string(),
            payload,
        });
    }

    pub fn drop_connection(&self, reason: &str) {
        self.connected.store(false, Ordering::SeqCst);
        self.broadcast(SocketMessage::Disconnected {
            reason: reason.to_string(),
        });
    }

    /// Simulates the transport coming back on its own.
    pub fn restore(&self) {
        self.connected.store(true, Ordering::SeqCst);
        self.broadcast(SocketMessage::Connected);
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<(String, Value)> {
        self.sent.lock().clone()
    }

    pub fn sent_on(&self, event: &str) -> Vec<Value> {
        self.sent
            .lock()
            .iter()
            .filter(|(name, _)| name == event)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    /// `action` fields of every `playback` emit, in order.
    pub fn playback_actions(&self) -> Vec<String> {
        self.sent_on("playback")
            .iter()
            .filter_map(|payload| payload["action"].as_str().map(str::to_string))
            .collect()
    }

    fn broadcast(&self, message: SocketMessage) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(message.clone()).is_ok());
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
        if self.connected.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.broadcast(SocketMessage::Connected);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) -> Result<()> {
        self.drop_connection("client disconnect");
        Ok(())
    }

    async fn emit(&self, event: &str, payload: Value) -> Result<()> {
        self.sent.lock().push((event.to_string(), payload));
        Ok(())
    }

    async fn emit_with_ack(&self, event: &str, payload: Value) -> Result<Value> {
        if !self.is_connected() {
            return Err(BridgeError::Network("socket closed".to_string()));
        }
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
// Payload builders
// ============================================================================

pub fn snapshot_json(group_id: &str, host_id: &str, version: u64) -> Value {
    json!({
        "groupId": group_id,
        "hostId": host_id,
        "stateVersion": version,
        "currentIndex": 0,
        "isPlaying": true,
        "positionMs": 0,
        "serverTimeMs": 0,
        "queue": [
            { "id": "t1", "title": "First", "artist": { "name": "A" }, "duration": 180.0 },
            { "id": "t2", "title": "Second", "artist": { "name": "B" }, "duration": 200.0 }
        ],
        "members": [{ "userId": host_id }]
    })
}

pub fn join_ack(group_id: &str, host_id: &str, version: u64) -> Value {
    json!({ "ok": true, "state": snapshot_json(group_id, host_id, version) })
}

pub fn playback_delta(version: u64, position_ms: f64, server_time_ms: i64, is_playing: bool) -> Value {
    json!({
        "stateVersion": version,
        "isPlaying": is_playing,
        "positionMs": position_ms,
        "serverTimeMs": server_time_ms
    })
}

pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
