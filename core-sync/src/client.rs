//! # Listen Together Client
//!
//! Keeps one persistent group socket, mirrors the authoritative group state
//! and sends host commands.
//!
//! ## Connection
//!
//! [`ListenTogetherClient::connect`] is serialized: concurrent callers share
//! one transport. A socket listener is started once; after a transport drop
//! the next `Connected` rejoins the last group.
//!
//! ## Authority
//!
//! Followers apply snapshots and deltas in state-version order and never
//! apply a delta at or below the last applied version. Only the host may
//! send transport commands; followers may only add to the queue.
//!
//! ## Commands
//!
//! Every command is an acked request. Acks reporting a transient conflict
//! are retried with capped exponential backoff plus jitter, never sooner
//! than the server's `retryAfterMs`. A rejected command is surfaced and
//! followed by a resync whose own failure is only logged.
//!
//! Track navigation (`next`, `previous`, `set-track`) runs through a
//! [`LatestOperation`]: a newer navigation replaces any queued one and bumps
//! a generation counter, so a retry loop for an older generation stops with
//! [`SyncError::Superseded`] instead of resending.

use crate::config::ListenTogetherConfig;
use crate::error::{Result, SyncError};
use crate::protocol::{
    self, classify_ack, command_payload, estimate_clock_offset, follower_target_seconds,
    parse_payload, AckOutcome, EndedNotice, GroupMember, GroupSnapshot, PingAck, PlayAtNotice,
    PlaybackCommand, PlaybackDelta, QueueCommand, QueueDelta, WaitingNotice,
};
use bridge_traits::socket::{RealtimeSocket, SocketEventStream, SocketMessage};
use bridge_traits::time::Clock;
use core_async::sync::{broadcast, Mutex as AsyncMutex};
use core_async::time::{sleep, Duration};
use core_async::LatestOperation;
use core_runtime::events::{CoreEvent, EventBus, ListenTogetherEvent};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use tracing::{debug, info, instrument, trace, warn};

const EVENT_CAPACITY: usize = 128;

/// Group activity seen by this client.
#[derive(Debug, Clone, PartialEq)]
pub enum GroupEvent {
    Connection { connected: bool },
    /// An authoritative snapshot replaced the local group state.
    Snapshot { snapshot: GroupSnapshot, is_host: bool },
    /// Playback delta plus the follower position it implies.
    Playback { delta: PlaybackDelta, target_seconds: f64 },
    Queue(QueueDelta),
    Waiting(WaitingNotice),
    /// Start playing `position_secs` after `delay`.
    PlayAt { position_secs: f64, delay: Duration },
    MemberJoined(GroupMember),
    MemberLeft { user_id: String },
    Ended { reason: Option<String> },
    Left,
    CommandFailed { command: String, message: String },
}

#[derive(Debug, Clone)]
struct NavigationRequest {
    generation: u64,
    command: PlaybackCommand,
}

#[derive(Debug, Default)]
struct SessionState {
    group_id: Option<String>,
    snapshot: Option<GroupSnapshot>,
    last_version: Option<u64>,
    clock_offset_ms: i64,
    rejoin_on_connect: bool,
}

impl SessionState {
    fn reset_group(&mut self, group_id: Option<String>) {
        self.group_id = group_id;
        self.snapshot = None;
        self.last_version = None;
        self.rejoin_on_connect = false;
    }
}

struct ClientInner {
    socket: Arc<dyn RealtimeSocket>,
    clock: Arc<dyn Clock>,
    config: ListenTogetherConfig,
    user_id: String,
    state: Mutex<SessionState>,
    connect_gate: AsyncMutex<()>,
    listening: AtomicBool,
    navigation: LatestOperation<NavigationRequest>,
    navigation_generation: AtomicU64,
    events: broadcast::Sender<GroupEvent>,
    bus: OnceLock<EventBus>,
}

/// Listen Together synchronization client. Cloning shares the same session.
#[derive(Clone)]
pub struct ListenTogetherClient {
    inner: Arc<ClientInner>,
}

impl ListenTogetherClient {
    pub fn new(
        socket: Arc<dyn RealtimeSocket>,
        clock: Arc<dyn Clock>,
        user_id: impl Into<String>,
        config: ListenTogetherConfig,
    ) -> Result<Self> {
        config.validate().map_err(SyncError::InvalidConfig)?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            inner: Arc::new(ClientInner {
                socket,
                clock,
                config,
                user_id: user_id.into(),
                state: Mutex::new(SessionState::default()),
                connect_gate: AsyncMutex::new(()),
                listening: AtomicBool::new(false),
                navigation: LatestOperation::new(),
                navigation_generation: AtomicU64::new(0),
                events,
                bus: OnceLock::new(),
            }),
        })
    }

    /// Mirrors group activity onto the core event bus.
    pub fn with_event_bus(self, bus: EventBus) -> Self {
        if self.inner.bus.set(bus).is_err() {
            debug!("Event bus already attached");
        }
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GroupEvent> {
        self.inner.events.subscribe()
    }

    pub fn config(&self) -> &ListenTogetherConfig {
        &self.inner.config
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    pub fn user_id(&self) -> &str {
        &self.inner.user_id
    }

    pub fn group_id(&self) -> Option<String> {
        self.inner.state.lock().group_id.clone()
    }

    pub fn is_in_group(&self) -> bool {
        self.inner.state.lock().group_id.is_some()
    }

    pub fn snapshot(&self) -> Option<GroupSnapshot> {
        self.inner.state.lock().snapshot.clone()
    }

    pub fn state_version(&self) -> Option<u64> {
        self.inner.state.lock().last_version
    }

    /// Whether this user is the host of the current group.
    pub fn is_host(&self) -> bool {
        let state = self.inner.state.lock();
        state
            .snapshot
            .as_ref()
            .is_some_and(|snapshot| snapshot.host_id == self.inner.user_id)
    }

    pub fn members(&self) -> Vec<GroupMember> {
        self.inner
            .state
            .lock()
            .snapshot
            .as_ref()
            .map(|snapshot| snapshot.members.clone())
            .unwrap_or_default()
    }

    pub fn clock_offset_ms(&self) -> i64 {
        self.inner.state.lock().clock_offset_ms
    }

    /// Local clock corrected by the last measured offset.
    pub fn server_now_ms(&self) -> i64 {
        self.inner.clock.unix_timestamp_millis() + self.clock_offset_ms()
    }

    /// Position (seconds) a follower should be at for `delta` right now.
    pub fn follower_target(&self, delta: &PlaybackDelta) -> f64 {
        let duration = self
            .inner
            .state
            .lock()
            .snapshot
            .as_ref()
            .and_then(GroupSnapshot::current_duration);
        follower_target_seconds(
            delta.position_ms,
            delta.server_time_ms,
            self.server_now_ms(),
            delta.is_playing,
            duration,
        )
    }

    // ========================================================================
    // Connection and membership
    // ========================================================================

    /// Opens the socket unless it is already open.
    pub async fn connect(&self) -> Result<()> {
        let _gate = self.inner.connect_gate.lock().await;
        self.ensure_listener();
        if self.inner.socket.is_connected() {
            return Ok(());
        }
        self.inner.socket.connect().await?;
        info!("Group socket connected");
        Ok(())
    }

    fn ensure_listener(&self) {
        if self.inner.listening.swap(true, Ordering::SeqCst) {
            return;
        }
        let stream = self.inner.socket.subscribe();
        let weak = Arc::downgrade(&self.inner);
        core_async::task::spawn(listen(weak, stream));
    }

    #[instrument(skip(self))]
    pub async fn join_group(&self, group_id: &str) -> Result<()> {
        self.connect().await?;
        {
            let mut state = self.inner.state.lock();
            if state.group_id.as_deref() != Some(group_id) {
                state.reset_group(Some(group_id.to_string()));
            }
        }
        self.inner.navigation_generation.fetch_add(1, Ordering::SeqCst);

        match self.join_request(group_id).await {
            Ok(()) => {
                info!(group_id, "Joined listening group");
                Ok(())
            }
            Err(e) => {
                let mut state = self.inner.state.lock();
                if state.group_id.as_deref() == Some(group_id) {
                    state.reset_group(None);
                }
                warn!(group_id, error = %e, "Failed to join listening group");
                Err(e)
            }
        }
    }

    async fn join_request(&self, group_id: &str) -> Result<()> {
        let ack = self
            .request(protocol::JOIN_GROUP, json!({ "groupId": group_id }))
            .await?;
        if let Some(state) = ack.get("state").filter(|state| !state.is_null()) {
            let snapshot: GroupSnapshot = parse_payload(protocol::JOIN_GROUP, state.clone())?;
            self.apply_snapshot(snapshot);
        }
        Ok(())
    }

    /// Re-requests the current group's state. Failures are logged only.
    pub async fn resync(&self) {
        let Some(group_id) = self.group_id() else {
            return;
        };
        if let Err(e) = self.join_request(&group_id).await {
            warn!(%group_id, error = %e, "Group resync failed");
        }
    }

    #[instrument(skip(self))]
    pub async fn leave_group(&self) -> Result<()> {
        let group_id = {
            let mut state = self.inner.state.lock();
            let group_id = state.group_id.take();
            state.reset_group(None);
            group_id
        };
        let Some(group_id) = group_id else {
            return Ok(());
        };
        self.inner.navigation_generation.fetch_add(1, Ordering::SeqCst);
        self.emit(GroupEvent::Left);
        self.publish(ListenTogetherEvent::Left {
            group_id: group_id.clone(),
        });

        self.request(protocol::LEAVE_GROUP, json!({ "groupId": group_id }))
            .await
            .map(|_| ())
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Sends a host transport command.
    ///
    /// Navigation commands are coalesced; for them this returns once the
    /// command is queued or sent, and failures surface as
    /// [`GroupEvent::CommandFailed`].
    #[instrument(skip(self), fields(command = command.name()))]
    pub async fn playback(&self, command: PlaybackCommand) -> Result<()> {
        let group_id = self.require_group()?;
        if !self.is_host() {
            return Err(SyncError::NotHost {
                command: command.name().to_string(),
            });
        }
        if command.is_navigation() {
            self.navigate(command).await;
            return Ok(());
        }

        let payload = command_payload(&group_id, &command)?;
        match self.send_command(protocol::PLAYBACK, payload, None).await {
            Ok(_) => Ok(()),
            Err(e) => {
                self.report_failure(command.name(), &e);
                Err(e)
            }
        }
    }

    /// Sends a shared queue edit. Followers may only add tracks.
    #[instrument(skip(self), fields(command = command.name()))]
    pub async fn queue(&self, command: QueueCommand) -> Result<()> {
        let group_id = self.require_group()?;
        if !command.allowed_for_follower() && !self.is_host() {
            return Err(SyncError::NotHost {
                command: command.name().to_string(),
            });
        }

        let payload = command_payload(&group_id, &command)?;
        match self.send_command(protocol::QUEUE, payload, None).await {
            Ok(_) => Ok(()),
            Err(e) => {
                self.report_failure(command.name(), &e);
                Err(e)
            }
        }
    }

    /// Tells the group this client finished loading `track_id`.
    pub async fn ready(&self, track_id: &str) -> Result<()> {
        let group_id = self.require_group()?;
        self.request(
            protocol::READY,
            json!({ "groupId": group_id, "trackId": track_id }),
        )
        .await
        .map(|_| ())
    }

    /// Measures the server clock offset with one `lt-ping` round trip.
    pub async fn ping(&self) -> Result<i64> {
        let sent_at = self.inner.clock.unix_timestamp_millis();
        let ack = self
            .request(protocol::PING, json!({ "clientTime": sent_at }))
            .await?;
        let received_at = self.inner.clock.unix_timestamp_millis();
        let PingAck { server_time } = PingAck::deserialize(&ack)
            .map_err(|e| SyncError::invalid_payload(protocol::PING, e))?;

        let offset = estimate_clock_offset(sent_at, received_at, server_time);
        self.inner.state.lock().clock_offset_ms = offset;
        debug!(offset_ms = offset, rtt_ms = received_at - sent_at, "Clock offset updated");
        Ok(offset)
    }

    /// Pings on the configured interval until the client leaves its group.
    pub async fn run_ping_loop(&self) {
        while self.is_in_group() {
            if let Err(e) = self.ping().await {
                debug!(error = %e, "Clock ping failed");
            }
            sleep(self.inner.config.ping_interval()).await;
        }
    }

    /// Enqueues a navigation command. Returns `true` when this call drove
    /// the coalescer.
    async fn navigate(&self, command: PlaybackCommand) -> bool {
        let generation = self.inner.navigation_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let request = NavigationRequest {
            generation,
            command,
        };

        let runner_client = self.clone();
        let hook_client = self.clone();
        self.inner
            .navigation
            .run_with_error_hook(
                request,
                move |request| {
                    let client = runner_client.clone();
                    async move { client.send_navigation(request).await }
                },
                move |error: SyncError, request: &NavigationRequest| match error {
                    SyncError::Superseded => {
                        debug!(command = request.command.name(), "Navigation superseded");
                    }
                    error => hook_client.report_failure(request.command.name(), &error),
                },
            )
            .await
    }

    async fn send_navigation(&self, request: NavigationRequest) -> Result<()> {
        if self.is_stale(request.generation) {
            trace!(generation = request.generation, "Skipping stale navigation");
            return Ok(());
        }
        let group_id = self.require_group()?;
        let payload = command_payload(&group_id, &request.command)?;
        self.send_command(protocol::PLAYBACK, payload, Some(request.generation))
            .await
            .map(|_| ())
    }

    fn is_stale(&self, generation: u64) -> bool {
        self.inner.navigation_generation.load(Ordering::SeqCst) != generation
    }

    /// Sends an acked command, retrying transient conflicts.
    async fn send_command(&self, event: &str, payload: Value, generation: Option<u64>) -> Result<Value> {
        let config = &self.inner.config;
        let mut retries: u32 = 0;

        loop {
            if generation.is_some_and(|generation| self.is_stale(generation)) {
                return Err(SyncError::Superseded);
            }
            self.ensure_connected()?;
            let ack = self.inner.socket.emit_with_ack(event, payload.clone()).await?;

            match classify_ack(&ack) {
                AckOutcome::Accepted(value) => return Ok(value),
                AckOutcome::Conflict { retry_after_ms } => {
                    if retries >= config.conflict_max_retries {
                        warn!(event, attempts = retries + 1, "Command conflict retries exhausted");
                        return Err(SyncError::ConflictRetriesExhausted {
                            attempts: retries + 1,
                        });
                    }
                    retries += 1;
                    let backoff = config.conflict_delay(retries, rand::random::<f64>());
                    let delay = match retry_after_ms {
                        Some(hinted) => backoff.max(Duration::from_millis(hinted)),
                        None => backoff,
                    };
                    debug!(event, retry = retries, delay_ms = delay.as_millis() as u64, "Command conflicted, retrying");
                    if !delay.is_zero() {
                        sleep(delay).await;
                    }
                }
                AckOutcome::Rejected { code, message } => {
                    warn!(event, ?code, %message, "Command rejected, resyncing");
                    self.resync().await;
                    return Err(SyncError::CommandRejected { code, message });
                }
            }
        }
    }

    /// Single acked request; conflicts count as rejections.
    async fn request(&self, event: &str, payload: Value) -> Result<Value> {
        self.ensure_connected()?;
        let ack = self.inner.socket.emit_with_ack(event, payload).await?;
        match classify_ack(&ack) {
            AckOutcome::Accepted(value) => Ok(value),
            AckOutcome::Conflict { .. } => Err(SyncError::CommandRejected {
                code: Some("conflict".to_string()),
                message: format!("{event} conflicted"),
            }),
            AckOutcome::Rejected { code, message } => Err(SyncError::CommandRejected { code, message }),
        }
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.inner.socket.is_connected() {
            Ok(())
        } else {
            Err(SyncError::NotConnected)
        }
    }

    fn require_group(&self) -> Result<String> {
        self.group_id().ok_or(SyncError::NotInGroup)
    }

    fn report_failure(&self, command: &str, error: &SyncError) {
        warn!(command, error = %error, "Group command failed");
        self.emit(GroupEvent::CommandFailed {
            command: command.to_string(),
            message: error.to_string(),
        });
        self.publish(ListenTogetherEvent::CommandFailed {
            command: command.to_string(),
            message: error.to_string(),
        });
    }

    // ========================================================================
    // Inbound
    // ========================================================================

    async fn handle_message(&self, message: SocketMessage) {
        match message {
            SocketMessage::Connected => {
                self.emit(GroupEvent::Connection { connected: true });
                self.publish(ListenTogetherEvent::Connection { connected: true });
                let rejoin = {
                    let mut state = self.inner.state.lock();
                    let rejoin = state.rejoin_on_connect;
                    state.rejoin_on_connect = false;
                    rejoin.then(|| state.group_id.clone()).flatten()
                };
                if let Some(group_id) = rejoin {
                    info!(%group_id, "Socket reconnected, rejoining group");
                    if let Err(e) = self.join_request(&group_id).await {
                        warn!(%group_id, error = %e, "Rejoin after reconnect failed");
                    }
                }
            }
            SocketMessage::Disconnected { reason } => {
                info!(%reason, "Group socket disconnected");
                self.inner.state.lock().rejoin_on_connect = true;
                self.emit(GroupEvent::Connection { connected: false });
                self.publish(ListenTogetherEvent::Connection { connected: false });
            }
            SocketMessage::Event { name, payload } => {
                if let Err(e) = self.handle_event(&name, payload) {
                    warn!(event = %name, error = %e, "Ignoring malformed group event");
                }
            }
        }
    }

    fn handle_event(&self, name: &str, payload: Value) -> Result<()> {
        match name {
            protocol::GROUP_STATE => {
                self.apply_snapshot(parse_payload(name, payload)?);
            }
            protocol::GROUP_PLAYBACK_DELTA => {
                let delta: PlaybackDelta = parse_payload(name, payload)?;
                if self.accept_version(delta.state_version, |snapshot| snapshot.apply_playback(&delta)) {
                    let target_seconds = self.follower_target(&delta);
                    self.emit(GroupEvent::Playback {
                        delta,
                        target_seconds,
                    });
                }
            }
            protocol::GROUP_QUEUE_DELTA => {
                let delta: QueueDelta = parse_payload(name, payload)?;
                if self.accept_version(delta.state_version, |snapshot| snapshot.apply_queue(&delta)) {
                    self.emit(GroupEvent::Queue(delta));
                }
            }
            protocol::GROUP_WAITING => {
                self.emit(GroupEvent::Waiting(parse_payload(name, payload)?));
            }
            protocol::GROUP_PLAY_AT => {
                let notice: PlayAtNotice = parse_payload(name, payload)?;
                let delay_ms = notice.start_at_ms.saturating_sub(self.server_now_ms()).max(0);
                self.emit(GroupEvent::PlayAt {
                    position_secs: (notice.position_ms / 1000.0).max(0.0),
                    delay: Duration::from_millis(delay_ms as u64),
                });
            }
            protocol::GROUP_MEMBER_JOINED => {
                let member: GroupMember = parse_payload(name, payload)?;
                let group_id = {
                    let mut state = self.inner.state.lock();
                    if let Some(snapshot) = state.snapshot.as_mut() {
                        if !snapshot.members.iter().any(|m| m.user_id == member.user_id) {
                            snapshot.members.push(member.clone());
                        }
                    }
                    state.group_id.clone()
                };
                if let Some(group_id) = group_id {
                    self.publish(ListenTogetherEvent::MemberJoined {
                        group_id,
                        user_id: member.user_id.clone(),
                    });
                }
                self.emit(GroupEvent::MemberJoined(member));
            }
            protocol::GROUP_MEMBER_LEFT => {
                let member: GroupMember = parse_payload(name, payload)?;
                let group_id = {
                    let mut state = self.inner.state.lock();
                    if let Some(snapshot) = state.snapshot.as_mut() {
                        snapshot.members.retain(|m| m.user_id != member.user_id);
                    }
                    state.group_id.clone()
                };
                if let Some(group_id) = group_id {
                    self.publish(ListenTogetherEvent::MemberLeft {
                        group_id,
                        user_id: member.user_id.clone(),
                    });
                }
                self.emit(GroupEvent::MemberLeft {
                    user_id: member.user_id,
                });
            }
            protocol::GROUP_ENDED => {
                let notice: EndedNotice = parse_payload(name, payload)?;
                let group_id = {
                    let mut state = self.inner.state.lock();
                    let group_id = state.group_id.take();
                    state.reset_group(None);
                    group_id
                };
                self.inner.navigation_generation.fetch_add(1, Ordering::SeqCst);
                if let Some(group_id) = group_id {
                    info!(%group_id, reason = ?notice.reason, "Listening group ended");
                    self.publish(ListenTogetherEvent::Ended { group_id });
                }
                self.emit(GroupEvent::Ended {
                    reason: notice.reason,
                });
            }
            other => trace!(event = other, "Unhandled group event"),
        }
        Ok(())
    }

    /// Replaces the local group state unless `snapshot` is older than what
    /// was already applied or belongs to another group.
    fn apply_snapshot(&self, snapshot: GroupSnapshot) -> bool {
        let (first, is_host) = {
            let mut state = self.inner.state.lock();
            if state.group_id.as_deref() != Some(snapshot.group_id.as_str()) {
                debug!(group_id = %snapshot.group_id, "Ignoring snapshot for another group");
                return false;
            }
            if state
                .last_version
                .is_some_and(|version| snapshot.state_version < version)
            {
                debug!(version = snapshot.state_version, "Ignoring stale snapshot");
                return false;
            }
            let first = state.snapshot.is_none();
            state.last_version = Some(snapshot.state_version);
            state.snapshot = Some(snapshot.clone());
            (first, snapshot.host_id == self.inner.user_id)
        };

        if first {
            self.publish(ListenTogetherEvent::Joined {
                group_id: snapshot.group_id.clone(),
                host_id: snapshot.host_id.clone(),
                is_host,
            });
        }
        self.publish(ListenTogetherEvent::StateApplied {
            group_id: snapshot.group_id.clone(),
            state_version: snapshot.state_version,
        });
        self.emit(GroupEvent::Snapshot { snapshot, is_host });
        true
    }

    /// Applies a delta strictly newer than the last applied version.
    fn accept_version(&self, version: u64, apply: impl FnOnce(&mut GroupSnapshot)) -> bool {
        let group_id = {
            let mut state = self.inner.state.lock();
            if state.group_id.is_none() {
                return false;
            }
            if state.last_version.is_some_and(|last| version <= last) {
                debug!(version, last = ?state.last_version, "Ignoring stale delta");
                return false;
            }
            state.last_version = Some(version);
            if let Some(snapshot) = state.snapshot.as_mut() {
                apply(snapshot);
            }
            state.group_id.clone()
        };
        if let Some(group_id) = group_id {
            self.publish(ListenTogetherEvent::StateApplied {
                group_id,
                state_version: version,
            });
        }
        true
    }

    fn emit(&self, event: GroupEvent) {
        let _ = self.inner.events.send(event);
    }

    fn publish(&self, event: ListenTogetherEvent) {
        if let Some(bus) = self.inner.bus.get() {
            if let Err(e) = bus.emit(CoreEvent::ListenTogether(event)) {
                trace!(event = e.0.description(), "No subscribers for group event");
            }
        }
    }
}

async fn listen(weak: Weak<ClientInner>, mut stream: Box<dyn SocketEventStream>) {
    while let Some(message) = stream.next().await {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        ListenTogetherClient { inner }.handle_message(message).await;
    }
    debug!("Group socket stream closed");
    if let Some(inner) = weak.upgrade() {
        inner.listening.store(false, Ordering::SeqCst);
    }
}
