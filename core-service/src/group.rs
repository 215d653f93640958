//! Listen Together integration for the player controller.
//!
//! Hosts apply commands locally and mirror them to the group in the
//! background, sending track changes as absolute destinations. Followers
//! never drive playback themselves. The group pump applies authoritative
//! snapshots and deltas for everyone; followers also align the playhead to
//! the host when drift exceeds the configured tolerance.

use crate::controller::{PlayerController, Selection};
use crate::error::{CoreError, Result};
use core_async::sync::broadcast;
use core_async::time::sleep;
use core_playback::{PlaybackInput, SharedTrack, Track};
use core_sync::{
    follower_target_seconds, GroupEvent, GroupSnapshot, ListenTogetherClient, PlaybackCommand,
    PlaybackDelta, QueueCommand, QueueDelta, SyncError,
};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Who decides what plays.
pub(crate) enum Authority {
    Solo,
    Host(ListenTogetherClient),
    Follower(ListenTogetherClient),
}

impl Authority {
    pub(crate) fn require_host(&self, command: &str) -> Result<()> {
        match self {
            Authority::Follower(_) => Err(SyncError::NotHost {
                command: command.to_string(),
            }
            .into()),
            _ => Ok(()),
        }
    }

    pub(crate) fn host(&self) -> Option<&ListenTogetherClient> {
        match self {
            Authority::Host(client) => Some(client),
            _ => None,
        }
    }

    /// In a group every local selection is optimistic.
    pub(crate) fn selection(&self, solo: Selection) -> Selection {
        match self {
            Authority::Solo => solo,
            Authority::Host(_) => Selection::Optimistic,
            Authority::Follower(_) => Selection::Remote,
        }
    }
}

pub(crate) enum GroupCommand {
    Playback(PlaybackCommand),
    Queue(QueueCommand),
}

impl From<PlaybackCommand> for GroupCommand {
    fn from(command: PlaybackCommand) -> Self {
        GroupCommand::Playback(command)
    }
}

impl From<QueueCommand> for GroupCommand {
    fn from(command: QueueCommand) -> Self {
        GroupCommand::Queue(command)
    }
}

impl PlayerController {
    pub(crate) fn authority(&self) -> Authority {
        match &self.inner.group {
            Some(client) if client.is_in_group() => {
                if client.is_host() {
                    Authority::Host(client.clone())
                } else {
                    Authority::Follower(client.clone())
                }
            }
            _ => Authority::Solo,
        }
    }

    pub async fn join_group(&self, group_id: &str) -> Result<()> {
        let client = self.require_group_client()?;
        client.join_group(group_id).await?;
        Ok(())
    }

    pub async fn leave_group(&self) -> Result<()> {
        let client = self.require_group_client()?;
        client.leave_group().await?;
        Ok(())
    }

    fn require_group_client(&self) -> Result<&ListenTogetherClient> {
        self.inner
            .group
            .as_ref()
            .ok_or(CoreError::ListenTogetherDisabled)
    }

    /// Sends `commands` to the group in order, stopping at the first
    /// failure. The client reports failures on its own event stream.
    pub(crate) fn dispatch(&self, client: &ListenTogetherClient, commands: Vec<GroupCommand>) {
        let client = client.clone();
        core_async::task::spawn(async move {
            for command in commands {
                let (name, result) = match command {
                    GroupCommand::Playback(command) => {
                        (command.name(), client.playback(command).await)
                    }
                    GroupCommand::Queue(command) => (command.name(), client.queue(command).await),
                };
                if let Err(e) = result {
                    debug!(command = name, error = %e, "Group dispatch stopped");
                    break;
                }
            }
        });
    }

    /// Replaces the shared queue with `tracks` and points it at `current`.
    pub(crate) fn dispatch_queue_snapshot(
        &self,
        client: &ListenTogetherClient,
        tracks: &[SharedTrack],
        current: usize,
    ) {
        let owned: Vec<Track> = tracks.iter().map(|track| Track::clone(track)).collect();
        let track_id = owned.get(current).map(|track| track.id.clone());
        self.dispatch(
            client,
            vec![
                QueueCommand::Clear.into(),
                QueueCommand::Add { tracks: owned }.into(),
                PlaybackCommand::SetTrack {
                    index: current,
                    track_id,
                }
                .into(),
            ],
        );
    }

    /// Points the group at the local current track. Absolute destinations
    /// stay correct when the client coalesces navigation to the latest one.
    pub(crate) fn dispatch_current_track(&self, client: &ListenTogetherClient) {
        let destination = {
            let state = self.inner.state.lock();
            state
                .queue
                .current_index()
                .map(|index| (index, state.queue.current_track().map(|track| track.id.clone())))
        };
        if let Some((index, track_id)) = destination {
            self.dispatch(client, vec![PlaybackCommand::SetTrack { index, track_id }.into()]);
        }
    }

    /// Reports the loaded track to the group.
    pub(crate) fn signal_ready(&self, track: &Track) {
        let Some(client) = self.inner.group.clone() else {
            return;
        };
        if !client.is_in_group() {
            return;
        }
        let track_id = track.id.clone();
        core_async::task::spawn(async move {
            if let Err(e) = client.ready(&track_id).await {
                debug!(track_id = %track_id, error = %e, "Ready signal failed");
            }
        });
    }

    pub(crate) fn start_group_pump(&self) {
        let Some(client) = &self.inner.group else {
            return;
        };
        let events = client.subscribe();
        core_async::task::spawn(pump_group_events(Arc::downgrade(&self.inner), events));
    }

    pub(crate) async fn handle_group_event(&self, event: GroupEvent) {
        let Some(client) = self.inner.group.clone() else {
            return;
        };
        match event {
            GroupEvent::Snapshot { snapshot, is_host } => {
                debug!(version = snapshot.state_version, is_host, "Applying group snapshot");
                self.apply_group_snapshot(&client, snapshot).await;
            }
            GroupEvent::Playback {
                delta,
                target_seconds,
            } => {
                self.apply_playback_delta(delta, target_seconds, client.is_host())
                    .await;
            }
            GroupEvent::Queue(delta) => self.apply_queue_delta(delta).await,
            GroupEvent::PlayAt {
                position_secs,
                delay,
            } => {
                if !client.is_host() {
                    if delay > Duration::ZERO {
                        sleep(delay).await;
                    }
                    self.follow(position_secs, true).await;
                }
            }
            GroupEvent::Waiting(notice) => {
                debug!(waiting_for = ?notice.waiting_for, "Group waiting for members");
            }
            GroupEvent::Ended { reason } => {
                info!(reason = ?reason, "Group ended, back to solo playback");
            }
            GroupEvent::Left => info!("Left group, back to solo playback"),
            GroupEvent::CommandFailed { command, message } => {
                warn!(%command, %message, "Group command failed");
            }
            GroupEvent::Connection { .. }
            | GroupEvent::MemberJoined(_)
            | GroupEvent::MemberLeft { .. } => {}
        }
    }

    async fn apply_group_snapshot(&self, client: &ListenTogetherClient, snapshot: GroupSnapshot) {
        let target = follower_target_seconds(
            snapshot.position_ms,
            snapshot.server_time_ms,
            client.server_now_ms(),
            snapshot.is_playing,
            snapshot.current_duration(),
        );
        let tracks = snapshot.queue.into_iter().map(Arc::new).collect();
        self.adopt_remote_queue(tracks, snapshot.current_index, snapshot.is_playing, Some(target))
            .await;
    }

    async fn apply_queue_delta(&self, delta: QueueDelta) {
        let is_playing = self.inner.state.lock().machine.play_intent();
        let tracks = delta.queue.into_iter().map(Arc::new).collect();
        self.adopt_remote_queue(tracks, delta.current_index, is_playing, None)
            .await;
    }

    /// The delta is authoritative for hosts too: a host whose optimistic
    /// navigation was dropped or rejected switches back to the group's
    /// track. Only followers chase the group's position.
    async fn apply_playback_delta(
        &self,
        delta: PlaybackDelta,
        target_seconds: f64,
        is_host: bool,
    ) {
        let switch_to = {
            let mut state = self.inner.state.lock();
            match delta.current_index {
                Some(index) if state.queue.current_index() != Some(index) => {
                    state.queue.set_current(index).ok().map(|()| index)
                }
                _ => None,
            }
        };

        match switch_to {
            Some(index) => {
                debug!(index, is_host, "Group changed track");
                self.publish_current();
                self.load_remote(delta.is_playing, Some(target_seconds)).await;
            }
            None if is_host => self.align_play_state(delta.is_playing).await,
            None => self.follow(target_seconds, delta.is_playing).await,
        }
    }

    /// Makes the local queue match the group's and loads its current track
    /// when it differs from the loaded one.
    async fn adopt_remote_queue(
        &self,
        tracks: Vec<SharedTrack>,
        current: usize,
        is_playing: bool,
        target: Option<f64>,
    ) {
        let (queue_changed, track_changed, empty) = {
            let mut state = self.inner.state.lock();
            let current = current.min(tracks.len().saturating_sub(1));
            let same = state.queue.current_index() == Some(current)
                && state
                    .queue
                    .tracks()
                    .iter()
                    .map(|track| &track.id)
                    .eq(tracks.iter().map(|track| &track.id));
            if !same {
                state.queue.apply_remote(tracks, current);
            }
            let current_id = state.queue.current_track().map(|track| track.id.clone());
            let loaded_id = state.loaded.as_ref().map(|track| track.id.clone());
            (
                !same,
                current_id.is_some() && current_id != loaded_id,
                state.queue.is_empty(),
            )
        };

        if queue_changed {
            self.publish_queue();
            self.publish_current();
        }
        if empty {
            if self.inner.engine.current_src().is_some() {
                self.stop_playback().await;
            }
            return;
        }
        if track_changed {
            self.load_remote(is_playing, target).await;
        } else if let Some(target) = target {
            self.follow(target, is_playing).await;
        }
    }

    async fn load_remote(&self, is_playing: bool, target: Option<f64>) {
        if let Err(e) = self.load_current(Selection::Remote, is_playing).await {
            warn!(error = %e, "Failed to load group track");
            return;
        }
        if let Some(target) = target.filter(|target| *target > 0.0) {
            if let Err(e) = self.seek_local(target).await {
                warn!(error = %e, "Failed to align with group position");
            }
        }
    }

    /// Aligns the loaded track with the group's position and play state.
    async fn follow(&self, target_secs: f64, is_playing: bool) {
        if self.inner.engine.current_src().is_none() {
            return;
        }

        let local = match self.inner.engine.poll_position().await {
            Ok(Some(position)) => position,
            _ => self.inner.state.lock().machine.current_time(),
        };
        let drift_ms = (local - target_secs).abs() * 1000.0;
        if drift_ms > self.inner.settings.listen_together.drift_tolerance_ms as f64 {
            debug!(local, target = target_secs, drift_ms, "Correcting drift");
            if let Err(e) = self.seek_local(target_secs).await {
                warn!(error = %e, "Failed to correct drift");
            }
        }

        self.align_play_state(is_playing).await;
    }

    async fn align_play_state(&self, is_playing: bool) {
        if self.inner.engine.current_src().is_none() {
            return;
        }
        let intends = self.inner.state.lock().machine.play_intent();
        if is_playing && !intends {
            self.apply_input(PlaybackInput::PlayRequested);
            if let Err(e) = self.inner.engine.play().await {
                debug!(error = %e, "Group play not applied");
            }
        } else if !is_playing && intends {
            self.apply_input(PlaybackInput::PauseRequested);
            if let Err(e) = self.inner.engine.pause().await {
                debug!(error = %e, "Group pause not applied");
            }
        }
    }
}

async fn pump_group_events(
    inner: Weak<crate::controller::ControllerInner>,
    mut events: broadcast::Receiver<GroupEvent>,
) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Group event pump lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        let Some(inner) = inner.upgrade() else {
            break;
        };
        PlayerController { inner }.handle_group_event(event).await;
    }
}
