//! # Play Queue
//!
//! Ordered track snapshot, current position, optional shuffle permutation,
//! repeat mode and the "Up Next" insertion cursor.
//!
//! Positions in *play order* follow the shuffle permutation when shuffle is
//! enabled and the raw queue order otherwise. Insertions are expressed in play
//! order:
//!
//! - `play_next` inserts immediately after the current track.
//! - `play_now` does the same and jumps to the inserted track.
//! - `add_to_queue` inserts at the Up Next cursor, so repeated calls keep
//!   their relative order. The cursor resets to just after the current track
//!   whenever the current track or the shuffle mode changes, and otherwise
//!   only moves forward.

use crate::error::{PlaybackError, Result};
use crate::navigation::{resolve_queue_navigation_index, NavigationAction, RepeatMode};
use crate::shuffle::shuffle_tracks;
use crate::track::SharedTrack;
use std::sync::Arc;
use tracing::debug;

/// Play-order insertion point for `add_to_queue`.
///
/// Anchored on the current track (by identity) and the shuffle flag; a
/// changed anchor resets the position to just after the current track.
#[derive(Debug, Clone, Default)]
struct UpNextCursor {
    anchor: Option<(SharedTrack, bool)>,
    position: usize,
}

/// Result of [`QueueState::remove`].
#[derive(Debug, Clone)]
pub struct RemoveOutcome {
    pub removed: SharedTrack,
    /// The removed track was the current one; the caller must load the new
    /// current track (or stop when the queue became empty).
    pub removed_current: bool,
}

#[derive(Debug, Clone, Default)]
pub struct QueueState {
    tracks: Vec<SharedTrack>,
    current: usize,
    shuffle: Option<Vec<usize>>,
    repeat: RepeatMode,
    up_next: UpNextCursor,
}

impl QueueState {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn tracks(&self) -> &[SharedTrack] {
        &self.tracks
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn current_index(&self) -> Option<usize> {
        (!self.tracks.is_empty()).then_some(self.current)
    }

    pub fn current_track(&self) -> Option<&SharedTrack> {
        self.tracks.get(self.current)
    }

    pub fn track_at(&self, index: usize) -> Option<&SharedTrack> {
        self.tracks.get(index)
    }

    pub fn is_shuffle(&self) -> bool {
        self.shuffle.is_some()
    }

    pub fn shuffle_order(&self) -> Option<&[usize]> {
        self.shuffle.as_deref()
    }

    pub fn repeat(&self) -> RepeatMode {
        self.repeat
    }

    /// Tracks after the current one, in play order.
    pub fn upcoming(&self) -> Vec<SharedTrack> {
        if self.tracks.is_empty() {
            return Vec::new();
        }
        let start = self.play_position(self.current) + 1;
        self.play_order()
            .into_iter()
            .skip(start)
            .filter_map(|index| self.tracks.get(index).cloned())
            .collect()
    }

    /// Queue indices in play order.
    pub fn play_order(&self) -> Vec<usize> {
        match &self.shuffle {
            Some(order) => order.clone(),
            None => (0..self.tracks.len()).collect(),
        }
    }

    // ========================================================================
    // Replacement
    // ========================================================================

    /// Replaces the whole queue and starts at `start` (clamped).
    pub fn replace(&mut self, tracks: Vec<SharedTrack>, start: usize) {
        self.current = start.min(tracks.len().saturating_sub(1));
        self.tracks = tracks;
        if self.shuffle.is_some() {
            self.shuffle = Some(shuffle_tracks(&self.tracks, self.current));
        }
        self.up_next = UpNextCursor::default();
        debug!(len = self.tracks.len(), current = self.current, "Queue replaced");
    }

    /// Adopts an authoritative shared queue. Local shuffle is dropped since
    /// the shared order is the play order.
    pub fn apply_remote(&mut self, tracks: Vec<SharedTrack>, current: usize) {
        self.shuffle = None;
        self.replace(tracks, current);
    }

    /// Replaces everything after the current track, in play order.
    ///
    /// In shuffle mode the already-played prefix is materialized and the
    /// permutation becomes the identity so `upcoming` plays exactly as given.
    pub fn set_upcoming(&mut self, upcoming: Vec<SharedTrack>) {
        if self.tracks.is_empty() {
            self.replace(upcoming, 0);
            return;
        }
        let keep = self.play_position(self.current) + 1;
        let mut tracks: Vec<SharedTrack> = self
            .play_order()
            .into_iter()
            .take(keep)
            .filter_map(|index| self.tracks.get(index).cloned())
            .collect();
        let current = tracks.len().saturating_sub(1);
        tracks.extend(upcoming);

        if self.shuffle.is_some() {
            self.shuffle = Some((0..tracks.len()).collect());
        }
        self.tracks = tracks;
        self.current = current;
        self.up_next = UpNextCursor::default();
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
        self.current = 0;
        if self.shuffle.is_some() {
            self.shuffle = Some(Vec::new());
        }
        self.up_next = UpNextCursor::default();
    }

    // ========================================================================
    // Insertion
    // ========================================================================

    /// Inserts immediately after the current track. Returns the new track's
    /// queue index.
    pub fn play_next(&mut self, track: SharedTrack) -> usize {
        self.sync_cursor();
        let position = if self.tracks.is_empty() {
            0
        } else {
            self.play_position(self.current) + 1
        };
        let index = self.insert_at_play_position(position, track);
        if position <= self.up_next.position {
            self.up_next.position += 1;
        }
        index
    }

    /// Inserts after the current track and makes it current.
    pub fn play_now(&mut self, track: SharedTrack) -> usize {
        let index = self.play_next(track);
        self.current = index;
        index
    }

    /// Inserts at the Up Next cursor, keeping the order of earlier additions.
    /// Returns the queue indices of the inserted tracks.
    pub fn add_to_queue(&mut self, tracks: Vec<SharedTrack>) -> Vec<usize> {
        self.sync_cursor();
        let was_empty = self.tracks.is_empty();
        let mut position = self.up_next.position;
        let mut inserted = Vec::with_capacity(tracks.len());
        for track in tracks {
            inserted.push(self.insert_at_play_position(position, track));
            position += 1;
        }
        if was_empty {
            // The first addition becomes the current track; anchor on it so
            // the next addition lands after this batch.
            self.up_next.anchor = self
                .tracks
                .get(self.current)
                .cloned()
                .map(|track| (track, self.shuffle.is_some()));
        }
        self.up_next.position = position;
        inserted
    }

    // ========================================================================
    // Removal
    // ========================================================================

    pub fn remove(&mut self, index: usize) -> Result<RemoveOutcome> {
        let len = self.tracks.len();
        if index >= len {
            return Err(PlaybackError::IndexOutOfBounds { index, len });
        }
        self.sync_cursor();

        let removed_current = index == self.current;
        let removed_position = self.play_position(index);
        let removed = self.tracks.remove(index);

        match self.shuffle.as_mut() {
            Some(order) => {
                order.retain(|&value| value != index);
                for value in order.iter_mut() {
                    if *value > index {
                        *value -= 1;
                    }
                }
                if removed_current {
                    self.current = order
                        .get(removed_position)
                        .or_else(|| removed_position.checked_sub(1).and_then(|p| order.get(p)))
                        .copied()
                        .unwrap_or(0);
                } else if index < self.current {
                    self.current -= 1;
                }
            }
            None => {
                if index < self.current {
                    self.current -= 1;
                } else if removed_current {
                    self.current = self.current.min(self.tracks.len().saturating_sub(1));
                }
            }
        }

        if !removed_current && removed_position < self.up_next.position {
            self.up_next.position -= 1;
        }

        Ok(RemoveOutcome {
            removed,
            removed_current,
        })
    }

    // ========================================================================
    // Navigation
    // ========================================================================

    /// Destination of `action` without moving.
    pub fn peek(&self, action: NavigationAction) -> Option<usize> {
        let order = self.shuffle.as_deref().unwrap_or(&[]);
        resolve_queue_navigation_index(
            action,
            self.tracks.len(),
            self.current,
            self.shuffle.is_some(),
            order,
            self.repeat,
        )
    }

    /// Moves to the destination of `action`. `None` leaves the queue as is.
    pub fn advance(&mut self, action: NavigationAction) -> Option<usize> {
        let next = self.peek(action)?;
        self.current = next;
        Some(next)
    }

    pub fn set_current(&mut self, index: usize) -> Result<()> {
        if index >= self.tracks.len() {
            return Err(PlaybackError::IndexOutOfBounds {
                index,
                len: self.tracks.len(),
            });
        }
        self.current = index;
        Ok(())
    }

    // ========================================================================
    // Modes
    // ========================================================================

    /// Toggles shuffle. Enabling generates a fresh permutation with the
    /// current track first.
    pub fn toggle_shuffle(&mut self) -> bool {
        self.shuffle = match self.shuffle {
            Some(_) => None,
            None => Some(shuffle_tracks(&self.tracks, self.current)),
        };
        self.is_shuffle()
    }

    pub fn cycle_repeat(&mut self) -> RepeatMode {
        self.repeat = self.repeat.cycle();
        self.repeat
    }

    pub fn set_repeat(&mut self, mode: RepeatMode) {
        self.repeat = mode;
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn play_position(&self, index: usize) -> usize {
        match &self.shuffle {
            Some(order) => order.iter().position(|&value| value == index).unwrap_or(0),
            None => index,
        }
    }

    fn play_len(&self) -> usize {
        self.shuffle.as_ref().map_or(self.tracks.len(), Vec::len)
    }

    /// Inserts at a play-order position and returns the queue index used.
    fn insert_at_play_position(&mut self, position: usize, track: SharedTrack) -> usize {
        let position = position.min(self.play_len());
        match self.shuffle.as_mut() {
            Some(order) => {
                let index = self.tracks.len();
                self.tracks.push(track);
                order.insert(position, index);
                index
            }
            None => {
                self.tracks.insert(position, track);
                if position <= self.current && self.tracks.len() > 1 {
                    self.current += 1;
                }
                position
            }
        }
    }

    fn sync_cursor(&mut self) {
        let current = self.tracks.get(self.current).cloned();
        let shuffled = self.shuffle.is_some();
        let same_anchor = match (&self.up_next.anchor, &current) {
            (Some((track, flag)), Some(now)) => Arc::ptr_eq(track, now) && *flag == shuffled,
            _ => false,
        };
        let base = match current {
            Some(_) => self.play_position(self.current) + 1,
            None => 0,
        };
        if !same_anchor {
            self.up_next.position = base;
            self.up_next.anchor = current.map(|track| (track, shuffled));
        } else if self.up_next.position < base {
            self.up_next.position = base;
        }
        self.up_next.position = self.up_next.position.min(self.play_len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::Track;

    fn track(id: &str) -> SharedTrack {
        Arc::new(Track::new(id, id.to_uppercase(), format!("artist-{id}")))
    }

    fn queue_of(ids: &[&str], start: usize) -> QueueState {
        let mut queue = QueueState::new();
        queue.replace(ids.iter().map(|id| track(id)).collect(), start);
        queue
    }

    fn ids(tracks: &[SharedTrack]) -> Vec<String> {
        tracks.iter().map(|t| t.id.clone()).collect()
    }

    #[test]
    fn add_to_queue_keeps_insertion_order() {
        let mut queue = queue_of(&["a", "b", "c"], 0);
        queue.add_to_queue(vec![track("x")]);
        queue.add_to_queue(vec![track("y"), track("z")]);
        assert_eq!(ids(queue.tracks()), vec!["a", "x", "y", "z", "b", "c"]);
        assert_eq!(queue.current_track().map(|t| t.id.as_str()), Some("a"));
    }

    #[test]
    fn play_next_goes_before_queued_items() {
        let mut queue = queue_of(&["a", "b"], 0);
        queue.add_to_queue(vec![track("x")]);
        queue.play_next(track("n"));
        queue.add_to_queue(vec![track("y")]);
        assert_eq!(ids(queue.tracks()), vec!["a", "n", "x", "y", "b"]);
    }

    #[test]
    fn cursor_resets_when_current_changes() {
        let mut queue = queue_of(&["a", "b", "c"], 0);
        queue.add_to_queue(vec![track("x")]);
        assert_eq!(queue.advance(NavigationAction::Next), Some(1));
        queue.add_to_queue(vec![track("y")]);
        assert_eq!(ids(queue.tracks()), vec!["a", "x", "y", "b", "c"]);
    }

    #[test]
    fn play_now_jumps_to_inserted_track() {
        let mut queue = queue_of(&["a", "b"], 0);
        let index = queue.play_now(track("n"));
        assert_eq!(index, 1);
        assert_eq!(queue.current_track().map(|t| t.id.as_str()), Some("n"));
        assert_eq!(ids(&queue.upcoming()), vec!["b"]);
    }

    #[test]
    fn remove_adjusts_current() {
        let mut queue = queue_of(&["a", "b", "c"], 2);
        let outcome = queue.remove(0).unwrap();
        assert!(!outcome.removed_current);
        assert_eq!(queue.current_track().map(|t| t.id.as_str()), Some("c"));

        let outcome = queue.remove(1).unwrap();
        assert!(outcome.removed_current);
        assert_eq!(queue.current_index(), Some(0));
        assert!(matches!(
            queue.remove(5),
            Err(PlaybackError::IndexOutOfBounds { index: 5, len: 1 })
        ));
    }

    #[test]
    fn shuffle_insertions_follow_play_order() {
        let mut queue = queue_of(&["a", "b", "c", "d"], 1);
        assert!(queue.toggle_shuffle());
        assert_eq!(queue.shuffle_order().map(|o| o[0]), Some(1));

        let index = queue.play_next(track("n"));
        assert_eq!(index, 4);
        assert_eq!(queue.peek(NavigationAction::Next), Some(4));

        let order = queue.shuffle_order().unwrap().to_vec();
        let mut sorted = order.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn shuffle_remove_keeps_permutation_valid() {
        let mut queue = queue_of(&["a", "b", "c", "d", "e"], 0);
        queue.toggle_shuffle();
        queue.remove(2).unwrap();
        let mut sorted = queue.shuffle_order().unwrap().to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![0, 1, 2, 3]);
        assert_eq!(queue.current_track().map(|t| t.id.as_str()), Some("a"));
    }

    #[test]
    fn set_upcoming_replaces_tail() {
        let mut queue = queue_of(&["a", "b", "c"], 1);
        queue.set_upcoming(vec![track("x"), track("y")]);
        assert_eq!(ids(queue.tracks()), vec!["a", "b", "x", "y"]);
        assert_eq!(queue.current_index(), Some(1));
    }

    #[test]
    fn repeat_all_wraps_next() {
        let mut queue = queue_of(&["a", "b"], 1);
        assert_eq!(queue.advance(NavigationAction::Next), None);
        queue.set_repeat(RepeatMode::All);
        assert_eq!(queue.advance(NavigationAction::Next), Some(0));
        assert_eq!(queue.advance(NavigationAction::Previous), None);
    }

    #[test]
    fn add_to_empty_queue_starts_at_first() {
        let mut queue = QueueState::new();
        queue.add_to_queue(vec![track("a"), track("b")]);
        assert_eq!(queue.current_track().map(|t| t.id.as_str()), Some("a"));
        queue.add_to_queue(vec![track("c")]);
        assert_eq!(ids(queue.tracks()), vec!["a", "b", "c"]);
    }

    #[test]
    fn single_additions_to_an_empty_queue_keep_their_order() {
        let mut queue = QueueState::new();
        for id in ["a", "b", "c"] {
            queue.add_to_queue(vec![track(id)]);
        }
        assert_eq!(ids(queue.tracks()), vec!["a", "b", "c"]);
        assert_eq!(queue.current_index(), Some(0));
        assert_eq!(ids(&queue.upcoming()), vec!["b", "c"]);
    }
}
