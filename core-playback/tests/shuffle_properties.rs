//! Property-based tests for shuffle generation and shuffled queue walks.

use core_playback::{generate_separated_shuffle_indices, NavigationAction, QueueState, Track};
use proptest::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

// ===== Helpers =====

/// Artist assignments: each entry is an artist number, `None` for unknown.
fn arbitrary_artists() -> impl Strategy<Value = Vec<Option<u8>>> {
    prop::collection::vec(proptest::option::weighted(0.9, 0u8..4), 1..40)
}

fn key_of(artists: &[Option<u8>]) -> impl Fn(usize) -> Option<String> + '_ {
    move |index| artists[index].map(|artist| format!("artist-{artist}"))
}

/// Whether an artist-separated order exists with `current` pinned first.
fn separation_feasible(artists: &[Option<u8>], current: usize) -> bool {
    let len = artists.len();
    let mut counts: HashMap<u8, usize> = HashMap::new();
    for artist in artists.iter().flatten() {
        *counts.entry(*artist).or_default() += 1;
    }
    counts.iter().all(|(artist, count)| {
        if artists[current] == Some(*artist) {
            *count <= len.div_ceil(2)
        } else {
            *count <= len / 2
        }
    })
}

// ===== Property Tests =====

proptest! {
    /// Property: the result is a permutation of every index with `current` first
    #[test]
    fn shuffle_is_a_permutation_starting_at_current(
        artists in arbitrary_artists(),
        current_seed in any::<usize>(),
    ) {
        let current = current_seed % artists.len();
        let order = generate_separated_shuffle_indices(artists.len(), current, key_of(&artists));

        prop_assert_eq!(order.len(), artists.len());
        prop_assert_eq!(order[0], current);
        let unique: HashSet<_> = order.iter().copied().collect();
        prop_assert_eq!(unique.len(), artists.len());
        prop_assert!(order.iter().all(|&index| index < artists.len()));
    }

    /// Property: adjacent entries never share a known artist when that is achievable
    #[test]
    fn adjacent_artists_differ_when_feasible(
        artists in arbitrary_artists(),
        current_seed in any::<usize>(),
    ) {
        let current = current_seed % artists.len();
        prop_assume!(separation_feasible(&artists, current));

        let order = generate_separated_shuffle_indices(artists.len(), current, key_of(&artists));

        for pair in order.windows(2) {
            let (a, b) = (artists[pair[0]], artists[pair[1]]);
            prop_assert!(
                a.is_none() || a != b,
                "indices {} and {} share artist {:?}",
                pair[0],
                pair[1],
                a
            );
        }
    }

    /// Property: walking a shuffled queue with repeat off visits every track once
    #[test]
    fn shuffled_walk_visits_every_track_once(
        artists in arbitrary_artists(),
        start_seed in any::<usize>(),
    ) {
        let tracks = artists
            .iter()
            .enumerate()
            .map(|(index, artist)| {
                let name = artist.map(|a| format!("Artist {a}")).unwrap_or_default();
                Arc::new(Track::new(format!("t{index}"), format!("Track {index}"), name))
            })
            .collect::<Vec<_>>();
        let start = start_seed % tracks.len();

        let mut queue = QueueState::new();
        queue.replace(tracks.clone(), start);
        prop_assert!(queue.toggle_shuffle());

        let mut visited = vec![queue.current_index().unwrap_or(start)];
        while let Some(next) = queue.advance(NavigationAction::Next) {
            visited.push(next);
            prop_assert!(visited.len() <= tracks.len());
        }

        prop_assert_eq!(visited[0], start);
        let unique: HashSet<_> = visited.iter().copied().collect();
        prop_assert_eq!(unique.len(), tracks.len());
    }
}
