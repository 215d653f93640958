//! Shuffle permutation generation with artist separation.
//!
//! The permutation is built in two passes:
//!
//! 1. Fisher-Yates over every queue index except the current one.
//! 2. Artist separation: the shuffled indices are bucketed by artist key and
//!    re-emitted greedily, always taking from the largest remaining bucket
//!    whose artist differs from the previously emitted entry.
//!
//! The current index is pinned first. Entries without a known artist get a
//! synthetic per-index key, so they never collide with anything.

use crate::track::SharedTrack;
use rand::seq::SliceRandom;
use rand::{thread_rng, Rng};
use std::collections::HashMap;

/// Generates a shuffle permutation of `[0, len)` starting with `current`.
///
/// `artist_key` maps a queue index to its artist key, `None` when unknown.
/// No two adjacent entries share an artist whenever such an order exists
/// with `current` pinned first: the current artist may fill up to
/// `ceil(len / 2)` slots and any other artist up to `floor(len / 2)`.
pub fn generate_separated_shuffle_indices<F>(len: usize, current: usize, artist_key: F) -> Vec<usize>
where
    F: Fn(usize) -> Option<String>,
{
    generate_separated_shuffle_indices_with_rng(len, current, artist_key, &mut thread_rng())
}

/// Same as [`generate_separated_shuffle_indices`] with an explicit RNG.
pub fn generate_separated_shuffle_indices_with_rng<F, R>(
    len: usize,
    current: usize,
    artist_key: F,
    rng: &mut R,
) -> Vec<usize>
where
    F: Fn(usize) -> Option<String>,
    R: Rng + ?Sized,
{
    if len == 0 {
        return Vec::new();
    }
    let current = current.min(len - 1);

    let mut rest: Vec<usize> = (0..len).filter(|&index| index != current).collect();
    rest.shuffle(rng);

    let key_of = |index: usize| artist_key(index).unwrap_or_else(|| format!("#{index}"));

    // Buckets keep first-seen order so equal-sized buckets tie-break randomly.
    let mut bucket_of: HashMap<String, usize> = HashMap::new();
    let mut buckets: Vec<(String, Vec<usize>)> = Vec::new();
    for &index in &rest {
        let key = key_of(index);
        let slot = *bucket_of.entry(key.clone()).or_insert_with(|| {
            buckets.push((key, Vec::new()));
            buckets.len() - 1
        });
        buckets[slot].1.push(index);
    }
    // Drain from the back of each bucket; reverse to keep shuffled order.
    for (_, indices) in buckets.iter_mut() {
        indices.reverse();
    }

    let mut result = Vec::with_capacity(len);
    result.push(current);
    let mut previous_key = key_of(current);

    while result.len() < len {
        let pick = largest_bucket(&buckets, |key| key != previous_key)
            .or_else(|| largest_bucket(&buckets, |_| true));
        let Some(slot) = pick else { break };
        let (key, indices) = &mut buckets[slot];
        if let Some(index) = indices.pop() {
            result.push(index);
            previous_key = key.clone();
        }
    }

    result
}

/// Shuffle permutation for a queue of tracks.
pub fn shuffle_tracks(tracks: &[SharedTrack], current: usize) -> Vec<usize> {
    generate_separated_shuffle_indices(tracks.len(), current, |index| {
        tracks.get(index).and_then(|track| track.artist_key())
    })
}

fn largest_bucket<P>(buckets: &[(String, Vec<usize>)], allowed: P) -> Option<usize>
where
    P: Fn(&str) -> bool,
{
    let mut best: Option<(usize, usize)> = None;
    for (slot, (key, indices)) in buckets.iter().enumerate() {
        if indices.is_empty() || !allowed(key) {
            continue;
        }
        if best.map_or(true, |(_, size)| indices.len() > size) {
            best = Some((slot, indices.len()));
        }
    }
    best.map(|(slot, _)| slot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn keys<'a>(artists: &'a [&'a str]) -> impl Fn(usize) -> Option<String> + 'a {
        move |index| artists.get(index).map(|artist| artist.to_string())
    }

    #[test]
    fn current_index_is_first() {
        let artists = ["a", "b", "c", "d", "e"];
        let order = generate_separated_shuffle_indices(artists.len(), 3, keys(&artists));
        assert_eq!(order[0], 3);
        let mut sorted = order.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn separates_when_current_artist_fills_half_rounded_up() {
        // Five tracks, three by "a" (ceil(5/2)), the current one among them.
        let artists = ["a", "b", "a", "c", "a"];
        for seed in 0..50 {
            let mut rng = StdRng::seed_from_u64(seed);
            let order = generate_separated_shuffle_indices_with_rng(
                artists.len(),
                0,
                keys(&artists),
                &mut rng,
            );
            let played: Vec<&str> = order.iter().map(|&i| artists[i]).collect();
            assert_eq!(played[0], "a");
            assert!(
                played.windows(2).all(|pair| pair[0] != pair[1]),
                "adjacent artists in {played:?}"
            );
        }
    }

    #[test]
    fn unknown_artists_never_collide() {
        let order = generate_separated_shuffle_indices(4, 1, |_| None);
        assert_eq!(order.len(), 4);
        assert_eq!(order[0], 1);
    }

    #[test]
    fn degenerate_sizes() {
        assert!(generate_separated_shuffle_indices(0, 0, |_| None).is_empty());
        assert_eq!(generate_separated_shuffle_indices(1, 0, |_| None), vec![0]);
        assert_eq!(generate_separated_shuffle_indices(3, 9, |_| None)[0], 2);
    }

    #[test]
    fn infeasible_inputs_still_produce_permutation() {
        let artists = ["a", "a", "a", "b"];
        let order = generate_separated_shuffle_indices(artists.len(), 3, keys(&artists));
        let mut sorted = order.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![0, 1, 2, 3]);
        assert_eq!(order[0], 3);
    }
}
