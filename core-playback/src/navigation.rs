//! Next/previous resolution over the raw queue order or a shuffle permutation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Repeat mode. Orthogonal to shuffle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepeatMode {
    #[default]
    Off,
    One,
    All,
}

impl RepeatMode {
    /// `Off → All → One → Off`.
    pub fn cycle(self) -> Self {
        match self {
            RepeatMode::Off => RepeatMode::All,
            RepeatMode::All => RepeatMode::One,
            RepeatMode::One => RepeatMode::Off,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RepeatMode::Off => "off",
            RepeatMode::One => "one",
            RepeatMode::All => "all",
        }
    }
}

impl fmt::Display for RepeatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RepeatMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" | "none" => Ok(RepeatMode::Off),
            "one" | "track" => Ok(RepeatMode::One),
            "all" | "queue" => Ok(RepeatMode::All),
            other => Err(format!("unknown repeat mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NavigationAction {
    Next,
    Previous,
}

/// Resolves the queue index `action` leads to.
///
/// With shuffle enabled the walk follows `shuffle` (a permutation of queue
/// indices). `next` wraps to the start only under [`RepeatMode::All`];
/// `previous` never wraps. `None` means there is no destination and playback
/// must not advance.
///
/// An out-of-range `current` or a shuffle permutation whose length does not
/// match the queue falls back to sensible starts instead of panicking.
pub fn resolve_queue_navigation_index(
    action: NavigationAction,
    queue_len: usize,
    current: usize,
    is_shuffle: bool,
    shuffle: &[usize],
    repeat: RepeatMode,
) -> Option<usize> {
    if queue_len == 0 {
        return None;
    }

    if is_shuffle && shuffle.len() == queue_len {
        let position = shuffle.iter().position(|&index| index == current);
        return match (action, position) {
            (NavigationAction::Next, Some(pos)) if pos + 1 < shuffle.len() => {
                Some(shuffle[pos + 1])
            }
            (NavigationAction::Next, _) => match repeat {
                RepeatMode::All => shuffle.first().copied(),
                _ => None,
            },
            (NavigationAction::Previous, Some(pos)) if pos > 0 => Some(shuffle[pos - 1]),
            (NavigationAction::Previous, _) => None,
        };
    }

    match action {
        NavigationAction::Next => {
            if current + 1 < queue_len {
                Some(current + 1)
            } else if repeat == RepeatMode::All {
                Some(0)
            } else {
                None
            }
        }
        NavigationAction::Previous => {
            if current == 0 || current > queue_len {
                None
            } else {
                Some(current - 1)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use NavigationAction::{Next, Previous};

    #[test]
    fn next_at_end_respects_repeat() {
        assert_eq!(resolve_queue_navigation_index(Next, 3, 2, false, &[], RepeatMode::Off), None);
        assert_eq!(resolve_queue_navigation_index(Next, 3, 2, false, &[], RepeatMode::One), None);
        assert_eq!(
            resolve_queue_navigation_index(Next, 3, 2, false, &[], RepeatMode::All),
            Some(0)
        );
    }

    #[test]
    fn shuffled_next_follows_permutation() {
        let shuffle = [2, 0, 3, 1];
        assert_eq!(
            resolve_queue_navigation_index(Next, 4, 2, true, &shuffle, RepeatMode::Off),
            Some(0)
        );
        assert_eq!(
            resolve_queue_navigation_index(Next, 4, 1, true, &shuffle, RepeatMode::Off),
            None
        );
        assert_eq!(
            resolve_queue_navigation_index(Next, 4, 1, true, &shuffle, RepeatMode::All),
            Some(2)
        );
    }

    #[test]
    fn previous_never_wraps() {
        assert_eq!(
            resolve_queue_navigation_index(Previous, 3, 0, false, &[], RepeatMode::All),
            None
        );
        assert_eq!(
            resolve_queue_navigation_index(Previous, 3, 2, false, &[], RepeatMode::Off),
            Some(1)
        );
        let shuffle = [1, 2, 0];
        assert_eq!(
            resolve_queue_navigation_index(Previous, 3, 1, true, &shuffle, RepeatMode::All),
            None
        );
        assert_eq!(
            resolve_queue_navigation_index(Previous, 3, 0, true, &shuffle, RepeatMode::Off),
            Some(2)
        );
    }

    #[test]
    fn empty_queue_has_no_destination() {
        assert_eq!(resolve_queue_navigation_index(Next, 0, 0, false, &[], RepeatMode::All), None);
    }

    #[test]
    fn repeat_cycles_through_modes() {
        assert_eq!(RepeatMode::Off.cycle(), RepeatMode::All);
        assert_eq!(RepeatMode::All.cycle(), RepeatMode::One);
        assert_eq!(RepeatMode::One.cycle(), RepeatMode::Off);
        assert_eq!("ALL".parse::<RepeatMode>(), Ok(RepeatMode::All));
    }
}
