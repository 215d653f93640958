//! Per-track resume positions.
//!
//! Positions are kept in the host [`SettingsStore`] under
//! `resume_position:<track_id>`. Storage failures are logged and otherwise
//! ignored; a missing position just means playback starts from the top.

use bridge_traits::storage::SettingsStore;
use std::sync::Arc;
use tracing::{debug, warn};

/// Positions closer than this to either end of the track are not worth
/// remembering.
const MIN_MEANINGFUL_SECS: f64 = 5.0;
const END_MARGIN_SECS: f64 = 10.0;

#[derive(Clone)]
pub struct ResumePositions {
    store: Arc<dyn SettingsStore>,
}

impl ResumePositions {
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self { store }
    }

    /// Stored position for `track_id`, if any.
    pub async fn load(&self, track_id: &str) -> Option<f64> {
        match self.store.get_f64(&storage_key(track_id)).await {
            Ok(position) => position.filter(|p| p.is_finite() && *p > 0.0),
            Err(e) => {
                warn!(track_id, error = %e, "Failed to read resume position");
                None
            }
        }
    }

    /// Remembers `position` for `track_id`, or forgets the track when the
    /// position is too close to the start or the end.
    pub async fn save(&self, track_id: &str, position: f64, duration: f64) {
        if !worth_keeping(position, duration) {
            self.clear(track_id).await;
            return;
        }
        debug!(track_id, position, "Saving resume position");
        if let Err(e) = self.store.set_f64(&storage_key(track_id), position).await {
            warn!(track_id, error = %e, "Failed to save resume position");
        }
    }

    pub async fn clear(&self, track_id: &str) {
        if let Err(e) = self.store.delete(&storage_key(track_id)).await {
            warn!(track_id, error = %e, "Failed to clear resume position");
        }
    }
}

fn storage_key(track_id: &str) -> String {
    format!("resume_position:{track_id}")
}

fn worth_keeping(position: f64, duration: f64) -> bool {
    if !position.is_finite() || position < MIN_MEANINGFUL_SECS {
        return false;
    }
    !(duration.is_finite() && duration > 0.0 && duration - position < END_MARGIN_SECS)
}
