//! Time-related abstractions.
//!
//! - On native platforms: re-exports `tokio::time`
//! - On WASM: `sleep` is backed by `gloo-timers` (`setTimeout`)
//!
//! Wall-clock reads go through `bridge_traits::time::Clock` instead of this
//! module so that tests can drive time deterministically.

#[cfg(not(target_arch = "wasm32"))]
pub use tokio::time::{sleep, timeout};

pub use std::time::Duration;

/// Sleeps for the specified duration using the browser's `setTimeout`.
#[cfg(target_arch = "wasm32")]
pub async fn sleep(duration: Duration) {
    gloo_timers::future::sleep(duration).await
}

/// Converts a millisecond count to a [`Duration`], treating negative and
/// non-finite values as zero.
pub fn millis_f64(ms: f64) -> Duration {
    if ms.is_finite() && ms > 0.0 {
        Duration::from_secs_f64(ms / 1000.0)
    } else {
        Duration::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millis_f64_clamps_invalid_values() {
        assert_eq!(millis_f64(-5.0), Duration::ZERO);
        assert_eq!(millis_f64(f64::NAN), Duration::ZERO);
        assert_eq!(millis_f64(f64::INFINITY), Duration::ZERO);
        assert_eq!(millis_f64(250.0), Duration::from_millis(250));
    }
}
