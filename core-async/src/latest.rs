//! Run-only-the-latest operation coalescing.
//!
//! A [`LatestOperation`] serializes an asynchronous action so that at most one
//! invocation is in flight per operation family, and any argument enqueued
//! while an invocation runs replaces the previously queued one. When the
//! in-flight invocation finishes, only the most recent argument runs next.
//!
//! ```text
//! enqueue(A)  ──► runs A
//! enqueue(B)  ──► queued            (A still running)
//! enqueue(C)  ──► replaces B        (A still running)
//! A finishes  ──► runs C, B is never run
//! ```
//!
//! The family's state lives as long as the `LatestOperation` value, not any
//! single call. Clones share the same state.
//!
//! # Example
//!
//! ```rust,no_run
//! use core_async::LatestOperation;
//!
//! # async fn example() {
//! let op: LatestOperation<u32> = LatestOperation::new();
//! op.run(7, |value| async move {
//!     println!("sending {value}");
//!     Ok::<(), std::io::Error>(())
//! })
//! .await;
//! # }
//! ```

use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::warn;

/// Shared state of one operation family.
#[derive(Debug)]
struct LatestOperationState<T> {
    in_flight: bool,
    queued: Option<T>,
}

/// Coalescing runner keeping only the latest requested argument.
#[derive(Debug)]
pub struct LatestOperation<T> {
    state: Arc<Mutex<LatestOperationState<T>>>,
}

impl<T> Clone for LatestOperation<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T> Default for LatestOperation<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LatestOperation<T> {
    /// Create an idle operation family.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(LatestOperationState {
                in_flight: false,
                queued: None,
            })),
        }
    }

    /// Whether a runner invocation is currently executing.
    pub fn is_in_flight(&self) -> bool {
        self.lock().in_flight
    }

    /// Whether an argument is waiting for the in-flight invocation to finish.
    pub fn has_queued(&self) -> bool {
        self.lock().queued.is_some()
    }

    fn lock(&self) -> MutexGuard<'_, LatestOperationState<T>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Store `arg` as the latest argument. Returns `true` when the caller must
    /// drive the pump (nothing was in flight).
    fn enqueue(&self, arg: T) -> bool {
        let mut state = self.lock();
        state.queued = Some(arg);
        if state.in_flight {
            false
        } else {
            state.in_flight = true;
            true
        }
    }

    /// Take the next argument, or clear the in-flight flag when drained.
    ///
    /// The emptiness check and the flag reset happen under the same lock, so
    /// an argument enqueued concurrently either lands before the check (and
    /// is consumed here) or observes `in_flight == false` and starts its own
    /// pump.
    fn next_or_finish(&self) -> Option<T> {
        let mut state = self.lock();
        match state.queued.take() {
            Some(arg) => Some(arg),
            None => {
                state.in_flight = false;
                None
            }
        }
    }
}

impl<T: Clone> LatestOperation<T> {
    /// Enqueue `arg` and, if nothing is in flight, pump until drained.
    ///
    /// Runner failures are logged and never stop the pump. Returns `true` if
    /// this call drove the pump, `false` if the argument was handed to an
    /// already running pump.
    pub async fn run<F, Fut, E>(&self, arg: T, runner: F) -> bool
    where
        F: FnMut(T) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Display,
    {
        self.run_with_error_hook(arg, runner, |error: E, _arg: &T| {
            warn!(error = %error, "Coalesced operation failed");
        })
        .await
    }

    /// Same as [`run`](Self::run) but routes every runner failure to
    /// `on_error(error, arg)`.
    pub async fn run_with_error_hook<F, Fut, E, H>(
        &self,
        arg: T,
        mut runner: F,
        mut on_error: H,
    ) -> bool
    where
        F: FnMut(T) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        H: FnMut(E, &T),
    {
        if !self.enqueue(arg) {
            return false;
        }

        let mut guard = PumpGuard {
            op: self,
            armed: true,
        };

        while let Some(next) = self.next_or_finish() {
            if let Err(error) = runner(next.clone()).await {
                on_error(error, &next);
            }
        }

        guard.armed = false;
        true
    }
}

/// Releases the in-flight flag if the pumping future is dropped mid-run so a
/// later enqueue can restart the pump instead of starving.
struct PumpGuard<'a, T> {
    op: &'a LatestOperation<T>,
    armed: bool,
}

impl<T> Drop for PumpGuard<'_, T> {
    fn drop(&mut self) {
        if self.armed {
            self.op.lock().in_flight = false;
        }
    }
}
