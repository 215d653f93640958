//! Task spawning abstractions.
//!
//! - On native platforms: `tokio::task::spawn`, the future must be `Send`.
//! - On WASM: `wasm_bindgen_futures::spawn_local`, single-threaded and
//!   fire-and-forget.
//!
//! The playback core only ever spawns detached work (timers, retry loops,
//! event pumps), so the WASM variant returns nothing to await.

#[cfg(not(target_arch = "wasm32"))]
pub use tokio::task::{yield_now, JoinError, JoinHandle};

/// Spawns a new asynchronous task using the Tokio runtime.
///
/// # Examples
///
/// ```rust,no_run
/// use core_async::task::spawn;
///
/// # async fn example() {
/// let handle = spawn(async { 42 });
/// assert_eq!(handle.await.unwrap(), 42);
/// # }
/// ```
#[cfg(not(target_arch = "wasm32"))]
pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: std::future::Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::task::spawn(future)
}

/// Spawns a new task on the browser event loop.
#[cfg(target_arch = "wasm32")]
pub fn spawn<F>(future: F)
where
    F: std::future::Future<Output = ()> + 'static,
{
    wasm_bindgen_futures::spawn_local(future)
}
