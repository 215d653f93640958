//! Synchronization primitives.
//!
//! - On native platforms: `tokio::sync` (async-aware primitives)
//! - On WASM: `futures` equivalents (single-threaded)
//!
//! Only primitives the playback core actually needs are exported: an async
//! mutex used to serialize connection setup, and broadcast channels used for
//! event fan-out.

#[cfg(not(target_arch = "wasm32"))]
pub use tokio::sync::{broadcast, mpsc, oneshot, Mutex, MutexGuard, Notify};

#[cfg(target_arch = "wasm32")]
pub use futures::channel::{mpsc, oneshot};

// tokio's `sync` feature is executor-agnostic and compiles for wasm32.
#[cfg(target_arch = "wasm32")]
pub use tokio::sync::broadcast;

#[cfg(target_arch = "wasm32")]
pub use futures::lock::{Mutex, MutexGuard};
