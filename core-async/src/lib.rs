//! Runtime-agnostic async abstraction layer for the playback core.
//!
//! This crate provides a unified async API that works across different runtime environments:
//! - Native platforms (desktop): Uses Tokio runtime
//! - WebAssembly: Uses the browser's event loop with wasm-bindgen-futures
//!
//! # Architecture
//!
//! The crate uses conditional compilation (`#[cfg]`) to provide platform-specific
//! implementations while maintaining a consistent API surface. All `core-*` crates
//! should depend on this crate instead of directly depending on tokio.
//!
//! # Modules
//!
//! - `task`: Task spawning
//! - `time`: Sleep and duration helpers
//! - `sync`: Synchronization primitives (async Mutex, channels)
//! - `latest`: Run-only-the-latest operation coalescing
//!
//! # Examples
//!
//! ```rust,no_run
//! use core_async::task;
//! use core_async::time::{sleep, Duration};
//!
//! async fn example() {
//!     task::spawn(async {
//!         sleep(Duration::from_millis(300)).await;
//!     });
//! }
//! ```

pub mod latest;
pub mod runtime;
pub mod sync;
pub mod task;
pub mod time;

pub use latest::LatestOperation;
pub use task::spawn;
pub use time::{sleep, Duration};
