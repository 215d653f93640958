//! Workspace facade crate.
//!
//! Exposes feature flags that map to the individual workspace crates
//! (`core-service`, `core-playback`, `core-sync`). Host applications can depend
//! on this crate and enable the documented features without wiring each crate
//! individually.

#[cfg(feature = "service")]
pub use core_service as service;

#[cfg(feature = "playback")]
pub use core_playback as playback;

#[cfg(feature = "listen-together")]
pub use core_sync as listen_together;
