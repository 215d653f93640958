//! # Host Bridge Traits
//!
//! Platform abstraction traits that must be implemented by each host platform.
//!
//! ## Overview
//!
//! This crate defines the contract between the playback core and
//! platform-specific implementations. Each trait represents a capability the
//! core requires but that must be implemented differently per platform
//! (browser, desktop, mobile).
//!
//! ## Traits
//!
//! ### Audio & Realtime
//! - [`NativeAudioBackend`](audio::NativeAudioBackend) - Handle-based native sound primitive
//! - [`RealtimeSocket`](socket::RealtimeSocket) - Named-event socket with acknowledgements
//!
//! ### Networking & Storage
//! - [`HttpClient`](http::HttpClient) - Async HTTP requests
//! - [`SettingsStore`](storage::SettingsStore) - Key-value preferences storage
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Fail-Fast Strategy
//!
//! The core fails fast with descriptive errors when a required capability is
//! missing:
//!
//! ```ignore
//! let audio = config.audio_backend
//!     .ok_or_else(|| Error::CapabilityMissing {
//!         capability: "NativeAudioBackend".to_string(),
//!         message: "No native audio backend provided. \
//!                  Web: inject the HTMLAudioElement adapter.".to_string(),
//!     })?;
//! ```
//!
//! ## Error Handling
//!
//! All bridge traits use the [`BridgeError`](error::BridgeError) type.
//! Platform implementations should convert platform-specific errors to
//! `BridgeError` and keep messages actionable.
//!
//! ## Thread Safety
//!
//! Bridge traits require `Send + Sync` on native targets through
//! [`PlatformSendSync`](platform::PlatformSendSync); the bound disappears on
//! `wasm32`, where everything runs on the browser event loop.

pub mod audio;
pub mod error;
pub mod http;
pub mod platform;
pub mod socket;
pub mod storage;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use audio::{
    LoadRequest, LoadedSound, NativeAudioBackend, NativeAudioEvent, PlatformQuirks,
    SoundHandleId,
};
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
pub use socket::{RealtimeSocket, SocketEventStream, SocketMessage};
pub use storage::SettingsStore;
pub use time::{Clock, LogEntry, LogLevel, LoggerSink, SystemClock};
