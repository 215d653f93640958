//! # Core Configuration Module
//!
//! Builder for [`CoreConfig`], the bundle of host bridges and settings the
//! player core is constructed from.
//!
//! ## Required Dependencies
//!
//! - `NativeAudioBackend` - the platform sound primitive
//! - `HttpClient` - segmented session creation and manifest probes
//! - `api_base_url` - base for session endpoints and relative manifest URLs
//!
//! ## Optional Dependencies
//!
//! - `RealtimeSocket` - required when Listen Together is enabled
//! - `SettingsStore` - required when resume positions are enabled
//! - `Clock` - defaults to [`SystemClock`]
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use std::sync::Arc;
//!
//! let config = CoreConfig::builder()
//!     .api_base_url("https://api.example.com")
//!     .audio_backend(Arc::new(HtmlAudioBackend::new()))
//!     .http_client(Arc::new(FetchHttpClient::new()))
//!     .realtime_socket(Arc::new(SocketIoBridge::new()))
//!     .user_id("user-42")
//!     .enable_listen_together(true)
//!     .build()?;
//! ```
//!
//! ## Error Handling
//!
//! Missing capabilities fail fast with an actionable message:
//!
//! ```should_panic
//! use core_runtime::config::CoreConfig;
//!
//! CoreConfig::builder()
//!     .api_base_url("https://api.example.com")
//!     .build()
//!     .expect("Should fail - missing required bridges");
//! ```

use crate::error::{Error, Result};
use crate::events::DEFAULT_EVENT_BUFFER_SIZE;
use bridge_traits::{
    Clock, HttpClient, NativeAudioBackend, RealtimeSocket, SettingsStore, SystemClock,
};
use std::sync::Arc;
use url::Url;

/// Core configuration for the player core.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Base URL of the backend API (session creation, relative manifests)
    pub api_base_url: String,

    /// Identity of the local listener, used for host/follower decisions
    pub user_id: Option<String>,

    /// Native sound primitive (required)
    pub audio_backend: Arc<dyn NativeAudioBackend>,

    /// HTTP client for segmented session requests (required)
    pub http_client: Arc<dyn HttpClient>,

    /// Realtime socket for Listen Together (optional)
    pub realtime_socket: Option<Arc<dyn RealtimeSocket>>,

    /// Key-value store for resume positions (optional)
    pub settings_store: Option<Arc<dyn SettingsStore>>,

    /// Time source
    pub clock: Arc<dyn Clock>,

    /// Per-subscriber event buffer
    pub event_buffer_size: usize,

    /// Features flags
    pub features: FeatureFlags,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("api_base_url", &self.api_base_url)
            .field("user_id", &self.user_id)
            .field("audio_backend", &"NativeAudioBackend { ... }")
            .field("http_client", &"HttpClient { ... }")
            .field(
                "realtime_socket",
                &self
                    .realtime_socket
                    .as_ref()
                    .map(|_| "RealtimeSocket { ... }"),
            )
            .field(
                "settings_store",
                &self.settings_store.as_ref().map(|_| "SettingsStore { ... }"),
            )
            .field("event_buffer_size", &self.event_buffer_size)
            .field("features", &self.features)
            .finish()
    }
}

/// Feature flags control optional functionality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureFlags {
    /// Shared listening sessions (requires RealtimeSocket and a user id)
    pub enable_listen_together: bool,

    /// Adaptive segmented streaming for sources that support it
    pub enable_segmented_streaming: bool,

    /// Persist per-track resume positions (requires SettingsStore)
    pub enable_resume_positions: bool,

    /// Restart segmented sessions after an unexpected native pause
    pub enable_unexpected_pause_recovery: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            enable_listen_together: false,
            enable_segmented_streaming: true,
            enable_resume_positions: false,
            enable_unexpected_pause_recovery: true,
        }
    }
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration.
    ///
    /// Checks:
    /// - `api_base_url` is an absolute http(s) URL
    /// - event buffer size is positive
    /// - feature flags are backed by the bridges they need
    pub fn validate(&self) -> Result<()> {
        let base = Url::parse(&self.api_base_url)
            .map_err(|e| Error::Config(format!("Invalid api_base_url: {}", e)))?;
        if base.scheme() != "http" && base.scheme() != "https" {
            return Err(Error::Config(format!(
                "api_base_url must use http or https, got '{}'",
                base.scheme()
            )));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        if self.features.enable_listen_together {
            if self.realtime_socket.is_none() {
                return Err(Error::CapabilityMissing {
                    capability: "RealtimeSocket".to_string(),
                    message: "Listen Together enabled but no RealtimeSocket provided. \
                             Disable the feature or inject a socket implementation."
                        .to_string(),
                });
            }
            if self.user_id.as_deref().map_or(true, |id| id.trim().is_empty()) {
                return Err(Error::Config(
                    "Listen Together enabled but no user_id set. Use .user_id() to set it."
                        .to_string(),
                ));
            }
        }

        if self.features.enable_resume_positions && self.settings_store.is_none() {
            return Err(Error::CapabilityMissing {
                capability: "SettingsStore".to_string(),
                message: "Resume positions enabled but no SettingsStore provided. \
                         Web: inject a localStorage-backed store."
                    .to_string(),
            });
        }

        Ok(())
    }
}

fn audio_backend_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "NativeAudioBackend".to_string(),
        message: "NativeAudioBackend implementation is required for playback. \
                 Web: inject the HTMLAudioElement adapter. \
                 Mobile: inject the AVPlayer/ExoPlayer adapter."
            .to_string(),
    }
}

fn http_client_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: "HttpClient implementation is required for streaming session requests. \
                 Web: inject a fetch-based client."
            .to_string(),
    }
}

/// Builder for constructing [`CoreConfig`] instances.
#[derive(Default)]
pub struct CoreConfigBuilder {
    api_base_url: Option<String>,
    user_id: Option<String>,
    audio_backend: Option<Arc<dyn NativeAudioBackend>>,
    http_client: Option<Arc<dyn HttpClient>>,
    realtime_socket: Option<Arc<dyn RealtimeSocket>>,
    settings_store: Option<Arc<dyn SettingsStore>>,
    clock: Option<Arc<dyn Clock>>,
    event_buffer_size: Option<usize>,
    features: FeatureFlags,
}

impl CoreConfigBuilder {
    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = Some(url.into());
        self
    }

    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn audio_backend(mut self, backend: Arc<dyn NativeAudioBackend>) -> Self {
        self.audio_backend = Some(backend);
        self
    }

    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn realtime_socket(mut self, socket: Arc<dyn RealtimeSocket>) -> Self {
        self.realtime_socket = Some(socket);
        self
    }

    pub fn settings_store(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.settings_store = Some(store);
        self
    }

    /// Override the time source (tests inject a manual clock).
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    pub fn enable_listen_together(mut self, enabled: bool) -> Self {
        self.features.enable_listen_together = enabled;
        self
    }

    pub fn enable_segmented_streaming(mut self, enabled: bool) -> Self {
        self.features.enable_segmented_streaming = enabled;
        self
    }

    pub fn enable_resume_positions(mut self, enabled: bool) -> Self {
        self.features.enable_resume_positions = enabled;
        self
    }

    pub fn enable_unexpected_pause_recovery(mut self, enabled: bool) -> Self {
        self.features.enable_unexpected_pause_recovery = enabled;
        self
    }

    pub fn features(mut self, features: FeatureFlags) -> Self {
        self.features = features;
        self
    }

    /// Builds and validates the final `CoreConfig`.
    pub fn build(self) -> Result<CoreConfig> {
        let api_base_url = self.api_base_url.ok_or_else(|| {
            Error::Config("API base URL is required. Use .api_base_url() to set it.".to_string())
        })?;
        let audio_backend = self.audio_backend.ok_or_else(audio_backend_missing_error)?;
        let http_client = self.http_client.ok_or_else(http_client_missing_error)?;

        let config = CoreConfig {
            api_base_url,
            user_id: self.user_id,
            audio_backend,
            http_client,
            realtime_socket: self.realtime_socket,
            settings_store: self.settings_store,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            event_buffer_size: self.event_buffer_size.unwrap_or(DEFAULT_EVENT_BUFFER_SIZE),
            features: self.features,
        };

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::{
        HttpRequest, HttpResponse, LoadRequest, LoadedSound, SocketEventStream, SocketMessage,
        SoundHandleId,
    };
    use serde_json::Value;

    // Mock implementations for testing
    struct MockAudioBackend;

    #[async_trait]
    impl NativeAudioBackend for MockAudioBackend {
        async fn load(&self, _request: LoadRequest) -> BridgeResult<LoadedSound> {
            Ok(LoadedSound {
                handle: SoundHandleId::new(),
                duration_secs: 0.0,
            })
        }
        async fn play(&self, _handle: SoundHandleId) -> BridgeResult<()> {
            Ok(())
        }
        async fn pause(&self, _handle: SoundHandleId) -> BridgeResult<()> {
            Ok(())
        }
        async fn stop(&self, _handle: SoundHandleId) -> BridgeResult<()> {
            Ok(())
        }
        async fn seek(&self, _handle: SoundHandleId, _position_secs: f64) -> BridgeResult<()> {
            Ok(())
        }
        async fn set_volume(&self, _handle: SoundHandleId, _volume: f32) -> BridgeResult<()> {
            Ok(())
        }
        async fn set_muted(&self, _handle: SoundHandleId, _muted: bool) -> BridgeResult<()> {
            Ok(())
        }
        async fn position(&self, _handle: SoundHandleId) -> BridgeResult<f64> {
            Ok(0.0)
        }
        async fn is_playing(&self, _handle: SoundHandleId) -> BridgeResult<bool> {
            Ok(false)
        }
        async fn unload(&self, _handle: SoundHandleId) -> BridgeResult<()> {
            Ok(())
        }
    }

    struct MockHttpClient;

    #[async_trait]
    impl HttpClient for MockHttpClient {
        async fn execute(&self, _request: HttpRequest) -> BridgeResult<HttpResponse> {
            Ok(HttpResponse::new(200, "{}"))
        }
    }

    struct MockSocket;
    struct EmptyStream;

    #[async_trait]
    impl SocketEventStream for EmptyStream {
        async fn next(&mut self) -> Option<SocketMessage> {
            None
        }
    }

    #[async_trait]
    impl RealtimeSocket for MockSocket {
        async fn connect(&self) -> BridgeResult<()> {
            Ok(())
        }
        fn is_connected(&self) -> bool {
            false
        }
        async fn disconnect(&self) -> BridgeResult<()> {
            Ok(())
        }
        async fn emit(&self, _event: &str, _payload: Value) -> BridgeResult<()> {
            Ok(())
        }
        async fn emit_with_ack(&self, _event: &str, _payload: Value) -> BridgeResult<Value> {
            Ok(Value::Null)
        }
        fn subscribe(&self) -> Box<dyn SocketEventStream> {
            Box::new(EmptyStream)
        }
    }

    fn base_builder() -> CoreConfigBuilder {
        CoreConfig::builder()
            .api_base_url("https://api.example.com")
            .audio_backend(Arc::new(MockAudioBackend))
            .http_client(Arc::new(MockHttpClient))
    }

    #[test]
    fn test_builder_with_required_fields() {
        let config = base_builder().build().unwrap();
        assert_eq!(config.api_base_url, "https://api.example.com");
        assert_eq!(config.event_buffer_size, DEFAULT_EVENT_BUFFER_SIZE);
        assert!(config.features.enable_segmented_streaming);
        assert!(!config.features.enable_listen_together);
        assert!(config.clock.unix_timestamp() > 0);
    }

    #[test]
    fn test_builder_requires_api_base_url() {
        let err = CoreConfig::builder()
            .audio_backend(Arc::new(MockAudioBackend))
            .http_client(Arc::new(MockHttpClient))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("API base URL is required"));
    }

    #[test]
    fn test_builder_requires_audio_backend() {
        let err = CoreConfig::builder()
            .api_base_url("https://api.example.com")
            .http_client(Arc::new(MockHttpClient))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("NativeAudioBackend"));
    }

    #[test]
    fn test_builder_requires_http_client() {
        let err = CoreConfig::builder()
            .api_base_url("https://api.example.com")
            .audio_backend(Arc::new(MockAudioBackend))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("HttpClient"));
    }

    #[test]
    fn test_validate_rejects_relative_base_url() {
        let err = base_builder().api_base_url("/api").build().unwrap_err();
        assert!(err.to_string().contains("Invalid api_base_url"));

        let err = base_builder()
            .api_base_url("ftp://files.example.com")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("http or https"));
    }

    #[test]
    fn test_listen_together_requires_socket_and_user() {
        let err = base_builder()
            .user_id("u-1")
            .enable_listen_together(true)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("RealtimeSocket"));

        let err = base_builder()
            .realtime_socket(Arc::new(MockSocket))
            .enable_listen_together(true)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("user_id"));

        let config = base_builder()
            .realtime_socket(Arc::new(MockSocket))
            .user_id("u-1")
            .enable_listen_together(true)
            .build()
            .unwrap();
        assert!(config.features.enable_listen_together);
    }

    #[test]
    fn test_resume_positions_require_settings_store() {
        let err = base_builder()
            .enable_resume_positions(true)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("SettingsStore"));
    }

    #[test]
    fn test_zero_event_buffer_rejected() {
        let err = base_builder().event_buffer_size(0).build().unwrap_err();
        assert!(err.to_string().contains("Event buffer size"));
    }

    #[test]
    fn test_debug_hides_bridges() {
        let config = base_builder().build().unwrap();
        let debug = format!("{:?}", config);
        assert!(debug.contains("NativeAudioBackend { ... }"));
        assert!(debug.contains("api.example.com"));
    }
}
