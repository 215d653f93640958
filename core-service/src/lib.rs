//! Core service façade and bootstrap helpers.
//!
//! This crate wires the host-provided bridges in a
//! [`CoreConfig`](core_runtime::config::CoreConfig) into the playback core:
//! the audio engine, segmented startup, the play queue and, when enabled,
//! the Listen Together client. Host applications talk to the resulting
//! [`PlayerController`] and observe everything through the shared
//! [`EventBus`](core_runtime::events::EventBus).
//!
//! ```ignore
//! let config = CoreConfig::builder()
//!     .api_base_url("https://api.example.com")
//!     .audio_backend(backend)
//!     .http_client(http)
//!     .build()?;
//! let core = CoreService::new(config, PlayerSettings::default())?;
//! core.player().play_tracks(tracks, 0).await?;
//! ```

pub mod controller;
pub mod error;
mod group;
mod playback;
pub mod resume;

pub use controller::{PlayerController, PlayerSettings};
pub use error::{CoreError, Result};
pub use resume::ResumePositions;

use core_runtime::config::CoreConfig;
use core_runtime::events::{CoreEvent, EventBus, Receiver};
use core_runtime::logging::{init_logging, LoggingConfig};
use core_sync::ListenTogetherClient;
use tracing::info;

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct CoreService {
    config: CoreConfig,
    bus: EventBus,
    player: PlayerController,
}

impl CoreService {
    /// Validates `config` and builds the player. Must run inside the async
    /// runtime the player's background tasks will use.
    pub fn new(config: CoreConfig, settings: PlayerSettings) -> Result<Self> {
        config.validate()?;
        let bus = EventBus::new(config.event_buffer_size);
        let player = PlayerController::new(&config, settings, bus.clone())?;
        info!(api_base_url = %config.api_base_url, "Core service initialized");
        Ok(Self {
            config,
            bus,
            player,
        })
    }

    /// Installs the global tracing subscriber, then builds the service.
    pub fn bootstrap(
        config: CoreConfig,
        settings: PlayerSettings,
        logging: LoggingConfig,
    ) -> Result<Self> {
        init_logging(logging)?;
        Self::new(config, settings)
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn player(&self) -> &PlayerController {
        &self.player
    }

    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.bus.subscribe()
    }

    /// `None` unless Listen Together is enabled.
    pub fn listen_together(&self) -> Option<&ListenTogetherClient> {
        self.player.listen_together()
    }
}
