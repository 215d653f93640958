use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Core initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Runtime error: {0}")]
    Runtime(#[from] core_runtime::Error),

    #[error("Listen Together error: {0}")]
    Sync(#[from] core_sync::SyncError),

    #[error("Playback error: {0}")]
    Playback(#[from] core_playback::PlaybackError),

    #[error("Listen Together is not enabled")]
    ListenTogetherDisabled,

    /// The command has no meaning while a listening group drives playback.
    #[error("{0} is unavailable while in a listening group")]
    UnavailableInGroup(&'static str),
}

impl CoreError {
    /// Errors worth retrying by the caller.
    pub fn is_transient(&self) -> bool {
        match self {
            CoreError::Sync(e) => e.is_transient(),
            CoreError::Playback(e) => e.is_transient(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
