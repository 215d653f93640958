use bridge_traits::error::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Not connected to the group service")]
    NotConnected,

    #[error("Not in a listening group")]
    NotInGroup,

    #[error("Command {command} requires host authority")]
    NotHost { command: String },

    #[error("Command rejected by server ({code:?}): {message}")]
    CommandRejected {
        code: Option<String>,
        message: String,
    },

    #[error("Command still conflicting after {attempts} attempts")]
    ConflictRetriesExhausted { attempts: u32 },

    #[error("Command superseded by a newer navigation")]
    Superseded,

    #[error("Invalid payload for {event}: {message}")]
    InvalidPayload { event: String, message: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Socket error: {0}")]
    Socket(#[from] BridgeError),
}

impl SyncError {
    /// Whether retrying the same command later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::NotConnected | SyncError::ConflictRetriesExhausted { .. } => true,
            SyncError::Socket(BridgeError::Network(_)) | SyncError::Socket(BridgeError::Timeout(_)) => {
                true
            }
            _ => false,
        }
    }

    pub(crate) fn invalid_payload(event: &str, error: impl std::fmt::Display) -> Self {
        SyncError::InvalidPayload {
            event: event.to_string(),
            message: error.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(SyncError::NotConnected.is_transient());
        assert!(SyncError::Socket(BridgeError::Timeout("ack".into())).is_transient());
        assert!(!SyncError::Superseded.is_transient());
        assert!(!SyncError::CommandRejected {
            code: Some("NOT_HOST".into()),
            message: "nope".into()
        }
        .is_transient());
    }
}
