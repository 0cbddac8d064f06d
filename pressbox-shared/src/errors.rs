//! Error taxonomy shared by the host supervisor and the worker.
//!
//! Every fallible operation in the workspace returns [`PressboxResult`].
//! Errors that cross the worker transport travel as [`RemoteError`] and are
//! turned back into the matching [`PressboxError`] variant on arrival, so a
//! caller on either side of the transport can match on the same variants.

use serde::{Deserialize, Serialize};

/// Result alias used across pressbox crates.
pub type PressboxResult<T> = Result<T, PressboxError>;

#[derive(Debug, thiserror::Error)]
pub enum PressboxError {
    /// The worker failed to start or never signalled readiness.
    #[error("worker spawn failed: {0}")]
    Spawn(String),

    /// `boot` was invoked on a sequencer that already left `NotBooted`.
    #[error("playground already booted")]
    AlreadyBooted,

    /// Artifact resolution, mount application or framework boot failed.
    #[error("boot failed: {0}")]
    Boot(String),

    /// Network or write error while populating the download cache.
    #[error("download failed: {0}")]
    Download(String),

    /// The message channel to the peer is closed or broken.
    #[error("transport error: {0}")]
    Transport(String),

    /// The peer reported an error without a more specific category.
    #[error("remote error: {0}")]
    Remote(String),

    /// Redirect following gave up.
    #[error("request relay error: {0}")]
    Relay(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PressboxError {
    /// Stable machine-readable code, used on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Spawn(_) => codes::SPAWN_FAILURE,
            Self::AlreadyBooted => codes::ALREADY_BOOTED,
            Self::Boot(_) => codes::BOOT_FAILURE,
            Self::Download(_) => codes::DOWNLOAD_FAILURE,
            Self::Transport(_) => codes::TRANSPORT,
            Self::Remote(_) => codes::REMOTE,
            Self::Relay(_) => codes::RELAY,
            Self::Config(_) => codes::CONFIG,
            Self::Storage(_) | Self::Io(_) => codes::STORAGE,
            Self::InvalidState(_) => codes::INVALID_STATE,
            Self::Unsupported(_) => codes::UNSUPPORTED,
            Self::Internal(_) | Self::Json(_) => codes::INTERNAL,
        }
    }

    /// Message without the category prefix added by `Display`.
    fn detail(&self) -> String {
        match self {
            Self::Spawn(m)
            | Self::Boot(m)
            | Self::Download(m)
            | Self::Transport(m)
            | Self::Remote(m)
            | Self::Relay(m)
            | Self::Config(m)
            | Self::Storage(m)
            | Self::InvalidState(m)
            | Self::Unsupported(m)
            | Self::Internal(m) => m.clone(),
            Self::AlreadyBooted => "playground already booted".to_string(),
            Self::Io(e) => e.to_string(),
            Self::Json(e) => e.to_string(),
        }
    }
}

pub mod codes {
    pub const SPAWN_FAILURE: &str = "spawn_failure";
    pub const ALREADY_BOOTED: &str = "already_booted";
    pub const BOOT_FAILURE: &str = "boot_failure";
    pub const DOWNLOAD_FAILURE: &str = "download_failure";
    pub const TRANSPORT: &str = "transport";
    pub const REMOTE: &str = "remote";
    pub const RELAY: &str = "relay";
    pub const CONFIG: &str = "config";
    pub const STORAGE: &str = "storage";
    pub const INVALID_STATE: &str = "invalid_state";
    pub const UNSUPPORTED: &str = "unsupported";
    pub const INTERNAL: &str = "internal";
}

/// Error as carried inside a reply frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    pub code: String,
    pub message: String,
}

impl From<&PressboxError> for RemoteError {
    fn from(err: &PressboxError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.detail(),
        }
    }
}

impl From<PressboxError> for RemoteError {
    fn from(err: PressboxError) -> Self {
        Self::from(&err)
    }
}

impl From<RemoteError> for PressboxError {
    fn from(err: RemoteError) -> Self {
        let RemoteError { code, message } = err;
        match code.as_str() {
            codes::SPAWN_FAILURE => Self::Spawn(message),
            codes::ALREADY_BOOTED => Self::AlreadyBooted,
            codes::BOOT_FAILURE => Self::Boot(message),
            codes::DOWNLOAD_FAILURE => Self::Download(message),
            codes::TRANSPORT => Self::Transport(message),
            codes::RELAY => Self::Relay(message),
            codes::CONFIG => Self::Config(message),
            codes::STORAGE => Self::Storage(message),
            codes::INVALID_STATE => Self::InvalidState(message),
            codes::UNSUPPORTED => Self::Unsupported(message),
            codes::INTERNAL => Self::Internal(message),
            _ => Self::Remote(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_already_booted_survives_the_wire() {
        let remote = RemoteError::from(PressboxError::AlreadyBooted);
        assert_eq!(remote.code, codes::ALREADY_BOOTED);

        let restored = PressboxError::from(remote);
        assert!(matches!(restored, PressboxError::AlreadyBooted));
    }

    #[test]
    fn test_boot_failure_keeps_message_without_prefix() {
        let remote = RemoteError::from(PressboxError::Boot("zip is corrupt".into()));
        assert_eq!(remote.message, "zip is corrupt");

        match PressboxError::from(remote) {
            PressboxError::Boot(message) => assert_eq!(message, "zip is corrupt"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_code_becomes_remote() {
        let err = PressboxError::from(RemoteError {
            code: "something_new".into(),
            message: "boom".into(),
        });
        assert!(matches!(err, PressboxError::Remote(m) if m == "boom"));
    }

    #[test]
    fn test_io_error_maps_to_storage_code() {
        let err = PressboxError::from(std::io::Error::other("disk full"));
        assert_eq!(err.code(), codes::STORAGE);
    }
}
