use std::{io, path::PathBuf};

/// Crate level result alias
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Crate level error enum
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration file could not be read
    #[error("unable to read config file {}: {source}", path.display())]
    ConfigLoad {
        /// Path that was read
        path: PathBuf,
        /// Underlying I/O error
        source: io::Error,
    },

    /// Configuration file is not a valid document
    #[error("unable to parse config file: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// Configuration parsed but describes an unusable relay
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Credential seed could not be read or parsed
    #[error("failed to parse nkey seed {}: {reason}", path.display())]
    Credential {
        /// Seed file path
        path: PathBuf,
        /// What went wrong
        reason: String,
    },

    /// A sender, consumer or HTTP server could not be opened
    #[error("failed to open {stage}: {reason}")]
    TransportSetup {
        /// Which transport handle failed
        stage: &'static str,
        /// Underlying cause
        reason: String,
    },

    /// Event was sent but not delivered
    #[error("failed to deliver event {id}: {reason}")]
    Delivery {
        /// Event id
        id: String,
        /// Underlying cause
        reason: String,
    },

    /// Inbound payload is not a usable CloudEvent
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    /// Occurs when an event cannot be serialized
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    pub(crate) fn setup(stage: &'static str, reason: impl ToString) -> Self {
        Self::TransportSetup {
            stage,
            reason: reason.to_string(),
        }
    }

    pub(crate) fn delivery(id: impl Into<String>, reason: impl ToString) -> Self {
        Self::Delivery {
            id: id.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether a bounded retry may clear this error
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransportSetup { .. })
    }
}
