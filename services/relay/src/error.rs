use relay_core::config::ConfigError;

/// Relay pipeline error variants.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("timed out waiting for lock {0}")]
    LockTimeout(String),
    #[error("handler already registered for event {0}")]
    DuplicateHandler(String),
    #[error("invalid event: {0}")]
    InvalidEvent(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("cancelled")]
    Cancelled,
    #[error("internal error: {0:#}")]
    Internal(#[from] anyhow::Error),
}

impl RelayError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::LockTimeout(_) => "LOCK_TIMEOUT",
            Self::DuplicateHandler(_) => "DUPLICATE_HANDLER",
            Self::InvalidEvent(_) => "INVALID_EVENT",
            Self::Config(_) => "CONFIG",
            Self::Transport(_) => "TRANSPORT",
            Self::Cancelled => "CANCELLED",
            Self::Internal(_) => "INTERNAL",
        }
    }
}
