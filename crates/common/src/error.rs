use crate::config::ConfigError;
use crate::order::OrderParseError;
use thiserror::Error;

/// Common error types for weaver
#[derive(Debug, Error)]
pub enum WeaverError {
    #[error("order rejected: {0}")]
    Order(#[from] OrderParseError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("relay snapshot error: {0}")]
    Snapshot(String),

    #[error("control channel lost: {0}")]
    ChannelLost(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type for weaver operations
pub type Result<T> = std::result::Result<T, WeaverError>;

impl WeaverError {
    pub fn snapshot(msg: impl Into<String>) -> Self {
        Self::Snapshot(msg.into())
    }

    pub fn channel_lost(msg: impl Into<String>) -> Self {
        Self::ChannelLost(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
