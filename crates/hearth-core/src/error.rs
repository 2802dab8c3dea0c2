//! Error types shared by the correlator, the voice pipeline, and the gateway.

use thiserror::Error;

/// Result type alias for hearth operations
pub type HearthResult<T> = Result<T, HearthError>;

/// Errors that can occur between a device, the transport, and the voice pipeline
#[derive(Error, Debug)]
pub enum HearthError {
    /// No reply or artifact arrived within the configured bound.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Upstream provider rejected the input (bad request, provider-side error).
    #[error("Submission rejected: {0}")]
    Submission(String),

    /// Speech pipeline failure.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Response generation failure.
    #[error("Dialogue error: {0}")]
    Dialogue(String),

    /// Publish or connection failure.
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HearthError {
    /// True for the "device did not answer in time" outcome, which callers render as "no data".
    pub fn is_timeout(&self) -> bool {
        matches!(self, HearthError::Timeout(_))
    }
}

impl From<config::ConfigError> for HearthError {
    fn from(err: config::ConfigError) -> Self {
        HearthError::Config(err.to_string())
    }
}

impl From<tokio::task::JoinError> for HearthError {
    fn from(err: tokio::task::JoinError) -> Self {
        HearthError::Decode(format!("worker task failed: {}", err))
    }
}
