use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failure of a call to the analysis HTTP service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// The service refused to start a task because one is already active.
    #[error("an analysis task is already running: {message}")]
    AlreadyRunning { message: String },
    #[error("request failed with status {status}: {message}")]
    Http { status: u16, message: String },
    #[error("could not reach the analysis service: {0}")]
    Network(String),
    #[error("the analysis service did not respond in time: {0}")]
    Timeout(String),
    #[error("unexpected response from the analysis service: {0}")]
    Decode(String),
    #[error("invalid request url: {0}")]
    InvalidUrl(String),
}

impl ApiError {
    /// Network-level failures that are worth one more attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Network(_) | ApiError::Timeout(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("invalid stream url: {0}")]
    InvalidUrl(String),
    #[error("stream connect failed: {0}")]
    Connect(String),
    #[error("stream protocol error: {0}")]
    Protocol(String),
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("could not read settings file {path:?}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("invalid settings: {0}")]
    Parse(#[from] ron::error::SpannedError),
    #[error("invalid url {value:?}: {reason}")]
    InvalidUrl { value: String, reason: String },
    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}
