//! Shared error types for the services crate.

use thiserror::Error;

use quiz_core::model::{SessionStateError, SessionStatus, StoredResult, TestDefinitionError};
use storage::repository::StorageError;

/// Transport-level failures talking to the quiz backend.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ApiError {
    #[error("quiz backend request failed with status {0}")]
    HttpStatus(reqwest::StatusCode),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("quiz backend unavailable: {0}")]
    Unavailable(String),
}

/// Errors emitted by `TestLoader`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LoadError {
    #[error("test not found: {0}")]
    NotFound(String),
    #[error("test time has expired")]
    Expired,
    /// The user already finished this test. Carries the locally stored result
    /// when the short-circuit came from the device marker.
    #[error("test already submitted")]
    AlreadySubmitted(Option<StoredResult>),
    #[error("could not load test: {0}")]
    Network(#[source] ApiError),
    #[error("test definition is malformed: {0}")]
    Malformed(#[from] TestDefinitionError),
    #[error("unexpected backend response: {0}")]
    Protocol(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl LoadError {
    /// Everything except `AlreadySubmitted` terminates the session.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::AlreadySubmitted(_))
    }
}

/// Errors emitted by `SessionClock`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ClockError {
    #[error("persisted deadline under {key} is unreadable: {value:?}")]
    CorruptDeadline { key: String, value: String },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by `ResultReporter`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SubmitError {
    #[error("session is {status}; only finished or expired sessions can be submitted")]
    NotEnded { status: SessionStatus },
    #[error("could not reach the quiz backend: {0}")]
    Network(#[source] ApiError),
    #[error("quiz backend rejected the result: {0}")]
    Rejected(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    State(#[from] SessionStateError),
}

impl SubmitError {
    /// Network failures and server rejections leave the session intact so the
    /// user can retry by hand.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Rejected(_))
    }
}

/// Errors emitted by the session controller and engine.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Clock(#[from] ClockError),
    #[error(transparent)]
    State(#[from] SessionStateError),
    #[error(transparent)]
    Submit(#[from] SubmitError),
    #[error("session {key} was reopened; this attempt no longer accepts changes")]
    Superseded { key: String },
}

/// Errors emitted while reading configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}
