//! Shared error types for the services crate.

use thiserror::Error;

use assess_core::model::QuestionError;
use storage::repository::StorageError;

/// Errors emitted by assessment provider adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProviderError {
    #[error("assessment provider is not configured")]
    NotConfigured,
    #[error("assessment provider unreachable: {0}")]
    Unavailable(String),
    #[error("provider request failed with status {0}")]
    HttpStatus(reqwest::StatusCode),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("provider rejected the request: {0}")]
    Rejected(String),
    #[error("unexpected provider payload: {0}")]
    Protocol(String),
}

impl From<QuestionError> for ProviderError {
    fn from(err: QuestionError) -> Self {
        ProviderError::Protocol(err.to_string())
    }
}

/// Errors emitted while reading provider configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("invalid provider base URL: {0}")]
    InvalidBaseUrl(String),
    #[error("provider base URL must use http or https: {0}")]
    UnsupportedScheme(String),
    #[error("invalid provider timeout: {0}")]
    InvalidTimeout(String),
}

/// Errors emitted by the attempt services.
///
/// Only `NoProvider`, `ProviderUnavailable` and `CorruptSession` are meant for
/// the learner; stale snapshots and ignored responses never surface here.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    #[error("no assessment provider or question bank is available")]
    NoProvider,
    #[error("assessment provider unavailable: {0}")]
    ProviderUnavailable(#[from] ProviderError),
    #[error("assessment has no questions available")]
    CorruptSession,
    #[error("attempt has not been started")]
    NotStarted,
    #[error("attempt is still in progress")]
    InProgress,
    #[error("a request for this attempt is already in flight")]
    RequestInFlight,
    #[error("request was cancelled")]
    Cancelled,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by exam review-screen operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ExamError {
    #[error("question index {index} is out of range (exam has {len} questions)")]
    OutOfRange { index: usize, len: usize },
    #[error("exam has already been submitted")]
    Submitted,
    #[error("exam time limit has passed")]
    Expired,
    #[error("response does not match any choice of the question")]
    UnknownChoice,
}

/// Errors emitted by superseding lookups.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LookupError {
    #[error("lookup was superseded by a newer request")]
    Superseded,
    #[error(transparent)]
    Provider(#[from] ProviderError),
}
