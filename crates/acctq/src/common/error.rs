use thiserror::Error;

use crate::common::error::AcctqError::GenericError;

#[derive(Debug, Error)]
pub enum AcctqError {
    /// A lookup produced no match. Benign, returned to the caller.
    #[error("Not found: {0}")]
    NotFound(String),
    /// An add collided with an existing record.
    #[error("Already exists: {0}")]
    AlreadyExists(String),
    /// A user-visible argument problem (empty Set, empty Where on delete,
    /// unknown field, ...).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// The store façade hit a transport fault.
    #[error("Accounting store unavailable: {0}")]
    StoreUnavailable(String),
    /// A commit drain stopped mid-queue. The failing action and everything
    /// behind it stay queued.
    #[error(
        "Commit stopped at action #{index}: {reason} ({applied} action(s) applied, {remaining} still queued)"
    )]
    PartialCommit {
        index: usize,
        applied: usize,
        remaining: usize,
        reason: String,
    },
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Error: {0}")]
    GenericError(String),
}

impl From<serde_json::error::Error> for AcctqError {
    fn from(e: serde_json::error::Error) -> Self {
        Self::SerializationError(e.to_string())
    }
}

impl From<anyhow::Error> for AcctqError {
    fn from(error: anyhow::Error) -> Self {
        Self::GenericError(error.to_string())
    }
}

impl From<String> for AcctqError {
    fn from(e: String) -> Self {
        GenericError(e)
    }
}

pub fn not_found<T>(message: String) -> crate::Result<T> {
    Err(AcctqError::NotFound(message))
}

pub fn invalid_argument<T>(message: String) -> crate::Result<T> {
    Err(AcctqError::InvalidArgument(message))
}
