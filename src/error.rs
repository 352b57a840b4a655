//! Error types for delayjob.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A builder setter was given a value outside its allowed range.
    #[error("invalid argument `{field}`: {reason}")]
    InvalidArgument { field: &'static str, reason: String },

    #[error("scheduler is not initialized; call Scheduler::initialize() at process start")]
    NotInitialized,

    #[error("scheduler cannot be initialized twice")]
    AlreadyInitialized,

    #[error("no handler registered for `{0}`")]
    UnknownHandler(String),

    #[error("failed to construct handler `{handler}`: {reason}")]
    HandlerConstruction { handler: String, reason: String },

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
