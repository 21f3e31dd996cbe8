//! Unified error types for crumb.
//!
//! Every variant carries owned strings so a single outcome can be cloned
//! out to all callers waiting on the same in-flight computation.

use tokio_rusqlite::rusqlite;

/// Unified error types for the page and derivative caches.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// No published page at this path, or no viable image source.
    #[error("NOT_FOUND: {0}")]
    NotFound(String),

    /// The content store query or image host request failed.
    #[error("UPSTREAM_FAILURE: {0}")]
    Upstream(String),

    /// Source bytes could not be decoded, resized or encoded.
    #[error("DECODE_FAILURE: {0}")]
    Decode(String),

    /// Writing a derivative to disk failed.
    #[error("PERSISTENCE_FAILURE: {0}")]
    Persistence(String),

    /// Invalid input parameters (e.g., zero width).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// Content database operation failed.
    #[error("DATABASE_ERROR: {0}")]
    Database(String),

    /// Migration failed to apply.
    #[error("DATABASE_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// A detached cache task panicked or was cancelled.
    #[error("TASK_FAILED: {0}")]
    TaskFailed(String),
}

impl Error {
    /// HTTP status a request handler should answer with for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::NotFound(_) => 404,
            Error::InvalidInput(_) => 400,
            Error::Decode(_) => 422,
            Error::Upstream(_) => 502,
            Error::Persistence(_) | Error::Database(_) | Error::MigrationFailed(_) | Error::TaskFailed(_) => 500,
        }
    }

    /// Whether this is a `NotFound` outcome.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database("connection closed".into()),
            tokio_rusqlite::Error::Close(_) => Error::Database("failed to close connection".into()),
            _ => Error::Database("connection closed".into()),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err.to_string())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Persistence(err.to_string())
    }
}
