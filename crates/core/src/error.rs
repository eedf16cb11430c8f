//! Unified error types for appscout.
//!
//! Every variant renders with a stable uppercase code so log lines and the
//! persisted error ledger can be grepped by failure class.

use tokio_rusqlite::rusqlite;

/// Unified error type shared by the store, the cursor and the crawler.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid input parameters (e.g., blank keyword).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// A stored value does not have the shape the caller asked for.
    #[error("WRONG_SHAPE: key {key}: {reason}")]
    WrongShape { key: String, reason: String },

    /// Snapshot file exists but cannot be decoded.
    #[error("SNAPSHOT_CORRUPT: {0}")]
    SnapshotCorrupt(String),

    /// Snapshot file was required but not found.
    #[error("SNAPSHOT_MISSING: {0}")]
    SnapshotMissing(String),

    /// Nothing has ever been queued in the keyword cursor.
    #[error("CURSOR_EMPTY: keywords cache is empty")]
    CursorEmpty,

    /// Every queued keyword has been consumed.
    #[error("CURSOR_EXHAUSTED: keywords are out of range")]
    CursorExhausted,

    /// Fetching a single record failed.
    #[error("FETCH_FAILED: {0}")]
    Fetch(String),

    /// Keyword extraction failed.
    #[error("EXTRACT_FAILED: {0}")]
    Extraction(String),

    /// Keyword search failed.
    #[error("SEARCH_FAILED: {0}")]
    Search(String),

    /// Writing records to the repository failed.
    #[error("STORAGE_FAILED: {0}")]
    Storage(String),

    /// Database operation failed.
    #[error("DB_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("DB_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// The crawler was asked to do something its lifecycle state forbids.
    #[error("INVALID_STATE: {0}")]
    InvalidState(String),

    /// Filesystem access failed.
    #[error("IO_ERROR: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for a wrong-shape error on `key`.
    pub fn wrong_shape(key: &str, reason: impl ToString) -> Self {
        Error::WrongShape { key: key.to_string(), reason: reason.to_string() }
    }

    /// Whether the error is one of the two expected cursor conditions.
    pub fn is_cursor_condition(&self) -> bool {
        matches!(self, Error::CursorEmpty | Error::CursorExhausted)
    }
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}
