//! Error types for result persistence.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while storing or reading test results.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The database could not be opened or its schema created.
    #[error("cannot open result database at {path}: {reason}")]
    Open {
        /// Database location.
        path: PathBuf,
        /// Underlying reason.
        reason: String,
    },

    /// A test result or heartbeat could not be written.
    #[error("failed to write test result: {reason}")]
    DatabaseWrite {
        /// Underlying reason.
        reason: String,
    },

    /// Stored rows could not be read back.
    #[error("failed to query results: {reason}")]
    Query {
        /// Underlying reason.
        reason: String,
    },

    /// The database did not answer a liveness query.
    #[error("result database unreachable: {0}")]
    Unreachable(String),
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

impl StoreError {
    /// Creates an `Open` error.
    #[must_use]
    pub fn open(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Open {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates a `DatabaseWrite` error.
    #[must_use]
    pub fn write(reason: impl ToString) -> Self {
        Self::DatabaseWrite {
            reason: reason.to_string(),
        }
    }

    /// Creates a `Query` error.
    #[must_use]
    pub fn query(reason: impl ToString) -> Self {
        Self::Query {
            reason: reason.to_string(),
        }
    }

    /// Returns `true` if the store could not be reached at all.
    ///
    /// At startup these are fatal; everything else is reported per cycle.
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Open { .. } | Self::Unreachable(_))
    }
}
