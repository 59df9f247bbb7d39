//! Error types for the connection layer.

use synctrack_core::ResultCode;
use thiserror::Error;

use crate::driver::StorageError;

/// Errors surfaced by [`Connection`](crate::Connection) operations.
#[derive(Debug, Error)]
pub enum OrmError {
    /// Schema, coercion or compilation error.
    #[error(transparent)]
    Core(#[from] synctrack_core::Error),

    /// Failure reported by the driver.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// No row matched a query that requires one.
    #[error("no row of {table} matches the query")]
    NotFound { table: String },

    /// The call is not valid in the connection's current state.
    #[error("{0}")]
    InvalidOperation(String),

    /// A savepoint name that was not produced by this connection.
    #[error("Savepoint {0} is not valid, and should be the result of a call to save_transaction_point")]
    InvalidSavepoint(String),

    /// Invalid connection configuration.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl OrmError {
    /// Returns the result code of this error.
    #[must_use]
    pub fn code(&self) -> ResultCode {
        match self {
            Self::Core(e) => e.code(),
            Self::Storage(e) => e.code,
            Self::NotFound { .. } => ResultCode::NotFound,
            Self::InvalidOperation(_) | Self::InvalidSavepoint(_) | Self::Config(_) => {
                ResultCode::Misuse
            }
            Self::Io(_) => ResultCode::IoError,
            Self::Json(_) => ResultCode::Error,
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidOperation(message.into())
    }
}

/// Result type alias for connection operations.
pub type Result<T> = std::result::Result<T, OrmError>;
