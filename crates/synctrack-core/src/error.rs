//! Error types for schema reflection, value coercion and query compilation.

use std::fmt;

use thiserror::Error;

/// Machine-checkable result code carried by every error.
///
/// The codes follow the SQLite primary result codes so that storage errors
/// reported by a driver and errors raised by this crate share one space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultCode {
    /// Generic error.
    Error,
    /// The database file is locked by another connection.
    Busy,
    /// A table in the database is locked.
    Locked,
    /// Out of memory.
    NoMem,
    /// The operation was interrupted.
    Interrupt,
    /// Disk I/O error.
    IoError,
    /// Requested row or object not found.
    NotFound,
    /// The database is full.
    Full,
    /// Unable to open the database.
    CannotOpen,
    /// A constraint was violated.
    Constraint,
    /// A value could not be converted to or from its storage type.
    Mismatch,
    /// The API was used incorrectly.
    Misuse,
}

impl ResultCode {
    /// Returns whether a failure with this code leaves the connection in a
    /// state where the current transaction must be rolled back.
    #[must_use]
    pub const fn forces_rollback(self) -> bool {
        matches!(
            self,
            Self::IoError | Self::Full | Self::Busy | Self::Locked | Self::NoMem | Self::Interrupt
        )
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Error => "Error",
            Self::Busy => "Busy",
            Self::Locked => "Locked",
            Self::NoMem => "NoMem",
            Self::Interrupt => "Interrupt",
            Self::IoError => "IOError",
            Self::NotFound => "NotFound",
            Self::Full => "Full",
            Self::CannotOpen => "CannotOpen",
            Self::Constraint => "Constraint",
            Self::Mismatch => "Mismatch",
            Self::Misuse => "Misuse",
        };
        f.write_str(name)
    }
}

/// Errors raised while building mappings, coercing values or compiling
/// predicates.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The entity exposes no mappable fields.
    #[error("Cannot create a table without columns (does '{type_name}' have public fields?)")]
    NoColumns {
        /// Rust type name of the entity.
        type_name: String,
    },

    /// More than one column is marked auto-increment.
    #[error("{table} declares more than one auto-increment column")]
    MultipleAutoIncrement {
        /// Table name.
        table: String,
    },

    /// The entity defines a `SyncGuid` field that is not a GUID.
    #[error("SyncGuid column of {table} must be a GUID, found {found}")]
    InvalidSyncColumn {
        /// Table name.
        table: String,
        /// Storage kind of the offending field.
        found: String,
    },

    /// Columns sharing an index name disagree on uniqueness.
    #[error("All the columns in index {index} must have the same value for their unique property")]
    InconsistentIndex {
        /// Index name.
        index: String,
    },

    /// An operation needs a primary key the mapping does not have.
    #[error("Cannot {operation} {table}: it has no PK")]
    NoPrimaryKey {
        /// Table name.
        table: String,
        /// The operation that was attempted.
        operation: &'static str,
    },

    /// A predicate or ordering referenced a column the table does not have.
    #[error("{table} has no column named {column}")]
    UnknownColumn {
        /// Table name.
        table: String,
        /// Requested column or field name.
        column: String,
    },

    /// The predicate contains a node kind the compiler cannot translate.
    #[error("Cannot compile: {0}")]
    UnsupportedExpression(String),

    /// A binary node uses an operator without SQL equivalent.
    #[error("Cannot get SQL for: {0}")]
    UnsupportedOperator(String),

    /// A null operand was compared with an operator other than a comparison.
    #[error("Cannot compile Null-BinaryExpression with type {0}")]
    UnsupportedNullComparison(String),

    /// A method call is malformed for its translation rule.
    #[error("Cannot compile call to {method}: {reason}")]
    UnsupportedCall {
        /// Method name.
        method: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A value cannot be bound as a parameter.
    #[error("Cannot store type: {type_name}")]
    UnsupportedType {
        /// Type name of the value.
        type_name: String,
    },

    /// A database value cannot be read into the declared field type.
    #[error("Don't know how to read {type_name}: {reason}")]
    Unreadable {
        /// Declared type name.
        type_name: String,
        /// Why the conversion failed.
        reason: String,
    },
}

impl Error {
    /// Returns the result code for this error.
    #[must_use]
    pub const fn code(&self) -> ResultCode {
        match self {
            Self::NoColumns { .. }
            | Self::MultipleAutoIncrement { .. }
            | Self::InvalidSyncColumn { .. }
            | Self::InconsistentIndex { .. }
            | Self::NoPrimaryKey { .. } => ResultCode::Error,
            Self::UnknownColumn { .. }
            | Self::UnsupportedExpression(_)
            | Self::UnsupportedOperator(_)
            | Self::UnsupportedNullComparison(_)
            | Self::UnsupportedCall { .. } => ResultCode::Misuse,
            Self::UnsupportedType { .. } | Self::Unreadable { .. } => ResultCode::Mismatch,
        }
    }

    pub(crate) fn unreadable(type_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unreadable {
            type_name: type_name.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, Error>;
