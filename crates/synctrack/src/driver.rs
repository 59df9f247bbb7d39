//! The storage driver collaborator.
//!
//! A [`Driver`] executes SQL text with bound parameters against one
//! physical connection. The engine only ever issues one statement at a
//! time per driver, except that a [`Cursor`] may stay open while other
//! statements run.

use std::collections::VecDeque;

use synctrack_core::{NativeType, Param, ResultCode, SqlValue};
use thiserror::Error;

/// A failure reported by the storage engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct StorageError {
    pub code: ResultCode,
    pub message: String,
}

impl StorageError {
    pub fn new(code: ResultCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub(crate) fn closed() -> Self {
        Self::new(ResultCode::Misuse, "the connection is closed")
    }
}

/// Outcome of a statement that returns no rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecResult {
    pub rows_affected: u64,
    /// Row id generated by the last insert, when the engine reports one.
    pub last_insert_id: Option<i64>,
}

/// A result column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDesc {
    pub name: String,
    pub native: NativeType,
}

/// Rows returned by a query.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultSet {
    pub columns: Vec<ColumnDesc>,
    pub rows: Vec<Vec<SqlValue>>,
}

impl ResultSet {
    #[must_use]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn column_name(&self, index: usize) -> Option<&str> {
        self.columns.get(index).map(|c| c.name.as_str())
    }

    #[must_use]
    pub fn column_type(&self, index: usize) -> Option<NativeType> {
        self.columns.get(index).map(|c| c.native)
    }

    #[must_use]
    pub fn value(&self, row: usize, column: usize) -> Option<&SqlValue> {
        self.rows.get(row).and_then(|r| r.get(column))
    }

    /// Returns the first column of the first row, or NULL.
    #[must_use]
    pub fn into_scalar(self) -> SqlValue {
        self.rows
            .into_iter()
            .next()
            .and_then(|row| row.into_iter().next())
            .unwrap_or(SqlValue::Null)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// An open query whose rows are read on demand through
/// [`Driver::next_row`].
///
/// A cursor opened by the default [`Driver::open_cursor`] holds every
/// row up front; a streaming driver hands out an empty cursor and keeps
/// the pending rows itself, keyed by [`Cursor::id`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Cursor {
    id: u64,
    columns: Vec<ColumnDesc>,
    buffered: VecDeque<Vec<SqlValue>>,
}

impl Cursor {
    /// A cursor over rows that are already loaded.
    #[must_use]
    pub fn buffered(set: ResultSet) -> Self {
        Self {
            id: 0,
            columns: set.columns,
            buffered: set.rows.into(),
        }
    }

    /// A cursor whose rows the driver produces under `id`.
    #[must_use]
    pub const fn streaming(id: u64, columns: Vec<ColumnDesc>) -> Self {
        Self {
            id,
            columns,
            buffered: VecDeque::new(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn columns(&self) -> &[ColumnDesc] {
        &self.columns
    }

    /// Takes the next loaded row, if any.
    pub fn pop_buffered(&mut self) -> Option<Vec<SqlValue>> {
        self.buffered.pop_front()
    }
}

/// A synchronous database driver.
pub trait Driver: Send {
    /// Executes a statement and reports the affected row count.
    ///
    /// # Errors
    ///
    /// Returns the engine's failure with its result code.
    fn execute(&mut self, sql: &str, params: &[Param]) -> Result<ExecResult, StorageError>;

    /// Runs a query and collects its rows.
    ///
    /// # Errors
    ///
    /// Returns the engine's failure with its result code.
    fn query(&mut self, sql: &str, params: &[Param]) -> Result<ResultSet, StorageError>;

    /// Runs a query and returns the first column of the first row.
    ///
    /// # Errors
    ///
    /// Returns the engine's failure with its result code.
    fn scalar(&mut self, sql: &str, params: &[Param]) -> Result<SqlValue, StorageError> {
        self.query(sql, params).map(ResultSet::into_scalar)
    }

    /// Starts a query whose rows are read one at a time.
    ///
    /// The default runs [`Driver::query`] and buffers the whole result.
    ///
    /// # Errors
    ///
    /// Returns the engine's failure with its result code.
    fn open_cursor(&mut self, sql: &str, params: &[Param]) -> Result<Cursor, StorageError> {
        self.query(sql, params).map(Cursor::buffered)
    }

    /// Returns the next row of `cursor`, or `None` once it is exhausted.
    ///
    /// # Errors
    ///
    /// Returns the engine's failure while stepping the statement.
    fn next_row(&mut self, cursor: &mut Cursor) -> Result<Option<Vec<SqlValue>>, StorageError> {
        Ok(cursor.pop_buffered())
    }

    /// Abandons `cursor` before it is exhausted.
    fn close_cursor(&mut self, cursor: &mut Cursor) {
        cursor.buffered.clear();
    }

    fn is_open(&self) -> bool;

    /// Closes the physical connection. Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the engine's failure with its result code.
    fn close(&mut self) -> Result<(), StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_set_accessors() {
        let set = ResultSet {
            columns: vec![ColumnDesc {
                name: "Id".into(),
                native: NativeType::Integer,
            }],
            rows: vec![vec![SqlValue::BigInt(7)]],
        };
        assert_eq!(set.column_count(), 1);
        assert_eq!(set.column_name(0), Some("Id"));
        assert_eq!(set.column_type(0), Some(NativeType::Integer));
        assert_eq!(set.value(0, 0), Some(&SqlValue::BigInt(7)));
        assert_eq!(set.into_scalar(), SqlValue::BigInt(7));
        assert_eq!(ResultSet::default().into_scalar(), SqlValue::Null);
    }

    #[test]
    fn test_buffered_cursor_yields_rows_in_order() {
        let mut cursor = Cursor::buffered(ResultSet {
            columns: vec![ColumnDesc {
                name: "Id".into(),
                native: NativeType::Integer,
            }],
            rows: vec![vec![SqlValue::BigInt(1)], vec![SqlValue::BigInt(2)]],
        });
        assert_eq!(cursor.columns().len(), 1);
        assert_eq!(cursor.pop_buffered(), Some(vec![SqlValue::BigInt(1)]));
        assert_eq!(cursor.pop_buffered(), Some(vec![SqlValue::BigInt(2)]));
        assert_eq!(cursor.pop_buffered(), None);
    }
}
