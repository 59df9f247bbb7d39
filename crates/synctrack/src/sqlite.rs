//! Bundled SQLite driver built on sqlx.
//!
//! sqlx is asynchronous; the driver owns a current-thread tokio runtime and
//! blocks on every round trip so the engine stays synchronous.
//!
//! A cursor moves the connection into a task that steps the statement and
//! hands rows over a one-slot channel, so rows are read as the caller asks
//! for them. Any other statement first takes the connection back, keeping
//! the rows the cursor has not read yet.

use std::collections::{HashMap, VecDeque};
use std::str::FromStr;

use futures::TryStreamExt;
use sqlx::sqlite::{SqliteArguments, SqliteColumn, SqliteConnectOptions, SqliteConnection, SqliteRow};
use sqlx::{
    Column as _, ConnectOptions, Connection as _, Executor as _, Row, Sqlite, Statement as _,
    TypeInfo, ValueRef,
};
use synctrack_core::{NativeType, Param, ResultCode, SqlValue};
use tokio::runtime::{Builder, Runtime};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::driver::{ColumnDesc, Cursor, Driver, ExecResult, ResultSet, StorageError};

type RowResult = Result<Vec<SqlValue>, StorageError>;

/// The statement a cursor is stepping; it owns the connection meanwhile.
struct Stepping {
    cursor: u64,
    rows: mpsc::Receiver<RowResult>,
    task: JoinHandle<SqliteConnection>,
}

/// A [`Driver`] over a single sqlx SQLite connection.
pub struct SqliteDriver {
    runtime: Runtime,
    conn: Option<SqliteConnection>,
    stepping: Option<Stepping>,
    // rows left behind by cursors interrupted by another statement
    parked: HashMap<u64, VecDeque<RowResult>>,
    next_cursor: u64,
}

impl SqliteDriver {
    /// Opens `url` (`sqlite:path` or `sqlite::memory:`), creating the file
    /// when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`ResultCode::CannotOpen`] when the runtime cannot start, or
    /// the engine's error for an invalid URL or unreachable file.
    pub fn connect(url: &str) -> Result<Self, StorageError> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| StorageError::new(ResultCode::CannotOpen, e.to_string()))?;
        let options = SqliteConnectOptions::from_str(url)
            .map_err(storage_error)?
            .create_if_missing(true);
        let conn = runtime.block_on(options.connect()).map_err(storage_error)?;
        debug!(url, "Opened SQLite connection");
        Ok(Self {
            runtime,
            conn: Some(conn),
            stepping: None,
            parked: HashMap::new(),
            next_cursor: 1,
        })
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// See [`SqliteDriver::connect`].
    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::connect("sqlite::memory:")
    }

    /// Takes the connection back from a cursor in progress, parking the
    /// rows it has not read yet.
    fn park_cursor(&mut self) -> Result<(), StorageError> {
        if let Some(mut stepping) = self.stepping.take() {
            let mut rest = VecDeque::new();
            while let Some(row) = self.runtime.block_on(stepping.rows.recv()) {
                rest.push_back(row);
            }
            debug!(cursor = stepping.cursor, rows = rest.len(), "Parked cursor rows");
            self.parked.insert(stepping.cursor, rest);
            self.reclaim(stepping)?;
        }
        Ok(())
    }

    /// Stops a stepping task and takes its connection back.
    fn reclaim(&mut self, stepping: Stepping) -> Result<(), StorageError> {
        let Stepping { rows, task, .. } = stepping;
        drop(rows);
        let conn = self
            .runtime
            .block_on(task)
            .map_err(|e| StorageError::new(ResultCode::Error, e.to_string()))?;
        self.conn = Some(conn);
        Ok(())
    }
}

impl std::fmt::Debug for SqliteDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteDriver")
            .field("open", &self.is_open())
            .field("stepping", &self.stepping.as_ref().map(|s| s.cursor))
            .finish_non_exhaustive()
    }
}

impl Driver for SqliteDriver {
    fn execute(&mut self, sql: &str, params: &[Param]) -> Result<ExecResult, StorageError> {
        self.park_cursor()?;
        let conn = self.conn.as_mut().ok_or_else(StorageError::closed)?;
        let result = self
            .runtime
            .block_on(bind_all(sql, params).execute(&mut *conn))
            .map_err(storage_error)?;
        Ok(ExecResult {
            rows_affected: result.rows_affected(),
            last_insert_id: Some(result.last_insert_rowid()),
        })
    }

    fn query(&mut self, sql: &str, params: &[Param]) -> Result<ResultSet, StorageError> {
        self.park_cursor()?;
        let conn = self.conn.as_mut().ok_or_else(StorageError::closed)?;
        let (columns, rows) = self
            .runtime
            .block_on(async {
                let columns = statement_columns(&mut *conn, sql).await?;
                let rows: Vec<SqliteRow> = bind_all(sql, params).fetch_all(&mut *conn).await?;
                Ok::<_, sqlx::Error>((columns, rows))
            })
            .map_err(storage_error)?;
        let rows = rows
            .iter()
            .map(read_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ResultSet { columns, rows })
    }

    fn open_cursor(&mut self, sql: &str, params: &[Param]) -> Result<Cursor, StorageError> {
        self.park_cursor()?;
        let conn = self.conn.as_mut().ok_or_else(StorageError::closed)?;
        let columns = self
            .runtime
            .block_on(statement_columns(&mut *conn, sql))
            .map_err(storage_error)?;
        let mut conn = self.conn.take().ok_or_else(StorageError::closed)?;

        let cursor = self.next_cursor;
        self.next_cursor += 1;
        let (tx, rows) = mpsc::channel(1);
        let sql = sql.to_string();
        let params = params.to_vec();
        let task = self.runtime.spawn(async move {
            {
                let mut stream = bind_all(&sql, &params).fetch(&mut conn);
                loop {
                    let row = match stream.try_next().await {
                        Ok(Some(row)) => read_row(&row),
                        Ok(None) => break,
                        Err(err) => Err(storage_error(err)),
                    };
                    let failed = row.is_err();
                    if tx.send(row).await.is_err() || failed {
                        break;
                    }
                }
            }
            conn
        });
        self.stepping = Some(Stepping { cursor, rows, task });
        Ok(Cursor::streaming(cursor, columns))
    }

    fn next_row(&mut self, cursor: &mut Cursor) -> Result<Option<Vec<SqlValue>>, StorageError> {
        if let Some(row) = cursor.pop_buffered() {
            return Ok(Some(row));
        }
        if let Some(rest) = self.parked.get_mut(&cursor.id()) {
            let row = rest.pop_front();
            if rest.is_empty() {
                self.parked.remove(&cursor.id());
            }
            return row.transpose();
        }
        let row = match &mut self.stepping {
            Some(stepping) if stepping.cursor == cursor.id() => {
                self.runtime.block_on(stepping.rows.recv())
            }
            _ => return Ok(None),
        };
        match row {
            Some(row) => row.map(Some),
            None => {
                if let Some(stepping) = self.stepping.take() {
                    self.reclaim(stepping)?;
                }
                Ok(None)
            }
        }
    }

    fn close_cursor(&mut self, cursor: &mut Cursor) {
        while cursor.pop_buffered().is_some() {}
        self.parked.remove(&cursor.id());
        if self
            .stepping
            .as_ref()
            .is_some_and(|stepping| stepping.cursor == cursor.id())
        {
            if let Some(stepping) = self.stepping.take() {
                if let Err(err) = self.reclaim(stepping) {
                    debug!(error = %err, "Lost connection while closing cursor");
                }
            }
        }
    }

    fn is_open(&self) -> bool {
        self.conn.is_some() || self.stepping.is_some()
    }

    fn close(&mut self) -> Result<(), StorageError> {
        if let Some(stepping) = self.stepping.take() {
            self.reclaim(stepping)?;
        }
        self.parked.clear();
        if let Some(conn) = self.conn.take() {
            self.runtime.block_on(conn.close()).map_err(storage_error)?;
            debug!("Closed SQLite connection");
        }
        Ok(())
    }
}

impl Drop for SqliteDriver {
    fn drop(&mut self) {
        // nothing to report to at this point
        let _ = self.close();
    }
}

/// Columns of a statement, known even when it yields no rows.
async fn statement_columns(
    conn: &mut SqliteConnection,
    sql: &str,
) -> Result<Vec<ColumnDesc>, sqlx::Error> {
    let statement = conn.prepare(sql).await?;
    Ok(statement.columns().iter().map(column_desc).collect())
}

fn column_desc(column: &SqliteColumn) -> ColumnDesc {
    ColumnDesc {
        name: column.name().to_string(),
        native: native_type(column.type_info().name()),
    }
}

fn bind_all<'q>(
    sql: &'q str,
    params: &'q [Param],
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    let mut query = sqlx::query(sql);
    for param in params {
        query = match &param.value {
            SqlValue::Null => query.bind(Option::<i64>::None),
            SqlValue::Int(i) => query.bind(*i),
            SqlValue::BigInt(i) => query.bind(*i),
            SqlValue::Float(f) => query.bind(*f),
            SqlValue::Text(s) => query.bind(s.as_str()),
            SqlValue::Blob(b) => query.bind(b.as_slice()),
        };
    }
    query
}

fn read_row(row: &SqliteRow) -> Result<Vec<SqlValue>, StorageError> {
    (0..row.len()).map(|i| read_value(row, i)).collect()
}

fn read_value(row: &SqliteRow, index: usize) -> Result<SqlValue, StorageError> {
    let raw = row.try_get_raw(index).map_err(storage_error)?;
    if raw.is_null() {
        return Ok(SqlValue::Null);
    }
    let native = native_type(raw.type_info().name());
    let value = match native {
        NativeType::Integer => SqlValue::BigInt(
            row.try_get_unchecked::<i64, _>(index)
                .map_err(storage_error)?,
        ),
        NativeType::Real => SqlValue::Float(
            row.try_get_unchecked::<f64, _>(index)
                .map_err(storage_error)?,
        ),
        NativeType::Blob => SqlValue::Blob(
            row.try_get_unchecked::<Vec<u8>, _>(index)
                .map_err(storage_error)?,
        ),
        NativeType::Text | NativeType::Null => SqlValue::Text(
            row.try_get_unchecked::<String, _>(index)
                .map_err(storage_error)?,
        ),
    };
    Ok(value)
}

/// Classifies a SQLite type name by its affinity.
fn native_type(type_name: &str) -> NativeType {
    let name = type_name.to_ascii_uppercase();
    if name == "NULL" {
        NativeType::Null
    } else if name.contains("INT") || name == "BOOLEAN" {
        NativeType::Integer
    } else if name.contains("REAL") || name.contains("FLOA") || name.contains("DOUB") {
        NativeType::Real
    } else if name.contains("BLOB") {
        NativeType::Blob
    } else {
        NativeType::Text
    }
}

fn storage_error(err: sqlx::Error) -> StorageError {
    match &err {
        sqlx::Error::Database(db) => {
            let code = db
                .code()
                .and_then(|c| c.parse::<i32>().ok())
                .map_or(ResultCode::Error, result_code);
            StorageError::new(code, db.message())
        }
        sqlx::Error::Io(e) => StorageError::new(ResultCode::IoError, e.to_string()),
        sqlx::Error::RowNotFound => StorageError::new(ResultCode::NotFound, err.to_string()),
        _ => StorageError::new(ResultCode::Error, err.to_string()),
    }
}

/// Maps an SQLite (extended) result code to its primary [`ResultCode`].
const fn result_code(code: i32) -> ResultCode {
    match code & 0xff {
        5 => ResultCode::Busy,
        6 => ResultCode::Locked,
        7 => ResultCode::NoMem,
        9 => ResultCode::Interrupt,
        10 => ResultCode::IoError,
        12 => ResultCode::NotFound,
        13 => ResultCode::Full,
        14 => ResultCode::CannotOpen,
        19 => ResultCode::Constraint,
        20 => ResultCode::Mismatch,
        21 => ResultCode::Misuse,
        _ => ResultCode::Error,
    }
}
