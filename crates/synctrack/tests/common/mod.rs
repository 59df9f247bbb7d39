#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeDelta};
use rust_decimal::Decimal;
use synctrack::driver::{Cursor, Driver, ExecResult, ResultSet, StorageError};
use synctrack::{Connection, ConnectionConfig, SqliteDriver};
use synctrack_core::{Param, SqlValue};
use synctrack_derive::{Entity, SqlEnum};
use uuid::Uuid;

// =============================================================================
// Entities
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Entity)]
pub struct Product {
    #[column(primary_key, autoincrement)]
    pub id: i64,
    pub name: String,
}

/// Exposes its sync identifier as a field.
#[derive(Debug, Clone, Default, PartialEq, Entity)]
pub struct Customer {
    #[column(primary_key, autoincrement)]
    pub id: i64,
    pub name: String,
    pub city: Option<String>,
    pub sync_guid: Uuid,
}

#[derive(Debug, Clone, Default, PartialEq, Entity)]
pub struct Device {
    #[column(primary_key, autoincrement)]
    pub key: Uuid,
    pub label: String,
}

#[derive(Debug, Clone, Default, PartialEq, Entity)]
pub struct Setting {
    #[column(primary_key)]
    pub name: String,
    pub value: String,
}

/// No primary key.
#[derive(Debug, Clone, Default, PartialEq, Entity)]
pub struct Note {
    pub text: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, SqlEnum)]
#[sql_enum(store_as_text)]
pub enum Color {
    #[default]
    Red,
    Green,
    Blue,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, SqlEnum)]
pub enum Level {
    #[default]
    Low = 1,
    Mid,
    High = 10,
}

#[derive(Debug, Clone, Default, PartialEq, Entity)]
pub struct Everything {
    #[column(primary_key, autoincrement)]
    pub id: i64,
    pub flag: bool,
    pub tiny: i8,
    pub small: i16,
    pub int: i32,
    pub byte: u8,
    pub word: u16,
    pub dword: u32,
    pub single: f32,
    pub double: f64,
    pub money: Decimal,
    pub text: String,
    pub span: TimeDelta,
    pub stamp: NaiveDateTime,
    pub moment: DateTime<FixedOffset>,
    pub blob: Vec<u8>,
    pub token: Uuid,
    pub color: Color,
    pub level: Level,
    pub maybe: Option<i32>,
    pub maybe_text: Option<String>,
}

// =============================================================================
// Connections
// =============================================================================

pub fn open() -> Connection {
    Connection::open_in_memory().unwrap()
}

/// Opens an in-memory database whose statements are recorded.
pub fn open_recording() -> (Connection, Statements) {
    let driver = RecordingDriver::new();
    let statements = driver.statements();
    let conn = Connection::with_driver(driver, ConnectionConfig::default());
    (conn, statements)
}

#[derive(Debug, Clone, Default)]
pub struct Statements(Arc<Mutex<Vec<String>>>);

impl Statements {
    pub fn all(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    /// Transaction-control statements only.
    pub fn transaction_control(&self) -> Vec<String> {
        self.all()
            .into_iter()
            .filter(|sql| {
                let verb = sql.split_whitespace().next().unwrap_or_default();
                matches!(verb, "begin" | "commit" | "rollback" | "savepoint" | "release")
            })
            .collect()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }
}

/// Wraps the SQLite driver and records every statement it runs.
#[derive(Debug)]
pub struct RecordingDriver {
    inner: SqliteDriver,
    log: Statements,
}

impl RecordingDriver {
    pub fn new() -> Self {
        Self {
            inner: SqliteDriver::open_in_memory().unwrap(),
            log: Statements::default(),
        }
    }

    pub fn statements(&self) -> Statements {
        self.log.clone()
    }

    fn record(&self, sql: &str) {
        self.log.0.lock().unwrap().push(sql.to_string());
    }
}

impl Driver for RecordingDriver {
    fn execute(&mut self, sql: &str, params: &[Param]) -> Result<ExecResult, StorageError> {
        self.record(sql);
        self.inner.execute(sql, params)
    }

    fn query(&mut self, sql: &str, params: &[Param]) -> Result<ResultSet, StorageError> {
        self.record(sql);
        self.inner.query(sql, params)
    }

    fn open_cursor(&mut self, sql: &str, params: &[Param]) -> Result<Cursor, StorageError> {
        self.record(sql);
        self.inner.open_cursor(sql, params)
    }

    fn next_row(&mut self, cursor: &mut Cursor) -> Result<Option<Vec<SqlValue>>, StorageError> {
        self.inner.next_row(cursor)
    }

    fn close_cursor(&mut self, cursor: &mut Cursor) {
        self.inner.close_cursor(cursor);
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    fn close(&mut self) -> Result<(), StorageError> {
        self.inner.close()
    }
}

pub fn product(name: &str) -> Product {
    Product {
        id: 0,
        name: name.to_string(),
    }
}
