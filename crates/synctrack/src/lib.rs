//! # synctrack
//!
//! A change-tracked CRUD engine. Entities described by
//! [`synctrack_core`] mappings are stored through a [`Driver`]; every
//! table carries a hidden `SyncGuid` column, and every effective insert,
//! update or delete is recorded in the `ChangesHistory` ledger so another
//! replica can tell which rows changed and how.
//!
//! This crate provides:
//! - [`Connection`]: raw statements, schema creation and migration, CRUD,
//!   nested transactions and change notification
//! - [`TableQuery`]: lazy, chainable typed queries
//! - [`ChangesHistory`]: the ledger entity
//! - [`SqliteDriver`]: a bundled SQLite driver built on sqlx
//!
//! ## Quick Start
//!
//! ```ignore
//! use synctrack::{col, Connection, Entity};
//!
//! #[derive(Debug, Default, Entity)]
//! struct Product {
//!     #[column(primary_key, autoincrement)]
//!     id: i64,
//!     name: String,
//! }
//!
//! fn example() -> synctrack::Result<()> {
//!     let conn = Connection::open_in_memory()?;
//!     conn.create_table::<Product>()?;
//!
//!     let mut juice = Product { id: 0, name: "Orange Juice".into() };
//!     conn.insert(&mut juice)?;
//!
//!     juice.name.push_str(" Updated");
//!     conn.update(&mut juice)?;
//!
//!     let found = conn
//!         .table::<Product>()?
//!         .where_(col("name").starts_with("Orange"))
//!         .first()?;
//!     conn.delete(&found)?;
//!
//!     for entry in conn.history_for("Product")? {
//!         println!("{} {}", entry.sync_guid, entry.action);
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod driver;
pub mod error;
pub mod events;
mod insert_cache;
pub mod ledger;
mod materialize;
pub mod sqlite;
pub mod table_query;
mod transaction;

pub use config::{ConnectionConfig, DialectKind};
pub use connection::{ColumnInfo, Connection, CreateTableResult};
pub use driver::{ColumnDesc, Cursor, Driver, ExecResult, ResultSet, StorageError};
pub use error::{OrmError, Result};
pub use events::{SubscriptionId, TableChanged};
pub use insert_cache::reset_insert_commands;
pub use ledger::{ChangeAction, ChangesHistory, LEDGER_TABLE};
pub use materialize::DeferredRows;
pub use sqlite::SqliteDriver;
pub use table_query::{Rows, TableQuery};

pub use synctrack_core::{col, lit, CreateFlags, Expr, InsertMode, Param, ResultCode, Value};
pub use synctrack_derive::{Entity, SqlEnum};
