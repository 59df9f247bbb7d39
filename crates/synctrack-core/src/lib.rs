//! # synctrack-core
//!
//! The storage-independent half of synctrack:
//!
//! - [`schema`]: entity descriptions and the table mappings reflected from
//!   them, cached once per type.
//! - [`types`] and [`coerce`]: the storage kinds of mapped fields and the
//!   conversions between field values and driver values.
//! - [`query`]: a predicate builder and its compiler to parameterized SQL.
//! - [`dialect`]: SQL text for SQLite and SQL Server.
//!
//! ```rust
//! use synctrack_core::dialect::SqliteDialect;
//! use synctrack_core::query::{col, compile};
//! use synctrack_core::schema::{CreateFlags, FieldMeta, TableMapping};
//! use synctrack_core::types::StorageKind;
//!
//! let name = FieldMeta {
//!     name: "Name".into(),
//!     property: "name",
//!     kind: StorageKind::String,
//!     optional: false,
//!     primary_key: false,
//!     autoincrement: false,
//!     ignore: false,
//!     not_null: false,
//!     indices: Vec::new(),
//!     max_length: None,
//!     collation: None,
//! };
//! let table = TableMapping::from_fields("Product", "Product", [&name], CreateFlags::NONE)?;
//! let compiled = compile(&col("Name").starts_with("Jo"), &table, &SqliteDialect)?;
//! assert_eq!(compiled.sql, "( substr(\"Name\", 1, 2) =  ?)");
//! # Ok::<(), synctrack_core::Error>(())
//! ```

pub mod coerce;
pub mod dialect;
pub mod error;
pub mod query;
pub mod schema;
pub mod types;
pub mod value;

pub use dialect::{Dialect, InsertMode, SqlServerDialect, SqliteDialect};
pub use error::{Error, Result, ResultCode};
pub use query::{col, lit, CompiledSql, Expr, IntoExpr};
pub use schema::registry::{mapping, mapping_with_flags, reset_mappings};
pub use schema::{
    Column, CreateFlags, Entity, FieldAccess, FieldDef, Mapping, TableMapping, SYNC_GUID_COLUMN,
};
pub use types::{
    enum_from_value, enum_to_value, EnumInfo, FieldType, SqlEnum, StorageKind, StringComparison,
    Value,
};
pub use value::{NativeType, Param, SqlValue, ToSqlValue};
