//! SQLite dialect.

use crate::schema::{Column, DEFAULT_MAX_STRING_LENGTH};
use crate::types::StorageKind;

use super::Dialect;

/// SQLite dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl SqliteDialect {
    /// Creates a new SQLite dialect.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn placeholder(&self, _name: &str) -> String {
        "?".to_string()
    }

    fn sql_type(&self, column: &Column) -> String {
        match column.kind {
            StorageKind::Bool
            | StorageKind::I8
            | StorageKind::I16
            | StorageKind::I32
            | StorageKind::I64
            | StorageKind::U8
            | StorageKind::U16
            | StorageKind::U32 => "integer".to_string(),
            StorageKind::F32 | StorageKind::F64 | StorageKind::Decimal => "float".to_string(),
            StorageKind::String => format!(
                "varchar({})",
                column.max_string_length.unwrap_or(DEFAULT_MAX_STRING_LENGTH)
            ),
            StorageKind::TimeSpan => "time".to_string(),
            StorageKind::DateTime => "datetime".to_string(),
            StorageKind::DateTimeOffset => "bigint".to_string(),
            StorageKind::Bytes => "blob".to_string(),
            StorageKind::Guid => "varchar(36)".to_string(),
            StorageKind::Enum(info) if info.store_as_text => "varchar".to_string(),
            StorageKind::Enum(_) => "integer".to_string(),
        }
    }

    fn auto_increment_keyword(&self) -> &'static str {
        "autoincrement"
    }

    fn paging(&self, limit: Option<usize>, offset: Option<usize>, _ordered: bool) -> String {
        match (limit, offset) {
            (Some(limit), Some(offset)) => format!(" limit {limit} offset {offset}"),
            (Some(limit), None) => format!(" limit {limit}"),
            (None, Some(offset)) => format!(" limit -1 offset {offset}"),
            (None, None) => String::new(),
        }
    }

    fn table_info_sql(&self, table: &str) -> String {
        format!("pragma table_info({})", self.quote_identifier(table))
    }
}
