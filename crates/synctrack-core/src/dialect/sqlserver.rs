//! SQL Server dialect.
//!
//! SQL Server has no `release` for savepoints and no `insert or replace`:
//! an outermost savepoint opens a transaction that releasing commits, and
//! replacing inserts delete the keyed row first.

use crate::schema::{Column, IndexInfo, TableMapping, DEFAULT_MAX_STRING_LENGTH};
use crate::types::StorageKind;

use super::{Dialect, InsertMode};

/// SQL Server dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlServerDialect;

impl SqlServerDialect {
    /// Creates a new SQL Server dialect.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn literal(text: &str) -> String {
        format!("N'{}'", text.replace('\'', "''"))
    }
}

impl Dialect for SqlServerDialect {
    fn name(&self) -> &'static str {
        "sqlserver"
    }

    fn placeholder(&self, name: &str) -> String {
        format!("@{name}")
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("[{}]", name.replace(']', "]]"))
    }

    fn binds_null_comparisons(&self) -> bool {
        false
    }

    fn binds_by_position(&self) -> bool {
        false
    }

    fn sql_type(&self, column: &Column) -> String {
        let text = || {
            format!(
                "nvarchar({})",
                column.max_string_length.unwrap_or(DEFAULT_MAX_STRING_LENGTH)
            )
        };
        match column.kind {
            StorageKind::Bool => "bit".to_string(),
            StorageKind::U8 => "tinyint".to_string(),
            StorageKind::I8 | StorageKind::I16 => "smallint".to_string(),
            StorageKind::I32 | StorageKind::U16 => "int".to_string(),
            StorageKind::I64 | StorageKind::U32 | StorageKind::DateTimeOffset => {
                "bigint".to_string()
            }
            StorageKind::F32 => "real".to_string(),
            StorageKind::F64 | StorageKind::Decimal => "float".to_string(),
            StorageKind::String => text(),
            StorageKind::TimeSpan => "nvarchar(32)".to_string(),
            StorageKind::DateTime => "datetime2".to_string(),
            StorageKind::Bytes => "varbinary(max)".to_string(),
            StorageKind::Guid => "uniqueidentifier".to_string(),
            StorageKind::Enum(info) if info.store_as_text => text(),
            StorageKind::Enum(_) => "int".to_string(),
        }
    }

    fn auto_increment_keyword(&self) -> &'static str {
        "IDENTITY(1,1)"
    }

    fn auto_guid_keyword(&self) -> Option<&'static str> {
        Some("DEFAULT NEWID()")
    }

    fn paging(&self, limit: Option<usize>, offset: Option<usize>, ordered: bool) -> String {
        if limit.is_none() && offset.is_none() {
            return String::new();
        }
        let mut sql = String::new();
        if !ordered {
            sql.push_str(" order by (select null)");
        }
        sql.push_str(&format!(" offset {} rows", offset.unwrap_or(0)));
        if let Some(limit) = limit {
            sql.push_str(&format!(" fetch next {limit} rows only"));
        }
        sql
    }

    fn table_info_sql(&self, table: &str) -> String {
        format!(
            "select COLUMN_NAME as name, DATA_TYPE as type, \
             case IS_NULLABLE when 'NO' then 1 else 0 end as notnull \
             from INFORMATION_SCHEMA.COLUMNS where TABLE_NAME = {} \
             order by ORDINAL_POSITION",
            Self::literal(table)
        )
    }

    fn create_table_sql(&self, table: &TableMapping) -> String {
        let decls: Vec<String> = table.columns.iter().map(|c| self.column_decl(c)).collect();
        format!(
            "if object_id({}, N'U') is null create table {}(\n{})",
            Self::literal(&table.table_name),
            self.quote_identifier(&table.table_name),
            decls.join(",\n")
        )
    }

    fn add_column_sql(&self, table: &str, column: &Column) -> String {
        format!(
            "alter table {} add {}",
            self.quote_identifier(table),
            self.add_column_decl(column)
        )
    }

    fn insert_sql(&self, table: &TableMapping, columns: &[usize], mode: InsertMode) -> String {
        let name = self.quote_identifier(&table.table_name);
        let insert = if columns.is_empty() {
            format!("insert into {name} default values")
        } else {
            let (names, values) = self.insert_lists(table, columns);
            format!("insert into {name}({names}) values ({values})")
        };
        let Some(pk) = table.pk() else {
            return insert;
        };
        let key = self.quote_identifier(&pk.name);
        match mode {
            InsertMode::Insert => return insert,
            InsertMode::InsertOrIgnore => {
                return if pk.auto_increment {
                    insert
                } else {
                    format!(
                        "if not exists (select * from {name} where {key} = {}) {insert}",
                        self.placeholder(&pk.name)
                    )
                };
            }
            InsertMode::InsertOrReplace => {}
        }
        let delete = format!("delete from {name} where {key} = {}", self.placeholder(&pk.name));
        if pk.auto_increment {
            format!(
                "{delete}; set identity_insert {name} on; {insert}; set identity_insert {name} off"
            )
        } else {
            format!("{delete}; {insert}")
        }
    }

    fn drop_table_sql(&self, table: &str) -> String {
        format!("drop table if exists {}", self.quote_identifier(table))
    }

    fn create_index_sql(&self, index: &IndexInfo) -> String {
        let columns: Vec<String> = index
            .columns
            .iter()
            .map(|c| self.quote_identifier(c))
            .collect();
        format!(
            "if not exists (select * from sys.indexes where name = {}) create {}index {} on {}({})",
            Self::literal(&index.name),
            if index.unique { "unique " } else { "" },
            self.quote_identifier(&index.name),
            self.quote_identifier(&index.table_name),
            columns.join(", ")
        )
    }

    fn commit_sql(&self) -> String {
        "commit transaction".to_string()
    }

    fn rollback_sql(&self) -> String {
        "rollback transaction".to_string()
    }

    fn savepoint_sql(&self, name: &str, depth: usize) -> String {
        if depth == 0 {
            format!("begin transaction; save transaction {name}")
        } else {
            format!("save transaction {name}")
        }
    }

    fn release_sql(&self, _name: &str, target_depth: usize) -> Option<String> {
        (target_depth == 0).then(|| self.commit_sql())
    }

    fn rollback_to_sql(&self, name: &str) -> String {
        format!("rollback transaction {name}")
    }

    fn create_database_sql(&self, name: &str) -> Option<String> {
        Some(format!(
            "if db_id({}) is null create database {}",
            Self::literal(name),
            self.quote_identifier(name)
        ))
    }

    fn change_catalog_sql(&self, name: &str) -> Option<String> {
        Some(format!("use {}", self.quote_identifier(name)))
    }

    fn concat(&self, left: &str, right: &str) -> String {
        format!("{left} + {right}")
    }

    fn substr(&self, expr: &str, start: &str, length: &str) -> String {
        format!("substring({expr}, {start}, {length})")
    }

    fn length(&self, expr: &str) -> String {
        format!("len({expr})")
    }

    fn position(&self, haystack: &str, needle: &str) -> String {
        format!("charindex({needle},{haystack})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{CreateFlags, FieldMeta};

    fn product() -> TableMapping {
        let id = FieldMeta {
            name: "Id".into(),
            property: "id",
            kind: StorageKind::I64,
            optional: false,
            primary_key: true,
            autoincrement: true,
            ignore: false,
            not_null: false,
            indices: Vec::new(),
            max_length: None,
            collation: None,
        };
        let name = FieldMeta {
            name: "Name".into(),
            property: "name",
            kind: StorageKind::String,
            primary_key: false,
            autoincrement: false,
            ..id.clone()
        };
        TableMapping::from_fields("Product", "Product", &[id, name], CreateFlags::NONE).unwrap()
    }

    #[test]
    fn test_create_table() {
        let sql = SqlServerDialect.create_table_sql(&product());
        assert_eq!(
            sql,
            "if object_id(N'Product', N'U') is null create table [Product](\n\
             [Id] bigint primary key IDENTITY(1,1) not null,\n\
             [Name] nvarchar(140),\n\
             [SyncGuid] uniqueidentifier not null DEFAULT NEWID() UNIQUE)"
        );
    }

    #[test]
    fn test_insert_or_replace_deletes_first() {
        let table = product();
        let sql = SqlServerDialect.insert_sql(
            &table,
            &table.insert_or_replace_columns(),
            InsertMode::InsertOrReplace,
        );
        assert_eq!(
            sql,
            "delete from [Product] where [Id] = @Id; set identity_insert [Product] on; \
             insert into [Product]([Id],[Name],[SyncGuid]) values (@Id,@Name,@SyncGuid); \
             set identity_insert [Product] off"
        );
    }

    #[test]
    fn test_insert_or_ignore_checks_the_key() {
        let table = product();
        let ignore = SqlServerDialect.insert_sql(
            &table,
            &table.insert_columns(),
            InsertMode::InsertOrIgnore,
        );
        // an identity key never collides
        assert_eq!(
            ignore,
            "insert into [Product]([Name],[SyncGuid]) values (@Name,@SyncGuid)"
        );
        assert_eq!(
            SqlServerDialect.change_catalog_sql("Sales").as_deref(),
            Some("use [Sales]")
        );
    }

    #[test]
    fn test_paging_requires_order() {
        let dialect = SqlServerDialect;
        assert_eq!(
            dialect.paging(Some(10), None, false),
            " order by (select null) offset 0 rows fetch next 10 rows only"
        );
        assert_eq!(dialect.paging(None, Some(3), true), " offset 3 rows");
        assert_eq!(dialect.paging(None, None, false), "");
    }

    #[test]
    fn test_transactions() {
        let dialect = SqlServerDialect;
        assert_eq!(
            dialect.savepoint_sql("S7D0", 0),
            "begin transaction; save transaction S7D0"
        );
        assert_eq!(dialect.savepoint_sql("S7D1", 1), "save transaction S7D1");
        assert_eq!(
            dialect.release_sql("S7D0", 0).as_deref(),
            Some("commit transaction")
        );
        assert!(dialect.release_sql("S7D1", 1).is_none());
        assert_eq!(
            dialect.create_database_sql("Sales").as_deref(),
            Some("if db_id(N'Sales') is null create database [Sales]")
        );
    }

    #[test]
    fn test_string_helpers() {
        let dialect = SqlServerDialect;
        assert_eq!(dialect.concat("@p", "'%'"), "@p + '%'");
        assert_eq!(dialect.position("[Name]", "@Name"), "charindex(@Name,[Name])");
        assert_eq!(dialect.length("[Name]"), "len([Name])");
    }
}
