//! SQL dialects.
//!
//! A dialect renders every statement the engine issues: DDL for mapped
//! tables, insert text, paging clauses, transaction control and the string
//! helpers used by the predicate compiler.

mod sqlite;
mod sqlserver;

pub use sqlite::SqliteDialect;
pub use sqlserver::SqlServerDialect;

use std::fmt;

use crate::schema::{Column, IndexInfo, TableMapping};

/// How an insert treats an existing row with the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InsertMode {
    /// Plain insert; a key collision is a constraint error.
    Insert,
    /// Replace the existing row.
    InsertOrReplace,
    /// Keep the existing row and insert nothing.
    InsertOrIgnore,
}

/// Trait for database-specific SQL generation.
pub trait Dialect: Send + Sync + fmt::Debug {
    /// Returns the dialect name.
    fn name(&self) -> &'static str;

    /// Renders the placeholder of a named parameter.
    fn placeholder(&self, name: &str) -> String;

    /// Returns the SQL type of a column.
    fn sql_type(&self, column: &Column) -> String;

    /// Returns the keyword declaring an auto-increment primary key.
    fn auto_increment_keyword(&self) -> &'static str;

    /// Renders a paging clause appended after `order by`.
    fn paging(&self, limit: Option<usize>, offset: Option<usize>, ordered: bool) -> String;

    /// Returns a statement listing the columns of a table, one row per
    /// column with at least a `name` column.
    fn table_info_sql(&self, table: &str) -> String;

    /// Quote an identifier (table name, column name, etc.).
    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Whether `is ?` with a NULL parameter is valid SQL.
    fn binds_null_comparisons(&self) -> bool {
        true
    }

    /// Whether parameters bind by position, so a placeholder repeated in
    /// the text needs its parameter repeated too.
    fn binds_by_position(&self) -> bool {
        true
    }

    /// Extra keywords declared on auto-generated GUID columns.
    fn auto_guid_keyword(&self) -> Option<&'static str> {
        None
    }

    /// Generates a column declaration for `create table`.
    fn column_decl(&self, column: &Column) -> String {
        let mut parts = vec![self.quote_identifier(&column.name), self.sql_type(column)];
        if column.primary_key {
            parts.push("primary key".to_string());
        }
        if column.auto_increment {
            parts.push(self.auto_increment_keyword().to_string());
        }
        if !column.nullable {
            parts.push("not null".to_string());
        }
        if column.auto_guid {
            if let Some(keyword) = self.auto_guid_keyword() {
                parts.push(keyword.to_string());
            }
        }
        if column.is_unique() && !column.primary_key {
            parts.push("UNIQUE".to_string());
        }
        if let Some(collation) = &column.collation {
            parts.push(format!("collate {collation}"));
        }
        parts.join(" ")
    }

    /// Generates a column declaration for `alter table .. add column`.
    ///
    /// Uniqueness and NOT NULL cannot be added to populated tables; unique
    /// columns get a separate unique index instead.
    fn add_column_decl(&self, column: &Column) -> String {
        let mut parts = vec![self.quote_identifier(&column.name), self.sql_type(column)];
        if let Some(collation) = &column.collation {
            parts.push(format!("collate {collation}"));
        }
        parts.join(" ")
    }

    /// Generates `create table` for a mapping.
    fn create_table_sql(&self, table: &TableMapping) -> String {
        let decls: Vec<String> = table.columns.iter().map(|c| self.column_decl(c)).collect();
        format!(
            "create table if not exists {}(\n{})",
            self.quote_identifier(&table.table_name),
            decls.join(",\n")
        )
    }

    /// Generates `alter table .. add column`.
    fn add_column_sql(&self, table: &str, column: &Column) -> String {
        format!(
            "alter table {} add column {}",
            self.quote_identifier(table),
            self.add_column_decl(column)
        )
    }

    /// Generates the insert statement for the given column positions.
    fn insert_sql(&self, table: &TableMapping, columns: &[usize], mode: InsertMode) -> String {
        let verb = match mode {
            InsertMode::Insert => "insert",
            InsertMode::InsertOrReplace => "insert or replace",
            InsertMode::InsertOrIgnore => "insert or ignore",
        };
        let name = self.quote_identifier(&table.table_name);
        if columns.is_empty() {
            return format!("{verb} into {name} default values");
        }
        let (names, values) = self.insert_lists(table, columns);
        format!("{verb} into {name}({names}) values ({values})")
    }

    /// Renders the column and placeholder lists of an insert.
    fn insert_lists(&self, table: &TableMapping, columns: &[usize]) -> (String, String) {
        let names: Vec<String> = columns
            .iter()
            .map(|&i| self.quote_identifier(&table.columns[i].name))
            .collect();
        let values: Vec<String> = columns
            .iter()
            .map(|&i| self.placeholder(&table.columns[i].name))
            .collect();
        (names.join(","), values.join(","))
    }

    /// Generates SQL for dropping a table.
    fn drop_table_sql(&self, table: &str) -> String {
        format!("drop table if exists {}", self.quote_identifier(table))
    }

    /// Generates SQL for creating an index.
    fn create_index_sql(&self, index: &IndexInfo) -> String {
        let columns: Vec<String> = index
            .columns
            .iter()
            .map(|c| self.quote_identifier(c))
            .collect();
        format!(
            "create {}index if not exists {} on {}({})",
            if index.unique { "unique " } else { "" },
            self.quote_identifier(&index.name),
            self.quote_identifier(&index.table_name),
            columns.join(", ")
        )
    }

    fn begin_sql(&self) -> String {
        "begin transaction".to_string()
    }

    fn commit_sql(&self) -> String {
        "commit".to_string()
    }

    fn rollback_sql(&self) -> String {
        "rollback".to_string()
    }

    /// Opens a savepoint at `depth` (0 when no transaction is open).
    fn savepoint_sql(&self, name: &str, _depth: usize) -> String {
        format!("savepoint {name}")
    }

    /// Releases a savepoint, leaving the transaction at `target_depth`.
    ///
    /// `None` when the dialect has nothing to issue.
    fn release_sql(&self, name: &str, _target_depth: usize) -> Option<String> {
        Some(format!("release {name}"))
    }

    fn rollback_to_sql(&self, name: &str) -> String {
        format!("rollback to {name}")
    }

    /// Generates SQL creating a database when absent, if the dialect has
    /// databases as objects.
    fn create_database_sql(&self, _name: &str) -> Option<String> {
        None
    }

    /// Generates SQL switching the current database, if the dialect has
    /// databases as objects.
    fn change_catalog_sql(&self, _name: &str) -> Option<String> {
        None
    }

    /// String concatenation.
    fn concat(&self, left: &str, right: &str) -> String {
        format!("{left} || {right}")
    }

    /// Substring by 1-based start and length.
    fn substr(&self, expr: &str, start: &str, length: &str) -> String {
        format!("substr({expr}, {start}, {length})")
    }

    /// String length.
    fn length(&self, expr: &str) -> String {
        format!("length({expr})")
    }

    /// 1-based position of `needle` in `haystack`, 0 when absent.
    fn position(&self, haystack: &str, needle: &str) -> String {
        format!("instr({haystack},{needle})")
    }
}
