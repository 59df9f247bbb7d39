//! The CRUD engine.

use std::any::TypeId;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use synctrack_core::query::CompiledSql;
use synctrack_core::schema::IndexInfo;
use synctrack_core::{
    mapping, mapping_with_flags, CreateFlags, Dialect, Entity, Error as CoreError, Expr,
    FieldType, InsertMode, Mapping, Param, SqlValue, TableMapping, Value,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{ConnectionConfig, DialectKind};
use crate::driver::{Cursor, Driver, ExecResult, ResultSet, StorageError};
use crate::error::{OrmError, Result};
use crate::events::{SubscriptionId, Subscribers, TableChanged};
use crate::insert_cache::insert_command;
use crate::ledger::{ChangeAction, LEDGER_TABLE};
use crate::materialize::{DeferredRows, RowPlan};
use crate::sqlite::SqliteDriver;
use crate::table_query::TableQuery;

/// Outcome of [`Connection::create_table`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateTableResult {
    Created,
    /// The table existed; missing columns were added.
    Migrated,
}

/// A column reported by [`Connection::get_table_info`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub not_null: bool,
}

/// A database connection with change tracking.
///
/// Every statement runs synchronously on the calling thread. Mutations
/// of tracked tables append to the `ChangesHistory` ledger and notify
/// subscribers.
pub struct Connection {
    driver: Mutex<Box<dyn Driver>>,
    dialect: Arc<dyn Dialect>,
    config: ConnectionConfig,
    pub(crate) transaction_depth: AtomicUsize,
    pub(crate) subscribers: Subscribers,
    pub(crate) history_ready: AtomicBool,
    elapsed_micros: AtomicU64,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("dialect", &self.dialect.name())
            .field("database", &self.config.database)
            .field(
                "transaction_depth",
                &self.transaction_depth.load(Ordering::SeqCst),
            )
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Opens a connection described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::Config`] for SQL Server, which needs a
    /// caller-supplied driver (see [`Connection::with_driver`]), or the
    /// storage error of opening the SQLite database.
    pub fn open(config: ConnectionConfig) -> Result<Self> {
        match config.dialect {
            DialectKind::Sqlite => {
                let driver = SqliteDriver::connect(&config.sqlite_url())?;
                Ok(Self::with_driver(driver, config))
            }
            DialectKind::SqlServer => Err(OrmError::Config(format!(
                "no bundled driver for SQL Server ({}); use Connection::with_driver",
                config.connection_string()
            ))),
        }
    }

    /// Opens a private in-memory SQLite database.
    ///
    /// # Errors
    ///
    /// Returns the storage error of opening the database.
    pub fn open_in_memory() -> Result<Self> {
        Self::open(ConnectionConfig::default())
    }

    /// Wraps an already opened driver.
    pub fn with_driver(driver: impl Driver + 'static, config: ConnectionConfig) -> Self {
        Self {
            driver: Mutex::new(Box::new(driver)),
            dialect: config.dialect(),
            config,
            transaction_depth: AtomicUsize::new(0),
            subscribers: Subscribers::default(),
            history_ready: AtomicBool::new(false),
            elapsed_micros: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    #[must_use]
    pub const fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.driver().is_open()
    }

    /// Closes the underlying driver.
    ///
    /// # Errors
    ///
    /// Returns the storage error of closing.
    pub fn close(&self) -> Result<()> {
        self.driver().close()?;
        Ok(())
    }

    /// Registers a callback invoked after every effective mutation of a
    /// tracked table.
    pub fn subscribe(
        &self,
        callback: impl Fn(&TableChanged) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.subscribers.add(Arc::new(callback))
    }

    /// Removes a subscription; returns whether it existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.remove(id)
    }

    // =========================================================================
    // Raw statements
    // =========================================================================

    fn driver(&self) -> MutexGuard<'_, Box<dyn Driver>> {
        self.driver.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn run<R>(
        &self,
        sql: &str,
        params: &[Param],
        f: impl FnOnce(&mut dyn Driver) -> std::result::Result<R, StorageError>,
    ) -> Result<R> {
        if self.config.trace {
            let bound: Vec<String> = params
                .iter()
                .map(|p| format!("{}={}", p.name, p.value.to_sql_inline()))
                .collect();
            debug!(sql, params = ?bound, "Executing");
        }
        let start = Instant::now();
        let result = {
            let mut driver = self.driver();
            f(driver.as_mut())
        };
        if self.config.time_execution {
            let elapsed = start.elapsed();
            let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
            let total = self.elapsed_micros.fetch_add(micros, Ordering::Relaxed) + micros;
            info!(
                sql,
                ?elapsed,
                total = ?Duration::from_micros(total),
                "Finished statement"
            );
        }
        Ok(result?)
    }

    pub(crate) fn exec(&self, sql: &str, params: &[Param]) -> Result<ExecResult> {
        self.run(sql, params, |driver| driver.execute(sql, params))
    }

    pub(crate) fn query_raw(&self, sql: &str, params: &[Param]) -> Result<ResultSet> {
        self.run(sql, params, |driver| driver.query(sql, params))
    }

    /// Executes a statement and returns the number of affected rows.
    ///
    /// # Errors
    ///
    /// Returns the storage error of the statement.
    pub fn execute(&self, sql: &str, params: &[Param]) -> Result<u64> {
        Ok(self.exec(sql, params)?.rows_affected)
    }

    /// Runs a query and returns the first column of its first row.
    ///
    /// # Errors
    ///
    /// Returns the storage error of the query.
    pub fn scalar(&self, sql: &str, params: &[Param]) -> Result<SqlValue> {
        self.run(sql, params, |driver| driver.scalar(sql, params))
    }

    /// Runs a query and converts its first value to `F`.
    ///
    /// Use an `Option<F>` target when the value may be NULL.
    ///
    /// # Errors
    ///
    /// Returns the storage error of the query, or a marshaling error.
    pub fn execute_scalar<F: FieldType>(&self, sql: &str, params: &[Param]) -> Result<F> {
        let raw = self.scalar(sql, params)?;
        Ok(F::from_value(Value::from_sql(F::storage_kind(), raw)?)?)
    }

    /// Runs a query and converts the first column of every row to `F`.
    ///
    /// # Errors
    ///
    /// Returns the storage error of the query, or a marshaling error.
    pub fn query_scalars<F: FieldType>(&self, sql: &str, params: &[Param]) -> Result<Vec<F>> {
        let set = self.query_raw(sql, params)?;
        set.rows
            .into_iter()
            .map(|row| {
                let raw = row.into_iter().next().unwrap_or(SqlValue::Null);
                Ok(F::from_value(Value::from_sql(F::storage_kind(), raw)?)?)
            })
            .collect()
    }

    /// Returns whether the query yields at least one row.
    ///
    /// # Errors
    ///
    /// Returns the storage error of the query.
    pub fn exists(&self, sql: &str, params: &[Param]) -> Result<bool> {
        Ok(!self.query_raw(sql, params)?.is_empty())
    }

    /// Runs a query and materializes every row as `T`.
    ///
    /// # Errors
    ///
    /// Returns the storage error of the query, or a marshaling error.
    pub fn query<T: Entity>(&self, sql: &str, params: &[Param]) -> Result<Vec<T>> {
        self.query_mapped(&*mapping::<T>()?, sql, params)
    }

    /// Runs a query and materializes rows lazily while iterating.
    ///
    /// # Errors
    ///
    /// Returns the storage error of the query.
    pub fn deferred_query<T: Entity>(
        &self,
        sql: &str,
        params: &[Param],
    ) -> Result<DeferredRows<'_, T>> {
        self.deferred_mapped(mapping::<T>()?, sql, params)
    }

    /// Runs a query and returns the first row as `T`, if any.
    ///
    /// # Errors
    ///
    /// Returns the storage error of the query, or a marshaling error.
    pub fn find_with_query<T: Entity>(&self, sql: &str, params: &[Param]) -> Result<Option<T>> {
        self.deferred_query::<T>(sql, params)?.next().transpose()
    }

    /// Runs a query against a type-erased mapping; each row holds one
    /// value per mapped column, NULL where the result has no such column.
    ///
    /// # Errors
    ///
    /// Returns the storage error of the query, or a marshaling error.
    pub fn query_rows(
        &self,
        table: &TableMapping,
        sql: &str,
        params: &[Param],
    ) -> Result<Vec<Vec<Value>>> {
        let set = self.query_raw(sql, params)?;
        let plan = RowPlan::new(table, &set.columns);
        set.rows
            .into_iter()
            .map(|row| plan.values(table.columns.len(), row))
            .collect()
    }

    pub(crate) fn query_mapped<T: Entity>(
        &self,
        mapping: &Mapping<T>,
        sql: &str,
        params: &[Param],
    ) -> Result<Vec<T>> {
        let set = self.query_raw(sql, params)?;
        let plan = RowPlan::new(mapping, &set.columns);
        set.rows
            .into_iter()
            .map(|row| plan.materialize(mapping, row))
            .collect()
    }

    pub(crate) fn deferred_mapped<T: Entity>(
        &self,
        mapping: Arc<Mapping<T>>,
        sql: &str,
        params: &[Param],
    ) -> Result<DeferredRows<'_, T>> {
        let cursor = self.run(sql, params, |driver| driver.open_cursor(sql, params))?;
        Ok(DeferredRows::new(self, mapping, cursor))
    }

    pub(crate) fn next_row(&self, cursor: &mut Cursor) -> Result<Option<Vec<SqlValue>>> {
        Ok(self.driver().next_row(cursor)?)
    }

    pub(crate) fn close_cursor(&self, cursor: &mut Cursor) {
        self.driver().close_cursor(cursor);
    }

    // =========================================================================
    // Schema
    // =========================================================================

    /// Creates the table of `T`, or adds the columns it is missing.
    ///
    /// Declared and implicit indexes are created afterwards.
    ///
    /// # Errors
    ///
    /// Returns a schema error for an unmappable type, or the storage error
    /// of the DDL.
    pub fn create_table<T: Entity>(&self) -> Result<CreateTableResult> {
        self.create_table_for(mapping::<T>()?.table())
    }

    /// Like [`Connection::create_table`], reflecting `T` with `flags`.
    ///
    /// # Errors
    ///
    /// See [`Connection::create_table`].
    pub fn create_table_with_flags<T: Entity>(
        &self,
        flags: CreateFlags,
    ) -> Result<CreateTableResult> {
        self.create_table_for(mapping_with_flags::<T>(flags)?.table())
    }

    /// Creates several tables, reporting the outcome per table name.
    ///
    /// # Errors
    ///
    /// Stops at the first failing table.
    pub fn create_tables(
        &self,
        tables: &[Arc<TableMapping>],
    ) -> Result<Vec<(String, CreateTableResult)>> {
        tables
            .iter()
            .map(|table| Ok((table.table_name.clone(), self.create_table_for(table)?)))
            .collect()
    }

    /// Creates or migrates a table from a type-erased mapping.
    ///
    /// # Errors
    ///
    /// See [`Connection::create_table`].
    pub fn create_table_for(&self, table: &TableMapping) -> Result<CreateTableResult> {
        let existing = self.get_table_info(&table.table_name)?;
        let result = if existing.is_empty() {
            self.exec(&self.dialect.create_table_sql(table), &[])?;
            info!(table = %table.table_name, "Created table");
            CreateTableResult::Created
        } else {
            self.migrate_table(table, &existing)?;
            CreateTableResult::Migrated
        };
        for index in table.indexes()? {
            self.exec(&self.dialect.create_index_sql(&index), &[])?;
        }
        Ok(result)
    }

    fn migrate_table(&self, table: &TableMapping, existing: &[ColumnInfo]) -> Result<()> {
        let missing = table.columns.iter().filter(|column| {
            !existing
                .iter()
                .any(|info| info.name.eq_ignore_ascii_case(&column.name))
        });
        for column in missing {
            self.exec(
                &self.dialect.add_column_sql(&table.table_name, column),
                &[],
            )?;
            info!(table = %table.table_name, column = %column.name, "Added column");
            if column.is_unique() {
                let index = IndexInfo {
                    name: format!("{}_{}", table.table_name, column.name),
                    table_name: table.table_name.clone(),
                    unique: true,
                    columns: vec![column.name.clone()],
                };
                self.exec(&self.dialect.create_index_sql(&index), &[])?;
            }
        }
        Ok(())
    }

    /// Lists the columns of a table; empty when the table does not exist.
    ///
    /// # Errors
    ///
    /// Returns the storage error of the query.
    pub fn get_table_info(&self, table_name: &str) -> Result<Vec<ColumnInfo>> {
        let set = self.query_raw(&self.dialect.table_info_sql(table_name), &[])?;
        let position = |wanted: &str| {
            set.columns
                .iter()
                .position(|c| c.name.eq_ignore_ascii_case(wanted))
        };
        let (Some(name), not_null) = (position("name"), position("notnull")) else {
            return Ok(Vec::new());
        };
        Ok(set
            .rows
            .iter()
            .filter_map(|row| {
                let SqlValue::Text(column) = row.get(name)? else {
                    return None;
                };
                let not_null = not_null
                    .and_then(|i| row.get(i))
                    .is_some_and(|v| matches!(v, SqlValue::Int(1) | SqlValue::BigInt(1)));
                Some(ColumnInfo {
                    name: column.clone(),
                    not_null,
                })
            })
            .collect())
    }

    /// Drops the table of `T`.
    ///
    /// # Errors
    ///
    /// Returns the storage error of the DDL.
    pub fn drop_table<T: Entity>(&self) -> Result<u64> {
        self.drop_table_for(mapping::<T>()?.table())
    }

    /// Drops a table by mapping.
    ///
    /// # Errors
    ///
    /// Returns the storage error of the DDL.
    pub fn drop_table_for(&self, table: &TableMapping) -> Result<u64> {
        let count = self.execute(&self.dialect.drop_table_sql(&table.table_name), &[])?;
        if table.table_name == LEDGER_TABLE {
            self.history_ready.store(false, Ordering::SeqCst);
        }
        info!(table = %table.table_name, "Dropped table");
        Ok(count)
    }

    /// Creates an index; the default name is `Table_col1_col2`.
    ///
    /// # Errors
    ///
    /// Returns the storage error of the DDL.
    pub fn create_index(
        &self,
        name: Option<&str>,
        table_name: &str,
        columns: &[&str],
        unique: bool,
    ) -> Result<()> {
        let name = name.map_or_else(
            || format!("{table_name}_{}", columns.join("_")),
            str::to_string,
        );
        let index = IndexInfo {
            name,
            table_name: table_name.to_string(),
            unique,
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
        };
        self.exec(&self.dialect.create_index_sql(&index), &[])?;
        Ok(())
    }

    /// Creates an index on one field of `T`, by field or column name.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownColumn`] for an unknown field, or the
    /// storage error of the DDL.
    pub fn create_index_on<T: Entity>(&self, field: &str, unique: bool) -> Result<()> {
        let mapping = mapping::<T>()?;
        let column = mapping.resolve_column(field)?;
        self.create_index(None, &mapping.table_name, &[column.name.as_str()], unique)
    }

    /// Creates a database when the dialect has databases as objects;
    /// returns whether a statement was issued.
    ///
    /// # Errors
    ///
    /// Returns the storage error of the DDL.
    pub fn create_database(&self, name: &str) -> Result<bool> {
        match self.dialect.create_database_sql(name) {
            Some(sql) => {
                self.exec(&sql, &[])?;
                info!(database = name, "Ensured database exists");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Switches the current database when the dialect has databases as
    /// objects; returns whether a statement was issued.
    ///
    /// # Errors
    ///
    /// Returns the storage error of the statement.
    pub fn change_catalog(&self, name: &str) -> Result<bool> {
        match self.dialect.change_catalog_sql(name) {
            Some(sql) => {
                self.exec(&sql, &[])?;
                info!(database = name, "Changed catalog");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Starts a query over the table of `T`.
    ///
    /// # Errors
    ///
    /// Returns a schema error for an unmappable type.
    pub fn table<T: Entity>(&self) -> Result<TableQuery<'_, T>> {
        Ok(TableQuery::new(self, mapping::<T>()?))
    }

    fn by_primary_key_sql(&self, table: &TableMapping, pk: Value) -> Result<(String, Vec<Param>)> {
        let d = self.dialect();
        let name = d.quote_identifier(&table.table_name);
        match table.pk() {
            Some(column) => Ok((
                format!(
                    "select * from {name} where {} = {}",
                    d.quote_identifier(&column.name),
                    d.placeholder(&column.name)
                ),
                vec![Param {
                    name: column.name.clone(),
                    value: pk.to_sql()?,
                }],
            )),
            None => {
                warn!(table = %table.table_name, "No primary key; reading the first row instead");
                Ok((
                    format!("select * from {name}{}", d.paging(Some(1), None, false)),
                    Vec::new(),
                ))
            }
        }
    }

    /// Reads the row of `T` with primary key `pk`.
    ///
    /// Without a primary key the first row of the table is returned.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::NotFound`] when no row matches.
    pub fn get<T: Entity>(&self, pk: impl FieldType) -> Result<T> {
        self.find::<T>(pk)?.ok_or_else(|| OrmError::NotFound {
            table: T::table_name().to_string(),
        })
    }

    /// Reads the row of `T` with primary key `pk`, if any.
    ///
    /// # Errors
    ///
    /// Returns the storage error of the query, or a marshaling error.
    pub fn find<T: Entity>(&self, pk: impl FieldType) -> Result<Option<T>> {
        let mapping = mapping::<T>()?;
        let (sql, params) = self.by_primary_key_sql(&mapping, pk.to_value())?;
        self.deferred_mapped(mapping, &sql, &params)?
            .next()
            .transpose()
    }

    /// Reads a row by primary key through a type-erased mapping; values
    /// are aligned with the mapping's columns.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::NotFound`] when no row matches.
    pub fn get_row(&self, table: &TableMapping, pk: Value) -> Result<Vec<Value>> {
        self.find_row(table, pk)?.ok_or_else(|| OrmError::NotFound {
            table: table.table_name.clone(),
        })
    }

    /// Reads a row by primary key through a type-erased mapping, if any.
    ///
    /// # Errors
    ///
    /// Returns the storage error of the query, or a marshaling error.
    pub fn find_row(&self, table: &TableMapping, pk: Value) -> Result<Option<Vec<Value>>> {
        let (sql, params) = self.by_primary_key_sql(table, pk)?;
        Ok(self.query_rows(table, &sql, &params)?.into_iter().next())
    }

    /// Reads the first row of `T` matching `predicate`.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::NotFound`] when no row matches.
    pub fn get_where<T: Entity>(&self, predicate: Expr) -> Result<T> {
        self.table::<T>()?.first_where(predicate)
    }

    /// Reads the first row of `T` matching `predicate`, if any.
    ///
    /// # Errors
    ///
    /// Returns the storage error of the query, or a compile error.
    pub fn find_where<T: Entity>(&self, predicate: Expr) -> Result<Option<T>> {
        self.table::<T>()?.first_or_default_where(predicate)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Inserts `entity`.
    ///
    /// A fresh sync identifier is generated and written back to the entity;
    /// a nil auto-generated GUID key is replaced; an auto-increment key is
    /// set from the generated row id.
    ///
    /// # Errors
    ///
    /// Returns the storage error of the insert, e.g. a constraint violation.
    pub fn insert<T: Entity>(&self, entity: &mut T) -> Result<u64> {
        self.insert_with_mode(entity, InsertMode::Insert)
    }

    /// Inserts `entity`, replacing a row with the same key.
    ///
    /// # Errors
    ///
    /// See [`Connection::insert`].
    pub fn insert_or_replace<T: Entity>(&self, entity: &mut T) -> Result<u64> {
        self.insert_with_mode(entity, InsertMode::InsertOrReplace)
    }

    /// Inserts `entity` unless a row with the same key exists.
    ///
    /// Returns 0, and records nothing, when the row was kept.
    ///
    /// # Errors
    ///
    /// See [`Connection::insert`].
    pub fn insert_or_ignore<T: Entity>(&self, entity: &mut T) -> Result<u64> {
        self.insert_with_mode(entity, InsertMode::InsertOrIgnore)
    }

    /// Inserts `entity` with an explicit [`InsertMode`].
    ///
    /// # Errors
    ///
    /// See [`Connection::insert`].
    pub fn insert_with_mode<T: Entity>(&self, entity: &mut T, mode: InsertMode) -> Result<u64> {
        let mapping = mapping::<T>()?;

        let sync_index = mapping.sync_guid_index();
        let sync_guid = if mapping.table_name == LEDGER_TABLE {
            mapping
                .get(entity, sync_index)
                .as_guid()
                .unwrap_or_else(Uuid::new_v4)
        } else {
            let guid = Uuid::new_v4();
            mapping.set(entity, sync_index, Value::Guid(guid))?;
            guid
        };

        if let Some(pk) = mapping.pk_index() {
            let unset = match mapping.get(entity, pk) {
                Value::Guid(guid) => guid.is_nil(),
                Value::Null => true,
                _ => false,
            };
            if mapping.columns[pk].auto_guid && unset {
                mapping.set(entity, pk, Value::Guid(Uuid::new_v4()))?;
            }
        }

        let command = insert_command(TypeId::of::<T>(), &mapping, mode, self.dialect());
        let params = command
            .columns
            .iter()
            .map(|&i| {
                let value = if i == sync_index {
                    Value::Guid(sync_guid)
                } else {
                    mapping.get(entity, i)
                };
                Ok(Param {
                    name: mapping.columns[i].name.clone(),
                    value: value.to_sql()?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let result = command.run(|sql| self.exec(sql, &params))?;

        if result.rows_affected > 0 {
            if let (Some(pk), Some(id)) = (mapping.auto_inc_pk(), result.last_insert_id) {
                let value = Value::from_sql(pk.kind, SqlValue::BigInt(id))?;
                if let Some(index) = mapping.pk_index() {
                    mapping.set(entity, index, value)?;
                }
            }
            self.record_change(mapping.table(), Some(sync_guid), ChangeAction::Insert)?;
        }
        Ok(result.rows_affected)
    }

    /// Inserts every entity, in one transaction when `run_in_transaction`.
    ///
    /// # Errors
    ///
    /// Returns the first failure; a transactional batch is rolled back in
    /// full.
    pub fn insert_all<T: Entity>(&self, entities: &mut [T], run_in_transaction: bool) -> Result<u64> {
        self.insert_all_with_mode(entities, InsertMode::Insert, run_in_transaction)
    }

    /// [`Connection::insert_all`] with an explicit [`InsertMode`].
    ///
    /// # Errors
    ///
    /// See [`Connection::insert_all`].
    pub fn insert_all_with_mode<T: Entity>(
        &self,
        entities: &mut [T],
        mode: InsertMode,
        run_in_transaction: bool,
    ) -> Result<u64> {
        if run_in_transaction {
            self.run_in_transaction(|conn| conn.insert_each(entities, mode))
        } else {
            self.insert_each(entities, mode)
        }
    }

    fn insert_each<T: Entity>(&self, entities: &mut [T], mode: InsertMode) -> Result<u64> {
        let mut count = 0;
        for entity in entities {
            count += self.insert_with_mode(entity, mode)?;
        }
        Ok(count)
    }

    /// Updates every column of `entity` except its primary key and sync
    /// identifier.
    ///
    /// The stored sync identifier is read back into the entity; a row that
    /// has none yet is given a fresh one.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NoPrimaryKey`] when `T` has no primary key, or
    /// the storage error of the update.
    pub fn update<T: Entity>(&self, entity: &mut T) -> Result<u64> {
        let mapping = mapping::<T>()?;
        let Some(pk_index) = mapping.pk_index() else {
            return Err(no_primary_key(&mapping, "update"));
        };
        let pk = &mapping.columns[pk_index];
        let d = self.dialect();

        let mut columns = mapping.update_columns();
        if columns.is_empty() {
            // nothing besides the key: "set pk = pk" keeps the statement valid
            columns.push(pk_index);
        }
        let sets: Vec<String> = columns
            .iter()
            .map(|&i| {
                let column = &mapping.columns[i];
                format!(
                    "{} = {}",
                    d.quote_identifier(&column.name),
                    d.placeholder(&column.name)
                )
            })
            .collect();
        let sql = format!(
            "update {} set {} where {} = {}",
            d.quote_identifier(&mapping.table_name),
            sets.join(", "),
            d.quote_identifier(&pk.name),
            d.placeholder(&pk.name)
        );

        let mut params = columns
            .iter()
            .map(|&i| {
                Ok(Param {
                    name: mapping.columns[i].name.clone(),
                    value: mapping.get(entity, i).to_sql()?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let key = Param {
            name: pk.name.clone(),
            value: mapping.get(entity, pk_index).to_sql()?,
        };
        params.push(key.clone());

        let count = self.execute(&sql, &params)?;
        if count > 0 {
            let sync_guid = match self.read_sync_guid(&mapping, &key)? {
                Some(guid) => guid,
                None => self.assign_sync_guid(&mapping, &key)?,
            };
            mapping.set(entity, mapping.sync_guid_index(), Value::Guid(sync_guid))?;
            self.record_change(mapping.table(), Some(sync_guid), ChangeAction::Update)?;
        }
        Ok(count)
    }

    /// Gives a row stored before its table was tracked a sync identifier.
    fn assign_sync_guid(&self, table: &TableMapping, key: &Param) -> Result<Uuid> {
        let d = self.dialect();
        let column = table.sync_guid();
        let guid = Uuid::new_v4();
        let sql = format!(
            "update {} set {} = {} where {} = {}",
            d.quote_identifier(&table.table_name),
            d.quote_identifier(&column.name),
            d.placeholder(&column.name),
            d.quote_identifier(&key.name),
            d.placeholder(&key.name)
        );
        let params = [
            Param {
                name: column.name.clone(),
                value: Value::Guid(guid).to_sql()?,
            },
            key.clone(),
        ];
        self.exec(&sql, &params)?;
        debug!(table = %table.table_name, %guid, "Assigned missing sync identifier");
        Ok(guid)
    }

    /// Updates every entity, in one transaction when `run_in_transaction`.
    ///
    /// # Errors
    ///
    /// Returns the first failure; a transactional batch is rolled back in
    /// full.
    pub fn update_all<T: Entity>(&self, entities: &mut [T], run_in_transaction: bool) -> Result<u64> {
        if run_in_transaction {
            self.run_in_transaction(|conn| conn.update_each(entities))
        } else {
            self.update_each(entities)
        }
    }

    fn update_each<T: Entity>(&self, entities: &mut [T]) -> Result<u64> {
        let mut count = 0;
        for entity in entities {
            count += self.update(entity)?;
        }
        Ok(count)
    }

    /// Deletes the row of `entity` by primary key.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NoPrimaryKey`] when `T` has no primary key, or
    /// the storage error of the delete.
    pub fn delete<T: Entity>(&self, entity: &T) -> Result<u64> {
        let mapping = mapping::<T>()?;
        let pk = mapping
            .pk_value(entity)
            .ok_or_else(|| no_primary_key(&mapping, "delete"))?;
        self.delete_by_value(mapping.table(), pk)
    }

    /// Deletes the row of `T` with primary key `pk`.
    ///
    /// # Errors
    ///
    /// See [`Connection::delete`].
    pub fn delete_by_key<T: Entity>(&self, pk: impl FieldType) -> Result<u64> {
        self.delete_by_value(mapping::<T>()?.table(), pk.to_value())
    }

    /// Deletes a row by primary key through a type-erased mapping.
    ///
    /// # Errors
    ///
    /// See [`Connection::delete`].
    pub fn delete_by_value(&self, table: &Arc<TableMapping>, pk: Value) -> Result<u64> {
        let Some(column) = table.pk() else {
            return Err(no_primary_key(table, "delete"));
        };
        let d = self.dialect();
        let key = Param {
            name: column.name.clone(),
            value: pk.to_sql()?,
        };
        let sync_guid = self.read_sync_guid(table, &key)?;
        let sql = format!(
            "delete from {} where {} = {}",
            d.quote_identifier(&table.table_name),
            d.quote_identifier(&column.name),
            d.placeholder(&column.name)
        );
        let count = self.execute(&sql, &[key])?;
        if count > 0 {
            self.record_change(table, sync_guid, ChangeAction::Delete)?;
        }
        Ok(count)
    }

    /// Deletes every row of `T`.
    ///
    /// The table's ledger history is replaced by one Delete entry per row.
    ///
    /// # Errors
    ///
    /// Returns the storage error; the whole operation is rolled back.
    pub fn delete_all<T: Entity>(&self) -> Result<u64> {
        self.delete_all_for(mapping::<T>()?.table())
    }

    /// [`Connection::delete_all`] through a type-erased mapping.
    ///
    /// # Errors
    ///
    /// See [`Connection::delete_all`].
    pub fn delete_all_for(&self, table: &Arc<TableMapping>) -> Result<u64> {
        self.run_in_transaction(|conn| {
            let tracked = table.table_name != LEDGER_TABLE;
            if tracked {
                conn.record_delete_all(table)?;
            }
            let sql = format!(
                "delete from {}",
                conn.dialect().quote_identifier(&table.table_name)
            );
            let count = conn.execute(&sql, &[])?;
            if count > 0 {
                conn.notify(table, ChangeAction::Delete);
            }
            Ok(count)
        })
    }

    /// Deletes the rows matching a compiled filter, tracking each one.
    pub(crate) fn delete_compiled(
        &self,
        table: &Arc<TableMapping>,
        filter: &CompiledSql,
    ) -> Result<u64> {
        let tracked = table.table_name != LEDGER_TABLE;
        let guids = if tracked {
            self.sync_guids(table, Some(filter))?
        } else {
            Vec::new()
        };
        let sql = format!(
            "delete from {} where {}",
            self.dialect().quote_identifier(&table.table_name),
            filter.sql
        );
        let count = self.execute(&sql, &filter.params)?;
        if count > 0 && tracked {
            self.record_deleted(table, &guids)?;
        }
        Ok(count)
    }

    fn read_sync_guid(&self, table: &TableMapping, key: &Param) -> Result<Option<Uuid>> {
        let d = self.dialect();
        let pk = table.pk().ok_or_else(|| no_primary_key(table, "read"))?;
        let sql = format!(
            "select {} from {} where {} = {}",
            d.quote_identifier(&table.sync_guid().name),
            d.quote_identifier(&table.table_name),
            d.quote_identifier(&pk.name),
            d.placeholder(&pk.name)
        );
        let raw = self.scalar(&sql, std::slice::from_ref(key))?;
        Ok(Value::from_sql(synctrack_core::StorageKind::Guid, raw)?.as_guid())
    }
}

fn no_primary_key(table: &TableMapping, operation: &'static str) -> OrmError {
    CoreError::NoPrimaryKey {
        table: table.table_name.clone(),
        operation,
    }
    .into()
}
