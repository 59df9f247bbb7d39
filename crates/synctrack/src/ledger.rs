//! The change-history ledger.
//!
//! Every tracked table carries a `SyncGuid` column. Each effective
//! insert, update or delete leaves one `ChangesHistory` row naming the
//! table, the row's sync identifier and the action. The ledger's own
//! `SyncGuid` is unique, so it keeps the latest action per row.

use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use synctrack_core::query::{col, CompiledSql};
use synctrack_core::{StorageKind, TableMapping, Value};
use synctrack_derive::{Entity, SqlEnum};
use tracing::debug;
use uuid::Uuid;

use crate::connection::Connection;
use crate::error::Result;
use crate::events::TableChanged;

/// Name of the ledger table.
pub const LEDGER_TABLE: &str = "ChangesHistory";

/// The kind of mutation recorded in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, SqlEnum)]
pub enum ChangeAction {
    #[default]
    Insert,
    Update,
    Delete,
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Insert => "Insert",
            Self::Update => "Update",
            Self::Delete => "Delete",
        };
        f.write_str(name)
    }
}

/// A ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Default, Entity)]
pub struct ChangesHistory {
    #[column(primary_key, autoincrement)]
    pub id: i64,
    pub table_name: String,
    #[column(unique, not_null)]
    pub sync_guid: Uuid,
    pub action: ChangeAction,
}

impl ChangesHistory {
    pub fn new(table_name: impl Into<String>, sync_guid: Uuid, action: ChangeAction) -> Self {
        Self {
            id: 0,
            table_name: table_name.into(),
            sync_guid,
            action,
        }
    }
}

impl Connection {
    /// Creates the ledger table if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns the storage error of the DDL.
    pub fn init_history(&self) -> Result<()> {
        self.create_table::<ChangesHistory>()?;
        self.history_ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Returns the whole ledger in insertion order.
    ///
    /// # Errors
    ///
    /// Returns the storage error of the query.
    pub fn history(&self) -> Result<Vec<ChangesHistory>> {
        self.ensure_history()?;
        self.table::<ChangesHistory>()?.order_by("id").to_list()
    }

    /// Returns the ledger rows of one table in insertion order.
    ///
    /// # Errors
    ///
    /// Returns the storage error of the query.
    pub fn history_for(&self, table_name: &str) -> Result<Vec<ChangesHistory>> {
        self.ensure_history()?;
        self.table::<ChangesHistory>()?
            .where_(col("table_name").eq(table_name))
            .order_by("id")
            .to_list()
    }

    fn ensure_history(&self) -> Result<()> {
        if self.history_ready.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.init_history()
    }

    /// Records one effective mutation and notifies subscribers.
    ///
    /// The ledger table itself is never tracked. A row without a sync
    /// identifier is announced but leaves no ledger entry.
    pub(crate) fn record_change(
        &self,
        table: &Arc<TableMapping>,
        sync_guid: Option<Uuid>,
        action: ChangeAction,
    ) -> Result<()> {
        if is_ledger(table) {
            return Ok(());
        }
        if let Some(sync_guid) = sync_guid {
            self.ensure_history()?;
            self.write_entry(&table.table_name, sync_guid, action)?;
        }
        self.notify(table, action);
        Ok(())
    }

    /// Records one Delete entry per removed row, then notifies once.
    pub(crate) fn record_deleted(&self, table: &Arc<TableMapping>, guids: &[Uuid]) -> Result<()> {
        if is_ledger(table) {
            return Ok(());
        }
        self.ensure_history()?;
        for guid in guids {
            self.write_entry(&table.table_name, *guid, ChangeAction::Delete)?;
        }
        self.notify(table, ChangeAction::Delete);
        Ok(())
    }

    /// Replaces the table's history with one Delete entry per existing row.
    ///
    /// Runs before the rows themselves are deleted.
    pub(crate) fn record_delete_all(&self, table: &TableMapping) -> Result<()> {
        self.ensure_history()?;
        let purged = self
            .table::<ChangesHistory>()?
            .where_(col("table_name").eq(table.table_name.as_str()))
            .delete()?;
        let guids = self.sync_guids(table, None)?;
        debug!(
            table = %table.table_name,
            purged,
            rows = guids.len(),
            "Replacing history before delete-all"
        );
        for guid in guids {
            let mut entry = ChangesHistory::new(&table.table_name, guid, ChangeAction::Delete);
            self.insert(&mut entry)?;
        }
        Ok(())
    }

    /// Reads the sync identifiers of the rows matching `filter`.
    pub(crate) fn sync_guids(
        &self,
        table: &TableMapping,
        filter: Option<&CompiledSql>,
    ) -> Result<Vec<Uuid>> {
        let d = self.dialect();
        let mut sql = format!(
            "select {} from {}",
            d.quote_identifier(&table.sync_guid().name),
            d.quote_identifier(&table.table_name)
        );
        let params = match filter {
            Some(filter) => {
                sql.push_str(" where ");
                sql.push_str(&filter.sql);
                filter.params.as_slice()
            }
            None => &[],
        };
        let set = self.query_raw(&sql, params)?;
        let mut guids = Vec::with_capacity(set.rows.len());
        for row in set.rows {
            if let Some(raw) = row.into_iter().next() {
                if let Some(guid) = Value::from_sql(StorageKind::Guid, raw)?.as_guid() {
                    guids.push(guid);
                }
            }
        }
        Ok(guids)
    }

    fn write_entry(&self, table_name: &str, sync_guid: Uuid, action: ChangeAction) -> Result<()> {
        self.table::<ChangesHistory>()?
            .where_(col("sync_guid").eq(sync_guid))
            .delete()?;
        let mut entry = ChangesHistory::new(table_name, sync_guid, action);
        self.insert(&mut entry)?;
        debug!(table = %table_name, %sync_guid, %action, "Recorded change");
        Ok(())
    }

    pub(crate) fn notify(&self, table: &Arc<TableMapping>, action: ChangeAction) {
        if is_ledger(table) {
            return;
        }
        self.subscribers.notify(&TableChanged {
            table: Arc::clone(table),
            action,
        });
    }
}

fn is_ledger(table: &TableMapping) -> bool {
    table.table_name == LEDGER_TABLE
}

#[cfg(test)]
mod tests {
    use synctrack_core::{mapping, SqlEnum, SqlValue};

    use super::*;

    #[test]
    fn test_ledger_mapping() {
        let mapping = mapping::<ChangesHistory>().unwrap();
        assert_eq!(mapping.table_name, LEDGER_TABLE);
        let columns: Vec<&str> = mapping.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(columns, vec!["Id", "TableName", "SyncGuid", "Action"]);
        assert!(mapping.has_auto_inc_pk());
        assert_eq!(mapping.sync_guid_index(), 2);
        assert!(mapping.sync_guid().is_unique());
    }

    #[test]
    fn test_actions_are_stored_as_ordinals() {
        assert!(!ChangeAction::INFO.store_as_text);
        let stored = synctrack_core::FieldType::to_value(&ChangeAction::Delete)
            .to_sql()
            .unwrap();
        assert_eq!(stored, SqlValue::Int(2));
        assert_eq!(ChangeAction::Update.to_string(), "Update");
    }
}
