//! Row materialization.
//!
//! A [`RowPlan`] pairs each result column with a mapped column once per
//! query; rows are then decoded without looking names up again.

use std::sync::Arc;

use synctrack_core::coerce::Decoder;
use synctrack_core::{Mapping, SqlValue, StorageKind, TableMapping, Value};

use crate::connection::Connection;
use crate::driver::{ColumnDesc, Cursor};
use crate::error::Result;

#[derive(Debug, Clone, Copy)]
struct Slot {
    column: usize,
    kind: StorageKind,
    decoder: Option<Decoder>,
}

impl Slot {
    // decoders expect a non-NULL value
    fn decode(&self, raw: SqlValue) -> Result<Value> {
        let value = match self.decoder {
            Some(decode) => decode(raw)?,
            None => Value::from_sql(self.kind, raw)?,
        };
        Ok(value)
    }
}

/// Result column to mapped column assignment for one query.
#[derive(Debug, Clone)]
pub(crate) struct RowPlan {
    slots: Vec<Option<Slot>>,
}

impl RowPlan {
    /// Matches result columns to mapped columns by name, ignoring case.
    /// Unmatched result columns are skipped.
    pub(crate) fn new(table: &TableMapping, columns: &[ColumnDesc]) -> Self {
        let slots = columns
            .iter()
            .map(|desc| {
                table.position_of(&desc.name).map(|i| {
                    let kind = table.columns[i].kind;
                    Slot {
                        column: i,
                        kind,
                        decoder: kind.decoder(),
                    }
                })
            })
            .collect();
        Self { slots }
    }

    /// Builds an entity from a row. NULL values leave the field at its
    /// default.
    pub(crate) fn materialize<T: Default>(&self, mapping: &Mapping<T>, row: Vec<SqlValue>) -> Result<T> {
        let mut entity = T::default();
        for (slot, raw) in self.slots.iter().zip(row) {
            let Some(slot) = slot else { continue };
            if raw.is_null() {
                continue;
            }
            let value = slot.decode(raw)?;
            if !value.is_null() {
                mapping.set(&mut entity, slot.column, value)?;
            }
        }
        Ok(entity)
    }

    /// Decodes a row into values aligned with the mapping's columns.
    pub(crate) fn values(&self, column_count: usize, row: Vec<SqlValue>) -> Result<Vec<Value>> {
        let mut values = vec![Value::Null; column_count];
        for (slot, raw) in self.slots.iter().zip(row) {
            if let Some(slot) = slot {
                if !raw.is_null() {
                    values[slot.column] = slot.decode(raw)?;
                }
            }
        }
        Ok(values)
    }
}

/// Rows of a deferred query, read from the database and materialized one
/// at a time. Dropping it early abandons the rest of the statement.
pub struct DeferredRows<'c, T> {
    conn: &'c Connection,
    mapping: Arc<Mapping<T>>,
    plan: RowPlan,
    cursor: Cursor,
    done: bool,
}

impl<'c, T> DeferredRows<'c, T> {
    pub(crate) fn new(conn: &'c Connection, mapping: Arc<Mapping<T>>, cursor: Cursor) -> Self {
        let plan = RowPlan::new(&mapping, cursor.columns());
        Self {
            conn,
            mapping,
            plan,
            cursor,
            done: false,
        }
    }
}

impl<T: Default> Iterator for DeferredRows<'_, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.conn.next_row(&mut self.cursor) {
            Ok(Some(row)) => Some(self.plan.materialize(&self.mapping, row)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                self.conn.close_cursor(&mut self.cursor);
                Some(Err(err))
            }
        }
    }
}

impl<T> Drop for DeferredRows<'_, T> {
    fn drop(&mut self) {
        if !self.done {
            self.conn.close_cursor(&mut self.cursor);
        }
    }
}

impl<T> std::fmt::Debug for DeferredRows<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredRows")
            .field("table", &self.mapping.table_name)
            .field("cursor", &self.cursor.id())
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}
