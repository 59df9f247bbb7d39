//! Typed, chainable queries over one table.
//!
//! A [`TableQuery`] is immutable: every builder method returns a new query
//! and leaves the receiver untouched, so a base query can be reused for
//! several derived ones.
//!
//! ```ignore
//! let recent = conn
//!     .table::<Order>()?
//!     .where_(col("customer_id").eq(7))
//!     .order_by_descending("placed_at")
//!     .take(10)
//!     .to_list()?;
//! ```

use std::sync::Arc;

use synctrack_core::query::compile;
use synctrack_core::{CompiledSql, Entity, Expr, Mapping, Param};

use crate::connection::Connection;
use crate::error::{OrmError, Result};
use crate::materialize::DeferredRows;

/// A sort key; the field is resolved when the query runs.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Ordering {
    field: String,
    ascending: bool,
}

/// A lazy query over the table of `T`.
pub struct TableQuery<'c, T> {
    conn: &'c Connection,
    mapping: Arc<Mapping<T>>,
    filter: Option<Expr>,
    orderings: Vec<Ordering>,
    limit: Option<usize>,
    offset: Option<usize>,
    deferred: bool,
}

// Manual Clone implementation to avoid T: Clone bound
impl<T> Clone for TableQuery<'_, T> {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn,
            mapping: Arc::clone(&self.mapping),
            filter: self.filter.clone(),
            orderings: self.orderings.clone(),
            limit: self.limit,
            offset: self.offset,
            deferred: self.deferred,
        }
    }
}

impl<T> std::fmt::Debug for TableQuery<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableQuery")
            .field("table", &self.mapping.table_name)
            .field("filter", &self.filter)
            .field("orderings", &self.orderings)
            .field("limit", &self.limit)
            .field("offset", &self.offset)
            .field("deferred", &self.deferred)
            .finish_non_exhaustive()
    }
}

impl<'c, T: Entity> TableQuery<'c, T> {
    pub(crate) const fn new(conn: &'c Connection, mapping: Arc<Mapping<T>>) -> Self {
        Self {
            conn,
            mapping,
            filter: None,
            orderings: Vec::new(),
            limit: None,
            offset: None,
            deferred: false,
        }
    }

    /// Returns the table mapping this query reads.
    #[must_use]
    pub fn mapping(&self) -> &Mapping<T> {
        &self.mapping
    }

    /// Adds a predicate; several predicates are combined with AND.
    #[must_use]
    pub fn where_(&self, predicate: Expr) -> Self {
        let mut query = self.clone();
        query.filter = Some(match query.filter.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        query
    }

    /// Sorts ascending by a field or column name.
    #[must_use]
    pub fn order_by(&self, field: &str) -> Self {
        self.add_ordering(field, true)
    }

    #[must_use]
    pub fn order_by_descending(&self, field: &str) -> Self {
        self.add_ordering(field, false)
    }

    /// Adds a secondary ascending sort key.
    #[must_use]
    pub fn then_by(&self, field: &str) -> Self {
        self.add_ordering(field, true)
    }

    #[must_use]
    pub fn then_by_descending(&self, field: &str) -> Self {
        self.add_ordering(field, false)
    }

    fn add_ordering(&self, field: &str, ascending: bool) -> Self {
        let mut query = self.clone();
        query.orderings.push(Ordering {
            field: field.to_string(),
            ascending,
        });
        query
    }

    /// Limits the number of rows returned.
    #[must_use]
    pub fn take(&self, n: usize) -> Self {
        let mut query = self.clone();
        query.limit = Some(n);
        query
    }

    /// Skips the first `n` rows.
    #[must_use]
    pub fn skip(&self, n: usize) -> Self {
        let mut query = self.clone();
        query.offset = Some(n);
        query
    }

    /// Makes [`TableQuery::iter`] materialize rows while iterating.
    #[must_use]
    pub fn deferred(&self) -> Self {
        let mut query = self.clone();
        query.deferred = true;
        query
    }

    // =========================================================================
    // Execution
    // =========================================================================

    fn compile_filter(&self) -> Result<Option<CompiledSql>> {
        self.filter
            .as_ref()
            .map(|filter| compile(filter, &self.mapping, self.conn.dialect()))
            .transpose()
            .map_err(OrmError::from)
    }

    /// Renders `select <selection> from <table>` with the filter, sort keys
    /// and paging of this query.
    fn select_sql(&self, selection: &str, paged: bool) -> Result<(String, Vec<Param>)> {
        let d = self.conn.dialect();
        let mut sql = format!(
            "select {selection} from {}",
            d.quote_identifier(&self.mapping.table_name)
        );
        let mut params = Vec::new();
        if let Some(filter) = self.compile_filter()? {
            sql.push_str(" where ");
            sql.push_str(&filter.sql);
            params = filter.params;
        }
        if !paged {
            return Ok((sql, params));
        }
        if !self.orderings.is_empty() {
            let keys = self
                .orderings
                .iter()
                .map(|ordering| {
                    let column = d.quote_identifier(&self.mapping.resolve_column(&ordering.field)?.name);
                    Ok(if ordering.ascending {
                        column
                    } else {
                        format!("{column} desc")
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            sql.push_str(" order by ");
            sql.push_str(&keys.join(", "));
        }
        sql.push_str(&d.paging(self.limit, self.offset, !self.orderings.is_empty()));
        Ok((sql, params))
    }

    /// Runs the query and returns every row.
    ///
    /// # Errors
    ///
    /// Returns a compile error for an unsupported predicate, or the storage
    /// error of the query.
    pub fn to_list(&self) -> Result<Vec<T>> {
        let (sql, params) = self.select_sql("*", true)?;
        self.conn.query_mapped(&self.mapping, &sql, &params)
    }

    /// Like [`TableQuery::to_list`], as a boxed slice.
    ///
    /// # Errors
    ///
    /// See [`TableQuery::to_list`].
    pub fn to_array(&self) -> Result<Box<[T]>> {
        Ok(self.to_list()?.into_boxed_slice())
    }

    /// Runs the query; rows are materialized up front unless the query is
    /// [`deferred`](TableQuery::deferred).
    ///
    /// # Errors
    ///
    /// See [`TableQuery::to_list`].
    pub fn iter(&self) -> Result<Rows<'c, T>> {
        if self.deferred {
            let (sql, params) = self.select_sql("*", true)?;
            let rows = self
                .conn
                .deferred_mapped(Arc::clone(&self.mapping), &sql, &params)?;
            Ok(Rows::Deferred(rows))
        } else {
            Ok(Rows::Loaded(self.to_list()?.into_iter()))
        }
    }

    /// Counts the rows matching the filter; sort keys and paging are
    /// ignored.
    ///
    /// # Errors
    ///
    /// See [`TableQuery::to_list`].
    pub fn count(&self) -> Result<u64> {
        let (sql, params) = self.select_sql("count(*)", false)?;
        let count = self.conn.execute_scalar::<i64>(&sql, &params)?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    /// Counts the rows matching the filter and `predicate`.
    ///
    /// # Errors
    ///
    /// See [`TableQuery::to_list`].
    pub fn count_where(&self, predicate: Expr) -> Result<u64> {
        self.where_(predicate).count()
    }

    /// Returns the row at `index`, in query order.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::NotFound`] when there are fewer rows.
    pub fn element_at(&self, index: usize) -> Result<T> {
        self.skip(index).first()
    }

    /// Returns the first row.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::NotFound`] when the query yields no rows.
    pub fn first(&self) -> Result<T> {
        self.first_or_default()?.ok_or_else(|| OrmError::NotFound {
            table: self.mapping.table_name.clone(),
        })
    }

    /// Returns the first row, if any.
    ///
    /// # Errors
    ///
    /// See [`TableQuery::to_list`].
    pub fn first_or_default(&self) -> Result<Option<T>> {
        Ok(self.take(1).to_list()?.into_iter().next())
    }

    /// Returns the first row matching `predicate`.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::NotFound`] when no row matches.
    pub fn first_where(&self, predicate: Expr) -> Result<T> {
        self.where_(predicate).first()
    }

    /// Returns the first row matching `predicate`, if any.
    ///
    /// # Errors
    ///
    /// See [`TableQuery::to_list`].
    pub fn first_or_default_where(&self, predicate: Expr) -> Result<Option<T>> {
        self.where_(predicate).first_or_default()
    }

    /// Deletes the rows matching the filter.
    ///
    /// Each deleted row leaves a Delete entry in the change history.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::InvalidOperation`] when the query has paging or
    /// no filter, or the storage error of the delete.
    pub fn delete(&self) -> Result<u64> {
        if self.limit.is_some() || self.offset.is_some() {
            return Err(OrmError::invalid("Cannot delete with limits or offsets"));
        }
        let Some(filter) = self.compile_filter()? else {
            return Err(OrmError::invalid("No condition specified"));
        };
        self.conn.delete_compiled(self.mapping.table(), &filter)
    }

    /// Deletes the rows matching the filter and `predicate`.
    ///
    /// # Errors
    ///
    /// See [`TableQuery::delete`].
    pub fn delete_where(&self, predicate: Expr) -> Result<u64> {
        self.where_(predicate).delete()
    }
}

/// Rows produced by [`TableQuery::iter`].
#[derive(Debug)]
pub enum Rows<'c, T> {
    Loaded(std::vec::IntoIter<T>),
    Deferred(DeferredRows<'c, T>),
}

impl<T: Default> Iterator for Rows<'_, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Self::Loaded(rows) => rows.next().map(Ok),
            Self::Deferred(rows) => rows.next(),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self {
            Self::Loaded(rows) => rows.size_hint(),
            Self::Deferred(rows) => rows.size_hint(),
        }
    }
}
