//! Table mappings reflected from entity field lists.

use std::collections::BTreeMap;
use std::ops::{BitOr, Deref};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::schema::{Entity, FieldAccess, FieldMeta, IndexedAttr};
use crate::types::{StorageKind, Value};

/// Default maximum length of string columns.
pub const DEFAULT_MAX_STRING_LENGTH: u32 = 140;

/// Column name treated as primary key under [`CreateFlags::IMPLICIT_PK`].
pub const IMPLICIT_PK_NAME: &str = "Id";

/// Column name suffix indexed under [`CreateFlags::IMPLICIT_INDEX`].
pub const IMPLICIT_INDEX_SUFFIX: &str = "Id";

/// Name of the change-tracking column present on every table.
pub const SYNC_GUID_COLUMN: &str = "SyncGuid";

/// Flags altering how a mapping is inferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CreateFlags(u8);

impl CreateFlags {
    /// No implicit behaviour.
    pub const NONE: Self = Self(0);
    /// A column named `Id` becomes the primary key.
    pub const IMPLICIT_PK: Self = Self(1);
    /// Columns whose name ends in `Id` are indexed.
    pub const IMPLICIT_INDEX: Self = Self(2);
    /// Both implicit behaviours.
    pub const ALL_IMPLICIT: Self = Self(3);
    /// The primary key is auto-increment.
    pub const AUTO_INC_PK: Self = Self(4);

    /// Returns whether every bit of `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns the raw bits.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for CreateFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// A mapped column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Column name in the database.
    pub name: String,
    /// Rust field name; `None` for a synthesized `SyncGuid` column.
    pub property_name: Option<&'static str>,
    pub kind: StorageKind,
    /// Whether the column admits NULL.
    pub nullable: bool,
    pub primary_key: bool,
    pub auto_increment: bool,
    /// Auto-generated GUID: auto-increment on a GUID column.
    pub auto_guid: bool,
    pub sync_guid: bool,
    pub indices: Vec<IndexedAttr>,
    pub max_string_length: Option<u32>,
    pub collation: Option<String>,
    /// Index of the backing field in [`Entity::fields`].
    pub field_index: Option<usize>,
}

impl Column {
    fn from_field(meta: &FieldMeta, field_index: usize, flags: CreateFlags) -> Self {
        let primary_key = meta.primary_key
            || (flags.contains(CreateFlags::IMPLICIT_PK)
                && meta.name.eq_ignore_ascii_case(IMPLICIT_PK_NAME));
        let auto = meta.autoincrement || (primary_key && flags.contains(CreateFlags::AUTO_INC_PK));
        let is_guid = meta.kind == StorageKind::Guid;

        let mut indices = meta.indices.clone();
        if indices.is_empty()
            && !primary_key
            && flags.contains(CreateFlags::IMPLICIT_INDEX)
            && ends_with_ignore_case(&meta.name, IMPLICIT_INDEX_SUFFIX)
        {
            indices.push(IndexedAttr::default());
        }

        Self {
            name: meta.name.clone(),
            property_name: Some(meta.property),
            kind: meta.kind,
            nullable: !(primary_key || meta.not_null),
            primary_key,
            auto_increment: auto && !is_guid,
            auto_guid: auto && is_guid,
            sync_guid: false,
            indices,
            max_string_length: meta.max_length,
            collation: meta.collation.clone(),
            field_index: Some(field_index),
        }
    }

    fn synthesized_sync_guid() -> Self {
        Self {
            name: String::from(SYNC_GUID_COLUMN),
            property_name: None,
            kind: StorageKind::Guid,
            nullable: false,
            primary_key: false,
            auto_increment: false,
            auto_guid: true,
            sync_guid: true,
            indices: vec![unique_attr()],
            max_string_length: None,
            collation: None,
            field_index: None,
        }
    }

    fn mark_sync_guid(&mut self) {
        self.sync_guid = true;
        self.auto_guid = true;
        self.nullable = false;
        if !self.is_unique() {
            self.indices.push(unique_attr());
        }
    }

    /// Returns whether the column carries an unnamed unique index, declared
    /// inline as `UNIQUE`.
    #[must_use]
    pub fn is_unique(&self) -> bool {
        self.indices.iter().any(|attr| attr.name.is_none() && attr.unique)
    }

    /// Returns whether the column is populated by the engine on insert.
    #[must_use]
    pub const fn is_auto(&self) -> bool {
        self.auto_increment || self.auto_guid
    }
}

const fn unique_attr() -> IndexedAttr {
    IndexedAttr {
        name: None,
        order: 0,
        unique: true,
    }
}

fn ends_with_ignore_case(name: &str, suffix: &str) -> bool {
    name.len() >= suffix.len()
        && name
            .get(name.len() - suffix.len()..)
            .is_some_and(|tail| tail.eq_ignore_ascii_case(suffix))
}

/// An index to create, with its columns in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexInfo {
    pub name: String,
    pub table_name: String,
    pub unique: bool,
    pub columns: Vec<String>,
}

/// The schema of a mapped table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMapping {
    /// Rust type name of the entity.
    pub type_name: &'static str,
    pub table_name: String,
    /// Columns in declaration order; `SyncGuid` comes last when synthesized.
    pub columns: Vec<Column>,
    /// Flags the mapping was built with.
    pub flags: CreateFlags,
    pk: Option<usize>,
    auto_inc_pk: Option<usize>,
    sync_guid: usize,
}

impl TableMapping {
    /// Builds a mapping from field metadata.
    ///
    /// # Errors
    ///
    /// - [`Error::NoColumns`] when every field is ignored.
    /// - [`Error::MultipleAutoIncrement`] for more than one auto-increment column.
    /// - [`Error::InvalidSyncColumn`] when a `SyncGuid` field is not a GUID.
    pub fn from_fields<'a>(
        type_name: &'static str,
        table_name: &str,
        fields: impl IntoIterator<Item = &'a FieldMeta>,
        flags: CreateFlags,
    ) -> Result<Self> {
        let mut columns: Vec<Column> = Vec::new();
        for (index, meta) in fields.into_iter().enumerate() {
            if meta.ignore {
                continue;
            }
            // flattened base fields come after own fields; first one wins
            if columns.iter().any(|c| c.name == meta.name) {
                continue;
            }
            columns.push(Column::from_field(meta, index, flags));
        }

        if columns.is_empty() {
            return Err(Error::NoColumns {
                type_name: type_name.to_string(),
            });
        }

        if columns.iter().filter(|c| c.auto_increment).count() > 1 {
            return Err(Error::MultipleAutoIncrement {
                table: table_name.to_string(),
            });
        }

        let sync_guid = match columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(SYNC_GUID_COLUMN))
        {
            Some(position) => {
                let column = &mut columns[position];
                if column.kind != StorageKind::Guid {
                    return Err(Error::InvalidSyncColumn {
                        table: table_name.to_string(),
                        found: column.kind.to_string(),
                    });
                }
                column.mark_sync_guid();
                position
            }
            None => {
                columns.push(Column::synthesized_sync_guid());
                columns.len() - 1
            }
        };

        let pk = columns.iter().rposition(|c| c.primary_key);
        let auto_inc_pk = columns
            .iter()
            .position(|c| c.primary_key && c.auto_increment);

        Ok(Self {
            type_name,
            table_name: table_name.to_string(),
            columns,
            flags,
            pk,
            auto_inc_pk,
            sync_guid,
        })
    }

    /// Returns the primary key column, if any.
    #[must_use]
    pub fn pk(&self) -> Option<&Column> {
        self.pk.map(|i| &self.columns[i])
    }

    /// Returns the position of the primary key column.
    #[must_use]
    pub const fn pk_index(&self) -> Option<usize> {
        self.pk
    }

    /// Returns the auto-increment primary key column, if any.
    #[must_use]
    pub fn auto_inc_pk(&self) -> Option<&Column> {
        self.auto_inc_pk.map(|i| &self.columns[i])
    }

    #[must_use]
    pub const fn has_auto_inc_pk(&self) -> bool {
        self.auto_inc_pk.is_some()
    }

    /// Returns the `SyncGuid` column.
    #[must_use]
    pub fn sync_guid(&self) -> &Column {
        &self.columns[self.sync_guid]
    }

    #[must_use]
    pub const fn sync_guid_index(&self) -> usize {
        self.sync_guid
    }

    /// Finds a column by database name, ignoring ASCII case.
    #[must_use]
    pub fn find_column(&self, name: &str) -> Option<&Column> {
        self.position_of(name).map(|i| &self.columns[i])
    }

    /// Finds the position of a column by database name, ignoring ASCII case.
    #[must_use]
    pub fn position_of(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Finds a column by Rust field name.
    #[must_use]
    pub fn find_column_with_property_name(&self, property: &str) -> Option<&Column> {
        self.columns
            .iter()
            .find(|c| c.property_name == Some(property))
    }

    /// Resolves a predicate operand: field name first, then column name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownColumn`] if nothing matches.
    pub fn resolve_column(&self, name: &str) -> Result<&Column> {
        self.find_column_with_property_name(name)
            .or_else(|| self.find_column(name))
            .ok_or_else(|| Error::UnknownColumn {
                table: self.table_name.clone(),
                column: name.to_string(),
            })
    }

    /// Positions of the columns written by a plain insert.
    ///
    /// Auto-increment columns are left to the database.
    #[must_use]
    pub fn insert_columns(&self) -> Vec<usize> {
        (0..self.columns.len())
            .filter(|&i| !self.columns[i].auto_increment)
            .collect()
    }

    /// Positions of the columns written by insert-or-replace: all of them.
    #[must_use]
    pub fn insert_or_replace_columns(&self) -> Vec<usize> {
        (0..self.columns.len()).collect()
    }

    /// Positions of the columns assigned by an update.
    #[must_use]
    pub fn update_columns(&self) -> Vec<usize> {
        (0..self.columns.len())
            .filter(|&i| Some(i) != self.pk && i != self.sync_guid)
            .collect()
    }

    /// Groups the non-inline index attributes into indexes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InconsistentIndex`] when columns sharing an index
    /// name disagree on uniqueness.
    pub fn indexes(&self) -> Result<Vec<IndexInfo>> {
        let mut grouped: BTreeMap<String, (bool, Vec<(i32, String)>)> = BTreeMap::new();
        for column in &self.columns {
            for attr in &column.indices {
                if attr.name.is_none() && attr.unique {
                    continue;
                }
                let name = attr
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("{}_{}", self.table_name, column.name));
                let entry = grouped
                    .entry(name.clone())
                    .or_insert_with(|| (attr.unique, Vec::new()));
                if entry.0 != attr.unique {
                    return Err(Error::InconsistentIndex { index: name });
                }
                entry.1.push((attr.order, column.name.clone()));
            }
        }

        Ok(grouped
            .into_iter()
            .map(|(name, (unique, mut columns))| {
                columns.sort_by_key(|(order, _)| *order);
                IndexInfo {
                    name,
                    table_name: self.table_name.clone(),
                    unique,
                    columns: columns.into_iter().map(|(_, column)| column).collect(),
                }
            })
            .collect())
    }
}

/// A table mapping bound to its entity type.
///
/// Dereferences to the type-erased [`TableMapping`].
pub struct Mapping<T> {
    table: Arc<TableMapping>,
    access: Vec<Option<FieldAccess<T>>>,
}

impl<T: Entity> Mapping<T> {
    /// Reflects `T` with the given flags.
    ///
    /// # Errors
    ///
    /// See [`TableMapping::from_fields`].
    pub fn build(flags: CreateFlags) -> Result<Self> {
        let fields = T::fields();
        let table = TableMapping::from_fields(
            T::type_name(),
            T::table_name(),
            fields.iter().map(|f| &f.meta),
            flags,
        )?;
        let access = table
            .columns
            .iter()
            .map(|c| c.field_index.map(|i| fields[i].access()))
            .collect();
        Ok(Self {
            table: Arc::new(table),
            access,
        })
    }
}

impl<T> Mapping<T> {
    /// Returns the shared table schema.
    #[must_use]
    pub const fn table(&self) -> &Arc<TableMapping> {
        &self.table
    }

    /// Returns the accessors of a column; `None` for a synthesized column.
    #[must_use]
    pub fn accessor(&self, column: usize) -> Option<&FieldAccess<T>> {
        self.access.get(column).and_then(Option::as_ref)
    }

    /// Reads a column of `entity`; synthesized columns read as NULL.
    #[must_use]
    pub fn get(&self, entity: &T, column: usize) -> Value {
        self.accessor(column)
            .map_or(Value::Null, |access| access.get(entity))
    }

    /// Writes a column of `entity`; synthesized columns are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the value has a different kind than the field.
    pub fn set(&self, entity: &mut T, column: usize, value: Value) -> Result<()> {
        match self.accessor(column) {
            Some(access) => access.set(entity, value),
            None => Ok(()),
        }
    }

    /// Reads the primary key of `entity`.
    #[must_use]
    pub fn pk_value(&self, entity: &T) -> Option<Value> {
        self.table.pk_index().map(|i| self.get(entity, i))
    }
}

impl<T> Deref for Mapping<T> {
    type Target = TableMapping;

    fn deref(&self) -> &TableMapping {
        &self.table
    }
}

impl<T> std::fmt::Debug for Mapping<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mapping")
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(name: &str, kind: StorageKind) -> FieldMeta {
        FieldMeta {
            name: name.to_string(),
            property: "field",
            kind,
            optional: false,
            primary_key: false,
            autoincrement: false,
            ignore: false,
            not_null: false,
            indices: Vec::new(),
            max_length: None,
            collation: None,
        }
    }

    #[test]
    fn test_implicit_pk_and_index() {
        let fields = [
            meta("id", StorageKind::I64),
            meta("CustomerId", StorageKind::I64),
            meta("Name", StorageKind::String),
        ];
        let table = TableMapping::from_fields(
            "Order",
            "Order",
            &fields,
            CreateFlags::ALL_IMPLICIT | CreateFlags::AUTO_INC_PK,
        )
        .unwrap();

        let pk = table.pk().unwrap();
        assert_eq!(pk.name, "id");
        assert!(pk.auto_increment);
        assert!(!pk.nullable);
        assert!(table.has_auto_inc_pk());

        let customer = table.find_column("customerid").unwrap();
        assert_eq!(customer.indices, vec![IndexedAttr::default()]);
        assert!(table.find_column("Name").unwrap().indices.is_empty());
        assert!(table.find_column("Name").unwrap().nullable);
    }

    #[test]
    fn test_no_flags_means_no_implicit_pk() {
        let fields = [meta("Id", StorageKind::I64)];
        let table = TableMapping::from_fields("T", "T", &fields, CreateFlags::NONE).unwrap();
        assert!(table.pk().is_none());
        assert!(!table.has_auto_inc_pk());
    }

    #[test]
    fn test_sync_guid_synthesized_last() {
        let fields = [meta("Name", StorageKind::String)];
        let table = TableMapping::from_fields("T", "T", &fields, CreateFlags::NONE).unwrap();
        assert_eq!(table.columns.len(), 2);
        let sync = table.sync_guid();
        assert_eq!(sync.name, SYNC_GUID_COLUMN);
        assert_eq!(table.sync_guid_index(), 1);
        assert!(sync.auto_guid && sync.sync_guid && sync.is_unique());
        assert!(!sync.nullable);
        assert!(sync.property_name.is_none());
    }

    #[test]
    fn test_declared_sync_guid_is_wrapped() {
        let fields = [meta("syncguid", StorageKind::Guid), meta("Name", StorageKind::String)];
        let table = TableMapping::from_fields("T", "T", &fields, CreateFlags::NONE).unwrap();
        assert_eq!(table.columns.len(), 2);
        assert_eq!(table.sync_guid_index(), 0);
        assert!(table.sync_guid().is_unique());
    }

    #[test]
    fn test_sync_guid_must_be_guid() {
        let fields = [meta("SyncGuid", StorageKind::String)];
        let err = TableMapping::from_fields("T", "T", &fields, CreateFlags::NONE).unwrap_err();
        assert!(matches!(err, Error::InvalidSyncColumn { .. }));
    }

    #[test]
    fn test_no_columns() {
        let mut ignored = meta("Secret", StorageKind::String);
        ignored.ignore = true;
        let err = TableMapping::from_fields("Empty", "Empty", &[ignored], CreateFlags::NONE)
            .unwrap_err();
        assert_eq!(
            err,
            Error::NoColumns {
                type_name: "Empty".into()
            }
        );
    }

    #[test]
    fn test_multiple_auto_increment() {
        let mut a = meta("A", StorageKind::I64);
        a.autoincrement = true;
        let mut b = meta("B", StorageKind::I64);
        b.autoincrement = true;
        let err = TableMapping::from_fields("T", "T", &[a, b], CreateFlags::NONE).unwrap_err();
        assert!(matches!(err, Error::MultipleAutoIncrement { .. }));
    }

    #[test]
    fn test_auto_guid_pk() {
        let mut id = meta("Id", StorageKind::Guid);
        id.primary_key = true;
        id.autoincrement = true;
        let table = TableMapping::from_fields("T", "T", &[id], CreateFlags::NONE).unwrap();
        let pk = table.pk().unwrap();
        assert!(pk.auto_guid);
        assert!(!pk.auto_increment);
        assert!(!table.has_auto_inc_pk());
    }

    #[test]
    fn test_column_sets() {
        let mut id = meta("Id", StorageKind::I64);
        id.primary_key = true;
        id.autoincrement = true;
        let fields = [id, meta("Name", StorageKind::String)];
        let table = TableMapping::from_fields("T", "T", &fields, CreateFlags::NONE).unwrap();
        assert_eq!(table.insert_columns(), vec![1, 2]);
        assert_eq!(table.insert_or_replace_columns(), vec![0, 1, 2]);
        assert_eq!(table.update_columns(), vec![1]);
    }

    #[test]
    fn test_composite_index_grouping() {
        let mut first = meta("First", StorageKind::String);
        first.indices.push(IndexedAttr {
            name: Some("IX_Name".into()),
            order: 2,
            unique: true,
        });
        let mut last = meta("Last", StorageKind::String);
        last.indices.push(IndexedAttr {
            name: Some("IX_Name".into()),
            order: 1,
            unique: true,
        });
        let mut code = meta("Code", StorageKind::String);
        code.indices.push(IndexedAttr::default());

        let table =
            TableMapping::from_fields("P", "Person", &[first, last, code], CreateFlags::NONE)
                .unwrap();
        let indexes = table.indexes().unwrap();
        assert_eq!(indexes.len(), 2);
        assert_eq!(indexes[0].name, "IX_Name");
        assert!(indexes[0].unique);
        assert_eq!(indexes[0].columns, vec!["Last", "First"]);
        assert_eq!(indexes[1].name, "Person_Code");
        assert!(!indexes[1].unique);
    }

    #[test]
    fn test_inconsistent_index() {
        let mut a = meta("A", StorageKind::String);
        a.indices.push(IndexedAttr {
            name: Some("IX".into()),
            order: 0,
            unique: true,
        });
        let mut b = meta("B", StorageKind::String);
        b.indices.push(IndexedAttr {
            name: Some("IX".into()),
            order: 1,
            unique: false,
        });
        let table = TableMapping::from_fields("T", "T", &[a, b], CreateFlags::NONE).unwrap();
        assert!(matches!(
            table.indexes(),
            Err(Error::InconsistentIndex { index }) if index == "IX"
        ));
    }

    #[test]
    fn test_resolve_column_prefers_property() {
        let mut name = meta("FullName", StorageKind::String);
        name.property = "full_name";
        let table = TableMapping::from_fields("T", "T", &[name], CreateFlags::NONE).unwrap();
        assert_eq!(table.resolve_column("full_name").unwrap().name, "FullName");
        assert_eq!(table.resolve_column("FULLNAME").unwrap().name, "FullName");
        assert!(matches!(
            table.resolve_column("missing"),
            Err(Error::UnknownColumn { .. })
        ));
    }
}
