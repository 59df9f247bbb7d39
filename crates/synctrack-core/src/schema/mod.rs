//! Registration-time schema descriptions.
//!
//! An [`Entity`] lists its fields as [`FieldDef`]s: column metadata plus
//! typed accessor closures. The reflector in [`mapping`] turns that list
//! into a [`TableMapping`], and [`registry`] caches one mapping per type.
//!
//! `#[derive(Entity)]` generates the field list:
//!
//! ```ignore
//! use synctrack_derive::Entity;
//!
//! #[derive(Debug, Default, Entity)]
//! pub struct Product {
//!     #[column(primary_key, autoincrement)]
//!     pub id: i64,
//!     pub name: String,
//! }
//! ```

pub mod mapping;
pub mod registry;

use std::sync::Arc;

use crate::error::Result;
use crate::types::{FieldType, StorageKind, Value};

pub use mapping::{
    Column, CreateFlags, IndexInfo, Mapping, TableMapping, DEFAULT_MAX_STRING_LENGTH,
    IMPLICIT_INDEX_SUFFIX, IMPLICIT_PK_NAME, SYNC_GUID_COLUMN,
};

/// A type that maps onto a table.
///
/// `Default` provides the instance rows are materialized into.
pub trait Entity: Default + Send + Sync + 'static {
    /// The Rust type name, used in error messages.
    fn type_name() -> &'static str;

    /// The table name.
    fn table_name() -> &'static str;

    /// Field descriptors, most-derived first.
    fn fields() -> Vec<FieldDef<Self>>;
}

/// Reads a field of `T` as a [`Value`].
pub type Getter<T> = Arc<dyn Fn(&T) -> Value + Send + Sync>;

/// Writes a [`Value`] into a field of `T`.
pub type Setter<T> = Arc<dyn Fn(&mut T, Value) -> Result<()> + Send + Sync>;

/// Index membership declared on a field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexedAttr {
    /// Index name; unnamed indexes are named `<table>_<column>`.
    pub name: Option<String>,
    /// Position of the column inside a composite index.
    pub order: i32,
    /// Whether the index is unique.
    pub unique: bool,
}

/// Column metadata declared on a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMeta {
    /// Column name.
    pub name: String,
    /// Rust field name.
    pub property: &'static str,
    /// Storage kind, after unwrapping `Option`.
    pub kind: StorageKind,
    /// Whether the Rust type is an `Option`.
    pub optional: bool,
    pub primary_key: bool,
    pub autoincrement: bool,
    pub ignore: bool,
    pub not_null: bool,
    pub indices: Vec<IndexedAttr>,
    pub max_length: Option<u32>,
    pub collation: Option<String>,
}

/// A field of `T`: metadata plus typed accessors.
pub struct FieldDef<T> {
    /// Column metadata.
    pub meta: FieldMeta,
    get: Getter<T>,
    set: Setter<T>,
}

impl<T: 'static> FieldDef<T> {
    /// Creates a field descriptor from a pair of field projections.
    ///
    /// `name` is the column name, `property` the Rust field name.
    #[must_use]
    pub fn new<F>(
        name: impl Into<String>,
        property: &'static str,
        field: fn(&T) -> &F,
        field_mut: fn(&mut T) -> &mut F,
    ) -> Self
    where
        F: FieldType + 'static,
    {
        Self {
            meta: FieldMeta {
                name: name.into(),
                property,
                kind: F::storage_kind(),
                optional: F::is_nullable(),
                primary_key: false,
                autoincrement: false,
                ignore: false,
                not_null: false,
                indices: Vec::new(),
                max_length: None,
                collation: None,
            },
            get: Arc::new(move |entity: &T| field(entity).to_value()),
            set: Arc::new(move |entity: &mut T, value: Value| {
                *field_mut(entity) = F::from_value(value)?;
                Ok(())
            }),
        }
    }

    /// Marks the field as primary key.
    #[must_use]
    pub const fn primary_key(mut self) -> Self {
        self.meta.primary_key = true;
        self
    }

    /// Marks the field as auto-increment.
    #[must_use]
    pub const fn autoincrement(mut self) -> Self {
        self.meta.autoincrement = true;
        self
    }

    /// Excludes the field from the mapping.
    #[must_use]
    pub const fn ignore(mut self) -> Self {
        self.meta.ignore = true;
        self
    }

    /// Marks the column NOT NULL.
    #[must_use]
    pub const fn not_null(mut self) -> Self {
        self.meta.not_null = true;
        self
    }

    /// Adds an unnamed unique index on the column.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.meta.indices.push(IndexedAttr {
            name: None,
            order: 0,
            unique: true,
        });
        self
    }

    /// Adds the column to an index.
    #[must_use]
    pub fn indexed(mut self, name: Option<&str>, order: i32, unique: bool) -> Self {
        self.meta.indices.push(IndexedAttr {
            name: name.map(String::from),
            order,
            unique,
        });
        self
    }

    /// Sets the maximum string length.
    #[must_use]
    pub const fn max_length(mut self, length: u32) -> Self {
        self.meta.max_length = Some(length);
        self
    }

    /// Sets the column collation.
    #[must_use]
    pub fn collation(mut self, collation: impl Into<String>) -> Self {
        self.meta.collation = Some(collation.into());
        self
    }

    /// Re-targets the field onto an outer type embedding `T`.
    #[must_use]
    pub fn flatten<U: 'static>(
        self,
        outer: fn(&U) -> &T,
        outer_mut: fn(&mut U) -> &mut T,
    ) -> FieldDef<U> {
        let get = self.get;
        let set = self.set;
        FieldDef {
            meta: self.meta,
            get: Arc::new(move |entity: &U| get(outer(entity))),
            set: Arc::new(move |entity: &mut U, value: Value| set(outer_mut(entity), value)),
        }
    }

    /// Returns the accessors of the field.
    #[must_use]
    pub fn access(&self) -> FieldAccess<T> {
        FieldAccess {
            get: Arc::clone(&self.get),
            set: Arc::clone(&self.set),
        }
    }
}

/// Typed accessors for one mapped column.
pub struct FieldAccess<T> {
    get: Getter<T>,
    set: Setter<T>,
}

impl<T> Clone for FieldAccess<T> {
    fn clone(&self) -> Self {
        Self {
            get: Arc::clone(&self.get),
            set: Arc::clone(&self.set),
        }
    }
}

impl<T> FieldAccess<T> {
    /// Reads the field.
    #[must_use]
    pub fn get(&self, entity: &T) -> Value {
        (self.get)(entity)
    }

    /// Writes the field.
    ///
    /// # Errors
    ///
    /// Returns an error if the value has a different kind than the field.
    pub fn set(&self, entity: &mut T, value: Value) -> Result<()> {
        (self.set)(entity, value)
    }
}

impl<T> std::fmt::Debug for FieldDef<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldDef").field("meta", &self.meta).finish_non_exhaustive()
    }
}
