//! Process-wide cache of prepared insert commands.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex, PoisonError};

use synctrack_core::{Dialect, InsertMode, TableMapping};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CommandKey {
    type_id: TypeId,
    flags: u8,
    mode: InsertMode,
    dialect: &'static str,
}

/// Insert text for one (type, mode, dialect) combination.
///
/// The command lock serializes bind-and-execute, so one prepared command is
/// never used by two callers at once.
#[derive(Debug)]
pub(crate) struct InsertCommand {
    pub(crate) sql: String,
    /// Positions of the bound columns, in placeholder order.
    pub(crate) columns: Vec<usize>,
    lock: Mutex<()>,
}

impl InsertCommand {
    fn new(table: &TableMapping, mode: InsertMode, dialect: &dyn Dialect) -> Self {
        let columns = match mode {
            InsertMode::Insert | InsertMode::InsertOrIgnore => table.insert_columns(),
            InsertMode::InsertOrReplace => table.insert_or_replace_columns(),
        };
        Self {
            sql: dialect.insert_sql(table, &columns, mode),
            columns,
            lock: Mutex::new(()),
        }
    }

    /// Runs `f` while holding the command lock.
    pub(crate) fn run<R>(&self, f: impl FnOnce(&str) -> R) -> R {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        f(&self.sql)
    }
}

static COMMANDS: LazyLock<Mutex<HashMap<CommandKey, Arc<InsertCommand>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Returns the cached insert command, deriving it on a miss.
///
/// Derivation happens outside the cache lock; when two callers race, the
/// first stored command wins and the other is dropped.
pub(crate) fn insert_command(
    type_id: TypeId,
    table: &TableMapping,
    mode: InsertMode,
    dialect: &dyn Dialect,
) -> Arc<InsertCommand> {
    let key = CommandKey {
        type_id,
        flags: table.flags.bits(),
        mode,
        dialect: dialect.name(),
    };
    if let Some(command) = lock().get(&key) {
        return Arc::clone(command);
    }
    let command = Arc::new(InsertCommand::new(table, mode, dialect));
    Arc::clone(lock().entry(key).or_insert(command))
}

/// Drops every cached insert command.
pub fn reset_insert_commands() {
    lock().clear();
}

fn lock() -> std::sync::MutexGuard<'static, HashMap<CommandKey, Arc<InsertCommand>>> {
    COMMANDS.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use synctrack_core::schema::FieldMeta;
    use synctrack_core::{CreateFlags, SqlServerDialect, SqliteDialect, StorageKind};

    use super::*;

    struct Marker;

    fn table() -> TableMapping {
        let field = |name: &str, property: &'static str, kind, pk| FieldMeta {
            name: name.to_string(),
            property,
            kind,
            optional: false,
            primary_key: pk,
            autoincrement: pk,
            ignore: false,
            not_null: false,
            indices: Vec::new(),
            max_length: None,
            collation: None,
        };
        TableMapping::from_fields(
            "Marker",
            "Marker",
            &[
                field("Id", "id", StorageKind::I64, true),
                field("Name", "name", StorageKind::String, false),
            ],
            CreateFlags::NONE,
        )
        .unwrap()
    }

    #[test]
    fn test_commands_are_cached_per_mode_and_dialect() {
        let table = table();
        let id = TypeId::of::<Marker>();
        let first = insert_command(id, &table, InsertMode::Insert, &SqliteDialect);
        let again = insert_command(id, &table, InsertMode::Insert, &SqliteDialect);
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(
            first.sql,
            "insert into \"Marker\"(\"Name\",\"SyncGuid\") values (?,?)"
        );
        assert_eq!(first.columns, vec![1, 2]);

        let replace = insert_command(id, &table, InsertMode::InsertOrReplace, &SqliteDialect);
        assert_eq!(replace.columns, vec![0, 1, 2]);
        assert!(replace.sql.starts_with("insert or replace into"));

        let server = insert_command(id, &table, InsertMode::Insert, &SqlServerDialect);
        assert!(!Arc::ptr_eq(&first, &server));
        assert_eq!(server.run(str::len), server.sql.len());
    }
}
