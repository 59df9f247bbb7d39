//! Change notification.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use synctrack_core::TableMapping;

use crate::ledger::ChangeAction;

/// Delivered to subscribers once per effective mutation.
#[derive(Debug, Clone)]
pub struct TableChanged {
    pub table: Arc<TableMapping>,
    pub action: ChangeAction,
}

/// Handle returned by [`Connection::subscribe`](crate::Connection::subscribe).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(&TableChanged) + Send + Sync>;

#[derive(Default)]
pub(crate) struct Subscribers {
    next: AtomicU64,
    callbacks: RwLock<Vec<(SubscriptionId, Callback)>>,
}

impl Subscribers {
    pub(crate) fn add(&self, callback: Callback) -> SubscriptionId {
        let id = SubscriptionId(self.next.fetch_add(1, Ordering::Relaxed));
        self.callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, callback));
        id
    }

    pub(crate) fn remove(&self, id: SubscriptionId) -> bool {
        let mut callbacks = self
            .callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = callbacks.len();
        callbacks.retain(|(existing, _)| *existing != id);
        callbacks.len() != before
    }

    /// Invokes every subscriber; callbacks may use the connection.
    pub(crate) fn notify(&self, event: &TableChanged) {
        let callbacks: Vec<Callback> = self
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in callbacks {
            callback(event);
        }
    }
}

impl std::fmt::Debug for Subscribers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        f.debug_struct("Subscribers").field("count", &count).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use synctrack_core::schema::FieldMeta;
    use synctrack_core::{CreateFlags, StorageKind};

    use super::*;

    fn table() -> Arc<TableMapping> {
        let id = FieldMeta {
            name: "Id".into(),
            property: "id",
            kind: StorageKind::I64,
            optional: false,
            primary_key: true,
            autoincrement: false,
            ignore: false,
            not_null: false,
            indices: Vec::new(),
            max_length: None,
            collation: None,
        };
        Arc::new(TableMapping::from_fields("Thing", "Thing", [&id], CreateFlags::NONE).unwrap())
    }

    #[test]
    fn test_subscribe_and_remove() {
        let subscribers = Subscribers::default();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let id = subscribers.add(Arc::new(move |event: &TableChanged| {
            assert_eq!(event.table.table_name, "Thing");
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let event = TableChanged {
            table: table(),
            action: ChangeAction::Update,
        };
        subscribers.notify(&event);
        assert!(subscribers.remove(id));
        assert!(!subscribers.remove(id));
        subscribers.notify(&event);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
