mod common;

use common::*;
use synctrack::{col, ChangeAction, ChangesHistory, LEDGER_TABLE};

fn actions(conn: &synctrack::Connection, table: &str) -> Vec<ChangeAction> {
    conn.history_for(table)
        .unwrap()
        .into_iter()
        .map(|entry| entry.action)
        .collect()
}

// =============================================================================
// Per-row entries
// =============================================================================

#[test]
fn test_each_mutation_leaves_one_entry() {
    let conn = open();
    conn.create_table::<Customer>().unwrap();
    let mut customer = Customer {
        name: "Ada".into(),
        ..Customer::default()
    };
    conn.insert(&mut customer).unwrap();
    let entries = conn.history_for("Customer").unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].sync_guid, customer.sync_guid);
    assert_eq!(entries[0].action, ChangeAction::Insert);

    customer.name = "Ada Lovelace".into();
    conn.update(&mut customer).unwrap();
    assert_eq!(actions(&conn, "Customer"), vec![ChangeAction::Update]);

    conn.delete(&customer).unwrap();
    let entries = conn.history_for("Customer").unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].sync_guid, customer.sync_guid);
    assert_eq!(entries[0].action, ChangeAction::Delete);
}

#[test]
fn test_ledger_keeps_latest_action_per_row() {
    let conn = open();
    conn.create_table::<Product>().unwrap();
    let mut orange = product("Orange Juice");
    let mut apple = product("Apple Juice");
    conn.insert(&mut orange).unwrap();
    conn.insert(&mut apple).unwrap();

    orange.name.push_str(" Updated");
    conn.update(&mut orange).unwrap();
    conn.delete(&apple).unwrap();

    assert_eq!(
        actions(&conn, "Product"),
        vec![ChangeAction::Update, ChangeAction::Delete]
    );
}

#[test]
fn test_no_entry_for_zero_row_mutations() {
    let conn = open();
    conn.create_table::<Product>().unwrap();
    conn.init_history().unwrap();

    let mut ghost = Product {
        id: 7,
        name: "ghost".into(),
    };
    assert_eq!(conn.update(&mut ghost).unwrap(), 0);
    assert_eq!(conn.delete(&ghost).unwrap(), 0);
    assert_eq!(conn.delete_by_key::<Product>(8).unwrap(), 0);
    assert!(conn.history().unwrap().is_empty());
}

#[test]
fn test_failed_insert_leaves_no_entry() {
    let conn = open();
    conn.create_table::<Setting>().unwrap();
    let mut setting = Setting {
        name: "k".into(),
        value: "v".into(),
    };
    conn.insert(&mut setting).unwrap();
    assert!(conn.insert(&mut setting).is_err());
    assert_eq!(actions(&conn, "Setting"), vec![ChangeAction::Insert]);
}

#[test]
fn test_ledger_is_never_tracked() {
    let conn = open();
    conn.create_table::<Product>().unwrap();
    conn.insert(&mut product("a")).unwrap();
    assert!(conn.history_for(LEDGER_TABLE).unwrap().is_empty());
    assert_eq!(conn.history().unwrap().len(), 1);
}

#[test]
fn test_ledger_rows_keep_supplied_guid() {
    let conn = open();
    conn.init_history().unwrap();
    let guid = uuid::Uuid::new_v4();
    let mut entry = ChangesHistory::new("Elsewhere", guid, ChangeAction::Update);
    conn.insert(&mut entry).unwrap();
    assert_eq!(entry.sync_guid, guid);
    assert_eq!(conn.history_for("Elsewhere").unwrap(), vec![entry]);
}

// =============================================================================
// Bulk deletes
// =============================================================================

#[test]
fn test_delete_all_replaces_table_history() {
    let conn = open();
    conn.create_table::<Customer>().unwrap();
    conn.create_table::<Product>().unwrap();
    let mut batch: Vec<Customer> = ["a", "b", "c"]
        .iter()
        .map(|name| Customer {
            name: (*name).to_string(),
            ..Customer::default()
        })
        .collect();
    conn.insert_all(&mut batch, true).unwrap();
    batch[0].name = "A".into();
    conn.update(&mut batch[0]).unwrap();
    conn.insert(&mut product("other")).unwrap();

    assert_eq!(conn.delete_all::<Customer>().unwrap(), 3);

    let entries = conn.history_for("Customer").unwrap();
    assert_eq!(entries.len(), 3);
    assert!(entries.iter().all(|e| e.action == ChangeAction::Delete));
    let mut guids: Vec<_> = entries.iter().map(|e| e.sync_guid).collect();
    guids.sort();
    let mut expected: Vec<_> = batch.iter().map(|c| c.sync_guid).collect();
    expected.sort();
    assert_eq!(guids, expected);

    assert_eq!(actions(&conn, "Product"), vec![ChangeAction::Insert]);
}

#[test]
fn test_delete_all_of_empty_table() {
    let conn = open();
    conn.create_table::<Product>().unwrap();
    assert_eq!(conn.delete_all::<Product>().unwrap(), 0);
    assert!(conn.history_for("Product").unwrap().is_empty());
}

#[test]
fn test_query_delete_records_matching_rows() {
    let conn = open();
    conn.create_table::<Product>().unwrap();
    let mut batch = vec![product("keep"), product("drop 1"), product("drop 2")];
    conn.insert_all(&mut batch, false).unwrap();

    let deleted = conn
        .table::<Product>()
        .unwrap()
        .delete_where(col("name").starts_with("drop"))
        .unwrap();
    assert_eq!(deleted, 2);
    assert_eq!(
        actions(&conn, "Product"),
        vec![
            ChangeAction::Insert,
            ChangeAction::Delete,
            ChangeAction::Delete
        ]
    );
}

#[test]
fn test_update_of_untracked_row_assigns_sync_guid() {
    let conn = open();
    conn.execute(
        "create table \"Customer\"(\"Id\" integer primary key autoincrement, \"Name\" varchar(140), \"City\" varchar(140))",
        &[],
    )
    .unwrap();
    conn.execute(
        "insert into \"Customer\"(\"Name\") values (?)",
        &[synctrack::Param::positional("Ada")],
    )
    .unwrap();
    conn.create_table::<Customer>().unwrap();

    let mut ada = conn.get::<Customer>(1_i64).unwrap();
    assert!(ada.sync_guid.is_nil());
    ada.city = Some("London".into());
    assert_eq!(conn.update(&mut ada).unwrap(), 1);

    assert!(!ada.sync_guid.is_nil());
    assert_eq!(conn.get::<Customer>(1_i64).unwrap().sync_guid, ada.sync_guid);
    let history = conn.history_for("Customer").unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].sync_guid, ada.sync_guid);
    assert_eq!(history[0].action, ChangeAction::Update);
}
