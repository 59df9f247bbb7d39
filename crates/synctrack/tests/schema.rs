mod common;

use common::*;
use synctrack::{
    Connection, ConnectionConfig, CreateFlags, CreateTableResult, Entity, LEDGER_TABLE,
};
use synctrack_core::mapping;

// =============================================================================
// Create and migrate
// =============================================================================

#[test]
fn test_create_table_reports_columns() {
    let conn = open();
    assert_eq!(
        conn.create_table::<Customer>().unwrap(),
        CreateTableResult::Created
    );
    let columns: Vec<String> = conn
        .get_table_info("Customer")
        .unwrap()
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(columns, vec!["Id", "Name", "City", "SyncGuid"]);
    assert!(conn.get_table_info("Missing").unwrap().is_empty());

    assert_eq!(
        conn.create_table::<Customer>().unwrap(),
        CreateTableResult::Migrated
    );
}

#[derive(Debug, Default, Entity)]
#[table(name = "Gadget")]
struct GadgetV1 {
    #[column(primary_key, autoincrement)]
    id: i64,
    name: String,
}

#[derive(Debug, Default, Entity)]
#[table(name = "Gadget")]
struct GadgetV2 {
    #[column(primary_key, autoincrement)]
    id: i64,
    name: String,
    #[column(unique)]
    serial: Option<String>,
    weight: Option<f64>,
}

#[test]
fn test_migration_adds_missing_columns_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gadgets.db");
    let config = ConnectionConfig::sqlite(path.to_string_lossy());

    {
        let conn = Connection::open(config.clone()).unwrap();
        conn.create_table::<GadgetV1>().unwrap();
        conn.insert(&mut GadgetV1 {
            id: 0,
            name: "old".into(),
        })
        .unwrap();
        conn.close().unwrap();
    }

    let conn = Connection::open(config).unwrap();
    assert_eq!(
        conn.create_table::<GadgetV2>().unwrap(),
        CreateTableResult::Migrated
    );
    let info = conn.get_table_info("Gadget").unwrap();
    let names: Vec<&str> = info.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["Id", "Name", "SyncGuid", "Serial", "Weight"]);

    let old: GadgetV2 = conn.get(1).unwrap();
    assert_eq!(old.name, "old");
    assert_eq!(old.serial, None);

    let mut first = GadgetV2 {
        serial: Some("X-1".into()),
        ..GadgetV2::default()
    };
    conn.insert(&mut first).unwrap();
    let mut clash = GadgetV2 {
        serial: Some("X-1".into()),
        ..GadgetV2::default()
    };
    assert!(conn.insert(&mut clash).is_err());

    // the ledger survived the reopen
    assert_eq!(conn.history_for("Gadget").unwrap().len(), 2);
}

#[derive(Debug, Default, Entity)]
struct Order {
    id: i64,
    customer_id: i64,
    #[column(indexed(name = "IX_Order_Placed", order = 2))]
    placed_at: String,
    #[column(indexed(name = "IX_Order_Placed", order = 1))]
    region: String,
}

#[test]
fn test_indexes_are_created_with_the_table() {
    let conn = open();
    conn.create_table_with_flags::<Order>(CreateFlags::IMPLICIT_PK | CreateFlags::IMPLICIT_INDEX)
        .unwrap();
    assert!(!mapping::<Order>().unwrap().has_auto_inc_pk());

    let indexes: Vec<String> = conn
        .query_scalars(
            "select name from sqlite_master where type = 'index' and tbl_name = 'Order' \
             and sql is not null order by name",
            &[],
        )
        .unwrap();
    assert_eq!(indexes, vec!["IX_Order_Placed", "Order_CustomerId"]);

    let sql: String = conn
        .execute_scalar(
            "select sql from sqlite_master where name = 'IX_Order_Placed'",
            &[],
        )
        .unwrap();
    assert!(sql.contains("(\"Region\", \"PlacedAt\")"));
}

#[test]
fn test_create_index_default_name() {
    let conn = open();
    conn.create_table::<Customer>().unwrap();
    conn.create_index(None, "Customer", &["Name", "City"], false)
        .unwrap();
    conn.create_index_on::<Customer>("city", true).unwrap();
    conn.create_index(Some("by_name"), "Customer", &["Name"], false)
        .unwrap();

    let indexes: Vec<String> = conn
        .query_scalars(
            "select name from sqlite_master where type = 'index' and sql is not null order by name",
            &[],
        )
        .unwrap();
    assert_eq!(
        indexes,
        vec!["Customer_City", "Customer_Name_City", "by_name"]
    );
    assert!(conn.create_index_on::<Customer>("nickname", false).is_err());
}

#[test]
fn test_create_tables_and_drop() {
    let conn = open();
    let tables = vec![
        mapping::<Product>().unwrap().table().clone(),
        mapping::<Setting>().unwrap().table().clone(),
    ];
    let created = conn.create_tables(&tables).unwrap();
    assert_eq!(
        created,
        vec![
            ("Product".to_string(), CreateTableResult::Created),
            ("Setting".to_string(), CreateTableResult::Created),
        ]
    );

    conn.drop_table::<Setting>().unwrap();
    assert!(conn.get_table_info("Setting").unwrap().is_empty());
    assert!(!conn.create_database("ignored").unwrap());
    assert!(!conn.change_catalog("ignored").unwrap());
}

#[test]
fn test_dropping_the_ledger_recreates_it_lazily() {
    let conn = open();
    conn.create_table::<Product>().unwrap();
    conn.insert(&mut product("a")).unwrap();
    conn.drop_table::<synctrack::ChangesHistory>().unwrap();
    assert!(conn.get_table_info(LEDGER_TABLE).unwrap().is_empty());

    conn.insert(&mut product("b")).unwrap();
    assert_eq!(conn.history().unwrap().len(), 1);
}
