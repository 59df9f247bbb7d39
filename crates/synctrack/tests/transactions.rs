mod common;

use common::*;
use synctrack::{OrmError, ResultCode};

// =============================================================================
// Physical statements
// =============================================================================

#[test]
fn test_nested_transaction_issues_one_begin_and_commit() {
    let (conn, statements) = open_recording();
    conn.create_table::<Product>().unwrap();
    conn.init_history().unwrap();
    statements.clear();

    conn.begin_transaction().unwrap();
    let savepoint = conn.save_transaction_point().unwrap();
    conn.insert(&mut product("Orange Juice")).unwrap();
    conn.release(&savepoint).unwrap();
    conn.commit().unwrap();

    assert_eq!(
        statements.transaction_control(),
        vec![
            "begin transaction".to_string(),
            format!("savepoint {savepoint}"),
            format!("release {savepoint}"),
            "commit".to_string(),
        ]
    );
    assert_eq!(conn.table::<Product>().unwrap().count().unwrap(), 1);
}

#[test]
fn test_run_in_transaction_outside_transaction_uses_savepoint_only() {
    let (conn, statements) = open_recording();
    conn.create_table::<Product>().unwrap();
    statements.clear();

    let id = conn
        .run_in_transaction(|conn| {
            let mut kiwi = product("Kiwi");
            conn.insert(&mut kiwi)?;
            Ok(kiwi.id)
        })
        .unwrap();
    assert_eq!(id, 1);
    assert!(!conn.is_in_transaction());

    let control = statements.transaction_control();
    assert_eq!(control.len(), 2);
    assert!(control[0].starts_with("savepoint S"));
    assert!(control[0].ends_with("D0"));
    assert!(control[1].starts_with("release S"));
}

// =============================================================================
// Rollback
// =============================================================================

#[test]
fn test_run_in_transaction_rolls_back_on_error() {
    let conn = open();
    conn.create_table::<Product>().unwrap();

    let result: synctrack::Result<()> = conn.run_in_transaction(|conn| {
        conn.insert(&mut product("Kiwi"))?;
        Err(OrmError::InvalidOperation("stop".into()))
    });
    assert!(matches!(result, Err(OrmError::InvalidOperation(ref m)) if m == "stop"));
    assert!(!conn.is_in_transaction());
    assert_eq!(conn.table::<Product>().unwrap().count().unwrap(), 0);

    conn.insert(&mut product("Lime")).unwrap();
    assert_eq!(conn.history_for("Product").unwrap().len(), 1);
}

#[test]
fn test_rollback_to_savepoint_keeps_outer_work() {
    let conn = open();
    conn.create_table::<Product>().unwrap();
    conn.begin_transaction().unwrap();
    conn.insert(&mut product("outer")).unwrap();

    let savepoint = conn.save_transaction_point().unwrap();
    conn.insert(&mut product("inner")).unwrap();
    conn.rollback_to(&savepoint).unwrap();
    assert!(conn.is_in_transaction());
    conn.commit().unwrap();

    let names: Vec<String> = conn
        .table::<Product>()
        .unwrap()
        .to_list()
        .unwrap()
        .into_iter()
        .map(|p| p.name)
        .collect();
    assert_eq!(names, vec!["outer"]);
}

#[test]
fn test_rollback_discards_everything() {
    let conn = open();
    conn.create_table::<Product>().unwrap();
    conn.begin_transaction().unwrap();
    conn.save_transaction_point().unwrap();
    conn.insert(&mut product("gone")).unwrap();
    conn.rollback_to("").unwrap();
    assert!(!conn.is_in_transaction());
    assert_eq!(conn.table::<Product>().unwrap().count().unwrap(), 0);

    // nothing open: no statement issued
    conn.rollback().unwrap();
    conn.commit().unwrap();
}

// =============================================================================
// Misuse
// =============================================================================

#[test]
fn test_release_rejects_foreign_savepoints() {
    let conn = open();
    let err = conn.release("S1D0").unwrap_err();
    assert!(matches!(err, OrmError::InvalidSavepoint(ref name) if name == "S1D0"));
    assert_eq!(err.code(), ResultCode::Misuse);

    conn.begin_transaction().unwrap();
    let savepoint = conn.save_transaction_point().unwrap();
    conn.release(&savepoint).unwrap();
    assert!(matches!(
        conn.release(&savepoint),
        Err(OrmError::InvalidSavepoint(_))
    ));
    conn.rollback().unwrap();
}

#[test]
fn test_begin_inside_transaction_fails() {
    let conn = open();
    conn.begin_transaction().unwrap();
    let err = conn.begin_transaction().unwrap_err();
    assert_eq!(
        err.to_string(),
        "Cannot begin a transaction while already in a transaction."
    );
    assert!(conn.is_in_transaction());
    conn.commit().unwrap();
}

#[test]
fn test_failed_begin_restores_depth() {
    let conn = open();
    conn.close().unwrap();
    let err = conn.begin_transaction().unwrap_err();
    assert_eq!(err.code(), ResultCode::Misuse);
    assert!(!conn.is_in_transaction());
}
