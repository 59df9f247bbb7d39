//! Predicate compilation against derived mappings.

mod common;

use common::{Article, Priority, Status, Ticket};
use synctrack_core::query::{col, compile, lit, CompiledSql, Expr};
use synctrack_core::schema::Entity;
use synctrack_core::{
    Dialect, Error, Mapping, ResultCode, SqlServerDialect, SqlValue, SqliteDialect,
    StringComparison,
};
use uuid::Uuid;

fn sqlite<T: Entity>(expr: &Expr) -> CompiledSql {
    let mapping = common::mapping::<T>();
    compile(expr, &mapping, &SqliteDialect).unwrap()
}

fn compile_err<T: Entity>(expr: &Expr) -> Error {
    let mapping: Mapping<T> = common::mapping::<T>();
    compile(expr, &mapping, &SqliteDialect).unwrap_err()
}

// =============================================================================
// Columns and constants
// =============================================================================

#[test]
fn test_columns_resolve_by_field_then_column_name() {
    let by_field = sqlite::<Article>(&col("title").eq("Launch"));
    let by_column = sqlite::<Article>(&col("headline").eq("Launch"));
    assert_eq!(by_field.sql, "(\"Headline\" = ?)");
    assert_eq!(by_field.sql, by_column.sql);
}

#[test]
fn test_flattened_columns_are_addressable() {
    let compiled = sqlite::<Article>(&col("created_by").eq("ops"));
    assert_eq!(compiled.sql, "(\"CreatedBy\" = ?)");
}

#[test]
fn test_enum_constants_follow_storage_mode() {
    let text = sqlite::<Article>(&col("status").eq(Status::Archived));
    assert_eq!(text.params[0].value, SqlValue::Text("Archived".into()));

    let ordinal = sqlite::<Article>(&col("priority").eq(Priority::High));
    assert_eq!(ordinal.params[0].value, SqlValue::Int(2));
}

#[test]
fn test_guid_constant_is_text() {
    let key = Uuid::new_v4();
    let compiled = sqlite::<Article>(&col("key").eq(key));
    assert_eq!(
        compiled.params[0].value,
        SqlValue::Text(key.hyphenated().to_string())
    );
}

#[test]
fn test_optional_field_compared_with_null() {
    let compiled = sqlite::<Article>(&col("author_id").eq(None::<i32>).or(col("author_id").gt(3)));
    assert_eq!(
        compiled.sql,
        "((\"AuthorId\" is ?) or (\"AuthorId\" > ?))"
    );
    let names: Vec<&str> = compiled.params.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["AuthorId", "AuthorId1"]);
}

// =============================================================================
// Documented shapes
// =============================================================================

#[test]
fn test_age_and_null_name() {
    let compiled = sqlite::<Ticket>(&col("id").gt(30).and(col("subject").eq(None::<String>)));
    assert_eq!(compiled.sql, "((\"Id\" > ?) and (\"Subject\" is ?))");
    assert!(!compiled.sql.contains("= ?"));
}

#[test]
fn test_prefix_modes() {
    let exact = sqlite::<Ticket>(&col("subject").starts_with_cmp("Jo", StringComparison::Ordinal));
    assert!(exact.sql.contains("substr(\"Subject\", 1, 2) =  ?"));

    let folded = sqlite::<Ticket>(
        &col("subject").starts_with_cmp("Jo", StringComparison::OrdinalIgnoreCase),
    );
    assert!(folded.sql.contains("like (? || '%')"));

    let invariant = sqlite::<Ticket>(
        &col("subject").starts_with_cmp("Jo", StringComparison::InvariantCulture),
    );
    assert_eq!(invariant.sql, exact.sql);
}

#[test]
fn test_not_of_membership() {
    let compiled = sqlite::<Ticket>(&!col("customer_id").is_in([3, 4]));
    assert_eq!(compiled.sql, "NOT((\"CustomerId\" in (?,?)))");
    assert_eq!(
        compiled.params.iter().map(|p| p.value.clone()).collect::<Vec<_>>(),
        vec![SqlValue::Int(3), SqlValue::Int(4)]
    );
}

#[test]
fn test_bitwise_operators() {
    let compiled = sqlite::<Ticket>(&col("customer_id").bit_and(4).ne(0));
    assert_eq!(compiled.sql, "((\"CustomerId\" & ?) != ?)");
}

#[test]
fn test_suffix_repeats_receiver_parameters() {
    let compiled = sqlite::<Ticket>(&col("subject").replace("a", "b").ends_with("x"));
    assert_eq!(
        compiled.sql,
        "( substr((replace(\"Subject\",?,?)), length((replace(\"Subject\",?,?))) - 1+1, 1) =  ?)"
    );
    assert_eq!(compiled.sql.matches('?').count(), compiled.params.len());
    assert_eq!(
        compiled.params.iter().map(|p| p.value.clone()).collect::<Vec<_>>(),
        vec![
            SqlValue::Text("a".into()),
            SqlValue::Text("b".into()),
            SqlValue::Text("a".into()),
            SqlValue::Text("b".into()),
            SqlValue::Text("x".into()),
        ]
    );
}

#[test]
fn test_null_or_empty_repeats_bound_operand() {
    let compiled = sqlite::<Ticket>(&lit("").is_null_or_empty().or(col("subject").is_null_or_empty()));
    assert_eq!(
        compiled.sql,
        "((? is null or ? = '') or (\"Subject\" is null or \"Subject\" = ''))"
    );
    assert_eq!(compiled.params.len(), 2);
    assert_eq!(compiled.params[0], compiled.params[1]);
}

#[test]
fn test_named_placeholders_are_bound_once() {
    let mapping = common::mapping::<Ticket>();
    let compiled = compile(
        &col("subject").replace("a", "b").ends_with("x"),
        &mapping,
        &SqlServerDialect,
    )
    .unwrap();
    assert_eq!(compiled.sql.matches('@').count(), 5);
    assert_eq!(compiled.params.len(), 3);
}

// =============================================================================
// Errors
// =============================================================================

#[test]
fn test_compile_errors_are_misuse() {
    let unknown = compile_err::<Ticket>(&col("nope").eq(1));
    assert_eq!(unknown.code(), ResultCode::Misuse);

    let arithmetic = compile_err::<Ticket>(&(col("id") * 2).gt(1));
    assert_eq!(arithmetic.to_string(), "Cannot get SQL for: Multiply");

    let conditional = compile_err::<Ticket>(&Expr::conditional(col("id").gt(1), 1, 0).eq(1));
    assert_eq!(conditional.to_string(), "Cannot compile: Conditional");

    let null_or = compile_err::<Ticket>(&col("subject").eq("x").or(lit(None::<bool>)));
    assert!(matches!(null_or, Error::UnsupportedNullComparison(_)));
}

// =============================================================================
// Dialects
// =============================================================================

#[test]
fn test_sql_server_placeholders_are_named() {
    let mapping = common::mapping::<Ticket>();
    let dialect: &dyn Dialect = &SqlServerDialect;
    let compiled = compile(
        &col("subject").contains("late").and(col("id").ge(10)),
        &mapping,
        dialect,
    )
    .unwrap();
    assert_eq!(
        compiled.sql,
        "(( charindex(@Subject,[Subject]) >0 ) and ([Id] >= @Id))"
    );
    let names: Vec<&str> = compiled.params.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["Subject", "Id"]);
}
