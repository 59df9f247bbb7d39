//! Typed predicates and their compilation to SQL.
//!
//! Predicates are built with [`col`] and [`lit`] and the methods of
//! [`Expr`], then compiled against a [`TableMapping`](crate::schema::TableMapping)
//! by [`compile`].

mod compiler;
mod expr;

pub use compiler::{compile, CompiledSql};
pub use expr::{col, compare_string, lit, BinaryOp, Expr, IntoExpr};
