//! Predicate AST and fluent builder.
//!
//! ```
//! use synctrack_core::query::{col, Expr};
//!
//! let adults = col("Age").gt(30).and(col("Name").eq(None::<String>));
//! assert!(matches!(adults, Expr::Binary { .. }));
//! ```

use std::fmt;
use std::ops::{Add, Div, Mul, Not, Sub};

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeDelta};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::types::{FieldType, StorageKind, StringComparison, Value};

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    BitAnd,
    BitOr,
    And,
    Or,
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl BinaryOp {
    /// Returns the SQL token, `None` for arithmetic.
    #[must_use]
    pub const fn sql_token(self) -> Option<&'static str> {
        Some(match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::BitAnd => "&",
            Self::BitOr => "|",
            Self::And => "and",
            Self::Or => "or",
            Self::Add | Self::Subtract | Self::Multiply | Self::Divide => return None,
        })
    }

    /// Returns whether the operator orders its operands.
    #[must_use]
    pub const fn is_ordering(self) -> bool {
        matches!(self, Self::Lt | Self::Le | Self::Gt | Self::Ge)
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Eq => "Equal",
            Self::Ne => "NotEqual",
            Self::Lt => "LessThan",
            Self::Le => "LessThanOrEqual",
            Self::Gt => "GreaterThan",
            Self::Ge => "GreaterThanOrEqual",
            Self::BitAnd => "And",
            Self::BitOr => "Or",
            Self::And => "AndAlso",
            Self::Or => "OrElse",
            Self::Add => "Add",
            Self::Subtract => "Subtract",
            Self::Multiply => "Multiply",
            Self::Divide => "Divide",
        };
        f.write_str(name)
    }
}

/// A predicate expression over the columns of one table.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A column, by field or column name.
    Column(String),
    /// A literal bound as a parameter.
    Constant(Value),
    /// A literal list, expanded to `(?,?,...)`.
    Collection(Vec<Value>),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Not(Box<Expr>),
    /// A method call, translated by name.
    Call {
        method: String,
        receiver: Option<Box<Expr>>,
        args: Vec<Expr>,
    },
    /// A conversion of the operand to another storage kind.
    Convert {
        operand: Box<Expr>,
        target: StorageKind,
    },
    /// `test ? if_true : if_false`; never compiles.
    Conditional {
        test: Box<Expr>,
        if_true: Box<Expr>,
        if_false: Box<Expr>,
    },
}

impl Expr {
    /// Returns the node kind name used in error messages.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Column(_) => "MemberAccess",
            Self::Constant(_) | Self::Collection(_) => "Constant",
            Self::Binary { .. } => "Binary",
            Self::Not(_) => "Not",
            Self::Call { .. } => "Call",
            Self::Convert { .. } => "Convert",
            Self::Conditional { .. } => "Conditional",
        }
    }

    /// Builds a conditional node.
    #[must_use]
    pub fn conditional(test: Self, if_true: impl IntoExpr, if_false: impl IntoExpr) -> Self {
        Self::Conditional {
            test: Box::new(test),
            if_true: Box::new(if_true.into_expr()),
            if_false: Box::new(if_false.into_expr()),
        }
    }

    fn binary(self, op: BinaryOp, right: impl IntoExpr) -> Self {
        Self::Binary {
            op,
            left: Box::new(self),
            right: Box::new(right.into_expr()),
        }
    }

    fn method(self, method: &str, args: Vec<Self>) -> Self {
        Self::Call {
            method: method.to_string(),
            receiver: Some(Box::new(self)),
            args,
        }
    }

    #[must_use]
    pub fn eq(self, right: impl IntoExpr) -> Self {
        self.binary(BinaryOp::Eq, right)
    }

    #[must_use]
    pub fn ne(self, right: impl IntoExpr) -> Self {
        self.binary(BinaryOp::Ne, right)
    }

    #[must_use]
    pub fn lt(self, right: impl IntoExpr) -> Self {
        self.binary(BinaryOp::Lt, right)
    }

    #[must_use]
    pub fn le(self, right: impl IntoExpr) -> Self {
        self.binary(BinaryOp::Le, right)
    }

    #[must_use]
    pub fn gt(self, right: impl IntoExpr) -> Self {
        self.binary(BinaryOp::Gt, right)
    }

    #[must_use]
    pub fn ge(self, right: impl IntoExpr) -> Self {
        self.binary(BinaryOp::Ge, right)
    }

    #[must_use]
    pub fn and(self, right: Self) -> Self {
        self.binary(BinaryOp::And, right)
    }

    #[must_use]
    pub fn or(self, right: Self) -> Self {
        self.binary(BinaryOp::Or, right)
    }

    #[must_use]
    pub fn bit_and(self, right: impl IntoExpr) -> Self {
        self.binary(BinaryOp::BitAnd, right)
    }

    #[must_use]
    pub fn bit_or(self, right: impl IntoExpr) -> Self {
        self.binary(BinaryOp::BitOr, right)
    }

    /// `self LIKE pattern`.
    #[must_use]
    pub fn like(self, pattern: impl IntoExpr) -> Self {
        Self::Call {
            method: "Like".to_string(),
            receiver: None,
            args: vec![self, pattern.into_expr()],
        }
    }

    /// Substring test on a string operand.
    #[must_use]
    pub fn contains(self, needle: impl IntoExpr) -> Self {
        self.method("Contains", vec![needle.into_expr()])
    }

    /// Membership in a literal list.
    #[must_use]
    pub fn is_in<I>(self, values: I) -> Self
    where
        I: IntoIterator,
        I::Item: FieldType,
    {
        let values = values.into_iter().map(|v| v.to_value()).collect();
        Self::Collection(values).method("Contains", vec![self])
    }

    /// Prefix test with the default comparison.
    #[must_use]
    pub fn starts_with(self, prefix: impl IntoExpr) -> Self {
        self.method("StartsWith", vec![prefix.into_expr()])
    }

    /// Prefix test with an explicit comparison.
    #[must_use]
    pub fn starts_with_cmp(self, prefix: impl IntoExpr, comparison: StringComparison) -> Self {
        self.method(
            "StartsWith",
            vec![prefix.into_expr(), comparison_constant(comparison)],
        )
    }

    /// Suffix test with the default comparison.
    #[must_use]
    pub fn ends_with(self, suffix: impl IntoExpr) -> Self {
        self.method("EndsWith", vec![suffix.into_expr()])
    }

    /// Suffix test with an explicit comparison.
    #[must_use]
    pub fn ends_with_cmp(self, suffix: impl IntoExpr, comparison: StringComparison) -> Self {
        self.method(
            "EndsWith",
            vec![suffix.into_expr(), comparison_constant(comparison)],
        )
    }

    #[must_use]
    pub fn equals(self, other: impl IntoExpr) -> Self {
        self.method("Equals", vec![other.into_expr()])
    }

    #[must_use]
    pub fn to_lower(self) -> Self {
        self.method("ToLower", Vec::new())
    }

    #[must_use]
    pub fn to_upper(self) -> Self {
        self.method("ToUpper", Vec::new())
    }

    #[must_use]
    pub fn replace(self, from: impl IntoExpr, to: impl IntoExpr) -> Self {
        self.method("Replace", vec![from.into_expr(), to.into_expr()])
    }

    #[must_use]
    pub fn is_null_or_empty(self) -> Self {
        Self::Call {
            method: "IsNullOrEmpty".to_string(),
            receiver: None,
            args: vec![self],
        }
    }

    /// Any other method; unknown names become lower-cased SQL functions.
    #[must_use]
    pub fn call(self, method: &str, args: Vec<Self>) -> Self {
        self.method(method, args)
    }

    #[must_use]
    pub fn convert(self, target: StorageKind) -> Self {
        Self::Convert {
            operand: Box::new(self),
            target,
        }
    }
}

fn comparison_constant(comparison: StringComparison) -> Expr {
    Expr::Constant(Value::I32(comparison.code()))
}

impl Not for Expr {
    type Output = Self;

    fn not(self) -> Self {
        Self::Not(Box::new(self))
    }
}

macro_rules! impl_arithmetic {
    ($($trait:ident, $method:ident => $op:ident);+ $(;)?) => {
        $(
            impl<R: IntoExpr> $trait<R> for Expr {
                type Output = Self;

                fn $method(self, rhs: R) -> Self {
                    self.binary(BinaryOp::$op, rhs)
                }
            }
        )+
    };
}

impl_arithmetic!(
    Add, add => Add;
    Sub, sub => Subtract;
    Mul, mul => Multiply;
    Div, div => Divide;
);

/// A column reference.
#[must_use]
pub fn col(name: impl Into<String>) -> Expr {
    Expr::Column(name.into())
}

/// A literal.
#[must_use]
pub fn lit(value: impl IntoExpr) -> Expr {
    value.into_expr()
}

/// The string comparison helper some front ends emit for `a = b`;
/// compared against zero, it is rewritten to a plain comparison of `a`
/// and `b` before compilation.
#[must_use]
pub fn compare_string(left: impl IntoExpr, right: impl IntoExpr, text_compare: bool) -> Expr {
    Expr::Call {
        method: "CompareString".to_string(),
        receiver: None,
        args: vec![
            left.into_expr(),
            right.into_expr(),
            Expr::Constant(Value::Bool(text_compare)),
        ],
    }
}

/// Conversion into a predicate operand.
pub trait IntoExpr {
    fn into_expr(self) -> Expr;
}

impl IntoExpr for Expr {
    fn into_expr(self) -> Expr {
        self
    }
}

impl IntoExpr for Value {
    fn into_expr(self) -> Expr {
        Expr::Constant(self)
    }
}

impl IntoExpr for &str {
    fn into_expr(self) -> Expr {
        Expr::Constant(Value::String(self.to_string()))
    }
}

impl<T: FieldType> IntoExpr for Option<T> {
    fn into_expr(self) -> Expr {
        Expr::Constant(self.to_value())
    }
}

macro_rules! impl_into_expr {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl IntoExpr for $ty {
                fn into_expr(self) -> Expr {
                    Expr::Constant(self.to_value())
                }
            }
        )+
    };
}

impl_into_expr!(
    bool,
    i8,
    i16,
    i32,
    i64,
    u8,
    u16,
    u32,
    f32,
    f64,
    Decimal,
    String,
    TimeDelta,
    NaiveDateTime,
    DateTime<FixedOffset>,
    Vec<u8>,
    Uuid,
);
