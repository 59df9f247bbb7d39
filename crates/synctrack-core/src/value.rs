//! Driver-native values and bound parameters.
//!
//! A [`SqlValue`] is what a driver binds and returns. Field values are
//! converted to and from it by the coercion rules in [`crate::types`].

use uuid::Uuid;

/// A value as exchanged with the database driver.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// NULL value.
    Null,
    /// 32-bit integer.
    Int(i32),
    /// 64-bit integer.
    BigInt(i64),
    /// Double precision float.
    Float(f64),
    /// Text value.
    Text(String),
    /// Binary blob value.
    Blob(Vec<u8>),
}

impl SqlValue {
    /// Returns whether this is NULL.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the native type of this value.
    #[must_use]
    pub const fn native_type(&self) -> NativeType {
        match self {
            Self::Null => NativeType::Null,
            Self::Int(_) | Self::BigInt(_) => NativeType::Integer,
            Self::Float(_) => NativeType::Real,
            Self::Text(_) => NativeType::Text,
            Self::Blob(_) => NativeType::Blob,
        }
    }

    /// Returns the SQL representation for inline use (escaped).
    ///
    /// Only used for trace output; statements are always parameterized.
    #[must_use]
    pub fn to_sql_inline(&self) -> String {
        match self {
            Self::Null => String::from("NULL"),
            Self::Int(n) => format!("{n}"),
            Self::BigInt(n) => format!("{n}"),
            Self::Float(f) => format!("{f}"),
            Self::Text(s) => {
                let escaped = s.replace('\'', "''");
                format!("'{escaped}'")
            }
            Self::Blob(b) => {
                let hex: String = b.iter().map(|byte| format!("{byte:02X}")).collect();
                format!("X'{hex}'")
            }
        }
    }
}

/// Column type reported by a driver for a result column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeType {
    /// The value is NULL.
    Null,
    /// Integer storage class.
    Integer,
    /// Floating point storage class.
    Real,
    /// Text storage class.
    Text,
    /// Blob storage class.
    Blob,
}

/// A named parameter bound to a statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    /// Parameter name, without the dialect prefix.
    pub name: String,
    /// Bound value.
    pub value: SqlValue,
}

impl Param {
    /// Creates a named parameter.
    pub fn new(name: impl Into<String>, value: impl ToSqlValue) -> Self {
        Self {
            name: name.into(),
            value: value.to_sql_value(),
        }
    }

    /// Creates an unnamed parameter for positional placeholders.
    pub fn positional(value: impl ToSqlValue) -> Self {
        Self::new(String::new(), value)
    }
}

/// Trait for plain values that can be bound in raw SQL calls.
pub trait ToSqlValue {
    /// Converts the value to a `SqlValue`.
    fn to_sql_value(self) -> SqlValue;
}

impl ToSqlValue for SqlValue {
    fn to_sql_value(self) -> SqlValue {
        self
    }
}

impl ToSqlValue for bool {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Int(i32::from(self))
    }
}

impl ToSqlValue for i64 {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::BigInt(self)
    }
}

impl ToSqlValue for u32 {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::BigInt(i64::from(self))
    }
}

macro_rules! impl_to_sql_int {
    ($($ty:ty),+) => {
        $(
            impl ToSqlValue for $ty {
                fn to_sql_value(self) -> SqlValue {
                    SqlValue::Int(i32::from(self))
                }
            }
        )+
    };
}

impl_to_sql_int!(i32, i16, i8, u16, u8);

impl ToSqlValue for f64 {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Float(self)
    }
}

impl ToSqlValue for f32 {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Float(f64::from(self))
    }
}

impl ToSqlValue for String {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Text(self)
    }
}

impl ToSqlValue for &str {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Text(String::from(self))
    }
}

impl ToSqlValue for Vec<u8> {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Blob(self)
    }
}

impl ToSqlValue for &[u8] {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Blob(self.to_vec())
    }
}

impl ToSqlValue for Uuid {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Text(self.hyphenated().to_string())
    }
}

impl<T: ToSqlValue> ToSqlValue for Option<T> {
    fn to_sql_value(self) -> SqlValue {
        match self {
            Some(v) => v.to_sql_value(),
            None => SqlValue::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_widths() {
        assert_eq!(7_i16.to_sql_value(), SqlValue::Int(7));
        assert_eq!(7_u32.to_sql_value(), SqlValue::BigInt(7));
        assert_eq!(true.to_sql_value(), SqlValue::Int(1));
    }

    #[test]
    fn test_inline_escaping() {
        let value = SqlValue::Text(String::from("O'Brien"));
        assert_eq!(value.to_sql_inline(), "'O''Brien'");
        assert_eq!(SqlValue::Blob(vec![0xDE, 0xAD]).to_sql_inline(), "X'DEAD'");
        assert_eq!(SqlValue::Null.to_sql_inline(), "NULL");
    }

    #[test]
    fn test_param_builders() {
        let p = Param::new("Name", "Orange Juice");
        assert_eq!(p.name, "Name");
        assert_eq!(p.value, SqlValue::Text(String::from("Orange Juice")));
        assert!(Param::positional(None::<i64>).value.is_null());
    }
}
