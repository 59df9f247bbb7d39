//! Storage kinds and typed field values.
//!
//! Every mapped field has a [`StorageKind`] decided at registration time.
//! Field accessors exchange [`Value`]s, which the coercion rules in
//! [`crate::coerce`] turn into driver-native [`SqlValue`]s and back.

use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeDelta};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Static metadata of an enum stored in a column.
///
/// Generated once per enum type by `#[derive(SqlEnum)]`.
#[derive(Debug, PartialEq, Eq)]
pub struct EnumInfo {
    /// Rust type name of the enum.
    pub type_name: &'static str,
    /// Whether values are stored as their label instead of their ordinal.
    pub store_as_text: bool,
    /// `(label, ordinal)` pairs in declaration order.
    pub variants: &'static [(&'static str, i64)],
}

impl EnumInfo {
    /// Returns the label of an ordinal.
    #[must_use]
    pub fn label(&self, ordinal: i64) -> Option<&'static str> {
        self.variants
            .iter()
            .find(|(_, value)| *value == ordinal)
            .map(|(label, _)| *label)
    }

    /// Returns the ordinal of a label, ignoring ASCII case.
    #[must_use]
    pub fn ordinal(&self, label: &str) -> Option<i64> {
        self.variants
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(label))
            .map(|(_, value)| *value)
    }
}

/// The semantic storage type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    F32,
    F64,
    Decimal,
    String,
    /// A signed time span.
    TimeSpan,
    /// A date and time without offset.
    DateTime,
    /// A date and time with a UTC offset.
    DateTimeOffset,
    Bytes,
    Guid,
    Enum(&'static EnumInfo),
}

impl StorageKind {
    /// Returns the Rust type name used in error messages.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::I8 => "i8",
            Self::I16 => "i16",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::U8 => "u8",
            Self::U16 => "u16",
            Self::U32 => "u32",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::Decimal => "Decimal",
            Self::String => "String",
            Self::TimeSpan => "TimeDelta",
            Self::DateTime => "NaiveDateTime",
            Self::DateTimeOffset => "DateTime<FixedOffset>",
            Self::Bytes => "Vec<u8>",
            Self::Guid => "Uuid",
            Self::Enum(info) => info.type_name,
        }
    }

    /// Returns whether this kind holds text.
    #[must_use]
    pub const fn is_text(&self) -> bool {
        matches!(self, Self::String)
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// An enum value together with its metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnumValue {
    /// Metadata of the enum type.
    pub info: &'static EnumInfo,
    /// Ordinal of the variant.
    pub ordinal: i64,
}

/// A typed field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    F32(f32),
    F64(f64),
    Decimal(Decimal),
    String(String),
    TimeSpan(TimeDelta),
    DateTime(NaiveDateTime),
    DateTimeOffset(DateTime<FixedOffset>),
    Bytes(Vec<u8>),
    Guid(Uuid),
    Enum(EnumValue),
}

impl Value {
    /// Returns whether this is `Null`.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the name of the value's type, for error messages.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::I8(_) => "i8",
            Self::I16(_) => "i16",
            Self::I32(_) => "i32",
            Self::I64(_) => "i64",
            Self::U8(_) => "u8",
            Self::U16(_) => "u16",
            Self::U32(_) => "u32",
            Self::F32(_) => "f32",
            Self::F64(_) => "f64",
            Self::Decimal(_) => "Decimal",
            Self::String(_) => "String",
            Self::TimeSpan(_) => "TimeDelta",
            Self::DateTime(_) => "NaiveDateTime",
            Self::DateTimeOffset(_) => "DateTime<FixedOffset>",
            Self::Bytes(_) => "Vec<u8>",
            Self::Guid(_) => "Uuid",
            Self::Enum(e) => e.info.type_name,
        }
    }

    /// Returns the text of a `String` value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the boolean of a `Bool` value.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the integer of any integer or enum value.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::I8(v) => Some(i64::from(*v)),
            Self::I16(v) => Some(i64::from(*v)),
            Self::I32(v) => Some(i64::from(*v)),
            Self::I64(v) => Some(*v),
            Self::U8(v) => Some(i64::from(*v)),
            Self::U16(v) => Some(i64::from(*v)),
            Self::U32(v) => Some(i64::from(*v)),
            Self::Enum(e) => Some(e.ordinal),
            _ => None,
        }
    }

    /// Returns the GUID of a `Guid` value.
    #[must_use]
    pub const fn as_guid(&self) -> Option<Uuid> {
        match self {
            Self::Guid(g) => Some(*g),
            _ => None,
        }
    }
}

/// Rust types that can be stored in a mapped column.
///
/// Implemented for the supported primitives, `Option<T>` and every enum
/// deriving `SqlEnum`. Field types without an implementation are rejected
/// when the entity is compiled.
pub trait FieldType: Sized {
    /// The storage kind, after unwrapping `Option`.
    fn storage_kind() -> StorageKind;

    /// Whether the Rust type itself admits "no value".
    fn is_nullable() -> bool {
        false
    }

    /// Converts to a field value.
    fn to_value(&self) -> Value;

    /// Converts from a field value of this type's kind.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unreadable`] if the value has a different kind.
    fn from_value(value: Value) -> Result<Self>;
}

fn mismatch<T>(kind: StorageKind, found: &Value) -> Result<T> {
    Err(Error::unreadable(
        kind.type_name(),
        format!("got a {} value", found.type_name()),
    ))
}

macro_rules! impl_field_type {
    ($($ty:ty => $kind:ident, $copy:expr);+ $(;)?) => {
        $(
            impl FieldType for $ty {
                fn storage_kind() -> StorageKind {
                    StorageKind::$kind
                }

                fn to_value(&self) -> Value {
                    let read: fn(&$ty) -> $ty = $copy;
                    Value::$kind(read(self))
                }

                fn from_value(value: Value) -> Result<Self> {
                    match value {
                        Value::$kind(v) => Ok(v),
                        other => mismatch(StorageKind::$kind, &other),
                    }
                }
            }
        )+
    };
}

impl_field_type!(
    bool => Bool, |v| *v;
    i8 => I8, |v| *v;
    i16 => I16, |v| *v;
    i32 => I32, |v| *v;
    i64 => I64, |v| *v;
    u8 => U8, |v| *v;
    u16 => U16, |v| *v;
    u32 => U32, |v| *v;
    f32 => F32, |v| *v;
    f64 => F64, |v| *v;
    Decimal => Decimal, |v| *v;
    String => String, Clone::clone;
    TimeDelta => TimeSpan, |v| *v;
    NaiveDateTime => DateTime, |v| *v;
    DateTime<FixedOffset> => DateTimeOffset, |v| *v;
    Vec<u8> => Bytes, Clone::clone;
    Uuid => Guid, |v| *v;
);

impl<T: FieldType> FieldType for Option<T> {
    fn storage_kind() -> StorageKind {
        T::storage_kind()
    }

    fn is_nullable() -> bool {
        true
    }

    fn to_value(&self) -> Value {
        self.as_ref().map_or(Value::Null, FieldType::to_value)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

/// Enums stored in a column, either by label or by ordinal.
///
/// Derive it with `#[derive(SqlEnum)]`; add `#[sql_enum(store_as_text)]`
/// to store labels.
pub trait SqlEnum: Sized {
    /// Metadata shared by every value of the enum.
    const INFO: &'static EnumInfo;

    /// Returns the ordinal of this variant.
    fn ordinal(&self) -> i64;

    /// Returns the variant with the given ordinal.
    fn from_ordinal(ordinal: i64) -> Option<Self>;
}

/// Converts an enum to a field value. Used by derived `FieldType` impls.
pub fn enum_to_value<E: SqlEnum>(value: &E) -> Value {
    Value::Enum(EnumValue {
        info: E::INFO,
        ordinal: value.ordinal(),
    })
}

/// Converts a field value back to an enum. Used by derived `FieldType` impls.
///
/// # Errors
///
/// Returns [`Error::Unreadable`] for non-enum values or unknown ordinals.
pub fn enum_from_value<E: SqlEnum>(value: Value) -> Result<E> {
    let ordinal = match value {
        Value::Enum(e) => e.ordinal,
        other => match other.as_i64() {
            Some(ordinal) => ordinal,
            None => return mismatch(StorageKind::Enum(E::INFO), &other),
        },
    };
    E::from_ordinal(ordinal).ok_or_else(|| {
        Error::unreadable(
            E::INFO.type_name,
            format!("{ordinal} is not a valid ordinal"),
        )
    })
}

/// How a string comparison treats case and culture.
///
/// Passed to `starts_with_cmp`/`ends_with_cmp`; the ordinal modes
/// translate to exact slicing, the case-insensitive modes to `LIKE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StringComparison {
    #[default]
    CurrentCulture,
    CurrentCultureIgnoreCase,
    InvariantCulture,
    InvariantCultureIgnoreCase,
    Ordinal,
    OrdinalIgnoreCase,
}

impl StringComparison {
    /// Returns whether the comparison ignores case.
    #[must_use]
    pub const fn ignores_case(self) -> bool {
        matches!(
            self,
            Self::CurrentCultureIgnoreCase | Self::InvariantCultureIgnoreCase | Self::OrdinalIgnoreCase
        )
    }

    /// Returns the numeric code carried in a predicate constant.
    #[must_use]
    pub const fn code(self) -> i32 {
        self as i32
    }

    /// Returns the mode for a numeric code.
    #[must_use]
    pub const fn from_code(code: i64) -> Option<Self> {
        Some(match code {
            0 => Self::CurrentCulture,
            1 => Self::CurrentCultureIgnoreCase,
            2 => Self::InvariantCulture,
            3 => Self::InvariantCultureIgnoreCase,
            4 => Self::Ordinal,
            5 => Self::OrdinalIgnoreCase,
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Color {
        Red,
        Green,
    }

    static COLOR_INFO: EnumInfo = EnumInfo {
        type_name: "Color",
        store_as_text: true,
        variants: &[("Red", 0), ("Green", 1)],
    };

    impl SqlEnum for Color {
        const INFO: &'static EnumInfo = &COLOR_INFO;

        fn ordinal(&self) -> i64 {
            *self as i64
        }

        fn from_ordinal(ordinal: i64) -> Option<Self> {
            match ordinal {
                0 => Some(Self::Red),
                1 => Some(Self::Green),
                _ => None,
            }
        }
    }

    #[test]
    fn test_option_unwraps_kind() {
        assert_eq!(<Option<i64>>::storage_kind(), StorageKind::I64);
        assert!(<Option<i64>>::is_nullable());
        assert!(!i64::is_nullable());
        assert_eq!(None::<String>.to_value(), Value::Null);
        assert_eq!(<Option<String>>::from_value(Value::Null).unwrap(), None);
    }

    #[test]
    fn test_from_value_rejects_other_kind() {
        let err = i32::from_value(Value::String("x".into())).unwrap_err();
        assert!(matches!(err, Error::Unreadable { .. }));
    }

    #[test]
    fn test_enum_labels_ignore_case() {
        assert_eq!(COLOR_INFO.ordinal("green"), Some(1));
        assert_eq!(COLOR_INFO.label(0), Some("Red"));
        assert_eq!(COLOR_INFO.label(7), None);
    }

    #[test]
    fn test_enum_round_trip_through_value() {
        let value = enum_to_value(&Color::Green);
        assert_eq!(value.as_i64(), Some(1));
        assert_eq!(enum_from_value::<Color>(value).unwrap(), Color::Green);
        assert!(enum_from_value::<Color>(Value::I64(9)).is_err());
    }
}
