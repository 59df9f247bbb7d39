//! Conversions between field values and driver-native values.
//!
//! Binding goes through [`Value::to_sql`]; materialization goes through
//! [`Value::from_sql`] or, for non-enum kinds, a [`Decoder`] resolved once
//! per result column with [`StorageKind::decoder`].

use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::{EnumInfo, EnumValue, StorageKind, Value};
use crate::value::SqlValue;

/// Decodes a non-null driver value into a field value of one fixed kind.
pub type Decoder = fn(SqlValue) -> Result<Value>;

/// Format used to store `NaiveDateTime` values (invariant culture form).
pub const DATE_TIME_FORMAT: &str = "%m/%d/%Y %H:%M:%S";

/// Ticks (100 ns units since 0001-01-01) at the Unix epoch.
const UNIX_EPOCH_TICKS: i64 = 621_355_968_000_000_000;
const TICKS_PER_SECOND: i64 = 10_000_000;
const SECONDS_PER_DAY: i64 = 86_400;

impl Value {
    /// Converts the value to its driver-native representation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedType`] when the value has no storable
    /// form, such as an enum ordinal without a label stored as text.
    pub fn to_sql(&self) -> Result<SqlValue> {
        let value = match self {
            Self::Null => SqlValue::Null,
            Self::Bool(b) => SqlValue::Int(i32::from(*b)),
            Self::I8(v) => SqlValue::Int(i32::from(*v)),
            Self::I16(v) => SqlValue::Int(i32::from(*v)),
            Self::I32(v) => SqlValue::Int(*v),
            Self::U8(v) => SqlValue::Int(i32::from(*v)),
            Self::U16(v) => SqlValue::Int(i32::from(*v)),
            Self::U32(v) => SqlValue::BigInt(i64::from(*v)),
            Self::I64(v) => SqlValue::BigInt(*v),
            Self::F32(v) => SqlValue::Float(f64::from(*v)),
            Self::F64(v) => SqlValue::Float(*v),
            Self::Decimal(d) => SqlValue::Float(d.to_f64().ok_or_else(|| Error::UnsupportedType {
                type_name: String::from("Decimal"),
            })?),
            Self::String(s) => SqlValue::Text(s.clone()),
            Self::TimeSpan(d) => SqlValue::Text(format_time_span(*d)),
            Self::DateTime(dt) => SqlValue::Text(dt.format(DATE_TIME_FORMAT).to_string()),
            Self::DateTimeOffset(dt) => {
                SqlValue::BigInt(utc_ticks(&dt.with_timezone(&Utc)).ok_or_else(|| {
                    Error::UnsupportedType {
                        type_name: format!("DateTime<FixedOffset> outside the tick range ({dt})"),
                    }
                })?)
            }
            Self::Bytes(b) => SqlValue::Blob(b.clone()),
            Self::Guid(g) => SqlValue::Text(g.hyphenated().to_string()),
            Self::Enum(e) => enum_to_sql(*e)?,
        };
        Ok(value)
    }

    /// Converts a driver value into a value of the given kind.
    ///
    /// NULL becomes [`Value::Null`], whatever the kind.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unreadable`] if the driver value cannot represent
    /// the kind.
    pub fn from_sql(kind: StorageKind, value: SqlValue) -> Result<Self> {
        if value.is_null() {
            return Ok(Self::Null);
        }
        match kind {
            StorageKind::Enum(info) => decode_enum(info, value),
            _ => match kind.decoder() {
                Some(decode) => decode(value),
                None => Err(Error::unreadable(kind.type_name(), "no decoder")),
            },
        }
    }

    /// Converts this value to another kind, keeping `Null` as is.
    ///
    /// # Errors
    ///
    /// Returns the error of the underlying binding or reading step.
    pub fn convert(&self, kind: StorageKind) -> Result<Self> {
        if self.is_null() {
            return Ok(Self::Null);
        }
        Self::from_sql(kind, self.to_sql()?)
    }
}

impl StorageKind {
    /// Returns the specialised decoder of a non-enum kind.
    ///
    /// Enums return `None`: their reading depends on the enum metadata.
    #[must_use]
    pub fn decoder(&self) -> Option<Decoder> {
        let decode: Decoder = match self {
            Self::Bool => decode_bool,
            Self::I8 => decode_i8,
            Self::I16 => decode_i16,
            Self::I32 => decode_i32,
            Self::I64 => decode_i64,
            Self::U8 => decode_u8,
            Self::U16 => decode_u16,
            Self::U32 => decode_u32,
            Self::F32 => decode_f32,
            Self::F64 => decode_f64,
            Self::Decimal => decode_decimal,
            Self::String => decode_string,
            Self::TimeSpan => decode_time_span,
            Self::DateTime => decode_date_time,
            Self::DateTimeOffset => decode_date_time_offset,
            Self::Bytes => decode_bytes,
            Self::Guid => decode_guid,
            Self::Enum(_) => return None,
        };
        Some(decode)
    }
}

fn enum_to_sql(value: EnumValue) -> Result<SqlValue> {
    if value.info.store_as_text {
        return value
            .info
            .label(value.ordinal)
            .map(|label| SqlValue::Text(String::from(label)))
            .ok_or_else(|| Error::UnsupportedType {
                type_name: format!("{} (ordinal {})", value.info.type_name, value.ordinal),
            });
    }
    Ok(i32::try_from(value.ordinal).map_or(SqlValue::BigInt(value.ordinal), SqlValue::Int))
}

fn decode_enum(info: &'static EnumInfo, value: SqlValue) -> Result<Value> {
    let ordinal = match &value {
        SqlValue::Text(text) => match info.ordinal(text) {
            Some(ordinal) => ordinal,
            None => text
                .trim()
                .parse::<i64>()
                .map_err(|_| Error::unreadable(info.type_name, format!("unknown label {text:?}")))?,
        },
        _ => integer(info.type_name, &value)?,
    };
    Ok(Value::Enum(EnumValue { info, ordinal }))
}

fn integer(type_name: &str, value: &SqlValue) -> Result<i64> {
    match value {
        SqlValue::Int(v) => Ok(i64::from(*v)),
        SqlValue::BigInt(v) => Ok(*v),
        #[allow(clippy::cast_possible_truncation)]
        SqlValue::Float(v) if v.fract() == 0.0 => Ok(*v as i64),
        SqlValue::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| Error::unreadable(type_name, format!("{s:?} is not an integer"))),
        other => Err(Error::unreadable(
            type_name,
            format!("got a {:?} value", other.native_type()),
        )),
    }
}

macro_rules! int_decoders {
    ($($name:ident => $ty:ty, $variant:ident);+ $(;)?) => {
        $(
            fn $name(value: SqlValue) -> Result<Value> {
                let wide = integer(stringify!($ty), &value)?;
                <$ty>::try_from(wide)
                    .map(Value::$variant)
                    .map_err(|_| Error::unreadable(stringify!($ty), format!("{wide} is out of range")))
            }
        )+
    };
}

int_decoders!(
    decode_i8 => i8, I8;
    decode_i16 => i16, I16;
    decode_i32 => i32, I32;
    decode_u8 => u8, U8;
    decode_u16 => u16, U16;
    decode_u32 => u32, U32;
);

fn decode_i64(value: SqlValue) -> Result<Value> {
    integer("i64", &value).map(Value::I64)
}

fn decode_bool(value: SqlValue) -> Result<Value> {
    if let SqlValue::Text(s) = &value {
        if s.eq_ignore_ascii_case("true") {
            return Ok(Value::Bool(true));
        }
        if s.eq_ignore_ascii_case("false") {
            return Ok(Value::Bool(false));
        }
    }
    integer("bool", &value).map(|v| Value::Bool(v != 0))
}

fn float(type_name: &str, value: &SqlValue) -> Result<f64> {
    match value {
        SqlValue::Float(v) => Ok(*v),
        #[allow(clippy::cast_precision_loss)]
        SqlValue::Int(v) => Ok(f64::from(*v)),
        #[allow(clippy::cast_precision_loss)]
        SqlValue::BigInt(v) => Ok(*v as f64),
        SqlValue::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| Error::unreadable(type_name, format!("{s:?} is not a number"))),
        other => Err(Error::unreadable(
            type_name,
            format!("got a {:?} value", other.native_type()),
        )),
    }
}

fn decode_f64(value: SqlValue) -> Result<Value> {
    float("f64", &value).map(Value::F64)
}

#[allow(clippy::cast_possible_truncation)]
fn decode_f32(value: SqlValue) -> Result<Value> {
    float("f32", &value).map(|v| Value::F32(v as f32))
}

fn decode_decimal(value: SqlValue) -> Result<Value> {
    let text = match value {
        SqlValue::Text(s) => s,
        SqlValue::Int(v) => return Ok(Value::Decimal(Decimal::from(v))),
        SqlValue::BigInt(v) => return Ok(Value::Decimal(Decimal::from(v))),
        other => float("Decimal", &other)?.to_string(),
    };
    Decimal::from_str(text.trim())
        .map(Value::Decimal)
        .map_err(|e| Error::unreadable("Decimal", e.to_string()))
}

fn decode_string(value: SqlValue) -> Result<Value> {
    let text = match value {
        SqlValue::Text(s) => s,
        SqlValue::Int(v) => v.to_string(),
        SqlValue::BigInt(v) => v.to_string(),
        SqlValue::Float(v) => v.to_string(),
        SqlValue::Blob(b) => {
            String::from_utf8(b).map_err(|e| Error::unreadable("String", e.to_string()))?
        }
        SqlValue::Null => String::new(),
    };
    Ok(Value::String(text))
}

fn decode_bytes(value: SqlValue) -> Result<Value> {
    match value {
        SqlValue::Blob(b) => Ok(Value::Bytes(b)),
        SqlValue::Text(s) => Ok(Value::Bytes(s.into_bytes())),
        other => Err(Error::unreadable(
            "Vec<u8>",
            format!("got a {:?} value", other.native_type()),
        )),
    }
}

fn decode_guid(value: SqlValue) -> Result<Value> {
    let parsed = match &value {
        SqlValue::Text(s) => Uuid::parse_str(s.trim()),
        SqlValue::Blob(b) => Uuid::from_slice(b),
        other => {
            return Err(Error::unreadable(
                "Uuid",
                format!("got a {:?} value", other.native_type()),
            ));
        }
    };
    parsed
        .map(Value::Guid)
        .map_err(|e| Error::unreadable("Uuid", e.to_string()))
}

fn decode_time_span(value: SqlValue) -> Result<Value> {
    match &value {
        SqlValue::Text(s) => parse_time_span(s)
            .map(Value::TimeSpan)
            .ok_or_else(|| Error::unreadable("TimeDelta", format!("{s:?} is not a time span"))),
        other => Err(Error::unreadable(
            "TimeDelta",
            format!("got a {:?} value", other.native_type()),
        )),
    }
}

fn decode_date_time(value: SqlValue) -> Result<Value> {
    match &value {
        SqlValue::Text(s) => parse_date_time(s)
            .map(Value::DateTime)
            .ok_or_else(|| Error::unreadable("NaiveDateTime", format!("{s:?} is not a date"))),
        other => Err(Error::unreadable(
            "NaiveDateTime",
            format!("got a {:?} value", other.native_type()),
        )),
    }
}

fn decode_date_time_offset(value: SqlValue) -> Result<Value> {
    let ticks = integer("DateTime<FixedOffset>", &value)?;
    from_utc_ticks(ticks)
        .map(|dt| Value::DateTimeOffset(dt.fixed_offset()))
        .ok_or_else(|| Error::unreadable("DateTime<FixedOffset>", format!("{ticks} ticks is out of range")))
}

/// Renders a time span as `[-][d.]hh:mm:ss[.fffffff]`.
#[must_use]
pub fn format_time_span(span: TimeDelta) -> String {
    let negative = span < TimeDelta::zero();
    let span = if negative { -span } else { span };
    let seconds = span.num_seconds();
    let ticks = span.subsec_nanos() / 100;

    let days = seconds / SECONDS_PER_DAY;
    let hours = (seconds % SECONDS_PER_DAY) / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    let mut out = String::new();
    if negative {
        out.push('-');
    }
    if days > 0 {
        out.push_str(&format!("{days}."));
    }
    out.push_str(&format!("{hours:02}:{minutes:02}:{secs:02}"));
    if ticks > 0 {
        out.push_str(&format!(".{ticks:07}"));
    }
    out
}

/// Parses the output of [`format_time_span`].
#[must_use]
pub fn parse_time_span(text: &str) -> Option<TimeDelta> {
    let text = text.trim();
    let (negative, rest) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let colon = rest.find(':')?;
    let (days, clock) = match rest[..colon].find('.') {
        Some(dot) => (rest[..dot].parse::<i64>().ok()?, &rest[dot + 1..]),
        None => (0, rest),
    };
    let (hms, fraction) = match clock.split_once('.') {
        Some((hms, fraction)) => (hms, Some(fraction)),
        None => (clock, None),
    };

    let mut parts = hms.split(':');
    let hours = parts.next()?.parse::<i64>().ok()?;
    let minutes = parts.next()?.parse::<i64>().ok()?;
    let seconds = parts.next()?.parse::<i64>().ok()?;
    if parts.next().is_some() {
        return None;
    }

    let ticks = match fraction {
        Some(f) if f.len() <= 7 && f.chars().all(|c| c.is_ascii_digit()) => {
            format!("{f:0<7}").parse::<i64>().ok()?
        }
        Some(_) => return None,
        None => 0,
    };

    let total = days
        .checked_mul(SECONDS_PER_DAY)?
        .checked_add(hours.checked_mul(3600)?)?
        .checked_add(minutes.checked_mul(60)?)?
        .checked_add(seconds)?;
    let span = TimeDelta::try_seconds(total)?.checked_add(&TimeDelta::nanoseconds(ticks * 100))?;
    Some(if negative { -span } else { span })
}

/// Parses a stored date, accepting the invariant form and ISO 8601.
#[must_use]
pub fn parse_date_time(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    [DATE_TIME_FORMAT, "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
}

/// Returns the UTC tick count of an instant, or `None` when it does not
/// fit in an `i64`.
#[must_use]
pub fn utc_ticks(instant: &DateTime<Utc>) -> Option<i64> {
    instant
        .timestamp()
        .checked_mul(TICKS_PER_SECOND)?
        .checked_add(UNIX_EPOCH_TICKS)?
        .checked_add(i64::from(instant.timestamp_subsec_nanos() / 100))
}

/// Converts a UTC tick count back to an instant.
#[must_use]
pub fn from_utc_ticks(ticks: i64) -> Option<DateTime<Utc>> {
    let since_epoch = ticks.checked_sub(UNIX_EPOCH_TICKS)?;
    let seconds = since_epoch.div_euclid(TICKS_PER_SECOND);
    let nanos = u32::try_from(since_epoch.rem_euclid(TICKS_PER_SECOND) * 100).ok()?;
    DateTime::<Utc>::from_timestamp(seconds, nanos)
}
