//! Dynamic value representation used by the `Entity` accessor tables, and conversion helpers
//! shared between the Query Builder, the Hydrator, and the migration DDL path.
//!
//! Rust has no reflection, so `Entity::get_field`/`set_field` (see [`crate::metadata`]) pass
//! values through this enum instead of through `dyn Any`. The conversion/bind helpers below
//! are adapted from the teacher's `temporal.rs` and `value_binding.rs`, with every
//! PostgreSQL-specific branch removed (see `DESIGN.md`).

use crate::connection::Drivers;
use crate::errors::Error;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::any::AnyArguments;
use sqlx::Arguments;
use uuid::Uuid;

/// A dynamically-typed column value.
///
/// Every `LogicalType` in [`LogicalType`] round-trips through exactly one `Value` variant.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    Text(String),
    Uuid(Uuid),
    DateTimeUtc(DateTime<Utc>),
    NaiveDateTime(NaiveDateTime),
    NaiveDate(NaiveDate),
    NaiveTime(NaiveTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

/// The logical SQL type of a field, independent of the driver's concrete spelling.
///
/// `sql_type(driver)` gives the driver-specific column type used when emitting DDL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalType {
    Integer,
    BigInt,
    Boolean,
    Double,
    /// A fixed-point number with `precision` total digits and `scale` digits after the point
    /// (field-name heuristics for this live in `aurum-macro::types`, e.g. `price`/`*rate`).
    Decimal { precision: u32, scale: u32 },
    Text,
    VarChar(usize),
    Uuid,
    TimestampTz,
    Timestamp,
    Date,
    Time,
}

impl LogicalType {
    /// Driver-specific SQL type name used in `CREATE TABLE` statements.
    pub fn sql_type(&self, driver: Drivers) -> String {
        match (self, driver) {
            (LogicalType::Integer, _) => "INTEGER".to_string(),
            (LogicalType::BigInt, _) => "BIGINT".to_string(),
            (LogicalType::Boolean, Drivers::Sqlite) => "BOOLEAN".to_string(),
            (LogicalType::Boolean, Drivers::MySql) => "TINYINT(1)".to_string(),
            (LogicalType::Double, _) => "DOUBLE".to_string(),
            (LogicalType::Decimal { precision, scale }, _) => format!("DECIMAL({},{})", precision, scale),
            (LogicalType::Text, _) => "TEXT".to_string(),
            (LogicalType::VarChar(n), _) => format!("VARCHAR({})", n),
            (LogicalType::Uuid, Drivers::Sqlite) => "TEXT".to_string(),
            (LogicalType::Uuid, Drivers::MySql) => "CHAR(36)".to_string(),
            (LogicalType::TimestampTz, _) => "TEXT".to_string(),
            (LogicalType::Timestamp, _) => "TEXT".to_string(),
            (LogicalType::Date, _) => "TEXT".to_string(),
            (LogicalType::Time, _) => "TEXT".to_string(),
        }
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, LogicalType::TimestampTz | LogicalType::Timestamp | LogicalType::Date | LogicalType::Time)
    }
}

/// Formats a `DateTime<Utc>` for storage. SQLite/MySQL have no native timezone-aware
/// timestamp type, so it is stored as RFC3339 text (matches the teacher's fallback format for
/// non-Postgres drivers in `temporal.rs::format_datetime_for_driver`).
pub fn format_datetime_utc(value: &DateTime<Utc>) -> String {
    value.to_rfc3339()
}

pub fn parse_datetime_utc(text: &str) -> Result<DateTime<Utc>, Error> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::hydration(format!("invalid timestamptz value {:?}: {}", text, e)))
}

pub fn format_naive_datetime(value: &NaiveDateTime) -> String {
    value.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

pub fn parse_naive_datetime(text: &str) -> Result<NaiveDateTime, Error> {
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f"))
        .map_err(|e| Error::hydration(format!("invalid timestamp value {:?}: {}", text, e)))
}

pub fn format_naive_date(value: &NaiveDate) -> String {
    value.format("%Y-%m-%d").to_string()
}

pub fn parse_naive_date(text: &str) -> Result<NaiveDate, Error> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .map_err(|e| Error::hydration(format!("invalid date value {:?}: {}", text, e)))
}

pub fn format_naive_time(value: &NaiveTime) -> String {
    value.format("%H:%M:%S%.6f").to_string()
}

pub fn parse_naive_time(text: &str) -> Result<NaiveTime, Error> {
    NaiveTime::parse_from_str(text, "%H:%M:%S%.f")
        .map_err(|e| Error::hydration(format!("invalid time value {:?}: {}", text, e)))
}

/// Binds a dynamic [`Value`] onto a set of `sqlx::Any` arguments.
///
/// Mirrors the teacher's `ValueBinder` trait (`value_binding.rs`), generalized to operate on
/// [`Value`] rather than on pre-stringified insert data, with the Postgres-specific JSON
/// branch removed.
pub fn bind_value<'q>(args: &mut AnyArguments<'q>, value: Value) -> Result<(), Error> {
    match value {
        Value::Null => {
            let _ = args.add(Option::<String>::None);
        }
        Value::Bool(v) => {
            let _ = args.add(v);
        }
        Value::I64(v) => {
            let _ = args.add(v);
        }
        Value::F64(v) => {
            let _ = args.add(v);
        }
        Value::Text(v) => {
            let _ = args.add(v);
        }
        Value::Uuid(v) => {
            let _ = args.add(v.hyphenated().to_string());
        }
        Value::DateTimeUtc(v) => {
            let _ = args.add(format_datetime_utc(&v));
        }
        Value::NaiveDateTime(v) => {
            let _ = args.add(format_naive_datetime(&v));
        }
        Value::NaiveDate(v) => {
            let _ = args.add(format_naive_date(&v));
        }
        Value::NaiveTime(v) => {
            let _ = args.add(format_naive_time(&v));
        }
    }
    Ok(())
}

/// A timezone-aware timestamp split across three physical columns: the instant in UTC, the
/// same instant rendered in its local civil time, and the IANA zone name used to render it
/// (spec.md's multi-column example). Computing `local` from `utc` and `timezone` is the
/// caller's responsibility — this type carries no timezone database of its own, only the
/// guarantee that the three sub-columns are always read and written together as one value.
#[derive(Debug, Clone, PartialEq)]
pub struct ZonedTimestamp {
    pub utc: DateTime<Utc>,
    pub local: NaiveDateTime,
    pub timezone: String,
}

impl ZonedTimestamp {
    pub fn new(utc: DateTime<Utc>, local: NaiveDateTime, timezone: impl Into<String>) -> Self {
        ZonedTimestamp { utc, local, timezone: timezone.into() }
    }
}

impl Default for ZonedTimestamp {
    fn default() -> Self {
        let utc = DateTime::<Utc>::from_timestamp(0, 0).expect("unix epoch is representable");
        ZonedTimestamp { utc, local: utc.naive_utc(), timezone: "UTC".to_string() }
    }
}

/// Converts a [`Value`] to its textual SQL-literal representation, used when rendering
/// discriminator `WHERE` clauses and generated DDL/migration text for logging and dry runs.
pub fn value_to_sql_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(v) => v.to_string(),
        Value::I64(v) => v.to_string(),
        Value::F64(v) => v.to_string(),
        Value::Text(v) => format!("'{}'", v.replace('\'', "''")),
        Value::Uuid(v) => format!("'{}'", v.hyphenated()),
        Value::DateTimeUtc(v) => format!("'{}'", format_datetime_utc(v)),
        Value::NaiveDateTime(v) => format!("'{}'", format_naive_datetime(v)),
        Value::NaiveDate(v) => format!("'{}'", format_naive_date(v)),
        Value::NaiveTime(v) => format!("'{}'", format_naive_time(v)),
    }
}
