// ABOUTME: Typed field values produced by the mapper and their coercion rules
// ABOUTME: Includes the permissive date-time parser and primary key values

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::feed::bool_value;

/// Destination type of a mapped field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Uuid,
    DateTime,
    Bool,
    Int,
    Float,
    Decimal,
    String,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Uuid => "uuid",
            FieldType::DateTime => "datetime",
            FieldType::Bool => "boolean",
            FieldType::Int => "int",
            FieldType::Float => "float",
            FieldType::Decimal => "decimal",
            FieldType::String => "string",
        }
    }

    /// PostgreSQL type used to bind values of this field.
    pub fn sql_type(&self) -> &'static str {
        match self {
            FieldType::Uuid => "uuid",
            FieldType::DateTime => "timestamptz",
            FieldType::Bool => "boolean",
            FieldType::Int => "bigint",
            FieldType::Float => "double precision",
            FieldType::Decimal => "numeric",
            FieldType::String => "text",
        }
    }

    /// Whether values of this type can identify a record.
    pub fn can_be_key(&self) -> bool {
        matches!(self, FieldType::Uuid | FieldType::Int | FieldType::String)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A strongly-typed value for one destination column.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Uuid(Uuid),
    DateTime(DateTime<Utc>),
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(Decimal),
    Text(String),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Type of the value, `None` for `Null`.
    pub fn field_type(&self) -> Option<FieldType> {
        match self {
            FieldValue::Null => None,
            FieldValue::Uuid(_) => Some(FieldType::Uuid),
            FieldValue::DateTime(_) => Some(FieldType::DateTime),
            FieldValue::Bool(_) => Some(FieldType::Bool),
            FieldValue::Int(_) => Some(FieldType::Int),
            FieldValue::Float(_) => Some(FieldType::Float),
            FieldValue::Decimal(_) => Some(FieldType::Decimal),
            FieldValue::Text(_) => Some(FieldType::String),
        }
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

impl From<Uuid> for FieldValue {
    fn from(v: Uuid) -> Self {
        FieldValue::Uuid(v)
    }
}

/// Value of a primary key column. Only hashable types can be keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordKey {
    Uuid(Uuid),
    Int(i64),
    Text(String),
}

impl RecordKey {
    pub fn from_value(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::Uuid(v) => Some(RecordKey::Uuid(*v)),
            FieldValue::Int(v) => Some(RecordKey::Int(*v)),
            FieldValue::Text(v) => Some(RecordKey::Text(v.clone())),
            _ => None,
        }
    }

    pub fn to_value(&self) -> FieldValue {
        match self {
            RecordKey::Uuid(v) => FieldValue::Uuid(*v),
            RecordKey::Int(v) => FieldValue::Int(*v),
            RecordKey::Text(v) => FieldValue::Text(v.clone()),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKey::Uuid(v) => write!(f, "{}", v),
            RecordKey::Int(v) => write!(f, "{}", v),
            RecordKey::Text(v) => f.write_str(v),
        }
    }
}

/// Coerce present field text into `field_type`.
///
/// Returns `None` when the text cannot be represented in that type. Empty text
/// is treated as absent for every type except strings and booleans.
pub fn coerce(text: &str, field_type: FieldType) -> Option<FieldValue> {
    match field_type {
        FieldType::String => Some(FieldValue::Text(text.to_string())),
        FieldType::Bool => Some(FieldValue::Bool(bool_value(Some(text)))),
        FieldType::Uuid => Uuid::parse_str(text.trim()).ok().map(FieldValue::Uuid),
        FieldType::DateTime => parse_datetime(text).map(FieldValue::DateTime),
        FieldType::Int => text.trim().parse::<i64>().ok().map(FieldValue::Int),
        FieldType::Float => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return None;
            }
            trimmed.parse::<f64>().ok().map(FieldValue::Float)
        }
        FieldType::Decimal => {
            let trimmed = text.trim();
            Decimal::from_str(trimmed)
                .or_else(|_| Decimal::from_scientific(trimmed))
                .ok()
                .map(FieldValue::Decimal)
        }
    }
}

const OFFSET_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f%z"];

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y"];

/// Parse the date-time shapes the upstream API has been seen to emit.
///
/// Values without an offset are taken as UTC. Date-only values land on
/// midnight UTC.
pub fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(raw, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(raw, fmt) {
            let naive = date.and_hms_opt(0, 0, 0)?;
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    None
}
