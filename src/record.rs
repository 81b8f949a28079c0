//! # Dynamic Records and Values
//!
//! This module defines the value model for shardlite. Shard tables are plain
//! relational tables whose schemas the engine does not know ahead of time, so
//! rows travel as [`Record`]s: ordered maps from column name to a tagged
//! [`Value`].
//!
//! ## Design Philosophy: a Closed, Tagged Union
//!
//! `Value` enumerates every representable scalar explicitly. There is no
//! reflection and no `Any`: a value is exactly one of integer, unsigned,
//! float, text, boolean, timestamp, or NULL. Everything downstream - the
//! comparator, the fingerprint, SQL parameter binding - is a total match over
//! these variants, so adding a variant is a compile error everywhere it
//! matters.
//!
//! ## Coercion Philosophy: Zero Defaults
//!
//! The typed accessors on `Record` (`int`, `text`, `boolean`, ...) are
//! best-effort: a missing column or a value with no sensible conversion yields
//! the type's zero value, never an error. Callers that must distinguish
//! absence use [`Record::get`]. This mirrors how dynamic row maps behave in
//! ORM-style code and keeps call sites free of conversion ceremony.
//!
//! ## SQLite Bridging
//!
//! `Value` implements [`ToSql`] so records bind directly as statement
//! parameters, and [`Record::from_row`] rebuilds a record from a query row.
//! Booleans are stored as `0`/`1` integers and timestamps as integer unix
//! milliseconds; both read back as `Int`, which the coercing accessors absorb.
//! BLOB columns have no place in the union and are rejected with a schema
//! error.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};
use rusqlite::Row;

use crate::error::{Error, Result};

// =============================================================================
// Value
// =============================================================================

/// A single scalar cell value.
///
/// # Rust Pattern: Tagged Union
///
/// Each variant carries its payload directly. `Timestamp` is an instant as
/// unix epoch milliseconds; keeping it an integer makes storage, comparison,
/// and hashing trivial, while [`Value::timestamp_text`] and text parsing
/// handle the human-readable form.
///
/// # Example
///
/// ```rust
/// use shardlite::Value;
///
/// let v: Value = 42i64.into();
/// assert_eq!(v, Value::Int(42));
/// assert_eq!(v.type_name(), "integer");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Signed 64-bit integer.
    Int(i64),
    /// Unsigned 64-bit integer.
    Uint(u64),
    /// 64-bit float.
    Float(f64),
    /// UTF-8 text.
    Text(String),
    /// Boolean. Stored in SQLite as integer 0/1.
    Bool(bool),
    /// An instant, as unix epoch milliseconds.
    Timestamp(i64),
    /// SQL NULL.
    Null,
}

/// Text timestamps parse and render in this layout (interpreted as UTC).
const TIMESTAMP_LAYOUT: &str = "%Y-%m-%d %H:%M:%S";

impl Value {
    /// Human-readable type name, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "integer",
            Value::Uint(_) => "unsigned",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Bool(_) => "boolean",
            Value::Timestamp(_) => "timestamp",
            Value::Null => "null",
        }
    }

    /// True if this is SQL NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Exact integer form, if the value has one.
    ///
    /// Unlike the lossy coercions this refuses floats, booleans, and
    /// non-numeric text: routing a record to a shard must not invent a key.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Uint(v) => i64::try_from(*v).ok(),
            Value::Timestamp(ms) => Some(*ms),
            Value::Text(s) => s.trim().parse().ok(),
            Value::Float(_) | Value::Bool(_) | Value::Null => None,
        }
    }

    /// Lossy conversion to `i64`. Floats truncate; failures yield 0.
    fn to_i64_lossy(&self) -> i64 {
        match self {
            Value::Int(v) => *v,
            Value::Uint(v) => i64::try_from(*v).unwrap_or(0),
            Value::Float(v) => *v as i64,
            Value::Text(s) => s.trim().parse().unwrap_or(0),
            Value::Timestamp(ms) => *ms,
            Value::Bool(_) | Value::Null => 0,
        }
    }

    /// Lossy conversion to `u64`. Negative values yield 0.
    fn to_u64_lossy(&self) -> u64 {
        match self {
            Value::Int(v) => u64::try_from(*v).unwrap_or(0),
            Value::Uint(v) => *v,
            Value::Float(v) => *v as u64,
            Value::Text(s) => s.trim().parse().unwrap_or(0),
            Value::Timestamp(ms) => u64::try_from(*ms).unwrap_or(0),
            Value::Bool(_) | Value::Null => 0,
        }
    }

    /// Lossy conversion to `f64`.
    fn to_f64_lossy(&self) -> f64 {
        match self {
            Value::Int(v) => *v as f64,
            Value::Uint(v) => *v as f64,
            Value::Float(v) => *v,
            Value::Text(s) => s.trim().parse().unwrap_or(0.0),
            Value::Timestamp(ms) => *ms as f64,
            Value::Bool(_) | Value::Null => 0.0,
        }
    }

    /// Lossy conversion to `bool`. Nonzero integers and the texts `"true"`
    /// and `"1"` are true; everything else is false.
    fn to_bool_lossy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Int(v) => *v != 0,
            Value::Uint(v) => *v != 0,
            Value::Text(s) => s == "true" || s == "1",
            Value::Float(_) | Value::Timestamp(_) | Value::Null => false,
        }
    }

    /// Lossy conversion to unix epoch milliseconds.
    ///
    /// Integers pass through unchanged; text parses as
    /// `YYYY-MM-DD HH:MM:SS` (UTC) or RFC 3339.
    fn to_millis_lossy(&self) -> i64 {
        match self {
            Value::Timestamp(ms) => *ms,
            Value::Int(v) => *v,
            Value::Uint(v) => i64::try_from(*v).unwrap_or(0),
            Value::Text(s) => parse_timestamp_text(s).unwrap_or(0),
            Value::Float(_) | Value::Bool(_) | Value::Null => 0,
        }
    }

    /// Render a timestamp's milliseconds in the text layout.
    pub fn timestamp_text(ms: i64) -> String {
        match Utc.timestamp_millis_opt(ms).single() {
            Some(dt) => dt.format(TIMESTAMP_LAYOUT).to_string(),
            None => ms.to_string(),
        }
    }

    /// Append a canonical, type-distinguishing encoding of this value.
    ///
    /// Used for condition fingerprints and for keying rows by primary key
    /// value. Two values encode identically iff they are the same variant
    /// with the same payload, so `Int(1)` and `Text("1")` never collide.
    pub(crate) fn encode_canonical(&self, out: &mut Vec<u8>) {
        match self {
            Value::Int(v) => {
                out.push(b'i');
                out.extend_from_slice(&v.to_le_bytes());
            }
            Value::Uint(v) => {
                out.push(b'u');
                out.extend_from_slice(&v.to_le_bytes());
            }
            Value::Float(v) => {
                out.push(b'f');
                out.extend_from_slice(&v.to_bits().to_le_bytes());
            }
            Value::Text(s) => {
                out.push(b's');
                out.extend_from_slice(&(s.len() as u64).to_le_bytes());
                out.extend_from_slice(s.as_bytes());
            }
            Value::Bool(b) => {
                out.push(b'b');
                out.push(u8::from(*b));
            }
            Value::Timestamp(ms) => {
                out.push(b't');
                out.extend_from_slice(&ms.to_le_bytes());
            }
            Value::Null => out.push(b'n'),
        }
    }

    /// Canonical encoding as an owned buffer. Handy as a hash-map key where
    /// `Value` itself cannot be one (floats are not `Eq`).
    pub(crate) fn canonical_key(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16);
        self.encode_canonical(&mut out);
        out
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Uint(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(s) => f.write_str(s),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Timestamp(ms) => f.write_str(&Value::timestamp_text(*ms)),
            Value::Null => f.write_str("NULL"),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Uint(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            Value::Int(v) => Ok(ToSqlOutput::from(*v)),
            Value::Uint(v) => match i64::try_from(*v) {
                Ok(v) => Ok(ToSqlOutput::from(v)),
                Err(_) => Err(rusqlite::Error::ToSqlConversionFailure(
                    format!("unsigned value {} exceeds the SQLite integer range", v).into(),
                )),
            },
            Value::Float(v) => Ok(ToSqlOutput::from(*v)),
            Value::Text(s) => Ok(ToSqlOutput::from(s.as_str())),
            Value::Bool(b) => Ok(ToSqlOutput::from(i64::from(*b))),
            Value::Timestamp(ms) => Ok(ToSqlOutput::from(*ms)),
            Value::Null => Ok(ToSqlOutput::from(rusqlite::types::Null)),
        }
    }
}

/// Parse a text timestamp into unix millis. Accepts the plain layout
/// (interpreted as UTC) and RFC 3339.
fn parse_timestamp_text(s: &str) -> Option<i64> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(s.trim(), TIMESTAMP_LAYOUT) {
        return Some(naive.and_utc().timestamp_millis());
    }
    DateTime::parse_from_rfc3339(s.trim())
        .ok()
        .map(|dt| dt.timestamp_millis())
}

// =============================================================================
// Record
// =============================================================================

/// One row: an ordered map from column name to [`Value`].
///
/// Columns iterate in name order (a `BTreeMap` underneath), so SQL generated
/// from a record - column lists, placeholder lists - is deterministic.
///
/// # Example
///
/// ```rust
/// use shardlite::Record;
///
/// let row = Record::new()
///     .with("id", 7i64)
///     .with("name", "Ada")
///     .with("active", true);
///
/// assert_eq!(row.int("id"), 7);
/// assert_eq!(row.text("name"), "Ada");
/// assert_eq!(row.int("missing"), 0);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    columns: BTreeMap<String, Value>,
}

impl Record {
    /// Create an empty record.
    pub fn new() -> Self {
        Record::default()
    }

    /// Builder-style insert, for literal construction.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(column, value);
        self
    }

    /// Insert or replace a column.
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.columns.insert(column.into(), value.into());
    }

    /// The raw value of a column, if present.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.get(column)
    }

    /// True if the column is present (possibly NULL).
    pub fn contains(&self, column: &str) -> bool {
        self.columns.contains_key(column)
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// True if the record has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Column names in iteration (name) order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// All `(column, value)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Coerce a column to `i64`. Missing or unconvertible yields 0.
    pub fn int(&self, column: &str) -> i64 {
        self.get(column).map_or(0, Value::to_i64_lossy)
    }

    /// Coerce a column to `u64`. Missing, negative, or unconvertible yields 0.
    pub fn uint(&self, column: &str) -> u64 {
        self.get(column).map_or(0, Value::to_u64_lossy)
    }

    /// Coerce a column to `f64`. Missing or unconvertible yields 0.0.
    pub fn float(&self, column: &str) -> f64 {
        self.get(column).map_or(0.0, Value::to_f64_lossy)
    }

    /// Coerce a column to text. Missing or NULL yields the empty string;
    /// other scalars render with their `Display` form.
    pub fn text(&self, column: &str) -> String {
        match self.get(column) {
            None | Some(Value::Null) => String::new(),
            Some(v) => v.to_string(),
        }
    }

    /// Coerce a column to `bool`. Missing or unconvertible yields false.
    pub fn boolean(&self, column: &str) -> bool {
        self.get(column).is_some_and(Value::to_bool_lossy)
    }

    /// Coerce a column to unix epoch milliseconds. Missing or unconvertible
    /// yields 0.
    pub fn timestamp(&self, column: &str) -> i64 {
        self.get(column).map_or(0, Value::to_millis_lossy)
    }

    /// Rebuild a record from a query row, one entry per selected column.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Schema`] if a column holds a BLOB; the value union
    /// has no representation for binary payloads.
    pub fn from_row(row: &Row<'_>) -> Result<Record> {
        let mut record = Record::new();
        let column_count = row.as_ref().column_count();
        for idx in 0..column_count {
            let name = row.as_ref().column_name(idx)?.to_string();
            let value = match row.get_ref(idx)? {
                ValueRef::Null => Value::Null,
                ValueRef::Integer(v) => Value::Int(v),
                ValueRef::Real(v) => Value::Float(v),
                ValueRef::Text(bytes) => {
                    Value::Text(String::from_utf8_lossy(bytes).into_owned())
                }
                ValueRef::Blob(_) => {
                    return Err(Error::Schema(format!(
                        "column '{}' holds a BLOB, which shard records cannot represent",
                        name
                    )));
                }
            };
            record.columns.insert(name, value);
        }
        Ok(record)
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Record {
            columns: iter.into_iter().collect(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
