//! # Value/Type Bridge
//!
//! Maps application scalar types onto the engine's storage classes and back.
//!
//! ```text
//!  application type          storage class
//!  ────────────────          ─────────────
//!  i32, i64, u32, bool  ───► INTEGER
//!  DateTime<Utc>        ───► INTEGER (seconds since epoch)
//!  f32, f64             ───► REAL
//!  String, &str, Json   ───► TEXT
//!  Vec<u8>, &[u8]       ───► BLOB
//!  Option::None         ───► NULL
//! ```
//!
//! ## Compile-Time Coverage
//!
//! Bridging is driven by the [`ToValue`] and [`FromValue`] traits. A type that
//! implements neither cannot be bound or read, and the mistake surfaces as a
//! trait-bound error at compile time rather than at runtime.
//!
//! ## JSON and NULL
//!
//! [`Json`] values serialize to TEXT. A JSON `null` is stored as the text
//! `null`, which is distinct from SQL NULL: `Option<Json>` reads back
//! `Some(Json(Null))` for the former and `None` for the latter.

use std::fmt;

use chrono::{DateTime, Utc};
use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

// =============================================================================
// Storage Types
// =============================================================================

/// Fundamental storage type, as declared on a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlType {
    Integer,
    Float,
    Text,
    Blob,
    Null,
}

impl SqlType {
    /// Declared type name used in DDL.
    pub fn as_sql(self) -> &'static str {
        match self {
            SqlType::Integer => "INTEGER",
            SqlType::Float => "REAL",
            SqlType::Text => "TEXT",
            SqlType::Blob => "BLOB",
            SqlType::Null => "",
        }
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlType::Null => write!(f, "NULL"),
            other => write!(f, "{}", other.as_sql()),
        }
    }
}

// =============================================================================
// Owned Values
// =============================================================================

/// An owned value in one of the engine's storage classes.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    /// Storage class of this value.
    pub fn sql_type(&self) -> SqlType {
        match self {
            Value::Null => SqlType::Null,
            Value::Integer(_) => SqlType::Integer,
            Value::Real(_) => SqlType::Float,
            Value::Text(_) => SqlType::Text,
            Value::Blob(_) => SqlType::Blob,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Integer(_) => "INTEGER",
            Value::Real(_) => "REAL",
            Value::Text(_) => "TEXT",
            Value::Blob(_) => "BLOB",
        }
    }
}

impl Value {
    /// Copies the engine's cell at zero-based `column` into an owned value.
    ///
    /// TEXT that is not valid UTF-8 (written by another client, or produced
    /// by a CAST from a blob) fails with [`Error::TypeMismatch`] instead of
    /// being altered.
    pub fn from_cell(column: usize, cell: ValueRef<'_>) -> Result<Self> {
        Ok(match cell {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(f) => Value::Real(f),
            ValueRef::Text(t) => match std::str::from_utf8(t) {
                Ok(text) => Value::Text(text.to_owned()),
                Err(_) => {
                    return Err(Error::TypeMismatch {
                        column,
                        expected: "UTF-8 TEXT",
                        actual: "TEXT",
                    })
                }
            },
            ValueRef::Blob(b) => Value::Blob(b.to_vec()),
        })
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Borrowed(match self {
            Value::Null => ValueRef::Null,
            Value::Integer(i) => ValueRef::Integer(*i),
            Value::Real(f) => ValueRef::Real(*f),
            Value::Text(s) => ValueRef::Text(s.as_bytes()),
            Value::Blob(b) => ValueRef::Blob(b),
        }))
    }
}

// =============================================================================
// Typed Value Pools
// =============================================================================

/// Location of a value inside a [`ValuePool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSlot {
    Null,
    Integer(usize),
    Real(usize),
    Text(usize),
    Blob(usize),
}

impl ValueSlot {
    pub fn is_null(self) -> bool {
        matches!(self, ValueSlot::Null)
    }
}

/// Values sorted into one pool per storage class.
///
/// Clauses keep their values here and refer to them by [`ValueSlot`]; the
/// order of the slots, not of the pools, decides the bind order.
#[derive(Debug, Clone, Default)]
pub struct ValuePool {
    integers: Vec<i64>,
    reals: Vec<f64>,
    texts: Vec<String>,
    blobs: Vec<Vec<u8>>,
}

impl ValuePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classifies `value` and appends it to the matching pool.
    pub fn push(&mut self, value: Value) -> ValueSlot {
        match value {
            Value::Null => ValueSlot::Null,
            Value::Integer(i) => {
                self.integers.push(i);
                ValueSlot::Integer(self.integers.len() - 1)
            }
            Value::Real(f) => {
                self.reals.push(f);
                ValueSlot::Real(self.reals.len() - 1)
            }
            Value::Text(s) => {
                self.texts.push(s);
                ValueSlot::Text(self.texts.len() - 1)
            }
            Value::Blob(b) => {
                self.blobs.push(b);
                ValueSlot::Blob(self.blobs.len() - 1)
            }
        }
    }

    /// Returns a copy of the value stored at `slot`.
    ///
    /// Slots always come from `push` on the same pool, so indexing is in bounds.
    pub fn get(&self, slot: ValueSlot) -> Value {
        match slot {
            ValueSlot::Null => Value::Null,
            ValueSlot::Integer(i) => Value::Integer(self.integers[i]),
            ValueSlot::Real(i) => Value::Real(self.reals[i]),
            ValueSlot::Text(i) => Value::Text(self.texts[i].clone()),
            ValueSlot::Blob(i) => Value::Blob(self.blobs[i].clone()),
        }
    }

    /// Total number of non-NULL values held.
    pub fn len(&self) -> usize {
        self.integers.len() + self.reals.len() + self.texts.len() + self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.integers.clear();
        self.reals.clear();
        self.texts.clear();
        self.blobs.clear();
    }
}

// =============================================================================
// Structured Values
// =============================================================================

/// A structured value stored as JSON text.
#[derive(Debug, Clone, PartialEq)]
pub struct Json(pub serde_json::Value);

impl Json {
    /// Serializes any serde type into a JSON value.
    pub fn from_serialize<T: Serialize>(value: &T) -> Result<Self> {
        Ok(Json(serde_json::to_value(value)?))
    }

    /// Deserializes the JSON value into `T`.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.0.clone())?)
    }

    /// True for a stored JSON `null` (not an absent value).
    pub fn is_json_null(&self) -> bool {
        self.0.is_null()
    }
}

// =============================================================================
// Application Type → Value
// =============================================================================

/// Conversion from an application type into a storage value.
pub trait ToValue {
    fn to_value(&self) -> Value;
}

impl<T: ToValue + ?Sized> ToValue for &T {
    fn to_value(&self) -> Value {
        (**self).to_value()
    }
}

impl ToValue for Value {
    fn to_value(&self) -> Value {
        self.clone()
    }
}

impl ToValue for i64 {
    fn to_value(&self) -> Value {
        Value::Integer(*self)
    }
}

impl ToValue for i32 {
    fn to_value(&self) -> Value {
        Value::Integer(i64::from(*self))
    }
}

impl ToValue for u32 {
    fn to_value(&self) -> Value {
        Value::Integer(i64::from(*self))
    }
}

impl ToValue for bool {
    fn to_value(&self) -> Value {
        Value::Integer(i64::from(*self))
    }
}

impl ToValue for f64 {
    fn to_value(&self) -> Value {
        Value::Real(*self)
    }
}

impl ToValue for f32 {
    fn to_value(&self) -> Value {
        Value::Real(f64::from(*self))
    }
}

impl ToValue for str {
    fn to_value(&self) -> Value {
        Value::Text(self.to_owned())
    }
}

impl ToValue for String {
    fn to_value(&self) -> Value {
        Value::Text(self.clone())
    }
}

impl ToValue for [u8] {
    fn to_value(&self) -> Value {
        Value::Blob(self.to_vec())
    }
}

impl ToValue for Vec<u8> {
    fn to_value(&self) -> Value {
        Value::Blob(self.clone())
    }
}

impl ToValue for Json {
    fn to_value(&self) -> Value {
        Value::Text(self.0.to_string())
    }
}

impl ToValue for DateTime<Utc> {
    fn to_value(&self) -> Value {
        Value::Integer(self.timestamp())
    }
}

impl<T: ToValue> ToValue for Option<T> {
    fn to_value(&self) -> Value {
        match self {
            Some(v) => v.to_value(),
            None => Value::Null,
        }
    }
}

// =============================================================================
// Value → Application Type
// =============================================================================

/// Why a stored value could not become the requested type.
///
/// Row getters attach the column index and turn this into a crate
/// [`Error`](crate::Error).
#[derive(Debug)]
pub enum ConversionError {
    /// The cell is NULL and the target type is not optional.
    Null,
    /// The storage class does not convert to the target type.
    Mismatch {
        expected: &'static str,
        actual: &'static str,
    },
    /// JSON text failed to parse.
    Json(serde_json::Error),
}

/// Conversion from a storage value into an application type.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> std::result::Result<Self, ConversionError>;
}

fn mismatch<T>(expected: &'static str, value: &Value) -> std::result::Result<T, ConversionError> {
    match value {
        Value::Null => Err(ConversionError::Null),
        other => Err(ConversionError::Mismatch {
            expected,
            actual: other.type_name(),
        }),
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> std::result::Result<Self, ConversionError> {
        Ok(value.clone())
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> std::result::Result<Self, ConversionError> {
        match value {
            Value::Integer(i) => Ok(*i),
            other => mismatch("i64", other),
        }
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> std::result::Result<Self, ConversionError> {
        match value {
            Value::Integer(i) => i32::try_from(*i).map_err(|_| ConversionError::Mismatch {
                expected: "i32",
                actual: "out-of-range INTEGER",
            }),
            other => mismatch("i32", other),
        }
    }
}

impl FromValue for u32 {
    fn from_value(value: &Value) -> std::result::Result<Self, ConversionError> {
        match value {
            Value::Integer(i) => u32::try_from(*i).map_err(|_| ConversionError::Mismatch {
                expected: "u32",
                actual: "out-of-range INTEGER",
            }),
            other => mismatch("u32", other),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> std::result::Result<Self, ConversionError> {
        match value {
            Value::Integer(i) => Ok(*i != 0),
            other => mismatch("bool", other),
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> std::result::Result<Self, ConversionError> {
        match value {
            Value::Real(f) => Ok(*f),
            // REAL affinity columns may hand back integral values as INTEGER
            Value::Integer(i) => Ok(*i as f64),
            other => mismatch("f64", other),
        }
    }
}

impl FromValue for f32 {
    fn from_value(value: &Value) -> std::result::Result<Self, ConversionError> {
        f64::from_value(value).map(|f| f as f32)
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> std::result::Result<Self, ConversionError> {
        match value {
            Value::Text(s) => Ok(s.clone()),
            other => mismatch("String", other),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> std::result::Result<Self, ConversionError> {
        match value {
            Value::Blob(b) => Ok(b.clone()),
            other => mismatch("Vec<u8>", other),
        }
    }
}

impl FromValue for Json {
    fn from_value(value: &Value) -> std::result::Result<Self, ConversionError> {
        match value {
            Value::Text(s) => serde_json::from_str(s)
                .map(Json)
                .map_err(ConversionError::Json),
            other => mismatch("Json", other),
        }
    }
}

impl FromValue for DateTime<Utc> {
    fn from_value(value: &Value) -> std::result::Result<Self, ConversionError> {
        match value {
            Value::Integer(secs) => {
                DateTime::from_timestamp(*secs, 0).ok_or(ConversionError::Mismatch {
                    expected: "DateTime<Utc>",
                    actual: "out-of-range INTEGER",
                })
            }
            other => mismatch("DateTime<Utc>", other),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> std::result::Result<Self, ConversionError> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_cell_rejects_invalid_utf8() {
        assert_eq!(
            Value::from_cell(0, ValueRef::Text(b"Ho")).unwrap(),
            Value::Text("Ho".into())
        );
        assert_eq!(
            Value::from_cell(0, ValueRef::Blob(&[0xff])).unwrap(),
            Value::Blob(vec![0xff])
        );
        assert!(matches!(
            Value::from_cell(3, ValueRef::Text(&[b'a', 0xff])),
            Err(Error::TypeMismatch { column: 3, .. })
        ));
    }

    #[test]
    fn test_classification() {
        assert_eq!(42i32.to_value().sql_type(), SqlType::Integer);
        assert_eq!(true.to_value(), Value::Integer(1));
        assert_eq!(false.to_value(), Value::Integer(0));
        assert_eq!(1.5f64.to_value().sql_type(), SqlType::Float);
        assert_eq!("Ho".to_value(), Value::Text("Ho".into()));
        assert_eq!(vec![1u8, 2].to_value(), Value::Blob(vec![1, 2]));
        assert_eq!(None::<i64>.to_value(), Value::Null);
    }

    #[test]
    fn test_pool_slots_per_type() {
        let mut pool = ValuePool::new();
        let a = pool.push(Value::Integer(7));
        let b = pool.push(Value::Text("x".into()));
        let c = pool.push(Value::Integer(8));
        let d = pool.push(Value::Null);

        assert_eq!(a, ValueSlot::Integer(0));
        assert_eq!(b, ValueSlot::Text(0));
        assert_eq!(c, ValueSlot::Integer(1));
        assert!(d.is_null());
        assert_eq!(pool.len(), 3);
        assert_eq!(pool.get(c), Value::Integer(8));
        assert_eq!(pool.get(b), Value::Text("x".into()));

        pool.clear();
        assert!(pool.is_empty());
    }

    /// A stored JSON null is text, an absent value is SQL NULL.
    #[test]
    fn test_json_null_vs_absent() {
        let present = Some(Json(serde_json::Value::Null)).to_value();
        assert_eq!(present, Value::Text("null".into()));

        let absent = None::<Json>.to_value();
        assert_eq!(absent, Value::Null);

        let back = Option::<Json>::from_value(&present).unwrap();
        assert!(back.unwrap().is_json_null());
        assert!(Option::<Json>::from_value(&absent).unwrap().is_none());
    }

    #[test]
    fn test_timestamp_seconds() {
        let ts = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        assert_eq!(ts.to_value(), Value::Integer(1_700_000_000));
        assert_eq!(
            DateTime::<Utc>::from_value(&Value::Integer(1_700_000_000)).unwrap(),
            ts
        );
    }

    #[test]
    fn test_null_and_mismatch() {
        assert!(matches!(i64::from_value(&Value::Null), Err(ConversionError::Null)));
        assert!(matches!(
            i64::from_value(&Value::Text("1".into())),
            Err(ConversionError::Mismatch { expected: "i64", actual: "TEXT" })
        ));
        assert!(matches!(
            i32::from_value(&Value::Integer(i64::MAX)),
            Err(ConversionError::Mismatch { .. })
        ));
    }

    #[test]
    fn test_json_roundtrip_struct() {
        #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
        struct Prefs {
            theme: String,
            size: u8,
        }

        let prefs = Prefs {
            theme: "dark".into(),
            size: 12,
        };
        let json = Json::from_serialize(&prefs).unwrap();
        let stored = json.to_value();
        let back: Prefs = Json::from_value(&stored).unwrap().deserialize().unwrap();
        assert_eq!(back, prefs);
    }
}
