// ABOUTME: Typed cell values and rows returned by warehouse queries
// ABOUTME: Supports exact, order-sensitive comparison for quality expectations

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single warehouse cell.
///
/// Decimals are kept in their textual form so that comparison stays exact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawValue", into = "RawValue")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(String),
    Text(String),
    Timestamp(NaiveDateTime),
}

pub type Row = Vec<Value>;

/// Wire shape of a value in pipeline files and run documents.
///
/// Plain YAML/JSON scalars map onto the obvious variants; decimals and
/// timestamps need a one-key mapping (`{decimal: "213"}`,
/// `{timestamp: "2018-11-01T21:01:46"}`) so they are not confused with text.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Typed(TypedValue),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum TypedValue {
    Decimal(String),
    Timestamp(NaiveDateTime),
}

impl From<RawValue> for Value {
    fn from(raw: RawValue) -> Self {
        match raw {
            RawValue::Null => Value::Null,
            RawValue::Bool(b) => Value::Bool(b),
            RawValue::Int(i) => Value::Int(i),
            RawValue::Float(f) => Value::Float(f),
            RawValue::Text(s) => Value::Text(s),
            RawValue::Typed(TypedValue::Decimal(d)) => Value::Decimal(d),
            RawValue::Typed(TypedValue::Timestamp(ts)) => Value::Timestamp(ts),
        }
    }
}

impl From<Value> for RawValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => RawValue::Null,
            Value::Bool(b) => RawValue::Bool(b),
            Value::Int(i) => RawValue::Int(i),
            Value::Float(f) => RawValue::Float(f),
            Value::Text(s) => RawValue::Text(s),
            Value::Decimal(d) => RawValue::Typed(TypedValue::Decimal(d)),
            Value::Timestamp(ts) => RawValue::Typed(TypedValue::Timestamp(ts)),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(value: NaiveDateTime) -> Self {
        Value::Timestamp(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Decimal(d) => write!(f, "{}", d),
            Value::Text(s) => write!(f, "'{}'", s),
            Value::Timestamp(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

/// Render rows as `[(a, b), (c, d)]` for diagnostics.
pub fn format_rows(rows: &[Row]) -> String {
    let rendered: Vec<String> = rows
        .iter()
        .map(|row| {
            let cells: Vec<String> = row.iter().map(|v| v.to_string()).collect();
            format!("({})", cells.join(", "))
        })
        .collect();
    format!("[{}]", rendered.join(", "))
}

/// Build a [`Row`] from heterogeneous values.
#[macro_export]
macro_rules! row {
    ($($value:expr),* $(,)?) => {
        vec![$($crate::warehouse::Value::from($value)),*]
    };
}
