use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use uuid::Uuid;

/// A decoded column value.
///
/// `numeric`/`money` decode to `Numeric`, a string, since PostgreSQL's
/// arbitrary-precision decimal has no lossless native Rust counterpart in
/// this crate's dependency stack. `time`/`timetz`/`interval` and the
/// geometry/bit/range/tsvector families decode to `String` as well.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Numeric(String),
    Bytes(Vec<u8>),
    String(String),
    Uuid(Uuid),
    Json(serde_json::Value),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Array(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Numeric(s) => Some(s),
            _ => None,
        }
    }

    /// Render as a `serde_json::Value`, used by the aggregation engine's
    /// temporary-table backend (jsonb columns) and by `diff` serialization.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::Number((*i).into()),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Numeric(s) | Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Bytes(b) => serde_json::Value::String(hex::encode(b)),
            Value::Uuid(u) => serde_json::Value::String(u.to_string()),
            Value::Json(v) => v.clone(),
            Value::Date(d) => serde_json::Value::String(d.to_string()),
            Value::Timestamp(t) => serde_json::Value::String(t.to_string()),
            Value::TimestampTz(t) => serde_json::Value::String(t.to_rfc3339()),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
        }
    }

    /// Best-effort inverse of [`Value::to_json`], used to reconstitute a row
    /// read back out of the temporary-table aggregation backend's jsonb
    /// columns. Loses the distinction between `Numeric`/`Bytes`/dates and
    /// plain strings — those all round-trip as `Value::String`.
    pub fn from_json(v: &serde_json::Value) -> Value {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => Value::Array(items.iter().map(Value::from_json).collect()),
            serde_json::Value::Object(_) => Value::Json(v.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_roundtrip_for_scalars() {
        assert_eq!(Value::from_json(&Value::Int(7).to_json()), Value::Int(7));
        assert_eq!(Value::from_json(&Value::Bool(true).to_json()), Value::Bool(true));
        assert_eq!(Value::from_json(&Value::Null.to_json()), Value::Null);
        assert_eq!(
            Value::from_json(&Value::String("hi".into()).to_json()),
            Value::String("hi".into())
        );
    }

    #[test]
    fn json_roundtrip_for_array() {
        let v = Value::Array(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(Value::from_json(&v.to_json()), v);
    }
}
