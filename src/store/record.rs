//! Identifier extraction for loosely-typed JSON records.
//!
//! Collections of `serde_json::Value` are keyed by a named field, the way a
//! list fetched from an API is usually keyed by `"id"`.

use std::fmt;

use serde_json::Value;

/// Identifier read from a record field.
///
/// Numbers compare by value, so `1` and `1.0` address the same record.
/// Integer and string ids are distinct: `1` and `"1"` address different
/// records.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordId {
    Int(i64),
    Str(String),
    /// Any other JSON value (fractional or out-of-range numbers, bools, arrays,
    /// objects), keyed by its serialized text.
    Other(String),
    /// Field absent or `null`. All such records share one slot.
    Missing,
}

impl RecordId {
    pub fn of(value: Option<&Value>) -> Self {
        match value {
            None | Some(Value::Null) => RecordId::Missing,
            Some(Value::String(s)) => RecordId::Str(s.clone()),
            Some(Value::Number(n)) => match n.as_i64().or_else(|| n.as_f64().and_then(exact_i64)) {
                Some(i) => RecordId::Int(i),
                None => RecordId::Other(n.to_string()),
            },
            Some(other) => RecordId::Other(other.to_string()),
        }
    }
}

/// `f` as an integer, if it has no fractional part and fits in `i64`.
fn exact_i64(f: f64) -> Option<i64> {
    // i64::MAX as f64 rounds up to 2^63, which is out of range.
    (f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64).then_some(f as i64)
}

impl From<i64> for RecordId {
    fn from(value: i64) -> Self {
        RecordId::Int(value)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        RecordId::Str(value.to_string())
    }
}

impl From<String> for RecordId {
    fn from(value: String) -> Self {
        RecordId::Str(value)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Int(i) => write!(f, "{}", i),
            RecordId::Str(s) => write!(f, "{}", s),
            RecordId::Other(s) => write!(f, "{}", s),
            RecordId::Missing => write!(f, "<missing>"),
        }
    }
}

/// Build an id extractor that reads `field` from object records.
pub fn field_id(field: impl Into<String>) -> impl Fn(&Value) -> RecordId + Send + Sync + 'static {
    let field = field.into();
    move |record: &Value| RecordId::of(record.get(&field))
}
