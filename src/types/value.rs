//! Dynamically typed SQL values.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use std::fmt;

/// A positional parameter or column value.
///
/// Temporal values come in two flavours: the explicit `Date`, `Time` and
/// `Timestamp` variants are bound exactly as given, while `DateTime` is a
/// generic point in time whose SQL representation is chosen when it is bound
/// (a date when it falls on midnight, a timestamp otherwise).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// NULL value
    Null,
    /// Boolean value
    Boolean(bool),
    /// Integer value
    Integer(i64),
    /// Float value
    Float(f64),
    /// String value
    String(String),
    /// Binary data
    Binary(Vec<u8>),
    /// Calendar date without time of day
    Date(NaiveDate),
    /// Time of day without date
    Time(NaiveTime),
    /// Date and time of day
    Timestamp(NaiveDateTime),
    /// Generic point in time, narrowed when bound
    DateTime(NaiveDateTime),
    /// Large binary object, bound as a stream
    Blob(Vec<u8>),
    /// Large character object, bound as a stream
    Clob(String),
}

impl Value {
    /// Check if this is NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Name of the value's variant, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Boolean(_) => "BOOLEAN",
            Value::Integer(_) => "INTEGER",
            Value::Float(_) => "FLOAT",
            Value::String(_) => "STRING",
            Value::Binary(_) => "BINARY",
            Value::Date(_) => "DATE",
            Value::Time(_) => "TIME",
            Value::Timestamp(_) => "TIMESTAMP",
            Value::DateTime(_) => "DATETIME",
            Value::Blob(_) => "BLOB",
            Value::Clob(_) => "CLOB",
        }
    }

    /// Read as a 64-bit integer, converting numeric and textual values.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Float(f) if f.is_finite() => Some(f.trunc() as i64),
            Value::Boolean(b) => Some(i64::from(*b)),
            Value::String(s) | Value::Clob(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Read as a double, converting numeric and textual values.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            Value::String(s) | Value::Clob(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Read as a boolean; non-zero integers are true.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            Value::Integer(i) => Some(*i != 0),
            Value::String(s) | Value::Clob(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Some(true),
                "false" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Borrow textual content.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Clob(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow binary content.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Binary(b) | Value::Blob(b) => Some(b),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::String(s) | Value::Clob(s) => write!(f, "{}", s),
            Value::Binary(b) | Value::Blob(b) => write!(f, "x'{}'", hex::encode(b)),
            Value::Date(d) => write!(f, "{}", d),
            Value::Time(t) => write!(f, "{}", t),
            Value::Timestamp(ts) | Value::DateTime(ts) => write!(f, "{}", ts),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

macro_rules! integer_conversions {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Value::Integer(i64::from(value))
                }
            }
        )*
    };
}

integer_conversions!(i8, i16, i32, i64, u8, u16, u32);

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Float(f64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Binary(value)
    }
}

impl From<&[u8]> for Value {
    fn from(value: &[u8]) -> Self {
        Value::Binary(value.to_vec())
    }
}

impl From<NaiveDate> for Value {
    fn from(value: NaiveDate) -> Self {
        Value::Date(value)
    }
}

impl From<NaiveTime> for Value {
    fn from(value: NaiveTime) -> Self {
        Value::Time(value)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(value: NaiveDateTime) -> Self {
        Value::DateTime(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

/// Build a `Vec<Value>` from heterogeneous positional parameters.
///
/// ```
/// use rowline::{params, Value};
///
/// let values = params![100, "a", None::<i64>];
/// assert_eq!(values, vec![Value::Integer(100), Value::from("a"), Value::Null]);
/// ```
#[macro_export]
macro_rules! params {
    () => {
        ::std::vec::Vec::<$crate::Value>::new()
    };
    ($($value:expr),+ $(,)?) => {
        ::std::vec![$($crate::Value::from($value)),+]
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_conversions() {
        assert_eq!(Value::from(true), Value::Boolean(true));
        assert_eq!(Value::from(42i32), Value::Integer(42));
        assert_eq!(Value::from(7u8), Value::Integer(7));
        assert_eq!(Value::from(2.5f64), Value::Float(2.5));
        assert_eq!(Value::from("x"), Value::String("x".to_string()));
        assert_eq!(Value::from(vec![1u8, 2]), Value::Binary(vec![1, 2]));
        assert_eq!(Value::from(None::<i32>), Value::Null);
        assert_eq!(Value::from(Some(5i64)), Value::Integer(5));
    }

    #[test]
    fn test_generic_datetime_conversion() {
        let dt = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap();
        assert_eq!(Value::from(dt), Value::DateTime(dt));
        assert_eq!(
            Value::from(dt.date()),
            Value::Date(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap())
        );
    }

    #[test]
    fn test_numeric_readers() {
        assert_eq!(Value::Integer(400).as_i64(), Some(400));
        assert_eq!(Value::Float(3.9).as_i64(), Some(3));
        assert_eq!(Value::String(" 12 ".to_string()).as_i64(), Some(12));
        assert_eq!(Value::Null.as_i64(), None);
        assert_eq!(Value::Integer(2).as_f64(), Some(2.0));
        assert_eq!(Value::Integer(0).as_bool(), Some(false));
        assert_eq!(Value::String("TRUE".to_string()).as_bool(), Some(true));
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Null.to_string(), "NULL");
        assert_eq!(Value::Binary(vec![0xab, 0x01]).to_string(), "x'ab01'");
        assert_eq!(Value::Integer(-3).to_string(), "-3");
    }

    #[test]
    fn test_params_macro() {
        let values = params![100, "a"];
        assert_eq!(
            values,
            vec![Value::Integer(100), Value::String("a".to_string())]
        );
        assert!(params![].is_empty());
    }
}
