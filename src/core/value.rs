//! Statement parameters and result values
//!
//! Every backend converts its native column types into [`DatabaseValue`] and
//! binds [`DatabaseValue`] parameters back in its own representation. Types
//! without a direct counterpart (dates, decimals, uuids) travel as text.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DatabaseValue {
    Null,
    Bool(bool),
    Int(i32),
    Long(i64),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
}

impl DatabaseValue {
    /// Integer columns read as booleans, as mysql `TINYINT(1)` and sqlite need
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            DatabaseValue::Bool(v) => Some(*v),
            DatabaseValue::Int(v) => Some(*v != 0),
            DatabaseValue::Long(v) => Some(*v != 0),
            _ => None,
        }
    }

    /// Integer value; numeric text is parsed since some drivers report
    /// `COUNT(*)` and `BIGINT` results as strings
    pub fn as_long(&self) -> Option<i64> {
        match self {
            DatabaseValue::Long(v) => Some(*v),
            DatabaseValue::Int(v) => Some(i64::from(*v)),
            DatabaseValue::Bool(v) => Some(i64::from(*v)),
            DatabaseValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            DatabaseValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Text form; NULL renders as `null`
    pub fn as_string(&self) -> String {
        match self {
            DatabaseValue::String(s) => s.clone(),
            DatabaseValue::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
            other => other.to_string(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, DatabaseValue::Null)
    }

    /// NULL or numeric zero: an auto-increment key left for the database
    pub fn is_unset(&self) -> bool {
        match self {
            DatabaseValue::Null => true,
            DatabaseValue::Int(v) => *v == 0,
            DatabaseValue::Long(v) => *v == 0,
            _ => false,
        }
    }
}

/// Rendering used in verbose-SQL logs; bytes show their length only
impl fmt::Display for DatabaseValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseValue::Null => f.write_str("null"),
            DatabaseValue::Bool(v) => write!(f, "{}", v),
            DatabaseValue::Int(v) => write!(f, "{}", v),
            DatabaseValue::Long(v) => write!(f, "{}", v),
            DatabaseValue::Double(v) => write!(f, "{}", v),
            DatabaseValue::String(s) => write!(f, "{:?}", s),
            DatabaseValue::Bytes(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

/// JSON scalars map directly; arrays and objects are stored as JSON text
impl From<&serde_json::Value> for DatabaseValue {
    fn from(value: &serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => DatabaseValue::Null,
            Value::Bool(b) => DatabaseValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => DatabaseValue::Long(i),
                None => n
                    .as_f64()
                    .map(DatabaseValue::Double)
                    .unwrap_or_else(|| DatabaseValue::String(n.to_string())),
            },
            Value::String(s) => DatabaseValue::String(s.clone()),
            other => DatabaseValue::String(other.to_string()),
        }
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for DatabaseValue {
            fn from(v: $ty) -> Self {
                DatabaseValue::$variant(v.into())
            }
        })*
    };
}

impl_from!(
    bool => Bool,
    i32 => Int,
    i64 => Long,
    f64 => Double,
    String => String,
    &str => String,
    Vec<u8> => Bytes,
);

impl<T: Into<DatabaseValue>> From<Option<T>> for DatabaseValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(DatabaseValue::Null, Into::into)
    }
}

/// One result row, keyed by column name
pub type DatabaseRow = HashMap<String, DatabaseValue>;

pub type DatabaseResult = Vec<DatabaseRow>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_count_as_text() {
        let val = DatabaseValue::String(" 12 ".to_string());
        assert_eq!(val.as_long(), Some(12));
        assert_eq!(DatabaseValue::Int(1).as_bool(), Some(true));
        assert_eq!(DatabaseValue::Bytes(b"uid".to_vec()).as_string(), "uid");
        assert_eq!(DatabaseValue::Null.as_string(), "null");
    }

    #[test]
    fn test_display_for_logs() {
        assert_eq!(DatabaseValue::from("a\"b").to_string(), r#""a\"b""#);
        assert_eq!(DatabaseValue::Bytes(vec![0; 4]).to_string(), "<4 bytes>");
        assert_eq!(DatabaseValue::from(Some(3i64)).to_string(), "3");
        assert!(DatabaseValue::from(Option::<&str>::None).is_null());
    }

    #[test]
    fn test_from_json() {
        assert_eq!(DatabaseValue::from(&json!(null)), DatabaseValue::Null);
        assert_eq!(DatabaseValue::from(&json!(true)), DatabaseValue::Bool(true));
        assert_eq!(DatabaseValue::from(&json!(42)), DatabaseValue::Long(42));
        assert_eq!(DatabaseValue::from(&json!(1.5)), DatabaseValue::Double(1.5));
        assert_eq!(DatabaseValue::from(&json!("x")), DatabaseValue::from("x"));
        assert_eq!(
            DatabaseValue::from(&json!({"a": [1, 2]})),
            DatabaseValue::String(r#"{"a":[1,2]}"#.into())
        );
    }

    #[test]
    fn test_is_unset() {
        assert!(DatabaseValue::Null.is_unset());
        assert!(DatabaseValue::Long(0).is_unset());
        assert!(DatabaseValue::Int(0).is_unset());
        assert!(!DatabaseValue::Long(7).is_unset());
        assert!(!DatabaseValue::String(String::new()).is_unset());
    }
}
