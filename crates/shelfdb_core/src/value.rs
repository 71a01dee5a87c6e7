//! Dynamic field values and documents.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Name of the pseudo-field carrying the record id in returned documents.
pub const ID_FIELD: &str = "_id";

/// An open field map, the shape of every stored and returned record.
pub type Document = BTreeMap<String, Value>;

/// A dynamic field value.
///
/// The variants mirror what a JSON payload can carry, so documents decoded
/// by an outer HTTP layer map onto values without loss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer.
    Integer(i64),
    /// Floating point number.
    Float(f64),
    /// Text string.
    Text(String),
    /// Array of values.
    Array(Vec<Value>),
    /// Nested map.
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Returns the string form used as index key and filter operand.
    ///
    /// `1` and `"1"` produce the same key, so a filter coming from a URI
    /// query string matches an integer field.
    #[must_use]
    pub fn index_key(&self) -> String {
        match self {
            Value::Text(s) => s.clone(),
            other => other.to_string(),
        }
    }

    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get this value as a boolean, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get this value as an integer, if it is one.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Get this value as a string, if it is a text string.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Get this value as an array, if it is one.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Get this value as a map, if it is one.
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Look up a key in this map value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map().and_then(|m| m.get(key))
    }

    /// Interprets the value as a non-negative integer.
    ///
    /// Accepts integers and decimal text, which is how ids and page numbers
    /// arrive from query strings.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Integer(n) => u64::try_from(*n).ok(),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Integer(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => write!(f, "{s:?}"),
            Value::Array(_) | Value::Map(_) => {
                let json = serde_json::Value::from(self.clone());
                write!(f, "{json}")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        i64::try_from(n).map_or(Value::Float(n as f64), Value::Integer)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}

impl From<Document> for Value {
    fn from(doc: Document) -> Self {
        Value::Map(doc)
    }
}

impl From<()> for Value {
    fn from((): ()) -> Self {
        Value::Null
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::Text(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Integer(n) => serde_json::Value::from(n),
            Value::Float(x) => serde_json::Number::from_f64(x)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Value::Text(s) => serde_json::Value::String(s),
            Value::Array(items) => {
                serde_json::Value::Array(items.into_iter().map(Into::into).collect())
            }
            Value::Map(map) => serde_json::Value::Object(
                map.into_iter().map(|(k, v)| (k, v.into())).collect(),
            ),
        }
    }
}

/// Builds a document from field/value pairs.
///
/// ```
/// use shelfdb_core::{document, Value};
///
/// let doc = document([("a", 1), ("b", 2)]);
/// assert_eq!(doc["a"], Value::Integer(1));
/// ```
pub fn document<K, V, I>(pairs: I) -> Document
where
    K: Into<String>,
    V: Into<Value>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// Returns the `_id` of a returned document, if present.
pub fn document_id(doc: &Document) -> Option<u64> {
    doc.get(ID_FIELD).and_then(Value::as_u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_key_stringifies() {
        assert_eq!(Value::Integer(1).index_key(), "1");
        assert_eq!(Value::Text("1".into()).index_key(), "1");
        assert_eq!(Value::Bool(true).index_key(), "true");
        assert_eq!(Value::Null.index_key(), "null");
        assert_eq!(Value::Float(1.5).index_key(), "1.5");
        assert_eq!(
            Value::from(vec![1i64, 2]).index_key(),
            "[1,2]"
        );
    }

    #[test]
    fn text_display_is_quoted_but_key_is_not() {
        let v = Value::from("abc");
        assert_eq!(v.to_string(), "\"abc\"");
        assert_eq!(v.index_key(), "abc");
    }

    #[test]
    fn as_u64_accepts_numeric_text() {
        assert_eq!(Value::from("12").as_u64(), Some(12));
        assert_eq!(Value::Integer(3).as_u64(), Some(3));
        assert_eq!(Value::Integer(-3).as_u64(), None);
        assert_eq!(Value::from("x").as_u64(), None);
    }

    #[test]
    fn json_conversion() {
        let json = serde_json::json!({"a": 1, "b": [true, null], "c": 2.5, "d": "x"});
        let value = Value::from(json.clone());
        assert_eq!(value.get("a"), Some(&Value::Integer(1)));
        assert_eq!(value.get("c"), Some(&Value::Float(2.5)));
        assert_eq!(serde_json::Value::from(value), json);
    }

    #[test]
    fn untagged_serde_prefers_integers() {
        let value: Value = serde_json::from_str("7").unwrap();
        assert_eq!(value, Value::Integer(7));
        let value: Value = serde_json::from_str("7.25").unwrap();
        assert_eq!(value, Value::Float(7.25));
    }

    #[test]
    fn document_builder() {
        let doc = document([("a", 1), ("b", 2)]);
        assert_eq!(doc.len(), 2);
        assert_eq!(doc["b"], Value::Integer(2));
    }
}
