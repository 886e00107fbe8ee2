//! Extended JSON
//!
//! A superset of JSON carrying additional primitive types (object ids, dates,
//! binary, regular expressions, 64-bit integers, timestamps) through the
//! `$`-prefixed wrapper convention, e.g. `{"$oid": "..."}` or `{"$date": "..."}`.
//!
//! * [`revive`] turns plain JSON into extended values (the reviver hook).
//! * [`inflate`] turns extended values back into canonical JSON before they are
//!   sent anywhere that would otherwise lose the type information.

mod codec;
mod object_id;

pub use codec::{inflate, parse, revive, stringify};
pub use object_id::ObjectId;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Extended JSON value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// `null`
    Null,
    /// Boolean
    Bool(bool),
    /// Plain JSON number
    Number(serde_json::Number),
    /// String
    String(String),
    /// Array
    Array(Vec<Value>),
    /// Object with preserved key order
    Document(Document),
    /// `{"$oid": "..."}`
    ObjectId(ObjectId),
    /// `{"$date": ...}`
    DateTime(DateTime<Utc>),
    /// `{"$binary": "<base64>", "$type": "<hex subtype>"}`
    Binary {
        /// Binary subtype
        subtype: u8,
        /// Payload
        bytes: Vec<u8>,
    },
    /// `{"$regex": "...", "$options": "..."}`
    Regex {
        /// Pattern source
        pattern: String,
        /// Flags
        options: String,
    },
    /// `{"$numberLong": "..."}`
    Int64(i64),
    /// `{"$timestamp": {"t": .., "i": ..}}`
    Timestamp {
        /// Seconds since epoch
        time: u32,
        /// Ordinal within the second
        increment: u32,
    },
    /// `{"$minKey": 1}`
    MinKey,
    /// `{"$maxKey": 1}`
    MaxKey,
    /// `{"$undefined": true}`
    Undefined,
}

impl Value {
    /// Look up a key if this value is a document
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Document(doc) => doc.get(key),
            _ => None,
        }
    }

    /// Borrow as a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Integer view of `Number` and `Int64` values
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Number(n) => n.as_i64(),
            Value::Int64(n) => Some(*n),
            _ => None,
        }
    }

    /// Floating point view of numeric values
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => n.as_f64(),
            Value::Int64(n) => Some(*n as f64),
            _ => None,
        }
    }

    /// Boolean view
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Borrow as a document
    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Value::Document(doc) => Some(doc),
            _ => None,
        }
    }

    /// Borrow as an array
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Object id view
    pub fn as_object_id(&self) -> Option<ObjectId> {
        match self {
            Value::ObjectId(oid) => Some(*oid),
            _ => None,
        }
    }

    /// Date view
    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::DateTime(dt) => Some(*dt),
            _ => None,
        }
    }

    /// Whether this is `null`
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Canonical JSON form (see [`inflate`])
    pub fn to_json(&self) -> serde_json::Value {
        inflate(self)
    }

    /// Revive plain JSON (see [`revive`])
    pub fn from_json(json: serde_json::Value) -> crate::Result<Self> {
        revive(json)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", inflate(self))
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        inflate(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = serde_json::Value::deserialize(deserializer)?;
        revive(json).map_err(serde::de::Error::custom)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n.into())
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n.into())
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Number(n.into())
    }
}

impl From<ObjectId> for Value {
    fn from(oid: ObjectId) -> Self {
        Value::ObjectId(oid)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(dt: DateTime<Utc>) -> Self {
        Value::DateTime(dt)
    }
}

impl From<Document> for Value {
    fn from(doc: Document) -> Self {
        Value::Document(doc)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Ordered key/value document
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Document {
    entries: Vec<(String, Value)>,
}

impl Document {
    /// Empty document
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a key, returning the previous value
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Look up a key
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Remove a key
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let pos = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(pos).1)
    }

    /// Whether a key is present
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Number of keys
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the document has no keys
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Iterate keys in insertion order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }
}

impl FromIterator<(String, Value)> for Document {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut doc = Document::new();
        for (k, v) in iter {
            doc.insert(k, v);
        }
        doc
    }
}

impl IntoIterator for Document {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_document_preserves_insertion_order() {
        let doc = Document::new().with("b", 1).with("a", 2).with("c", 3);
        let keys: Vec<_> = doc.keys().collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_document_insert_replaces() {
        let mut doc = Document::new().with("a", 1);
        let prev = doc.insert("a", "two");
        assert_eq!(prev, Some(Value::from(1)));
        assert_eq!(doc.get("a").and_then(Value::as_str), Some("two"));
        assert_eq!(doc.len(), 1);
    }

    #[test]
    fn test_deserialize_revives() {
        let value: Value = serde_json::from_str(
            r#"{"_id":{"$oid":"53c2b570c15c457669f481f7"},"created_on":{"$date":"2014-07-14T20:04:19.200Z"}}"#,
        )
        .unwrap();
        assert_eq!(
            value.get("_id").and_then(Value::as_object_id),
            Some(ObjectId::parse_str("53c2b570c15c457669f481f7").unwrap())
        );
        assert_eq!(
            value.get("created_on").and_then(Value::as_datetime),
            Utc.timestamp_millis_opt(1_405_368_259_200).single()
        );
    }

    #[test]
    fn test_serialize_inflates() {
        let value = Value::from(
            Document::new()
                .with("n", Value::Int64(42))
                .with("when", Utc.timestamp_millis_opt(1_405_368_259_210).unwrap()),
        );
        let json = serde_json::to_value(&value).unwrap();
        assert_eq!(
            json,
            json!({
                "n": { "$numberLong": "42" },
                "when": { "$date": "2014-07-14T20:04:19.210Z" }
            })
        );
    }

    #[test]
    fn test_display_is_compact_json() {
        let value = Value::from(Document::new().with("_id", 1));
        assert_eq!(value.to_string(), r#"{"_id":1}"#);
    }

    #[test]
    fn test_numeric_views() {
        assert_eq!(Value::Int64(7).as_i64(), Some(7));
        assert_eq!(Value::from(7).as_i64(), Some(7));
        assert_eq!(Value::from("7").as_i64(), None);
    }
}
