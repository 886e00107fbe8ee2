use crate::ejson::{self, Value};

/// Query string parameters
///
/// Plain strings and numbers are sent as-is; documents, arrays and other
/// extended values are sent as extended JSON text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    pairs: Vec<(String, String)>,
}

impl Params {
    /// Create an empty parameter list
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a plain parameter, replacing an earlier value for `key`
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let key = key.into();
        let value = value.into();
        match self.pairs.iter_mut().find(|(k, _)| *k == key) {
            Some(pair) => pair.1 = value,
            None => self.pairs.push((key, value)),
        }
        self
    }

    /// Set a parameter from an extended value
    pub fn set_value(&mut self, key: impl Into<String>, value: &Value) -> &mut Self {
        let text = match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int64(n) => n.to_string(),
            other => ejson::stringify(other),
        };
        self.set(key, text)
    }

    /// Set a parameter only when `value` is present
    pub fn set_opt(&mut self, key: &str, value: Option<&Value>) -> &mut Self {
        if let Some(value) = value {
            self.set_value(key, value);
        }
        self
    }

    /// Value of a parameter
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Parameters in insertion order
    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    /// Number of parameters
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Whether there are no parameters
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Params::new();
        for (k, v) in iter {
            params.set(k, v);
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ejson::{Document, ObjectId};

    #[test]
    fn test_set_replaces() {
        let mut params = Params::new();
        params.set("limit", "10").set("limit", "20");
        assert_eq!(params.len(), 1);
        assert_eq!(params.get("limit"), Some("20"));
    }

    #[test]
    fn test_documents_are_extended_json() {
        let id = ObjectId::parse_str("5f0c9a1b2c3d4e5f60718293").unwrap();
        let query = Value::Document(Document::new().with("_id", id));

        let mut params = Params::new();
        params.set_value("query", &query).set_value("skip", &Value::from(5i64));

        assert_eq!(
            params.get("query"),
            Some(r#"{"_id":{"$oid":"5f0c9a1b2c3d4e5f60718293"}}"#)
        );
        assert_eq!(params.get("skip"), Some("5"));
    }

    #[test]
    fn test_plain_string_not_quoted() {
        let params: Params = [("name", "users")].into_iter().collect();
        assert_eq!(params.get("name"), Some("users"));
    }
}
