//! Revive and inflate between plain JSON and extended values

use super::{Document, ObjectId, Value};
use crate::{Error, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde_json::{json, Map, Value as JsonValue};

/// Parse extended JSON text
pub fn parse(bytes: &[u8]) -> Result<Value> {
    let json: JsonValue = serde_json::from_slice(bytes)?;
    revive(json)
}

/// Serialize a value as compact extended JSON text
pub fn stringify(value: &Value) -> String {
    inflate(value).to_string()
}

/// Convert plain JSON into extended values, recognizing `$`-wrappers
pub fn revive(json: JsonValue) -> Result<Value> {
    Ok(match json {
        JsonValue::Null => Value::Null,
        JsonValue::Bool(b) => Value::Bool(b),
        JsonValue::Number(n) => Value::Number(n),
        JsonValue::String(s) => Value::String(s),
        JsonValue::Array(items) => {
            Value::Array(items.into_iter().map(revive).collect::<Result<_>>()?)
        }
        JsonValue::Object(map) => revive_object(map)?,
    })
}

fn revive_object(map: Map<String, JsonValue>) -> Result<Value> {
    if let Some(special) = revive_wrapper(&map)? {
        return Ok(special);
    }
    let doc = map
        .into_iter()
        .map(|(k, v)| Ok((k, revive(v)?)))
        .collect::<Result<Document>>()?;
    Ok(Value::Document(doc))
}

/// Recognize a single wrapper object. Objects that merely contain a `$` key
/// alongside unrelated keys are left as plain documents.
fn revive_wrapper(map: &Map<String, JsonValue>) -> Result<Option<Value>> {
    match map.len() {
        1 => {
            let (key, value) = match map.iter().next() {
                Some(entry) => entry,
                None => return Ok(None),
            };
            let revived = match key.as_str() {
                "$oid" => Value::ObjectId(ObjectId::parse_str(expect_str(key, value)?)?),
                "$date" => Value::DateTime(revive_date(value)?),
                "$numberLong" => Value::Int64(parse_i64(key, value)?),
                "$timestamp" => revive_timestamp(value)?,
                "$minKey" => Value::MinKey,
                "$maxKey" => Value::MaxKey,
                "$undefined" => Value::Undefined,
                _ => return Ok(None),
            };
            Ok(Some(revived))
        }
        2 => {
            if let (Some(data), Some(subtype)) = (map.get("$binary"), map.get("$type")) {
                let bytes = BASE64
                    .decode(expect_str("$binary", data)?)
                    .map_err(|e| Error::Json(format!("invalid $binary: {}", e)))?;
                return Ok(Some(Value::Binary {
                    subtype: parse_subtype(subtype)?,
                    bytes,
                }));
            }
            if let (Some(pattern), Some(options)) = (map.get("$regex"), map.get("$options")) {
                return Ok(Some(Value::Regex {
                    pattern: expect_str("$regex", pattern)?.to_string(),
                    options: expect_str("$options", options)?.to_string(),
                }));
            }
            Ok(None)
        }
        _ => Ok(None),
    }
}

fn expect_str<'a>(key: &str, value: &'a JsonValue) -> Result<&'a str> {
    value
        .as_str()
        .ok_or_else(|| Error::Json(format!("{} must be a string, got {}", key, value)))
}

fn parse_i64(key: &str, value: &JsonValue) -> Result<i64> {
    match value {
        JsonValue::String(s) => s
            .parse()
            .map_err(|_| Error::Json(format!("invalid {} `{}`", key, s))),
        JsonValue::Number(n) => n
            .as_i64()
            .ok_or_else(|| Error::Json(format!("invalid {} `{}`", key, n))),
        other => Err(Error::Json(format!("invalid {} `{}`", key, other))),
    }
}

fn revive_date(value: &JsonValue) -> Result<DateTime<Utc>> {
    let millis = match value {
        JsonValue::String(s) => {
            return DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| Error::Json(format!("invalid $date `{}`: {}", s, e)));
        }
        JsonValue::Number(_) => parse_i64("$date", value)?,
        JsonValue::Object(inner) => match inner.get("$numberLong") {
            Some(n) => parse_i64("$numberLong", n)?,
            None => return Err(Error::Json(format!("invalid $date `{}`", value))),
        },
        other => return Err(Error::Json(format!("invalid $date `{}`", other))),
    };
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| Error::Json(format!("$date out of range: {}", millis)))
}

fn revive_timestamp(value: &JsonValue) -> Result<Value> {
    let field = |name: &str| -> Result<u32> {
        value
            .get(name)
            .and_then(JsonValue::as_u64)
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| Error::Json(format!("invalid $timestamp `{}`", value)))
    };
    Ok(Value::Timestamp {
        time: field("t")?,
        increment: field("i")?,
    })
}

fn parse_subtype(value: &JsonValue) -> Result<u8> {
    match value {
        JsonValue::String(s) => u8::from_str_radix(s, 16)
            .map_err(|_| Error::Json(format!("invalid $type `{}`", s))),
        JsonValue::Number(n) => n
            .as_u64()
            .and_then(|n| u8::try_from(n).ok())
            .ok_or_else(|| Error::Json(format!("invalid $type `{}`", n))),
        other => Err(Error::Json(format!("invalid $type `{}`", other))),
    }
}

/// Convert extended values into canonical JSON
pub fn inflate(value: &Value) -> JsonValue {
    match value {
        Value::Null => JsonValue::Null,
        Value::Bool(b) => JsonValue::Bool(*b),
        Value::Number(n) => JsonValue::Number(n.clone()),
        Value::String(s) => JsonValue::String(s.clone()),
        Value::Array(items) => JsonValue::Array(items.iter().map(inflate).collect()),
        Value::Document(doc) => JsonValue::Object(
            doc.iter()
                .map(|(k, v)| (k.to_string(), inflate(v)))
                .collect(),
        ),
        Value::ObjectId(oid) => json!({ "$oid": oid.to_hex() }),
        Value::DateTime(dt) => {
            json!({ "$date": dt.to_rfc3339_opts(SecondsFormat::Millis, true) })
        }
        Value::Binary { subtype, bytes } => json!({
            "$binary": BASE64.encode(bytes),
            "$type": format!("{:02x}", subtype),
        }),
        Value::Regex { pattern, options } => json!({
            "$regex": pattern,
            "$options": options,
        }),
        Value::Int64(n) => json!({ "$numberLong": n.to_string() }),
        Value::Timestamp { time, increment } => {
            json!({ "$timestamp": { "t": time, "i": increment } })
        }
        Value::MinKey => json!({ "$minKey": 1 }),
        Value::MaxKey => json!({ "$maxKey": 1 }),
        Value::Undefined => json!({ "$undefined": true }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revive_plain_json_is_untouched() {
        let value = revive(json!({ "a": [1, "two", null, true] })).unwrap();
        let doc = value.as_document().unwrap();
        let items = doc.get("a").and_then(Value::as_array).unwrap();
        assert_eq!(items.len(), 4);
        assert_eq!(items[1].as_str(), Some("two"));
        assert!(items[2].is_null());
    }

    #[test]
    fn test_revive_date_forms() {
        let iso = revive(json!({ "$date": "2014-07-14T20:04:19.200Z" })).unwrap();
        let millis = revive(json!({ "$date": 1_405_368_259_200_i64 })).unwrap();
        let long = revive(json!({ "$date": { "$numberLong": "1405368259200" } })).unwrap();
        assert_eq!(iso, millis);
        assert_eq!(iso, long);
    }

    #[test]
    fn test_revive_binary() {
        let value = revive(json!({ "$binary": "aGVsbG8=", "$type": "00" })).unwrap();
        assert_eq!(
            value,
            Value::Binary {
                subtype: 0,
                bytes: b"hello".to_vec()
            }
        );
    }

    #[test]
    fn test_revive_regex_and_scalars() {
        assert_eq!(
            revive(json!({ "$regex": "^a", "$options": "i" })).unwrap(),
            Value::Regex {
                pattern: "^a".into(),
                options: "i".into()
            }
        );
        assert_eq!(
            revive(json!({ "$numberLong": "9007199254740993" })).unwrap(),
            Value::Int64(9_007_199_254_740_993)
        );
        assert_eq!(
            revive(json!({ "$timestamp": { "t": 10, "i": 2 } })).unwrap(),
            Value::Timestamp {
                time: 10,
                increment: 2
            }
        );
        assert_eq!(revive(json!({ "$minKey": 1 })).unwrap(), Value::MinKey);
        assert_eq!(revive(json!({ "$maxKey": 1 })).unwrap(), Value::MaxKey);
    }

    #[test]
    fn test_revive_rejects_malformed_wrapper() {
        assert!(revive(json!({ "$oid": "nothex" })).is_err());
        assert!(revive(json!({ "$date": "yesterday" })).is_err());
        assert!(revive(json!({ "$numberLong": "1.5" })).is_err());
    }

    #[test]
    fn test_dollar_key_with_siblings_stays_a_document() {
        let value = revive(json!({ "$gt": 1, "$lt": 5 })).unwrap();
        let doc = value.as_document().unwrap();
        assert_eq!(doc.len(), 2);
        assert_eq!(doc.get("$gt").and_then(Value::as_i64), Some(1));
    }

    #[test]
    fn test_inflate_query_with_date() {
        let query = Value::from(Document::new().with(
            "created_on",
            Document::new().with(
                "$gt",
                Utc.timestamp_millis_opt(1_405_368_259_210).unwrap(),
            ),
        ));
        assert_eq!(
            stringify(&query),
            r#"{"created_on":{"$gt":{"$date":"2014-07-14T20:04:19.210Z"}}}"#
        );
    }

    #[test]
    fn test_parse_then_inflate_is_canonical() {
        let text = br#"{"_id":{"$oid":"53c2b570c15c457669f481f7"},"bin":{"$binary":"AQI=","$type":"80"}}"#;
        let value = parse(text).unwrap();
        assert_eq!(
            inflate(&value),
            json!({
                "_id": { "$oid": "53c2b570c15c457669f481f7" },
                "bin": { "$binary": "AQI=", "$type": "80" }
            })
        );
    }
}
