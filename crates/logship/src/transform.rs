//! Record normalization into the wire JSON shape.
//!
//! Raw records arrive from the host pipeline as already-decoded nested
//! mappings whose leaves may be scalars, byte sequences, arrays, or further
//! mappings. Normalization flattens that into one JSON object per record,
//! applies key de-dotting, and stamps the enrichment fields the listener
//! indexes on (`@timestamp`, `ingest_tag`, `type`, `output_id`, `host`).

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

use crate::config::OutputConfig;
use crate::hostname;

/// A decoded record value as handed over by the host pipeline.
///
/// Byte sequences are kept distinct from strings so they can be rendered as
/// text on the wire instead of being base64-encoded by the serializer.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Bytes(Vec<u8>),
    String(String),
    Array(Vec<RawValue>),
    Map(HashMap<String, RawValue>),
}

/// One decoded record: a field mapping with string keys.
pub type RawRecord = HashMap<String, RawValue>;

impl From<Value> for RawValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => RawValue::Null,
            Value::Bool(b) => RawValue::Bool(b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    RawValue::Int(i)
                } else if let Some(u) = n.as_u64() {
                    RawValue::UInt(u)
                } else {
                    RawValue::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            Value::String(s) => RawValue::String(s),
            Value::Array(items) => RawValue::Array(items.into_iter().map(RawValue::from).collect()),
            Value::Object(map) => RawValue::Map(
                map.into_iter()
                    .map(|(k, v)| (k, RawValue::from(v)))
                    .collect(),
            ),
        }
    }
}

/// Event time attached to a record by the host.
///
/// The host wire format carries timestamps in several shapes; [`resolve`]
/// collapses them all to a UTC instant. `Pair` covers the two-element array
/// form whose first element is itself one of the other shapes.
///
/// [`resolve`]: EventTime::resolve
#[derive(Debug, Clone)]
pub enum EventTime {
    Timestamp(DateTime<Utc>),
    UnixSeconds(u64),
    Pair(Box<EventTime>),
    Unrecognized,
}

impl EventTime {
    /// Resolve to a concrete instant. Unrecognized or out-of-range shapes
    /// resolve to "now" with a warning.
    #[must_use]
    pub fn resolve(&self) -> DateTime<Utc> {
        match self {
            EventTime::Timestamp(ts) => *ts,
            EventTime::UnixSeconds(secs) => i64::try_from(*secs)
                .ok()
                .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
                .unwrap_or_else(|| {
                    warn!("event time {secs} out of range, defaulting to now");
                    Utc::now()
                }),
            EventTime::Pair(inner) => inner.resolve(),
            EventTime::Unrecognized => {
                warn!("unrecognized event time shape, defaulting to now");
                Utc::now()
            }
        }
    }
}

/// Errors produced while normalizing one record. The record is dropped and
/// the batch continues.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("non-finite float {0} is not representable as JSON")]
    NonFiniteFloat(f64),

    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Normalizes raw records for one output instance.
#[derive(Debug, Clone)]
pub struct Transformer {
    output_id: String,
    log_type: String,
    dedot_enabled: bool,
    dedot_nested: bool,
    dedot_separator: String,
    hostname: String,
}

impl Transformer {
    #[must_use]
    pub fn new(config: &OutputConfig) -> Self {
        Transformer {
            output_id: config.resolved_id().to_string(),
            log_type: config.log_type.clone(),
            dedot_enabled: config.dedot.enabled,
            dedot_nested: config.dedot.nested,
            dedot_separator: config.dedot.effective_separator().to_string(),
            hostname: hostname::get_hostname(),
        }
    }

    /// Normalize and JSON-encode one record.
    ///
    /// Returns the serialized bytes ready for the bulk buffer. `type` and
    /// `host` are added only when the record does not already carry them;
    /// `@timestamp`, `ingest_tag`, and `output_id` are always overwritten.
    pub fn serialize(
        &self,
        event_time: &EventTime,
        tag: &str,
        record: &RawRecord,
    ) -> Result<Vec<u8>, TransformError> {
        let mut body = self.normalize_map(record, self.dedot_enabled)?;

        if !body.contains_key("type") {
            body.insert("type".to_string(), Value::String(self.log_type.clone()));
        }
        if !body.contains_key("host") {
            body.insert("host".to_string(), Value::String(self.hostname.clone()));
        }
        body.insert(
            "output_id".to_string(),
            Value::String(self.output_id.clone()),
        );
        body.insert(
            "@timestamp".to_string(),
            Value::String(
                event_time
                    .resolve()
                    .to_rfc3339_opts(SecondsFormat::Millis, true),
            ),
        );
        body.insert("ingest_tag".to_string(), Value::String(tag.to_string()));

        Ok(serde_json::to_vec(&Value::Object(body))?)
    }

    fn normalize_map(
        &self,
        record: &HashMap<String, RawValue>,
        dedot: bool,
    ) -> Result<Map<String, Value>, TransformError> {
        let mut out = Map::new();
        for (key, value) in record {
            let key = if dedot {
                key.replace('.', &self.dedot_separator)
            } else {
                key.clone()
            };
            out.insert(key, self.normalize_value(value, dedot)?);
        }
        Ok(out)
    }

    fn normalize_value(&self, value: &RawValue, dedot: bool) -> Result<Value, TransformError> {
        match value {
            RawValue::Null => Ok(Value::Null),
            RawValue::Bool(b) => Ok(Value::Bool(*b)),
            RawValue::Int(n) => Ok(Value::from(*n)),
            RawValue::UInt(n) => Ok(Value::from(*n)),
            RawValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .ok_or(TransformError::NonFiniteFloat(*f)),
            // text, never base64
            RawValue::Bytes(bytes) => Ok(Value::String(String::from_utf8_lossy(bytes).into_owned())),
            RawValue::String(s) => Ok(Value::String(s.clone())),
            RawValue::Array(items) => items
                .iter()
                .map(|item| self.normalize_value(item, dedot))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            RawValue::Map(map) => {
                // nested levels keep de-dotting only when configured to descend
                let dedot = dedot && self.dedot_nested;
                Ok(Value::Object(self.normalize_map(map, dedot)?))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DedotConfig;

    fn transformer(dedot: DedotConfig) -> Transformer {
        Transformer::new(&OutputConfig {
            id: "out1".to_string(),
            token: "test-token".to_string(),
            log_type: "type1".to_string(),
            dedot,
            ..Default::default()
        })
    }

    fn decode(bytes: &[u8]) -> Map<String, Value> {
        match serde_json::from_slice(bytes).unwrap() {
            Value::Object(map) => map,
            other => panic!("expected object, got {other:?}"),
        }
    }

    fn record(entries: Vec<(&str, RawValue)>) -> RawRecord {
        entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    #[test]
    fn test_serialize_passes_fields_through() {
        let t = transformer(DedotConfig::default());
        let rec = record(vec![("key", RawValue::String("value".to_string()))]);
        let bytes = t
            .serialize(&EventTime::UnixSeconds(1_700_000_000), "tag1", &rec)
            .unwrap();
        let body = decode(&bytes);

        assert_eq!(body["key"], "value");
        assert_eq!(body["ingest_tag"], "tag1");
        assert_eq!(body["type"], "type1");
        assert_eq!(body["output_id"], "out1");
        assert!(body.contains_key("host"));
        assert_eq!(body["@timestamp"], "2023-11-14T22:13:20.000Z");
    }

    #[test]
    fn test_enrichment_is_non_destructive() {
        let t = transformer(DedotConfig::default());
        let rec = record(vec![
            ("type", RawValue::String("custom-type".to_string())),
            ("host", RawValue::String("custom-host".to_string())),
        ]);
        let body = decode(
            &t.serialize(&EventTime::UnixSeconds(0), "tag", &rec)
                .unwrap(),
        );

        assert_eq!(body["type"], "custom-type");
        assert_eq!(body["host"], "custom-host");
        // identity fields are always the instance's
        assert_eq!(body["output_id"], "out1");
    }

    #[test]
    fn test_dedot_rewrites_top_level_keys() {
        let t = transformer(DedotConfig {
            enabled: true,
            ..Default::default()
        });
        let rec = record(vec![("a.b.c", RawValue::Bool(true))]);
        let body = decode(
            &t.serialize(&EventTime::UnixSeconds(0), "tag", &rec)
                .unwrap(),
        );

        assert_eq!(body["a_b_c"], true);
        assert!(!body.contains_key("a.b.c"));
    }

    #[test]
    fn test_dedot_without_dot_is_identity() {
        let t = transformer(DedotConfig {
            enabled: true,
            ..Default::default()
        });
        let rec = record(vec![("plain", RawValue::Int(1))]);
        let body = decode(
            &t.serialize(&EventTime::UnixSeconds(0), "tag", &rec)
                .unwrap(),
        );
        assert_eq!(body["plain"], 1);
    }

    #[test]
    fn test_dedot_nested_disabled_leaves_subtree_untouched() {
        let t = transformer(DedotConfig {
            enabled: true,
            nested: false,
            ..Default::default()
        });
        let inner = record(vec![("x.y", RawValue::Int(7))]);
        let rec = record(vec![("outer.key", RawValue::Map(inner))]);
        let body = decode(
            &t.serialize(&EventTime::UnixSeconds(0), "tag", &rec)
                .unwrap(),
        );

        assert_eq!(body["outer_key"]["x.y"], 7);
    }

    #[test]
    fn test_dedot_nested_enabled_descends() {
        let t = transformer(DedotConfig {
            enabled: true,
            nested: true,
            ..Default::default()
        });
        let inner = record(vec![("x.y", RawValue::Int(7))]);
        let rec = record(vec![("outer.key", RawValue::Map(inner))]);
        let body = decode(
            &t.serialize(&EventTime::UnixSeconds(0), "tag", &rec)
                .unwrap(),
        );

        assert_eq!(body["outer_key"]["x_y"], 7);
    }

    #[test]
    fn test_dedot_descends_through_arrays() {
        let t = transformer(DedotConfig {
            enabled: true,
            nested: true,
            ..Default::default()
        });
        let inner = record(vec![("x.y", RawValue::Int(7))]);
        let rec = record(vec![(
            "items",
            RawValue::Array(vec![RawValue::Map(inner)]),
        )]);
        let body = decode(
            &t.serialize(&EventTime::UnixSeconds(0), "tag", &rec)
                .unwrap(),
        );

        assert_eq!(body["items"][0]["x_y"], 7);
    }

    #[test]
    fn test_bytes_render_as_text() {
        let t = transformer(DedotConfig::default());
        let rec = record(vec![(
            "message",
            RawValue::Bytes(b"binary text".to_vec()),
        )]);
        let body = decode(
            &t.serialize(&EventTime::UnixSeconds(0), "tag", &rec)
                .unwrap(),
        );

        assert_eq!(body["message"], "binary text");
    }

    #[test]
    fn test_non_finite_float_is_an_error() {
        let t = transformer(DedotConfig::default());
        let rec = record(vec![("bad", RawValue::Float(f64::NAN))]);
        assert!(t
            .serialize(&EventTime::UnixSeconds(0), "tag", &rec)
            .is_err());
    }

    #[test]
    fn test_event_time_pair_resolves_recursively() {
        let ts = EventTime::Pair(Box::new(EventTime::UnixSeconds(1_700_000_000)));
        assert_eq!(ts.resolve().timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_event_time_unrecognized_defaults_to_now() {
        let before = Utc::now();
        let resolved = EventTime::Unrecognized.resolve();
        assert!(resolved >= before);
    }

    #[test]
    fn test_raw_value_from_json() {
        let value: Value = serde_json::json!({
            "n": 3,
            "s": "text",
            "nested": {"flag": true},
            "list": [1, 2],
        });
        let raw = RawValue::from(value);

        let RawValue::Map(map) = raw else {
            panic!("expected map");
        };
        assert_eq!(map["n"], RawValue::Int(3));
        assert_eq!(map["s"], RawValue::String("text".to_string()));
        assert!(matches!(map["nested"], RawValue::Map(_)));
        assert!(matches!(map["list"], RawValue::Array(_)));
    }
}
