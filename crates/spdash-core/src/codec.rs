//! JSON wire format for SP values.
//!
//! Values are adjacently tagged, with the payload nested once more under the
//! type name:
//!
//! ```json
//! {"type":"Int64","value":{"Int64":42}}
//! {"type":"Bool","value":"UNKNOWN"}
//! {"type":"Map","value":{"Map":[[{"type":"String","value":{"String":"k"}},{"type":"Int64","value":{"Int64":1}}]]}}
//! ```
//!
//! Decoding is lenient below the top level: an array or map item that cannot
//! be decoded is skipped with a warning, and a scalar payload of the wrong
//! JSON kind decodes as UNKNOWN.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Value};
use tracing::warn;

use crate::error::CodecError;
use crate::value::{
    format_time, SpRotation, SpTransform, SpTransformStamped, SpTranslation, SpValue, SpValueType,
};

/// Marker used on the wire for values that are not known.
pub const UNKNOWN: &str = "UNKNOWN";

/// Encode a value as a JSON document.
pub fn encode_value(value: &SpValue) -> Value {
    let ty = value.value_type();
    let payload = match value {
        SpValue::Bool(Some(b)) => Some(json!(b)),
        SpValue::Float64(Some(f)) => Some(json!(f)),
        SpValue::Int64(Some(i)) => Some(json!(i)),
        SpValue::String(Some(s)) => Some(json!(s)),
        SpValue::Time(Some(t)) => Some(json!(format_time(t))),
        SpValue::Array(Some(items)) => Some(Value::Array(items.iter().map(encode_value).collect())),
        SpValue::Map(Some(pairs)) => Some(Value::Array(
            pairs
                .iter()
                .map(|(k, v)| Value::Array(vec![encode_value(k), encode_value(v)]))
                .collect(),
        )),
        SpValue::Transform(Some(tf)) => Some(encode_transform(tf)),
        _ => None,
    };

    let value = match payload {
        Some(inner) => {
            let mut nested = Map::new();
            nested.insert(ty.name().to_string(), inner);
            Value::Object(nested)
        }
        None => Value::String(UNKNOWN.to_string()),
    };

    json!({ "type": ty.name(), "value": value })
}

/// Encode a value as compact JSON text.
pub fn encode_string(value: &SpValue) -> String {
    encode_value(value).to_string()
}

fn encode_transform(tf: &SpTransformStamped) -> Value {
    let mut out = Map::new();
    if let Some(active) = tf.active {
        out.insert("active".into(), json!(active));
    }
    if let Some(ts) = &tf.time_stamp {
        out.insert("time_stamp".into(), json!(format_time(ts)));
    }
    if let Some(parent) = &tf.parent_frame_id {
        out.insert("parent_frame_id".into(), json!(parent));
    }
    if let Some(child) = &tf.child_frame_id {
        out.insert("child_frame_id".into(), json!(child));
    }
    if let Some(transform) = &tf.transform {
        let t = &transform.translation;
        let r = &transform.rotation;
        out.insert(
            "transform".into(),
            json!({
                "translation": { "x": t.x, "y": t.y, "z": t.z },
                "rotation": { "x": r.x, "y": r.y, "z": r.z, "w": r.w },
            }),
        );
    }
    let metadata = match &tf.metadata {
        meta @ SpValue::Map(_) => encode_value(meta),
        _ => encode_value(&SpValue::Map(None)),
    };
    out.insert("metadata".into(), metadata);
    Value::Object(out)
}

/// Decode a JSON text into a value.
pub fn decode_str(text: &str) -> Result<SpValue, CodecError> {
    let doc: Value = serde_json::from_str(text)?;
    decode_value(&doc)
}

/// Decode a JSON document into a value.
pub fn decode_value(doc: &Value) -> Result<SpValue, CodecError> {
    let obj = doc
        .as_object()
        .ok_or_else(|| CodecError::NotAnObject(json_kind(doc).to_string()))?;
    let type_name = obj
        .get("type")
        .and_then(Value::as_str)
        .ok_or(CodecError::MissingType)?;
    let ty = SpValueType::from_name(type_name)
        .ok_or_else(|| CodecError::UnknownType(type_name.to_string()))?;

    let raw = obj.get("value").unwrap_or(&Value::Null);
    if raw.is_null() || raw.as_str() == Some(UNKNOWN) {
        return Ok(ty.unknown());
    }

    // Some producers omit the inner type name; accept the bare payload too.
    let inner = match raw.as_object().and_then(|m| m.get(ty.name())) {
        Some(inner) => inner,
        None if raw.is_object() && ty != SpValueType::Transform => &Value::Null,
        None => raw,
    };

    let value = match ty {
        SpValueType::Bool => SpValue::Bool(inner.as_bool()),
        SpValueType::Float64 => SpValue::Float64(lenient_f64(inner)),
        SpValueType::Int64 => SpValue::Int64(lenient_i64(inner)),
        SpValueType::String => SpValue::String(match inner {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }),
        SpValueType::Time => SpValue::Time(decode_time(inner)),
        SpValueType::Array => match inner.as_array() {
            Some(items) => SpValue::Array(Some(
                items
                    .iter()
                    .filter_map(|item| match decode_value(item) {
                        Ok(v) => Some(v),
                        Err(e) => {
                            warn!("Skipping undecodable array item {}: {}", item, e);
                            None
                        }
                    })
                    .collect(),
            )),
            None => {
                warn!("Array payload was not a list: {}", inner);
                SpValue::Array(None)
            }
        },
        SpValueType::Map => match inner.as_array() {
            Some(pairs) => SpValue::Map(Some(pairs.iter().filter_map(decode_pair).collect())),
            None => {
                warn!("Map payload was not a list: {}", inner);
                SpValue::Map(None)
            }
        },
        SpValueType::Transform => match inner.as_object() {
            Some(fields) => SpValue::Transform(Some(Box::new(decode_transform(fields)))),
            None => {
                warn!("Transform payload was not an object: {}", inner);
                SpValue::Transform(None)
            }
        },
    };

    Ok(value)
}

fn decode_pair(pair: &Value) -> Option<(SpValue, SpValue)> {
    let items = match pair.as_array() {
        Some(items) if items.len() == 2 => items,
        _ => {
            warn!("Invalid map pair {}, expected a list of two elements", pair);
            return None;
        }
    };
    match (decode_value(&items[0]), decode_value(&items[1])) {
        (Ok(k), Ok(v)) => Some((k, v)),
        (k, v) => {
            warn!(
                "Skipping undecodable map pair {}: key={:?} value={:?}",
                pair,
                k.err(),
                v.err()
            );
            None
        }
    }
}

fn decode_transform(fields: &Map<String, Value>) -> SpTransformStamped {
    let number = |obj: Option<&Value>, name: &str| obj.and_then(|o| o.get(name)).and_then(lenient_f64);

    let transform = fields.get("transform").filter(|t| t.is_object()).map(|t| {
        let translation = t.get("translation");
        let rotation = t.get("rotation");
        SpTransform {
            translation: SpTranslation {
                x: number(translation, "x"),
                y: number(translation, "y"),
                z: number(translation, "z"),
            },
            rotation: SpRotation {
                x: number(rotation, "x"),
                y: number(rotation, "y"),
                z: number(rotation, "z"),
                w: number(rotation, "w"),
            },
        }
    });

    let metadata = match fields.get("metadata").map(decode_value) {
        Some(Ok(meta @ SpValue::Map(_))) => meta,
        Some(Ok(other)) => {
            warn!("Transform metadata decoded as {}, expected Map", other.value_type());
            SpValue::Map(None)
        }
        Some(Err(e)) => {
            warn!("Undecodable transform metadata: {}", e);
            SpValue::Map(None)
        }
        None => SpValue::Map(None),
    };

    SpTransformStamped {
        active: fields.get("active").and_then(Value::as_bool),
        time_stamp: fields.get("time_stamp").and_then(decode_time),
        parent_frame_id: fields.get("parent_frame_id").and_then(text),
        child_frame_id: fields.get("child_frame_id").and_then(text),
        transform,
        metadata,
    }
}

fn text(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn lenient_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        // "NaN" and "inf" have no JSON encoding and read back as UNKNOWN.
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

fn lenient_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Parse a time given either as RFC 3339 text or as epoch seconds.
///
/// Times without an offset are taken to be UTC.
pub(crate) fn parse_time_text(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Some(t.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn decode_time(v: &Value) -> Option<DateTime<Utc>> {
    let parsed = match v {
        Value::String(s) => parse_time_text(s),
        Value::Number(n) => n.as_f64().and_then(|secs| {
            let whole = secs.floor();
            let nanos = ((secs - whole) * 1e9) as u32;
            DateTime::from_timestamp(whole as i64, nanos)
        }),
        _ => None,
    };
    if parsed.is_none() && !v.is_null() {
        warn!("Could not parse time value: {}", v);
    }
    parsed
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl Serialize for SpValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        encode_value(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SpValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let doc = Value::deserialize(deserializer)?;
        decode_value(&doc).map_err(D::Error::custom)
    }
}
