//! SP value model.
//!
//! Mirrors the `SPValue` enum the micro_sp producer writes into the store.
//! Every variant can be `UNKNOWN`, represented here as `None`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// The type tag of an SP value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpValueType {
    Bool,
    Float64,
    Int64,
    String,
    Time,
    Array,
    Map,
    Transform,
}

impl SpValueType {
    /// All types, in wire order.
    pub const ALL: [SpValueType; 8] = [
        SpValueType::Bool,
        SpValueType::Float64,
        SpValueType::Int64,
        SpValueType::String,
        SpValueType::Time,
        SpValueType::Array,
        SpValueType::Map,
        SpValueType::Transform,
    ];

    /// Wire name, as used in the `type` tag.
    pub fn name(&self) -> &'static str {
        match self {
            SpValueType::Bool => "Bool",
            SpValueType::Float64 => "Float64",
            SpValueType::Int64 => "Int64",
            SpValueType::String => "String",
            SpValueType::Time => "Time",
            SpValueType::Array => "Array",
            SpValueType::Map => "Map",
            SpValueType::Transform => "Transform",
        }
    }

    /// Look up a type by its wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }

    /// Whether a value of this type can be entered as a single line of text.
    pub fn is_text_settable(&self) -> bool {
        !matches!(
            self,
            SpValueType::Array | SpValueType::Map | SpValueType::Transform
        )
    }

    /// Whether values of this type are numeric.
    pub fn is_numeric(&self) -> bool {
        matches!(self, SpValueType::Float64 | SpValueType::Int64)
    }

    /// The UNKNOWN value of this type.
    pub fn unknown(&self) -> SpValue {
        match self {
            SpValueType::Bool => SpValue::Bool(None),
            SpValueType::Float64 => SpValue::Float64(None),
            SpValueType::Int64 => SpValue::Int64(None),
            SpValueType::String => SpValue::String(None),
            SpValueType::Time => SpValue::Time(None),
            SpValueType::Array => SpValue::Array(None),
            SpValueType::Map => SpValue::Map(None),
            SpValueType::Transform => SpValue::Transform(None),
        }
    }
}

impl fmt::Display for SpValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SpValueType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Self::ALL
            .into_iter()
            .find(|t| t.name().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| ParseError::UnknownTypeName(s.to_string()))
    }
}

/// Translation part of a transform.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpTranslation {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
}

/// Rotation quaternion of a transform.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpRotation {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
    pub w: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpTransform {
    pub translation: SpTranslation,
    pub rotation: SpRotation,
}

/// A transform between two frames, stamped with time and metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct SpTransformStamped {
    pub active: Option<bool>,
    pub time_stamp: Option<DateTime<Utc>>,
    pub parent_frame_id: Option<String>,
    pub child_frame_id: Option<String>,
    pub transform: Option<SpTransform>,
    /// Always a `Map` value; `Map(None)` when absent.
    pub metadata: SpValue,
}

impl Default for SpTransformStamped {
    fn default() -> Self {
        Self {
            active: None,
            time_stamp: None,
            parent_frame_id: None,
            child_frame_id: None,
            transform: None,
            metadata: SpValue::Map(None),
        }
    }
}

/// A typed state value.
#[derive(Debug, Clone, PartialEq)]
pub enum SpValue {
    Bool(Option<bool>),
    Float64(Option<f64>),
    Int64(Option<i64>),
    String(Option<String>),
    Time(Option<DateTime<Utc>>),
    Array(Option<Vec<SpValue>>),
    Map(Option<Vec<(SpValue, SpValue)>>),
    Transform(Option<Box<SpTransformStamped>>),
}

impl SpValue {
    /// The type tag of this value.
    pub fn value_type(&self) -> SpValueType {
        match self {
            SpValue::Bool(_) => SpValueType::Bool,
            SpValue::Float64(_) => SpValueType::Float64,
            SpValue::Int64(_) => SpValueType::Int64,
            SpValue::String(_) => SpValueType::String,
            SpValue::Time(_) => SpValueType::Time,
            SpValue::Array(_) => SpValueType::Array,
            SpValue::Map(_) => SpValueType::Map,
            SpValue::Transform(_) => SpValueType::Transform,
        }
    }

    /// Whether the value is UNKNOWN.
    pub fn is_unknown(&self) -> bool {
        match self {
            SpValue::Bool(v) => v.is_none(),
            SpValue::Float64(v) => v.is_none(),
            SpValue::Int64(v) => v.is_none(),
            SpValue::String(v) => v.is_none(),
            SpValue::Time(v) => v.is_none(),
            SpValue::Array(v) => v.is_none(),
            SpValue::Map(v) => v.is_none(),
            SpValue::Transform(v) => v.is_none(),
        }
    }

    /// Numeric view, for range checks.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SpValue::Float64(v) => *v,
            SpValue::Int64(v) => v.map(|i| i as f64),
            _ => None,
        }
    }

    /// Plain text form of a known scalar, without quoting.
    ///
    /// Used to match values against enumerated tags. Composite and
    /// UNKNOWN values have no scalar text.
    pub fn scalar_text(&self) -> Option<String> {
        match self {
            SpValue::Bool(Some(b)) => Some(b.to_string()),
            SpValue::Float64(Some(f)) => Some(f.to_string()),
            SpValue::Int64(Some(i)) => Some(i.to_string()),
            SpValue::String(Some(s)) => Some(s.clone()),
            SpValue::Time(Some(t)) => Some(format_time(t)),
            _ => None,
        }
    }

    pub fn string(s: impl Into<String>) -> Self {
        SpValue::String(Some(s.into()))
    }

    pub fn int(i: i64) -> Self {
        SpValue::Int64(Some(i))
    }

    pub fn float(f: f64) -> Self {
        SpValue::Float64(Some(f))
    }

    pub fn bool(b: bool) -> Self {
        SpValue::Bool(Some(b))
    }
}

/// RFC 3339 with a `Z` suffix, the format the producer expects.
pub(crate) fn format_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Short human-readable form used by the state viewer.
impl fmt::Display for SpValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unknown() {
            return f.write_str(crate::codec::UNKNOWN);
        }
        match self {
            SpValue::Bool(Some(b)) => write!(f, "{}", b),
            SpValue::Float64(Some(v)) => write!(f, "{}", v),
            SpValue::Int64(Some(v)) => write!(f, "{}", v),
            SpValue::String(Some(s)) => write!(f, "\"{}\"", s),
            SpValue::Time(Some(t)) => f.write_str(&format_time(t)),
            SpValue::Array(Some(items)) => write!(f, "[{} items]", items.len()),
            SpValue::Map(Some(pairs)) => write!(f, "[{} pairs]", pairs.len()),
            SpValue::Transform(Some(tf)) => {
                write!(
                    f,
                    "{} -> {}",
                    tf.parent_frame_id.as_deref().unwrap_or("?"),
                    tf.child_frame_id.as_deref().unwrap_or("?")
                )?;
                if let Some(active) = tf.active {
                    write!(f, " (Active: {})", active)?;
                }
                Ok(())
            }
            _ => f.write_str(crate::codec::UNKNOWN),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_names() {
        for ty in SpValueType::ALL {
            assert_eq!(SpValueType::from_name(ty.name()), Some(ty));
            assert_eq!(ty.unknown().value_type(), ty);
            assert!(ty.unknown().is_unknown());
        }
        assert_eq!(SpValueType::from_name("bool"), None);
        assert_eq!("bool".parse::<SpValueType>(), Ok(SpValueType::Bool));
        assert!("Quaternion".parse::<SpValueType>().is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(SpValue::Bool(None).to_string(), "UNKNOWN");
        assert_eq!(SpValue::bool(true).to_string(), "true");
        assert_eq!(SpValue::string("idle").to_string(), "\"idle\"");
        assert_eq!(
            SpValue::Array(Some(vec![SpValue::int(1), SpValue::int(2)])).to_string(),
            "[2 items]"
        );
        assert_eq!(SpValue::Map(Some(vec![])).to_string(), "[0 pairs]");

        let tf = SpTransformStamped {
            active: Some(true),
            parent_frame_id: Some("world".into()),
            child_frame_id: None,
            ..Default::default()
        };
        assert_eq!(
            SpValue::Transform(Some(Box::new(tf))).to_string(),
            "world -> ? (Active: true)"
        );
    }

    #[test]
    fn test_scalar_text() {
        assert_eq!(SpValue::string("idle").scalar_text().as_deref(), Some("idle"));
        assert_eq!(SpValue::int(3).scalar_text().as_deref(), Some("3"));
        assert_eq!(SpValue::Int64(None).scalar_text(), None);
        assert_eq!(SpValue::Array(Some(vec![])).scalar_text(), None);
    }
}
