//! Producer/bridge data contract.
//!
//! The string stored under each key is interpreted by a [`ValueCodec`].
//! Two contract versions exist:
//!
//! - `spvalue` (v1): the stored string is a bare SP value document. This is
//!   what micro_sp writes today. It carries no timestamp or origin, so the
//!   caller fills those in from the observation.
//! - `envelope` (v2): `{"version":2,"ts":<ms>,"origin":"...","value":<SP value>}`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::codec::{decode_str, decode_value, encode_value};
use crate::error::CodecError;
use crate::state::Timestamp;
use crate::value::SpValue;

/// A stored string decoded under some contract version.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedEntry {
    pub value: SpValue,
    /// Producer timestamp, when the contract carries one.
    pub timestamp: Option<Timestamp>,
    /// Producer identity, when the contract carries one.
    pub origin: Option<String>,
}

/// Contract version selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractVersion {
    #[default]
    SpValue,
    Envelope,
}

impl ContractVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractVersion::SpValue => "spvalue",
            ContractVersion::Envelope => "envelope",
        }
    }
}

impl std::str::FromStr for ContractVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "spvalue" | "v1" | "1" => Ok(ContractVersion::SpValue),
            "envelope" | "v2" | "2" => Ok(ContractVersion::Envelope),
            other => Err(format!("unknown contract version '{}'", other)),
        }
    }
}

/// Encodes and decodes stored strings.
pub trait ValueCodec: Send + Sync {
    fn version(&self) -> ContractVersion;

    fn decode(&self, raw: &str) -> Result<DecodedEntry, CodecError>;

    /// Encode a value written by the bridge itself.
    fn encode(&self, value: &SpValue, origin: &str, timestamp: Timestamp) -> String;
}

/// Bare SP value documents.
#[derive(Debug, Default, Clone, Copy)]
pub struct SpValueCodec;

impl ValueCodec for SpValueCodec {
    fn version(&self) -> ContractVersion {
        ContractVersion::SpValue
    }

    fn decode(&self, raw: &str) -> Result<DecodedEntry, CodecError> {
        Ok(DecodedEntry {
            value: decode_str(raw)?,
            timestamp: None,
            origin: None,
        })
    }

    fn encode(&self, value: &SpValue, _origin: &str, _timestamp: Timestamp) -> String {
        encode_value(value).to_string()
    }
}

/// Versioned envelope carrying timestamp and origin.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvelopeCodec;

impl EnvelopeCodec {
    pub const VERSION: u64 = 2;
}

impl ValueCodec for EnvelopeCodec {
    fn version(&self) -> ContractVersion {
        ContractVersion::Envelope
    }

    fn decode(&self, raw: &str) -> Result<DecodedEntry, CodecError> {
        let doc: Value = serde_json::from_str(raw)?;
        let obj = doc
            .as_object()
            .ok_or_else(|| CodecError::NotAnObject(raw.chars().take(32).collect()))?;

        let version = obj.get("version").and_then(Value::as_u64).unwrap_or(0);
        if version != Self::VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }

        let value = obj.get("value").ok_or(CodecError::MissingValue)?;
        Ok(DecodedEntry {
            value: decode_value(value)?,
            timestamp: obj.get("ts").and_then(Value::as_i64),
            origin: obj.get("origin").and_then(Value::as_str).map(str::to_string),
        })
    }

    fn encode(&self, value: &SpValue, origin: &str, timestamp: Timestamp) -> String {
        json!({
            "version": Self::VERSION,
            "ts": timestamp,
            "origin": origin,
            "value": encode_value(value),
        })
        .to_string()
    }
}

/// Codec for a contract version.
pub fn codec_for(version: ContractVersion) -> Arc<dyn ValueCodec> {
    match version {
        ContractVersion::SpValue => Arc::new(SpValueCodec),
        ContractVersion::Envelope => Arc::new(EnvelopeCodec),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spvalue_codec() {
        let codec = codec_for(ContractVersion::SpValue);
        let raw = codec.encode(&SpValue::string("idle"), "dashboard", 10);
        assert_eq!(raw, r#"{"type":"String","value":{"String":"idle"}}"#);

        let entry = codec.decode(&raw).unwrap();
        assert_eq!(entry.value, SpValue::string("idle"));
        assert_eq!(entry.timestamp, None);
        assert_eq!(entry.origin, None);
    }

    #[test]
    fn test_envelope_codec() {
        let codec = codec_for(ContractVersion::Envelope);
        let raw = codec.encode(&SpValue::int(3), "micro_sp", 1_700_000_000_000);
        let entry = codec.decode(&raw).unwrap();
        assert_eq!(entry.value, SpValue::int(3));
        assert_eq!(entry.timestamp, Some(1_700_000_000_000));
        assert_eq!(entry.origin.as_deref(), Some("micro_sp"));
    }

    #[test]
    fn test_envelope_rejects_other_versions() {
        let codec = EnvelopeCodec;
        let bare = r#"{"type":"Int64","value":{"Int64":1}}"#;
        assert!(matches!(codec.decode(bare), Err(CodecError::UnsupportedVersion(0))));
        assert!(matches!(
            codec.decode(r#"{"version":2,"ts":1}"#),
            Err(CodecError::MissingValue)
        ));
    }

    #[test]
    fn test_contract_version_parsing() {
        assert_eq!("envelope".parse(), Ok(ContractVersion::Envelope));
        assert_eq!("V1".parse(), Ok(ContractVersion::SpValue));
        assert!("v3".parse::<ContractVersion>().is_err());

        let v: ContractVersion = serde_json::from_str("\"envelope\"").unwrap();
        assert_eq!(v, ContractVersion::Envelope);
    }
}
