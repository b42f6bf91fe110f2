//! Error types for the core crate.

use thiserror::Error;

use crate::value::SpValueType;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level core error.
#[derive(Debug, Error)]
pub enum Error {
    /// Wire format error.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Text input could not be parsed.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Command value rejected by the schema.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Configuration error.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors raised while decoding a stored value.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Payload is not valid JSON.
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Payload is valid JSON but not an object.
    #[error("Expected a JSON object, found {0}")]
    NotAnObject(String),

    /// The `type` tag is missing.
    #[error("Missing \"type\" tag")]
    MissingType,

    /// The `type` tag names no known SP value type.
    #[error("Unknown SP value type: {0}")]
    UnknownType(String),

    /// Envelope declares a version this build does not understand.
    #[error("Unsupported contract version: {0}")]
    UnsupportedVersion(u64),

    /// Envelope has no `value` field.
    #[error("Envelope is missing the \"value\" field")]
    MissingValue,
}

/// Errors raised while parsing dashboard text input.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("Could not parse '{0}' as Bool")]
    InvalidBool(String),

    #[error("Could not parse '{0}' as Int64")]
    InvalidInt(String),

    #[error("Could not parse '{0}' as Float64")]
    InvalidFloat(String),

    #[error("Could not parse '{0}' as an ISO 8601 time")]
    InvalidTime(String),

    /// Composite types cannot be set from a single text field.
    #[error("{0} values cannot be set from text input")]
    NotTextSettable(SpValueType),

    #[error("Unknown type name: {0}")]
    UnknownTypeName(String),
}

/// A command value that does not satisfy the schema for its target.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Target identifier must not be empty")]
    EmptyKey,

    #[error("Variable '{0}' is not declared in the schema")]
    Undeclared(String),

    #[error("Variable '{0}' is read-only")]
    ReadOnly(String),

    #[error("Variable '{key}' expects {expected}, got {found}")]
    TypeMismatch {
        key: String,
        expected: SpValueType,
        found: SpValueType,
    },

    #[error("Variable '{0}' does not accept UNKNOWN")]
    UnknownNotAllowed(String),

    #[error("Value '{value}' is not allowed for '{key}' (allowed: {allowed:?})")]
    NotAllowed {
        key: String,
        value: String,
        allowed: Vec<String>,
    },

    #[error("Value {value} for '{key}' is outside [{min:?}, {max:?}]")]
    OutOfRange {
        key: String,
        value: f64,
        min: Option<f64>,
        max: Option<f64>,
    },

    #[error("Value {value} for '{key}' is not a finite number")]
    NonFinite { key: String, value: f64 },

    #[error("Invalid input for '{key}': {source}")]
    Input {
        key: String,
        #[source]
        source: ParseError,
    },
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid value for {name}: {value}")]
    InvalidEnv { name: String, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Unsupported schema version {0}")]
    UnsupportedSchemaVersion(u32),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ValidationError::TypeMismatch {
            key: "robot_mode".to_string(),
            expected: SpValueType::String,
            found: SpValueType::Int64,
        };
        assert_eq!(
            err.to_string(),
            "Variable 'robot_mode' expects String, got Int64"
        );

        let err: Error = CodecError::UnknownType("Quaternion".into()).into();
        assert!(err.to_string().contains("Quaternion"));
    }
}
