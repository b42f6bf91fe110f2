//! Declared variable schema.
//!
//! The schema is an optional TOML file describing the variables the bridge
//! is allowed to write:
//!
//! ```toml
//! version = 1
//! allow_undeclared = true
//!
//! [variables.robot_mode]
//! type = "String"
//! allowed = ["idle", "running", "error"]
//!
//! [variables.speed_scale]
//! type = "Float64"
//! min = 0.0
//! max = 1.0
//!
//! [variables.robot_state]
//! type = "Transform"
//! writable = false
//! ```
//!
//! Keys without a declaration fall back to the type currently observed in
//! the State Model, or String for keys never seen.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ValidationError};
use crate::parse::parse_input;
use crate::value::{SpValue, SpValueType};

/// Schema file format version understood by this build.
pub const SCHEMA_VERSION: u32 = 1;

fn default_true() -> bool {
    true
}

fn default_version() -> u32 {
    SCHEMA_VERSION
}

/// Declaration of a single variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableSchema {
    #[serde(rename = "type")]
    pub value_type: SpValueType,

    /// Enumerated values, compared against the scalar text of the value.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,

    #[serde(default = "default_true")]
    pub writable: bool,

    #[serde(default = "default_true")]
    pub allow_unknown: bool,
}

impl VariableSchema {
    pub fn new(value_type: SpValueType) -> Self {
        Self {
            value_type,
            allowed: Vec::new(),
            min: None,
            max: None,
            writable: true,
            allow_unknown: true,
        }
    }

    pub fn with_allowed(mut self, allowed: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.allowed = allowed.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.writable = false;
        self
    }
}

/// The full variable schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSchema {
    #[serde(default = "default_version")]
    pub version: u32,

    /// Whether commands may target keys with no declaration.
    #[serde(default = "default_true")]
    pub allow_undeclared: bool,

    #[serde(default)]
    pub variables: BTreeMap<String, VariableSchema>,
}

impl Default for StateSchema {
    fn default() -> Self {
        Self::permissive()
    }
}

impl StateSchema {
    /// A schema with no declarations that accepts any key.
    pub fn permissive() -> Self {
        Self {
            version: SCHEMA_VERSION,
            allow_undeclared: true,
            variables: BTreeMap::new(),
        }
    }

    pub fn with_variable(mut self, key: impl Into<String>, schema: VariableSchema) -> Self {
        self.variables.insert(key.into(), schema);
        self
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let schema: StateSchema = toml::from_str(text)?;
        schema.check()?;
        Ok(schema)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    fn check(&self) -> Result<(), ConfigError> {
        if self.version != SCHEMA_VERSION {
            return Err(ConfigError::UnsupportedSchemaVersion(self.version));
        }
        for (key, decl) in &self.variables {
            if key.is_empty() {
                return Err(ConfigError::Invalid("schema declares an empty key".into()));
            }
            if let (Some(min), Some(max)) = (decl.min, decl.max) {
                if min > max {
                    return Err(ConfigError::Invalid(format!(
                        "'{}': min {} is greater than max {}",
                        key, min, max
                    )));
                }
            }
            if (decl.min.is_some() || decl.max.is_some()) && !decl.value_type.is_numeric() {
                return Err(ConfigError::Invalid(format!(
                    "'{}': range given for non-numeric type {}",
                    key, decl.value_type
                )));
            }
            if !decl.allowed.is_empty() && !decl.value_type.is_text_settable() {
                return Err(ConfigError::Invalid(format!(
                    "'{}': allowed values given for composite type {}",
                    key, decl.value_type
                )));
            }
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&VariableSchema> {
        self.variables.get(key)
    }

    /// The type a command for `key` must carry.
    ///
    /// Declared type first, then the observed type, then String.
    pub fn target_type(&self, key: &str, observed: Option<SpValueType>) -> SpValueType {
        self.get(key)
            .map(|d| d.value_type)
            .or(observed)
            .unwrap_or(SpValueType::String)
    }

    /// Check a typed value against the schema.
    pub fn validate(
        &self,
        key: &str,
        value: &SpValue,
        observed: Option<SpValueType>,
    ) -> Result<(), ValidationError> {
        if key.trim().is_empty() {
            return Err(ValidationError::EmptyKey);
        }
        if let Some(v) = value.as_f64().filter(|v| !v.is_finite()) {
            return Err(ValidationError::NonFinite {
                key: key.to_string(),
                value: v,
            });
        }

        let Some(decl) = self.get(key) else {
            if !self.allow_undeclared {
                return Err(ValidationError::Undeclared(key.to_string()));
            }
            if let Some(expected) = observed {
                if expected != value.value_type() {
                    return Err(ValidationError::TypeMismatch {
                        key: key.to_string(),
                        expected,
                        found: value.value_type(),
                    });
                }
            }
            return Ok(());
        };

        if !decl.writable {
            return Err(ValidationError::ReadOnly(key.to_string()));
        }
        if decl.value_type != value.value_type() {
            return Err(ValidationError::TypeMismatch {
                key: key.to_string(),
                expected: decl.value_type,
                found: value.value_type(),
            });
        }
        if value.is_unknown() {
            return if decl.allow_unknown {
                Ok(())
            } else {
                Err(ValidationError::UnknownNotAllowed(key.to_string()))
            };
        }

        if !decl.allowed.is_empty() {
            let text = value.scalar_text().unwrap_or_default();
            if !decl.allowed.iter().any(|a| *a == text) {
                return Err(ValidationError::NotAllowed {
                    key: key.to_string(),
                    value: text,
                    allowed: decl.allowed.clone(),
                });
            }
        }

        if let Some(v) = value.as_f64() {
            let below = decl.min.is_some_and(|min| v < min);
            let above = decl.max.is_some_and(|max| v > max);
            if below || above {
                return Err(ValidationError::OutOfRange {
                    key: key.to_string(),
                    value: v,
                    min: decl.min,
                    max: decl.max,
                });
            }
        }

        Ok(())
    }

    /// Parse text input for `key` and validate the result.
    pub fn validate_input(
        &self,
        key: &str,
        input: &str,
        observed: Option<SpValueType>,
    ) -> Result<SpValue, ValidationError> {
        if key.trim().is_empty() {
            return Err(ValidationError::EmptyKey);
        }
        let target = self.target_type(key, observed);
        let value = parse_input(input, target).map_err(|source| ValidationError::Input {
            key: key.to_string(),
            source,
        })?;
        self.validate(key, &value, observed)?;
        Ok(value)
    }
}
