//! Commands issued by the dashboard.

use serde::{Deserialize, Serialize};
use spdash_core::{SpValue, Timestamp, ValidationError};
use thiserror::Error;
use uuid::Uuid;

/// Desired value of a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CommandValue {
    /// Fully typed value, checked against the target's type.
    Typed(SpValue),
    /// Raw text, parsed against the target's type first.
    Text(String),
}

/// A named action setting one state variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub id: Uuid,
    /// Free-form action name for logs, e.g. "set".
    pub name: String,
    pub target: String,
    pub value: CommandValue,
}

impl Command {
    pub fn set(target: impl Into<String>, value: SpValue) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: "set".to_string(),
            target: target.into(),
            value: CommandValue::Typed(value),
        }
    }

    pub fn set_text(target: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: "set".to_string(),
            target: target.into(),
            value: CommandValue::Text(text.into()),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Acknowledgement of a command accepted by the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandReceipt {
    pub command_id: Uuid,
    pub target: String,
    /// The value as written, after parsing.
    pub value: SpValue,
    pub accepted_at: Timestamp,
}

/// Why a command was not accepted.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommandError {
    /// Rejected before reaching the store. The model is untouched.
    #[error("Command for '{target}' rejected: {source}")]
    Validation {
        target: String,
        #[source]
        source: ValidationError,
    },

    #[error("Command batch is empty")]
    EmptyBatch,

    /// No usable store connection.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// The store write failed.
    #[error("Write failed: {0}")]
    Write(String),

    #[error("Synchronizer is shutting down")]
    ShuttingDown,
}

impl CommandError {
    pub fn is_rejection(&self) -> bool {
        matches!(self, CommandError::Validation { .. } | CommandError::EmptyBatch)
    }
}
