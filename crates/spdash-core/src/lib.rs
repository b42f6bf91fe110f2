//! Core types for the spdash state bridge.
//!
//! This crate holds everything that does not touch the network:
//!
//! - **SpValue**: the typed value model written by the micro_sp producer
//! - **codec / contract**: the JSON wire format and the versioned data contract
//! - **parse**: text input parsing for dashboard commands
//! - **schema**: declared variable schema used to validate commands
//! - **state**: the in-memory State Model and its immutable snapshots
//! - **config**: process-wide configuration loaded once at startup

pub mod codec;
pub mod config;
pub mod contract;
pub mod error;
pub mod parse;
pub mod schema;
pub mod state;
pub mod value;

pub use codec::{decode_str, decode_value, encode_string, encode_value, UNKNOWN};
pub use config::{BackoffConfig, BridgeConfig, ServerConfig, StoreConfig, SyncConfig};
pub use contract::{codec_for, ContractVersion, DecodedEntry, EnvelopeCodec, SpValueCodec, ValueCodec};
pub use error::{CodecError, ConfigError, Error, ParseError, Result, ValidationError};
pub use parse::parse_input;
pub use schema::{StateSchema, VariableSchema};
pub use state::{
    now_millis, ApplyOutcome, StaleReason, StaleWarning, StateModel, StateSnapshot, StateVariable,
    Timestamp, Update,
};
pub use value::{SpRotation, SpTransform, SpTransformStamped, SpTranslation, SpValue, SpValueType};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-exports commonly used types.
pub mod prelude {
    pub use crate::config::{BridgeConfig, StoreConfig, SyncConfig};
    pub use crate::contract::{ContractVersion, ValueCodec};
    pub use crate::error::{Error, Result, ValidationError};
    pub use crate::schema::StateSchema;
    pub use crate::state::{StateModel, StateSnapshot, Timestamp, Update};
    pub use crate::value::{SpValue, SpValueType};
}
