//! API handlers organized by domain.

pub mod basic;
pub mod commands;
pub mod common;
pub mod events;
pub mod state;
pub mod sync;

// Re-export ServerState so handlers can use it
pub use crate::server::ServerState;

pub use basic::{health_handler, liveness_handler, readiness_handler};
pub use commands::{submit_batch_handler, submit_command_handler};
pub use events::event_stream_handler;
pub use state::{get_state_handler, get_variable_handler};
pub use sync::{resync_handler, status_handler};
