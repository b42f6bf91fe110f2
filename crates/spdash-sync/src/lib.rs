//! Synchronizer for spdash.
//!
//! Keeps the State Model in step with the shared store and forwards
//! dashboard commands back to it. See [`Synchronizer`] for the lifecycle.

pub mod command;
pub mod machine;
pub mod synchronizer;

pub use command::{Command, CommandError, CommandReceipt, CommandValue};
pub use machine::{SyncCounters, SyncState, SyncStatus};
pub use synchronizer::Synchronizer;
