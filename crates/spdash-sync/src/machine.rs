//! Synchronizer states and status reporting.

use std::fmt;

use serde::Serialize;
use spdash_core::{StaleWarning, Timestamp};
use spdash_store::{ConnectionState, StoreMetrics};

/// Synchronizer state machine.
///
/// ```text
/// Initializing ──connect──▶ Syncing ──full read + subscription──▶ Live
///                              ▲                                  │
///                              └──reconnect / producer back── Stale ◀┘
/// any ──stop──▶ ShuttingDown
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Initializing,
    Syncing,
    Live,
    Stale,
    ShuttingDown,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Initializing => "initializing",
            SyncState::Syncing => "syncing",
            SyncState::Live => "live",
            SyncState::Stale => "stale",
            SyncState::ShuttingDown => "shutting_down",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Synchronizer counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncCounters {
    pub full_syncs: u64,
    pub failed_syncs: u64,
    pub last_full_sync: Option<Timestamp>,
    pub events_applied: u64,
    pub events_outdated: u64,
    pub decode_errors: u64,
    pub commands_accepted: u64,
    pub commands_rejected: u64,
    pub commands_failed: u64,
}

/// Point-in-time status for health and status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub state: SyncState,
    pub connection: ConnectionState,
    pub backend: String,
    pub stale: Option<StaleWarning>,
    pub generation: u64,
    pub variables: usize,
    pub counters: SyncCounters,
    pub store: StoreMetrics,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_names() {
        assert_eq!(SyncState::ShuttingDown.to_string(), "shutting_down");
        assert_eq!(
            serde_json::to_string(&SyncState::Live).unwrap(),
            "\"live\""
        );
    }
}
