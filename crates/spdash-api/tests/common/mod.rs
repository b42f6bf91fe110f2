//! Common test utilities for API tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use spdash_api::ServerState;
use spdash_core::{
    encode_string, SpValue, SpValueType, StateSchema, StoreConfig, SyncConfig, VariableSchema,
};
use spdash_store::{MemoryBackend, StoreClient};
use spdash_sync::{SyncState, Synchronizer};

pub const WAIT: Duration = Duration::from_secs(10);

/// Schema used across the API tests.
pub fn test_schema() -> StateSchema {
    StateSchema {
        allow_undeclared: false,
        ..StateSchema::permissive()
    }
    .with_variable(
        "robot_mode",
        VariableSchema::new(SpValueType::String).with_allowed(["idle", "running", "error"]),
    )
    .with_variable(
        "speed",
        VariableSchema {
            allow_unknown: false,
            ..VariableSchema::new(SpValueType::Float64).with_range(Some(0.0), Some(1.0))
        },
    )
    .with_variable(
        "gripper_closed",
        VariableSchema::new(SpValueType::Bool).read_only(),
    )
}

/// Seed the producer's keys.
pub fn seed(backend: &MemoryBackend) {
    backend.producer_set("robot_mode", &encode_string(&SpValue::string("idle")));
    backend.producer_set("speed", &encode_string(&SpValue::float(0.25)));
    backend.producer_set("gripper_closed", &encode_string(&SpValue::bool(false)));
}

/// Create a server state over a seeded in-memory store, already Live.
pub async fn create_test_server_state() -> (ServerState, Arc<MemoryBackend>) {
    let backend = Arc::new(MemoryBackend::new());
    seed(&backend);

    let client = StoreClient::new(backend.clone(), StoreConfig::default());
    let config = SyncConfig {
        staleness_window_secs: 0,
        ..Default::default()
    };
    let sync = Synchronizer::start(client, test_schema(), config);
    wait_for_state(&sync, SyncState::Live).await;

    (ServerState::new(sync), backend)
}

pub async fn wait_for_state(sync: &Synchronizer, want: SyncState) {
    let mut states = sync.subscribe_state();
    tokio::time::timeout(WAIT, states.wait_for(|s| *s == want))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {}", want))
        .unwrap();
}

/// Wait until the snapshot holds `value` for `key`.
pub async fn wait_for_value(sync: &Synchronizer, key: &str, value: &SpValue) {
    let mut changes = sync.subscribe_changes();
    tokio::time::timeout(WAIT, async {
        loop {
            let snap = sync.current_snapshot();
            if snap.get(key).map(|v| v.value()) == Some(value) {
                return;
            }
            changes.changed().await.unwrap();
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {} = {}", key, value));
}
