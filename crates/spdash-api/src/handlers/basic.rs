//! Basic handlers - health check and probes.

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use serde_json::json;
use spdash_store::ConnectionState;
use spdash_sync::SyncState;

use super::ServerState;

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub service: String,
    pub version: &'static str,
    pub uptime: u64,
    pub sync_state: SyncState,
}

/// Readiness check response.
#[derive(Debug, Clone, Serialize)]
pub struct ReadinessStatus {
    pub ready: bool,
    pub sync_state: SyncState,
    pub connection: ConnectionState,
    /// Whether at least one full read of the store has completed.
    pub synced_once: bool,
}

/// Health check with uptime.
pub async fn health_handler(State(state): State<ServerState>) -> Json<HealthStatus> {
    let uptime = chrono::Utc::now().timestamp() - state.started_at;
    let sync_state = state.sync.current_machine_state();
    let status = match sync_state {
        SyncState::Live => "healthy",
        SyncState::Stale => "degraded",
        _ => "starting",
    };

    Json(HealthStatus {
        status: status.to_string(),
        service: "spdash".to_string(),
        version: env!("CARGO_PKG_VERSION"),
        uptime: uptime.max(0) as u64,
        sync_state,
    })
}

/// Liveness probe - simple check if server is running.
pub async fn liveness_handler() -> Json<serde_json::Value> {
    Json(json!({
        "status": "alive",
    }))
}

/// Readiness probe.
///
/// Ready once the first snapshot has been loaded. A stale model still
/// serves its last-known values, so staleness alone does not fail the probe.
pub async fn readiness_handler(
    State(state): State<ServerState>,
) -> (StatusCode, Json<ReadinessStatus>) {
    let status = state.sync.status();
    let synced_once = status.counters.full_syncs > 0;
    let ready = synced_once && status.state != SyncState::ShuttingDown;

    let code = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        code,
        Json(ReadinessStatus {
            ready,
            sync_state: status.state,
            connection: status.connection,
            synced_once,
        }),
    )
}
