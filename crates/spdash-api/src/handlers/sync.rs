//! Synchronizer status and control handlers.

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use spdash_sync::{SyncState, SyncStatus};

use super::{
    common::{ok, HandlerResult},
    ServerState,
};
use crate::models::{ApiResponse, ErrorResponse};

#[derive(Debug, Clone, Serialize)]
pub struct ResyncResponse {
    pub requested: bool,
    pub state: SyncState,
}

/// Machine state, connection state, counters and staleness.
///
/// GET /api/status
pub async fn status_handler(State(state): State<ServerState>) -> HandlerResult<SyncStatus> {
    ok(state.sync.status())
}

/// Manual retry of the full resynchronization.
///
/// POST /api/sync/resync
pub async fn resync_handler(
    State(state): State<ServerState>,
) -> Result<(StatusCode, Json<ApiResponse<ResyncResponse>>), ErrorResponse> {
    if !state.sync.request_resync() {
        return Err(ErrorResponse::service_unavailable(
            "Synchronizer is shutting down",
        ));
    }
    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::success(ResyncResponse {
            requested: true,
            state: state.sync.current_machine_state(),
        })),
    ))
}
