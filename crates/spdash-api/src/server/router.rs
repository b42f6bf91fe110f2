//! Route table.

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::ServerState;
use crate::handlers::{basic, commands, events, state, sync};

/// Build the router for the given state.
pub fn create_router_with_state(state: ServerState) -> Router {
    Router::new()
        // Health
        .route("/api/health", get(basic::health_handler))
        .route("/api/health/live", get(basic::liveness_handler))
        .route("/api/health/ready", get(basic::readiness_handler))
        // State viewer
        .route("/api/status", get(sync::status_handler))
        .route("/api/state", get(state::get_state_handler))
        .route("/api/state/:key", get(state::get_variable_handler))
        // Commands
        .route("/api/commands", post(commands::submit_command_handler))
        .route("/api/commands/batch", post(commands::submit_batch_handler))
        .route("/api/sync/resync", post(sync::resync_handler))
        // Live updates
        .route("/api/events/stream", get(events::event_stream_handler))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
