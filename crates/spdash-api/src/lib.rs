//! Dashboard HTTP API for spdash.
//!
//! Exposes the synchronizer over axum:
//!
//! - **state**: the current snapshot and single-variable detail
//! - **commands**: validated writes back to the store
//! - **events**: SSE stream of snapshot and machine state changes
//! - **health**: liveness, readiness and status

pub mod handlers;
pub mod models;
pub mod server;
pub mod shutdown;

pub use models::{ApiError, ApiResponse, ErrorResponse};
pub use server::{create_router_with_state, run, ServerState};
