//! Server state shared by all handlers.

use spdash_sync::Synchronizer;

/// State handed to every handler. Cheap to clone.
#[derive(Clone)]
pub struct ServerState {
    pub sync: Synchronizer,
    /// Unix seconds when the server was created.
    pub started_at: i64,
}

impl ServerState {
    pub fn new(sync: Synchronizer) -> Self {
        Self {
            sync,
            started_at: chrono::Utc::now().timestamp(),
        }
    }
}
