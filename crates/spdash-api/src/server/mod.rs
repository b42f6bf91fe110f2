//! HTTP server for the dashboard.

pub mod router;
pub mod types;

pub use router::create_router_with_state;
pub use types::ServerState;

use std::net::SocketAddr;

use spdash_sync::Synchronizer;
use tracing::info;

/// Serve the API until Ctrl+C or SIGTERM, then stop the synchronizer.
///
/// The synchronizer is stopped before the listener drains, which ends any
/// open event streams and lets graceful shutdown complete.
pub async fn run(bind: SocketAddr, sync: Synchronizer) -> anyhow::Result<()> {
    let state = ServerState::new(sync.clone());
    let app = create_router_with_state(state);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("Dashboard API listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            crate::shutdown::shutdown_signal().await;
            sync.shutdown().await;
        })
        .await?;

    info!("Server shutdown complete");
    Ok(())
}
