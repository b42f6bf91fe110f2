//! Live state stream over Server-Sent Events.
//!
//! Emits a `snapshot` event for every model generation and a `state` event
//! for every synchronizer state change. Both are sent once on connect, so a
//! client never has to poll for the initial view. Rapid changes coalesce:
//! a slow client sees the latest generation, not every intermediate one.

use std::time::Duration;

use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use serde_json::json;
use spdash_sync::{SyncState, Synchronizer};

use super::{state::StateQuery, state::StateView, ServerState};

enum Notice {
    Snapshot,
    MachineState,
    Closed,
}

fn snapshot_event(sync: &Synchronizer, pattern: Option<&str>) -> Result<Event, axum::Error> {
    let snapshot = sync.current_snapshot();
    let view = StateView::from_snapshot(&snapshot, sync.current_machine_state(), pattern);
    Event::default()
        .event("snapshot")
        .id(snapshot.generation.to_string())
        .json_data(view)
}

fn state_event(state: SyncState) -> Result<Event, axum::Error> {
    Event::default().event("state").json_data(json!({
        "state": state,
        "timestamp": chrono::Utc::now().timestamp_millis(),
    }))
}

/// SSE endpoint for snapshot and machine state changes.
///
/// GET /api/events/stream
pub async fn event_stream_handler(
    State(state): State<ServerState>,
    Query(query): Query<StateQuery>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let sync = state.sync.clone();
    let mut changes = sync.subscribe_changes();
    let mut states = sync.subscribe_state();
    changes.borrow_and_update();
    let initial_state = *states.borrow_and_update();

    let stream = async_stream::stream! {
        let pattern = query.pattern;
        yield state_event(initial_state);
        yield snapshot_event(&sync, pattern.as_deref());
        if initial_state == SyncState::ShuttingDown {
            return;
        }

        loop {
            let notice = tokio::select! {
                r = changes.changed() => if r.is_ok() { Notice::Snapshot } else { Notice::Closed },
                r = states.changed() => if r.is_ok() { Notice::MachineState } else { Notice::Closed },
            };

            match notice {
                Notice::Snapshot => {
                    changes.borrow_and_update();
                    yield snapshot_event(&sync, pattern.as_deref());
                }
                Notice::MachineState => {
                    let current = *states.borrow_and_update();
                    yield state_event(current);
                    if current == SyncState::ShuttingDown {
                        break;
                    }
                }
                Notice::Closed => break,
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    )
}
