//! State viewer handlers.

use axum::extract::{Path, Query, State};
use serde::{Deserialize, Serialize};
use spdash_core::{
    SpValue, SpValueType, StaleWarning, StateSnapshot, StateVariable, Timestamp, VariableSchema,
};
use spdash_store::glob_match;
use spdash_sync::SyncState;

use super::{
    common::{ok, HandlerResult},
    ServerState,
};
use crate::models::ErrorResponse;

/// One row of the state viewer table.
#[derive(Debug, Clone, Serialize)]
pub struct VariableRow {
    pub key: String,
    #[serde(rename = "type")]
    pub value_type: SpValueType,
    /// Typed value in the producer's JSON format.
    pub value: SpValue,
    /// Short human-readable form.
    pub display: String,
    pub timestamp: Timestamp,
    pub origin: String,
}

impl From<&StateVariable> for VariableRow {
    fn from(var: &StateVariable) -> Self {
        Self {
            key: var.id().to_string(),
            value_type: var.value_type(),
            value: var.value().clone(),
            display: var.value().to_string(),
            timestamp: var.timestamp(),
            origin: var.origin().to_string(),
        }
    }
}

/// Full snapshot as served to the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct StateView {
    pub variables: Vec<VariableRow>,
    /// Set while the values may be outdated.
    pub stale: Option<StaleWarning>,
    pub generation: u64,
    pub taken_at: Timestamp,
    pub sync_state: SyncState,
}

impl StateView {
    pub fn from_snapshot(
        snapshot: &StateSnapshot,
        sync_state: SyncState,
        pattern: Option<&str>,
    ) -> Self {
        let variables = snapshot
            .variables
            .iter()
            .filter(|v| pattern.map_or(true, |p| glob_match(p, v.id())))
            .map(VariableRow::from)
            .collect();
        Self {
            variables,
            stale: snapshot.stale.clone(),
            generation: snapshot.generation,
            taken_at: snapshot.taken_at,
            sync_state,
        }
    }
}

/// Detail view of one variable.
#[derive(Debug, Clone, Serialize)]
pub struct VariableDetail {
    #[serde(flatten)]
    pub row: VariableRow,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
    /// Whether the dashboard may write this variable.
    pub writable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<VariableSchema>,
    pub stale: Option<StaleWarning>,
}

#[derive(Debug, Deserialize)]
pub struct StateQuery {
    /// Glob filter on keys, e.g. `robot_*`.
    pub pattern: Option<String>,
}

/// Current snapshot, ordered by key.
///
/// GET /api/state
pub async fn get_state_handler(
    State(state): State<ServerState>,
    Query(query): Query<StateQuery>,
) -> HandlerResult<StateView> {
    let snapshot = state.sync.current_snapshot();
    ok(StateView::from_snapshot(
        &snapshot,
        state.sync.current_machine_state(),
        query.pattern.as_deref(),
    ))
}

/// One variable.
///
/// GET /api/state/:key
pub async fn get_variable_handler(
    State(state): State<ServerState>,
    Path(key): Path<String>,
) -> HandlerResult<VariableDetail> {
    let snapshot = state.sync.current_snapshot();
    let var = snapshot
        .get(&key)
        .ok_or_else(|| ErrorResponse::not_found(format!("Variable '{}'", key)))?;

    let schema = state.sync.schema();
    let declared = schema.get(&key).cloned();
    let writable = declared
        .as_ref()
        .map_or(schema.allow_undeclared, |d| d.writable);

    ok(VariableDetail {
        row: VariableRow::from(var),
        sequence: var.sequence(),
        writable,
        schema: declared,
        stale: snapshot.stale.clone(),
    })
}
