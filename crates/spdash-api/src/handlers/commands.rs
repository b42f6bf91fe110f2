//! Command API handlers.

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use spdash_core::SpValue;
use spdash_sync::{Command, CommandReceipt};

use super::{
    common::{ok, HandlerResult},
    ServerState,
};
use crate::models::{ApiResponse, ErrorResponse};

/// Set one variable.
///
/// Exactly one of `value` (typed, producer JSON format) or `text`
/// (parsed against the target's type) must be given.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandRequest {
    pub target: String,
    #[serde(default)]
    pub value: Option<SpValue>,
    #[serde(default)]
    pub text: Option<String>,
    /// Action name for logs. Defaults to "set".
    #[serde(default)]
    pub name: Option<String>,
}

impl CommandRequest {
    pub fn into_command(self) -> Result<Command, ErrorResponse> {
        let command = match (self.value, self.text) {
            (Some(value), None) => Command::set(self.target, value),
            (None, Some(text)) => Command::set_text(self.target, text),
            (Some(_), Some(_)) => {
                return Err(ErrorResponse::bad_request(
                    "Give either 'value' or 'text', not both",
                ))
            }
            (None, None) => {
                return Err(ErrorResponse::bad_request(
                    "Command needs a 'value' or a 'text'",
                ))
            }
        };
        Ok(match self.name {
            Some(name) => command.with_name(name),
            None => command,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchCommandRequest {
    pub commands: Vec<CommandRequest>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchCommandResponse {
    pub written: usize,
    pub receipts: Vec<CommandReceipt>,
}

/// Validate and write one command.
///
/// POST /api/commands
///
/// The new value is not reflected in `/api/state` until the store
/// reports it back.
pub async fn submit_command_handler(
    State(state): State<ServerState>,
    Json(req): Json<CommandRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CommandReceipt>>), ErrorResponse> {
    let command = req.into_command()?;
    let receipt = state.sync.submit_command(command).await?;
    Ok((StatusCode::ACCEPTED, Json(ApiResponse::success(receipt))))
}

/// Validate every command, then write all of them or none.
///
/// POST /api/commands/batch
pub async fn submit_batch_handler(
    State(state): State<ServerState>,
    Json(req): Json<BatchCommandRequest>,
) -> HandlerResult<BatchCommandResponse> {
    let commands = req
        .commands
        .into_iter()
        .map(CommandRequest::into_command)
        .collect::<Result<Vec<_>, _>>()?;
    let receipts = state.sync.submit_batch(commands).await?;
    ok(BatchCommandResponse {
        written: receipts.len(),
        receipts,
    })
}
