use axum::{
    extract::{Path, State},
    http::{header::AUTHORIZATION, HeaderMap},
    Json,
};
use runwatch_types::{RunId, StatusRecord};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::error::StubError;
use crate::state::{Confirmation, StubState};

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    #[serde(default)]
    pub action_type: Option<String>,
    #[serde(default)]
    pub payload: Option<Value>,
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

fn authorize(state: &StubState, headers: &HeaderMap) -> Result<(), StubError> {
    if state.is_authorized(bearer(headers)) {
        Ok(())
    } else {
        Err(StubError::Unauthorized)
    }
}

/// GET /api/runs/{id}/status
pub async fn get_status(
    State(state): State<StubState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<StatusRecord>, StubError> {
    authorize(&state, &headers)?;
    let run_id = RunId::from(id);
    state
        .get(&run_id)
        .map(Json)
        .ok_or(StubError::RunNotFound(run_id))
}

/// POST /api/runs/{id}/confirm-action
pub async fn confirm_action(
    State(state): State<StubState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<ConfirmRequest>,
) -> Result<Json<StatusRecord>, StubError> {
    authorize(&state, &headers)?;
    let run_id = RunId::from(id);
    let action = req.action_type.clone();
    let confirmation = Confirmation {
        action_type: req.action_type,
        payload: req.payload,
    };
    match state.confirm(&run_id, confirmation) {
        Some(Ok(record)) => {
            info!(run_id = %run_id, action = action.as_deref().unwrap_or("-"), "action confirmed");
            Ok(Json(record))
        }
        Some(Err(status)) => Err(StubError::NotWaiting { run_id, status }),
        None => Err(StubError::RunNotFound(run_id)),
    }
}

/// PUT /api/runs/{id}: drive a run's state from tests and demos.
pub async fn put_run(
    State(state): State<StubState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(record): Json<StatusRecord>,
) -> Result<Json<StatusRecord>, StubError> {
    authorize(&state, &headers)?;
    if record.id.as_str() != id {
        return Err(StubError::BadRequest(format!(
            "record id {} does not match path id {id}",
            record.id
        )));
    }
    Ok(Json(state.put(record)))
}
