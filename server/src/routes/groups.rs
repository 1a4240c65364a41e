//! `POST /api/groups/:id/run` and `POST /api/groups/:id/stop`.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use runner_core::SupervisorError;
use store::DocumentStore;

use crate::error::ApiError;
use crate::state::AppState;

pub async fn run_group(Path(id): Path<String>, State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    let doc = state.store.load_document().await?;
    state.sequencer.start_group(doc, &id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn stop_group(Path(id): Path<String>, State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    let doc = state.store.load_document().await?;
    let group = doc
        .runner_groups
        .iter()
        .find(|g| g.id == id)
        .ok_or_else(|| SupervisorError::not_found(format!("group {id}")))?;
    state.sequencer.stop_group(&id, &group.name, &group.runner_ids);
    Ok(StatusCode::NO_CONTENT)
}
