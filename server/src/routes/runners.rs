//! Per-runner control: run, stop, clone, and the append-only run log.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use runner_core::config::compile_runner_cfg;
use runner_core::document::Runner;
use runner_core::supervisor::{clear_log as clear_run_log, read_log};
use runner_core::SupervisorError;
use store::DocumentStore;

use crate::error::ApiError;
use crate::state::AppState;

pub async fn run_runner(Path(id): Path<String>, State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    let doc = state.store.load_document().await?;
    let cfg = compile_runner_cfg(&doc, &id, &state.broker)?;
    state.supervisor.start(cfg)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn stop_runner(Path(id): Path<String>, State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.supervisor.stop(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn clone_runner(Path(id): Path<String>, State(state): State<AppState>) -> Result<Json<Runner>, ApiError> {
    let mut doc = state.store.load_document().await?;
    let original = doc
        .runners
        .iter()
        .find(|r| r.id == id)
        .cloned()
        .ok_or_else(|| SupervisorError::not_found(format!("runner {id}")))?;

    let copy_name = format!("{} (copy)", original.name);
    let mut cloned = original;
    cloned.id = String::new();
    cloned.name = copy_name.clone();
    doc.runners.push(cloned);
    state.store.save_document(doc).await?;

    let saved = state.store.load_document().await?;
    let result = saved
        .runners
        .into_iter()
        .rev()
        .find(|r| r.name == copy_name)
        .ok_or_else(|| ApiError::Invalid("clone did not persist".to_string()))?;
    Ok(Json(result))
}

pub async fn get_log(Path(id): Path<String>, State(state): State<AppState>) -> Result<String, ApiError> {
    Ok(read_log(&state.log_dir, &id).await?)
}

pub async fn clear_log(Path(id): Path<String>, State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    clear_run_log(&state.log_dir, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}
