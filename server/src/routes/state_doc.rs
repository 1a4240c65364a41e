//! `GET`/`POST /api/state`, `GET /api/status`, `GET /api/export`,
//! `POST /api/import`.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use runner_core::document::StateDocument;
use store::DocumentStore;

use crate::error::ApiError;
use crate::state::AppState;

const MASK: &str = "__set__";
const MAX_IMPORT_PAYLOAD: usize = 1024 * 1024;
const MAX_RUNNERS_PER_IMPORT: usize = 100;
const MAX_TOTAL_RUNNERS: usize = 500;
const MAX_CASES_PER_RUNNER: usize = 200;

fn mask_credentials(mut doc: StateDocument) -> StateDocument {
    for profile in &mut doc.notify_profiles {
        if !profile.config.user_key.is_empty() {
            profile.config.user_key = MASK.to_string();
        }
        if !profile.config.api_token.is_empty() {
            profile.config.api_token = MASK.to_string();
        }
    }
    if doc.pushover_user_key.as_deref().is_some_and(|s| !s.is_empty()) {
        doc.pushover_user_key = Some(MASK.to_string());
    }
    if doc.pushover_api_token.as_deref().is_some_and(|s| !s.is_empty()) {
        doc.pushover_api_token = Some(MASK.to_string());
    }
    doc
}

/// A profile update that doesn't touch `config` must preserve the secret
/// already on disk — the client only ever sees the `__set__` marker back.
fn restore_masked_credentials(mut incoming: StateDocument, existing: &StateDocument) -> StateDocument {
    for profile in &mut incoming.notify_profiles {
        let prior = existing.notify_profiles.iter().find(|p| p.id == profile.id);
        if profile.config.user_key == MASK {
            profile.config.user_key = prior.map(|p| p.config.user_key.clone()).unwrap_or_default();
        }
        if profile.config.api_token == MASK {
            profile.config.api_token = prior.map(|p| p.config.api_token.clone()).unwrap_or_default();
        }
    }
    if incoming.pushover_user_key.as_deref() == Some(MASK) {
        incoming.pushover_user_key = existing.pushover_user_key.clone();
    }
    if incoming.pushover_api_token.as_deref() == Some(MASK) {
        incoming.pushover_api_token = existing.pushover_api_token.clone();
    }
    incoming
}

pub async fn get_state(State(state): State<AppState>) -> Result<Json<StateDocument>, ApiError> {
    let doc = state.store.load_document().await?;
    Ok(Json(mask_credentials(doc)))
}

pub async fn export(State(state): State<AppState>) -> Result<Json<StateDocument>, ApiError> {
    let doc = state.store.load_document().await?;
    Ok(Json(mask_credentials(doc)))
}

pub async fn get_status(
    State(state): State<AppState>,
) -> Json<std::collections::HashMap<String, runner_core::RunnerSnapshot>> {
    Json(state.supervisor.snapshot())
}

pub async fn post_state(
    State(state): State<AppState>,
    Json(body): Json<StateDocument>,
) -> Result<StatusCode, ApiError> {
    let existing = state.store.load_document().await?;
    let resolved = restore_masked_credentials(body, &existing);
    state.store.save_document(resolved).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn import(State(state): State<AppState>, body: Bytes) -> Result<StatusCode, ApiError> {
    if body.len() > MAX_IMPORT_PAYLOAD {
        return Err(ApiError::Invalid("import payload exceeds 1 MiB".to_string()));
    }
    let incoming: StateDocument =
        serde_json::from_slice(&body).map_err(|err| ApiError::Invalid(format!("invalid JSON: {err}")))?;
    if incoming.runners.len() > MAX_RUNNERS_PER_IMPORT {
        return Err(ApiError::Invalid(format!(
            "import exceeds {MAX_RUNNERS_PER_IMPORT} runners"
        )));
    }
    if incoming.runners.iter().any(|r| r.cases.len() > MAX_CASES_PER_RUNNER) {
        return Err(ApiError::Invalid(format!(
            "a runner exceeds {MAX_CASES_PER_RUNNER} cases"
        )));
    }

    let mut existing = state.store.load_document().await?;
    let incoming = restore_masked_credentials(incoming, &existing);
    existing.notify_profiles.extend(incoming.notify_profiles);
    existing.runners.extend(incoming.runners);
    existing.runner_groups.extend(incoming.runner_groups);
    existing.runner_layout.extend(incoming.runner_layout);

    if existing.runners.len() > MAX_TOTAL_RUNNERS {
        return Err(ApiError::Invalid(format!(
            "import would exceed {MAX_TOTAL_RUNNERS} total runners"
        )));
    }

    state.store.save_document(existing).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use runner_core::document::{NotifyProfile, PushoverConfig};

    #[test]
    fn masking_round_trips_through_restore() {
        let mut doc = StateDocument::default();
        doc.notify_profiles.push(NotifyProfile {
            id: "notify_a".to_string(),
            config: PushoverConfig {
                user_key: "real-user".to_string(),
                api_token: "real-token".to_string(),
            },
            ..Default::default()
        });
        let masked = mask_credentials(doc.clone());
        assert_eq!(masked.notify_profiles[0].config.user_key, MASK);

        let restored = restore_masked_credentials(masked, &doc);
        assert_eq!(restored.notify_profiles[0].config.user_key, "real-user");
        assert_eq!(restored.notify_profiles[0].config.api_token, "real-token");
    }

    #[test]
    fn empty_credentials_are_not_masked() {
        let mut doc = StateDocument::default();
        doc.notify_profiles.push(NotifyProfile::default());
        let masked = mask_credentials(doc);
        assert_eq!(masked.notify_profiles[0].config.user_key, "");
    }
}
