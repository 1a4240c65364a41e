//! `POST /api/notify-profiles/:id/test`, `GET /api/notifications`,
//! `POST /api/notifications/clear`.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use runner_core::notifier::{JournalSink, NotifyProfileDirectory};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize, Default)]
pub struct TestRequest {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ListQuery {
    limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct JournalRowView {
    pub ts: String,
    pub runner_id: String,
    pub profile_id: String,
    pub profile_name: String,
    pub delivery: &'static str,
    pub title: String,
    pub message: String,
    pub error: Option<String>,
}

const DEFAULT_LIST_LIMIT: i64 = 200;

pub async fn test_profile(
    Path(id): Path<String>,
    State(state): State<AppState>,
    body: Option<Json<TestRequest>>,
) -> Result<StatusCode, ApiError> {
    let message = body
        .and_then(|Json(req)| req.message)
        .unwrap_or_else(|| "Test notification from runnerd".to_string());

    let profile = state
        .store
        .lookup(&id)
        .await
        .ok_or_else(|| ApiError::Invalid(format!("unknown notify profile {id}")))?;
    if profile.user_key.is_empty() || profile.api_token.is_empty() {
        return Err(ApiError::Invalid("profile has no credentials configured".to_string()));
    }

    let result = state
        .transport
        .send(&profile.user_key, &profile.api_token, "runnerd test", &message)
        .await;

    let success = result.is_ok();
    state.store.record_delivery(&id, success).await;
    state
        .store
        .record(runner_core::notifier::JournalRow {
            ts: runner_core::events::now_iso(),
            runner_id: String::new(),
            profile_id: id.clone(),
            profile_name: profile.name,
            delivery: if success {
                runner_core::notifier::Delivery::Success
            } else {
                runner_core::notifier::Delivery::Error
            },
            title: "runnerd test".to_string(),
            message,
            error: result.err().map(|e| e.to_string()),
        })
        .await;

    if success {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::Invalid("test notification failed to send".to_string()))
    }
}

pub async fn list_notifications(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<JournalRowView>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, 5000);
    let rows = state.store.list_notifications(limit).await?;
    Ok(Json(
        rows.into_iter()
            .map(|row| JournalRowView {
                ts: row.ts,
                runner_id: row.runner_id,
                profile_id: row.profile_id,
                profile_name: row.profile_name,
                delivery: match row.delivery {
                    runner_core::notifier::Delivery::Success => "success",
                    runner_core::notifier::Delivery::Error => "error",
                },
                title: row.title,
                message: row.message,
                error: row.error,
            })
            .collect(),
    ))
}

pub async fn clear_notifications(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.store.clear_notifications().await?;
    Ok(StatusCode::NO_CONTENT)
}
