//! Maps the core's and the store's error enums onto HTTP status codes.
//! Never puts credential fields in a body — the errors that can carry
//! arbitrary `Display` text (`store::StoreError`, `anyhow::Error`) never
//! originate from code paths that touch `config.user_key`/`api_token`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use runner_core::SupervisorError;
use serde_json::json;
use store::StoreError;

pub enum ApiError {
    Supervisor(SupervisorError),
    Store(StoreError),
    Invalid(String),
    Internal(anyhow::Error),
}

impl From<SupervisorError> for ApiError {
    fn from(err: SupervisorError) -> Self {
        Self::Supervisor(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Supervisor(SupervisorError::NotFound(m)) => (StatusCode::NOT_FOUND, m),
            ApiError::Supervisor(SupervisorError::Conflict(m)) => (StatusCode::CONFLICT, m),
            ApiError::Supervisor(SupervisorError::InvalidInput(m)) => (StatusCode::BAD_REQUEST, m),
            ApiError::Supervisor(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
            ApiError::Store(err) => {
                tracing::warn!(error = %err, "store error");
                (StatusCode::INTERNAL_SERVER_ERROR, "persistence error".to_string())
            }
            ApiError::Invalid(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::Internal(err) => {
                tracing::warn!(error = %err, "internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
