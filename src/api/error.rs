use axum::{Json, extract::rejection::JsonRejection, http::StatusCode, response::IntoResponse};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::models;

pub type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("database error: {0}")]
    Database(sqlx::Error),
    #[error("{0}")]
    BadRequest(String),
    #[error("not found")]
    NotFound,
    #[error("conflict")]
    Conflict,
    #[error("unauthorized")]
    Unauthorized,
    #[error(transparent)]
    Validation(#[from] garde::Report),
}

impl From<models::Error> for ApiError {
    fn from(err: models::Error) -> Self {
        match err {
            models::Error::NotFound(_) => ApiError::NotFound,
            models::Error::Conflict => ApiError::Conflict,
            models::Error::ForeignKeyViolation => {
                ApiError::BadRequest("Unknown SMTP configuration".to_string())
            }
            models::Error::BadRequest(message) => ApiError::BadRequest(message),
            models::Error::Database(err) => ApiError::Database(err),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response<axum::body::Body> {
        error!("API server error: {self} {self:?}");

        let (status, message) = match self {
            ApiError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "Not found".to_string()),
            ApiError::Conflict => (StatusCode::CONFLICT, "Name already in use".to_string()),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            ApiError::Validation(report) => (StatusCode::BAD_REQUEST, report.to_string()),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
