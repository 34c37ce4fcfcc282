use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::auth::UsernameError;
use crate::db::LikeError;

/// Errors surfaced to API callers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    DuplicateLike(String),

    #[error("Internal error: {0:#}")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    const fn parts(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::DuplicateLike(_) => (StatusCode::CONFLICT, "DUPLICATE_LIKE"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.parts();
        let message = match &self {
            Self::Internal(e) => {
                tracing::error!("Internal error: {e:#}");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

impl From<UsernameError> for ApiError {
    fn from(err: UsernameError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<LikeError> for ApiError {
    fn from(err: LikeError) -> Self {
        match err {
            LikeError::Duplicate(_) => Self::DuplicateLike(err.to_string()),
            LikeError::TargetNotFound(_) | LikeError::UserNotFound(_) => {
                Self::NotFound(err.to_string())
            }
            LikeError::Database(e) => Self::Internal(anyhow::Error::new(e).context("Like failed")),
        }
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
