use axum::{
    extract::{rejection::JsonRejection, FromRequest},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::users::repo::StoreError;

/// Every failure a handler or extractor can surface to a client.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Unauthorized(&'static str),
    #[error("{0}")]
    Forbidden(&'static str),
    #[error("{field}: {message}")]
    Validation { field: &'static str, message: String },
    #[error("{0}")]
    NotFound(&'static str),
    #[error("{0}")]
    NotConfigured(&'static str),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::NotConfigured(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            Self::Validation { field, message } => json!({ "message": message, "field": field }),
            Self::NotConfigured(msg) => json!({ "error": msg }),
            Self::Internal(e) => {
                error!(error = ?e, "internal error");
                json!({ "message": "Internal server error" })
            }
            other => json!({ "message": other.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Duplicate(field) => {
                AppError::validation(field, format!("{field} already registered"))
            }
            StoreError::Backend(e) => AppError::Internal(e),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::validation("body", rejection.body_text())
    }
}

/// `Json` whose rejections render as a 400 validation failure.
#[derive(Debug, FromRequest)]
#[from_request(via(Json), rejection(AppError))]
pub struct AppJson<T>(pub T);

impl<T: Serialize> IntoResponse for AppJson<T> {
    fn into_response(self) -> Response {
        Json(self.0).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(err: AppError) -> (StatusCode, serde_json::Value) {
        let res = err.into_response();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn internal_errors_hide_detail() {
        let (status, body) =
            body_json(AppError::Internal(anyhow::anyhow!("connection refused to 10.0.0.3"))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "Internal server error");
        assert!(!body.to_string().contains("10.0.0.3"));
    }

    #[tokio::test]
    async fn validation_carries_field() {
        let (status, body) = body_json(AppError::validation("name", "too short")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["field"], "name");
        assert_eq!(body["message"], "too short");
    }

    #[tokio::test]
    async fn not_configured_uses_error_key() {
        let (status, body) = body_json(AppError::NotConfigured("off")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "off");
    }

    #[test]
    fn duplicate_store_error_is_validation() {
        let err: AppError = StoreError::Duplicate("email").into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
