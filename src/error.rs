//! Server error types.
//!
//! `OrderError` is what the catalog and order operations return.
//! `AppError` is the HTTP-facing wrapper; internal details are logged and
//! never sent to the caller.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::models::ValidationErrors;

#[derive(Debug, Error)]
pub enum OrderError {
    #[error(transparent)]
    Validation(#[from] ValidationErrors),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("persistence error: {0}")]
    Persistence(String),
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation failed: {0}")]
    Validation(ValidationErrors),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<OrderError> for AppError {
    fn from(err: OrderError) -> Self {
        match err {
            OrderError::Validation(v) => Self::Validation(v),
            e @ OrderError::NotFound { .. } => Self::NotFound(e.to_string()),
            OrderError::Persistence(msg) => Self::Internal(msg),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            Self::Validation(v) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "errors": v.errors }))).into_response()
            }
            Self::NotFound(msg) => {
                (StatusCode::NOT_FOUND, Json(json!({ "error": msg }))).into_response()
            }
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "missing or invalid staff token" })),
            )
                .into_response(),
            Self::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": msg }))).into_response()
            }
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "Request error");
                // Don't expose internal error details to clients
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "internal error" })),
                )
                    .into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: AppError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_order_errors_map_to_statuses() {
        assert_eq!(
            status_of(OrderError::NotFound { entity: "order", id: 9 }.into()),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(OrderError::Persistence("disk full".into()).into()),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_of(OrderError::Validation(ValidationErrors::single("items", "empty")).into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_of(AppError::Unauthorized), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_not_found_message() {
        let err = OrderError::NotFound { entity: "order", id: 9 };
        assert_eq!(err.to_string(), "order 9 not found");
    }
}
