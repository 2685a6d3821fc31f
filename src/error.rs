//! Error handling module
//!
//! Centralized error types and HTTP response conversion.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::domain::DomainError;
use crate::store::StoreError;

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Client errors (4xx)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // Domain errors
    #[error(transparent)]
    Domain(#[from] DomainError),

    // Server errors (5xx)
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// The domain error inside, if any
    pub fn as_domain(&self) -> Option<&DomainError> {
        match self {
            AppError::Domain(e) => Some(e),
            _ => None,
        }
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

fn domain_status(err: &DomainError) -> StatusCode {
    match err {
        DomainError::Validation(_) => StatusCode::BAD_REQUEST,
        DomainError::NotFound { .. } => StatusCode::NOT_FOUND,
        DomainError::DuplicateRegistration { .. } => StatusCode::CONFLICT,
        DomainError::CapacityExceeded { .. } => StatusCode::CONFLICT,
        DomainError::Contention { .. } => StatusCode::SERVICE_UNAVAILABLE,
        DomainError::ConsistencyRecomputeFailure { .. } => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, retryable, details) = match &self {
            // 400 Bad Request
            AppError::InvalidRequest(msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", false, Some(msg.clone()))
            }

            // Domain errors - map to appropriate HTTP status
            AppError::Domain(domain_err) => (
                domain_status(domain_err),
                domain_err.error_code(),
                domain_err.is_retryable(),
                None,
            ),

            AppError::Store(StoreError::NotFound { entity, id }) => (
                StatusCode::NOT_FOUND,
                "not_found",
                false,
                Some(format!("{entity} {id}")),
            ),
            AppError::Store(StoreError::ConcurrencyConflict { .. }) => {
                (StatusCode::CONFLICT, "version_conflict", true, None)
            }

            // 500 Internal Server Error
            AppError::Store(e) => {
                tracing::error!("Store error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.is_retryable(), None)
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", false, None)
            }
        };

        let body = ErrorResponse {
            error: self.to_string(),
            error_code: error_code.to_string(),
            retryable,
            details,
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_domain_errors_map_to_statuses() {
        let id = Uuid::new_v4();
        let cases = vec![
            (DomainError::validation("x"), StatusCode::BAD_REQUEST),
            (DomainError::not_found("Event", id), StatusCode::NOT_FOUND),
            (
                DomainError::DuplicateRegistration {
                    event_id: id,
                    user_id: id,
                },
                StatusCode::CONFLICT,
            ),
            (
                DomainError::CapacityExceeded {
                    event_id: id,
                    capacity: 1,
                },
                StatusCode::CONFLICT,
            ),
            (
                DomainError::Contention { event_id: id },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];

        for (err, expected) in cases {
            let response = AppError::from(err).into_response();
            assert_eq!(response.status(), expected);
        }
    }

    #[test]
    fn test_store_not_found_is_404() {
        let response = AppError::from(StoreError::not_found("Place", "p1")).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
