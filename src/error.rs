use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation: {0}")]
    Validation(String),

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("order is terminal: {0}")]
    AlreadyTerminal(String),

    #[error("not authorized: {0}")]
    NotAuthorized(String),

    #[error("order not ready: {0}")]
    NotReady(String),

    #[error("driver unavailable: {0}")]
    DriverUnavailable(String),

    #[error("driver at capacity: {0}")]
    CapacityExceeded(String),

    #[error("payment not pending: {0}")]
    NotPending(String),

    #[error("invalid image: {0}")]
    InvalidImage(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) | AppError::InvalidImage(_) => StatusCode::BAD_REQUEST,
            AppError::NotAuthorized(_) => StatusCode::FORBIDDEN,
            AppError::InvalidTransition(_)
            | AppError::AlreadyTerminal(_)
            | AppError::NotReady(_)
            | AppError::DriverUnavailable(_)
            | AppError::CapacityExceeded(_)
            | AppError::NotPending(_) => StatusCode::CONFLICT,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable tag, so dashboards can tell abuse
    /// (not_authorized) apart from state races (conflicts).
    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "not_found",
            AppError::Validation(_) => "validation",
            AppError::InvalidTransition(_) => "invalid_transition",
            AppError::AlreadyTerminal(_) => "already_terminal",
            AppError::NotAuthorized(_) => "not_authorized",
            AppError::NotReady(_) => "not_ready",
            AppError::DriverUnavailable(_) => "driver_unavailable",
            AppError::CapacityExceeded(_) => "capacity_exceeded",
            AppError::NotPending(_) => "not_pending",
            AppError::InvalidImage(_) => "invalid_image",
            AppError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.to_string(),
            "code": self.code(),
        }));

        (status, body).into_response()
    }
}

impl From<AppError> for tonic::Status {
    fn from(err: AppError) -> Self {
        match &err {
            AppError::NotFound(_) => tonic::Status::not_found(err.to_string()),
            AppError::Validation(_) | AppError::InvalidImage(_) => {
                tonic::Status::invalid_argument(err.to_string())
            }
            AppError::NotAuthorized(_) => tonic::Status::permission_denied(err.to_string()),
            AppError::InvalidTransition(_)
            | AppError::AlreadyTerminal(_)
            | AppError::NotReady(_)
            | AppError::DriverUnavailable(_)
            | AppError::CapacityExceeded(_)
            | AppError::NotPending(_) => tonic::Status::failed_precondition(err.to_string()),
            AppError::Internal(_) => tonic::Status::internal(err.to_string()),
        }
    }
}
