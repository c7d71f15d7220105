use axum::{http::StatusCode, Json};
use serde::Serialize;
use uuid::Uuid;

use crate::models::BookingStatus;
use crate::repository::StoreError;

/// Ошибки жизненного цикла брони.
#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("booking {0} not found")]
    NotFound(Uuid),
    #[error("payment signature is invalid")]
    InvalidSignature,
    #[error("payment gateway unavailable: {0}")]
    PaymentGatewayUnavailable(String),
    #[error("booking cannot move from {from} to {to}")]
    InvalidTransition { from: BookingStatus, to: String },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

impl From<validator::ValidationErrors> for BookingError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut messages: Vec<String> = errors
            .field_errors()
            .iter()
            .flat_map(|(field, errs)| {
                errs.iter().map(move |e| match &e.message {
                    Some(m) => m.to_string(),
                    None => format!("{} is invalid", field),
                })
            })
            .collect();
        messages.sort();
        BookingError::Validation(messages.join("; "))
    }
}

impl BookingError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            BookingError::Validation(_) | BookingError::InvalidSignature => StatusCode::BAD_REQUEST,
            BookingError::NotFound(_) => StatusCode::NOT_FOUND,
            BookingError::InvalidTransition { .. } | BookingError::Conflict(_) => StatusCode::CONFLICT,
            BookingError::PaymentGatewayUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            BookingError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    success: bool,
    message: String,
}

pub fn to_api_error(status: StatusCode, message: &str) -> (StatusCode, Json<ApiError>) {
    (status, Json(ApiError { success: false, message: message.to_string() }))
}

pub type ApiResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

impl From<BookingError> for (StatusCode, Json<ApiError>) {
    fn from(err: BookingError) -> Self {
        let status = err.status_code();
        // Детали ошибок БД наружу не отдаём
        let message = match &err {
            BookingError::Storage(e) => {
                tracing::error!("storage failure: {:?}", e);
                "Internal storage error".to_string()
            }
            other => other.to_string(),
        };
        to_api_error(status, &message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use validator::Validate;

    #[test]
    fn maps_taxonomy_to_http_status() {
        assert_eq!(BookingError::Validation("x".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(BookingError::InvalidSignature.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(BookingError::NotFound(Uuid::nil()).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            BookingError::PaymentGatewayUnavailable("down".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            BookingError::InvalidTransition { from: BookingStatus::Cancelled, to: "confirmed".into() }
                .status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(BookingError::Conflict("taken".into()).status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn storage_details_are_not_exposed() {
        let err = BookingError::Storage(StoreError::Corrupt("row 42: bad status".into()));
        let (status, Json(body)) = <(StatusCode, Json<ApiError>)>::from(err);
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body.success);
        assert_eq!(body.message, "Internal storage error");
    }

    #[test]
    fn validation_errors_collapse_into_one_message() {
        let req = crate::models::BookingRequest::default();
        let err: BookingError = req.validate().unwrap_err().into();
        match err {
            BookingError::Validation(msg) => {
                assert!(msg.contains("name is required"));
                assert!(msg.contains("when is required"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
