use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::error::{AppError, ProviderError};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Serialize, Clone)]
pub enum ApiError {
    #[error("Internal server error")]
    InternalError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Upstream provider error: {0}")]
    BadGateway(String),
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::NotFound(msg) => Self::NotFound(msg),
            AppError::Validation(msg) | AppError::IllegalTransition(msg) => {
                Self::ValidationError(msg)
            }
            AppError::Provider(ProviderError::Auth(msg)) => Self::Unauthorized(msg),
            AppError::Provider(ProviderError::RateLimited(msg)) => Self::RateLimited(msg),
            AppError::Provider(ProviderError::Unavailable(msg))
            | AppError::Provider(ProviderError::Other(msg)) => Self::BadGateway(msg),
            AppError::Inconsistency(msg) => {
                tracing::error!("Inconsistent state: {msg}");
                Self::InternalError("Internal error: inconsistent document state".to_string())
            }
            other => {
                tracing::error!("Internal error: {other:?}");
                Self::InternalError("Internal server error".to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::InternalError(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
            Self::ValidationError(message) => (StatusCode::BAD_REQUEST, message),
            Self::NotFound(message) => (StatusCode::NOT_FOUND, message),
            Self::Unauthorized(message) => (StatusCode::UNAUTHORIZED, message),
            Self::RateLimited(message) => (StatusCode::TOO_MANY_REQUESTS, message),
            Self::BadGateway(message) => (StatusCode::BAD_GATEWAY, message),
        };

        let body = ErrorResponse {
            error: message,
            status: "error".to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Serialize, Debug)]
struct ErrorResponse {
    error: String,
    status: String,
}
