use axum::{Json, http::StatusCode, response::IntoResponse};
use chatrank_domain::access::Rejection;
use chatrank_domain::error::DomainError;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Access Denied: Direct access is not allowed.")]
    AccessDenied,
    #[error("Too Many Requests. Blocked for 2 hours.")]
    RateLimited,
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("upstream unavailable")]
    Upstream,
    #[error("internal error")]
    Internal,
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::AccessDenied => StatusCode::FORBIDDEN,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Upstream => StatusCode::BAD_GATEWAY,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            ApiError::AccessDenied => "access_denied",
            ApiError::RateLimited => "rate_limited",
            ApiError::Validation(_) => "validation_error",
            ApiError::NotFound(_) => "not_found",
            ApiError::Upstream => "upstream_unavailable",
            ApiError::Internal => "internal_error",
        }
    }

    /// Maps a domain failure, naming the missing resource for 404s.
    pub fn from_domain(err: DomainError, resource: &'static str) -> Self {
        match err {
            DomainError::Validation(message) => ApiError::Validation(message),
            DomainError::NotFound => ApiError::NotFound(resource),
            DomainError::Upstream(message) => {
                tracing::error!(error = %message, "upstream failure");
                ApiError::Upstream
            }
        }
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError::from_domain(err, "resource")
    }
}

impl From<Rejection> for ApiError {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::AccessDenied => ApiError::AccessDenied,
            Rejection::RateLimited => ApiError::RateLimited,
        }
    }
}

#[derive(Serialize)]
struct ErrorEnvelope {
    detail: String,
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let message = self.to_string();
        let body = ErrorEnvelope {
            detail: message.clone(),
            error: ErrorBody {
                code: self.error_code(),
                message,
            },
        };
        (status, Json(body)).into_response()
    }
}
