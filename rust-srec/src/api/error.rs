//! API error handling.
//!
//! Provides consistent error responses for the API.

use axum::{Json, http::StatusCode, response::{IntoResponse, Response}};
use serde::Serialize;

use crate::error::{Error, ErrorKind};

/// API error response body.
#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    /// Error code for programmatic handling, one of the [`ErrorKind`] variants.
    pub error_code: ErrorKind,
    /// Human-readable error message.
    pub message: String,
    /// Present on 429 responses: seconds until the negative-cache cooldown clears.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
}

/// API error type that can be converted to HTTP responses.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub error_code: ErrorKind,
    pub message: String,
    pub retry_after_seconds: Option<u64>,
}

impl ApiError {
    pub fn new(status: StatusCode, error_code: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            status,
            error_code,
            message: message.into(),
            retry_after_seconds: None,
        }
    }

    pub fn with_retry_after(mut self, secs: u64) -> Self {
        self.retry_after_seconds = Some(secs);
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, ErrorKind::InvalidInput, message)
    }

    pub fn invalid_url(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, ErrorKind::InvalidUrl, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, ErrorKind::Unknown, message)
    }

    pub fn in_progress(stage: impl Into<String>, retry_after_secs: u64) -> Self {
        Self::new(StatusCode::ACCEPTED, ErrorKind::Unknown, stage).with_retry_after(retry_after_secs)
    }

    pub fn recent_fail(message: impl Into<String>, retry_after_secs: u64) -> Self {
        Self::new(StatusCode::TOO_MANY_REQUESTS, ErrorKind::RecentFail, message)
            .with_retry_after(retry_after_secs)
    }

    pub fn bad_gateway(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, kind, message)
    }

    pub fn gateway_timeout(message: impl Into<String>) -> Self {
        Self::new(StatusCode::GATEWAY_TIMEOUT, ErrorKind::Timeout, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, ErrorKind::Unknown, message)
    }

    pub fn gone(message: impl Into<String>) -> Self {
        Self::new(StatusCode::GONE, ErrorKind::Unknown, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (
            self.status,
            Json(ApiErrorResponse {
                error_code: self.error_code,
                message: self.message,
                retry_after_seconds: self.retry_after_seconds,
            }),
        )
            .into_response();
        if let Some(secs) = self.retry_after_seconds
            && let Ok(value) = axum::http::HeaderValue::from_str(&secs.to_string())
        {
            response.headers_mut().insert(axum::http::header::RETRY_AFTER, value);
        }
        response
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::NotFound { entity_type, id } => {
                ApiError::not_found(format!("{entity_type} with id '{id}' not found"))
            }
            Error::Validation(msg) => ApiError::bad_request(msg),
            Error::Configuration(msg) => ApiError::bad_request(msg),
            Error::RecentFail { retry_after_secs } => ApiError::recent_fail(
                format!("recent failure for this url, retry after {retry_after_secs}s"),
                retry_after_secs,
            ),
            Error::InProgress { stage, retry_after_secs } => ApiError::in_progress(stage, retry_after_secs),
            Error::Probe { kind, message } => match kind {
                ErrorKind::InvalidUrl => ApiError::invalid_url(message),
                ErrorKind::UnsupportedUrl | ErrorKind::InvalidInput => {
                    ApiError::new(StatusCode::BAD_REQUEST, kind, message)
                }
                ErrorKind::Timeout => ApiError::gateway_timeout(message),
                _ => ApiError::bad_gateway(kind, message),
            },
            Error::Download { kind, message } => ApiError::new(StatusCode::BAD_GATEWAY, kind, message),
            Error::Io(e) => {
                tracing::error!(error = %e, "io error");
                ApiError::internal("io error occurred")
            }
            other => {
                tracing::error!(error = %other, "unexpected error");
                ApiError::internal("an unexpected error occurred")
            }
        }
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_sets_status() {
        let err = ApiError::not_found("task not found");
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn recent_fail_carries_retry_after() {
        let err = ApiError::recent_fail("cooling down", 120);
        assert_eq!(err.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(err.retry_after_seconds, Some(120));
    }

    #[test]
    fn from_domain_recent_fail() {
        let domain_err = Error::RecentFail { retry_after_secs: 42 };
        let api_err: ApiError = domain_err.into();
        assert_eq!(api_err.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(api_err.retry_after_seconds, Some(42));
    }
}
