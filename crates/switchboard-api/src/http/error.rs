//! Application error type mapping to HTTP status codes and envelope format.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use switchboard_types::error::{AuthError, SessionError, StoreError};
use switchboard_types::rate_limit::RateLimitInfo;

use super::middleware::rate_limit::apply_rate_limit_headers;
use super::response::ApiResponse;

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    Session(SessionError),
    Store(StoreError),
    /// Missing or rejected bearer token.
    Unauthorized(String),
    Validation(String),
    RateLimited(RateLimitInfo),
}

impl From<SessionError> for AppError {
    fn from(e: SessionError) -> Self {
        AppError::Session(e)
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        AppError::Store(e)
    }
}

impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        AppError::Unauthorized(e.to_string())
    }
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::Session(SessionError::NotFound(id)) => (
                StatusCode::NOT_FOUND,
                "SESSION_NOT_FOUND",
                format!("Session '{id}' not found"),
            ),
            AppError::Session(SessionError::Forbidden { .. }) => (
                StatusCode::FORBIDDEN,
                "ACCESS_DENIED",
                "Session belongs to another user".to_string(),
            ),
            AppError::Session(SessionError::Store(e)) | AppError::Store(e) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "STORE_UNAVAILABLE",
                e.to_string(),
            ),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::RateLimited(info) => (
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMIT_EXCEEDED",
                format!(
                    "Rate limit exceeded: {} requests per {}s",
                    info.limit, info.window
                ),
            ),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        if status.is_server_error() {
            tracing::error!(code, error = %message, "Request failed");
        }

        let mut response = ApiResponse::failure(status, code, message).into_response();
        if let AppError::RateLimited(info) = &self {
            apply_rate_limit_headers(response.headers_mut(), info);
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_errors_map_to_client_statuses() {
        let not_found = AppError::from(SessionError::NotFound("s1".into())).into_response();
        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);

        let forbidden = AppError::from(SessionError::Forbidden {
            session_id: "s1".into(),
            user_id: "u2".into(),
        })
        .into_response();
        assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn store_failure_is_service_unavailable() {
        let resp = AppError::from(StoreError::Unavailable("down".into())).into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn rate_limited_carries_headers() {
        let info = RateLimitInfo {
            limit: 5,
            current: 5,
            remaining: 0,
            window: 60,
            reset_at: 1_700_000_000,
        };
        let resp = AppError::RateLimited(info).into_response();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(resp.headers()["x-ratelimit-limit"], "5");
        assert_eq!(resp.headers()["x-ratelimit-remaining"], "0");
    }
}
