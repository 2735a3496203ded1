//! Bearer token authentication extractor.
//!
//! Accepts `Authorization: Bearer <token>` or `X-API-Key: <token>` and
//! resolves the token to a user id with the configured [`TokenVerifier`].

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use switchboard_core::realtime::TokenVerifier;

use crate::http::error::AppError;
use crate::state::AppState;

/// The verified caller of a REST request.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthUser {
    pub user_id: String,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_token(parts)?;
        let user_id = state.verifier.verify(&token).await?;
        Ok(AuthUser { user_id })
    }
}

/// Pull the raw token from the request headers.
fn extract_token(parts: &Parts) -> Result<String, AppError> {
    if let Some(auth) = parts.headers.get("authorization") {
        let auth_str = auth.to_str().map_err(|_| {
            AppError::Unauthorized("Invalid Authorization header encoding".to_string())
        })?;
        if let Some(token) = auth_str.strip_prefix("Bearer ") {
            return Ok(token.trim().to_string());
        }
    }

    if let Some(key) = parts.headers.get("x-api-key") {
        let key_str = key
            .to_str()
            .map_err(|_| AppError::Unauthorized("Invalid X-API-Key header encoding".to_string()))?;
        return Ok(key_str.trim().to_string());
    }

    Err(AppError::Unauthorized(
        "Missing token. Provide it via 'Authorization: Bearer <token>' or 'X-API-Key: <token>'."
            .to_string(),
    ))
}
