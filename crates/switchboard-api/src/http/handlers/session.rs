//! Session HTTP handlers.
//!
//! Endpoints:
//! - GET  /api/v1/sessions/{id}          - Get a session
//! - POST /api/v1/sessions/{id}/close    - Close a session
//! - GET  /api/v1/sessions/{id}/messages - Page through its messages
//! - GET  /api/v1/users/me/sessions      - The caller's live sessions

use std::time::Instant;

use axum::extract::{Path, Query, State};
use serde::Deserialize;
use serde_json::json;

use switchboard_core::orchestrator::MessageStore;
use switchboard_types::chat::ChatMessage;
use switchboard_types::session::Session;

use crate::http::error::AppError;
use crate::http::extractors::auth::AuthUser;
use crate::http::response::ApiResponse;
use crate::state::AppState;

const MAX_PAGE: usize = 200;

#[derive(Debug, Deserialize)]
pub struct MessageListQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

/// GET /api/v1/sessions/{id}
pub async fn get_session(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(session_id): Path<String>,
) -> Result<ApiResponse<Session>, AppError> {
    let start = Instant::now();
    let session = state
        .sessions
        .validate_access(&session_id, &auth.user_id)
        .await?;
    Ok(ApiResponse::success(session, start))
}

/// POST /api/v1/sessions/{id}/close
pub async fn close_session(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(session_id): Path<String>,
) -> Result<ApiResponse<serde_json::Value>, AppError> {
    let start = Instant::now();
    state
        .sessions
        .validate_access(&session_id, &auth.user_id)
        .await?;
    let closed = state.sessions.close(&session_id).await?;

    tracing::info!(session_id = %session_id, user_id = %auth.user_id, "Session closed via API");
    Ok(ApiResponse::success(
        json!({ "session_id": session_id, "closed": closed }),
        start,
    ))
}

/// GET /api/v1/sessions/{id}/messages?limit=&offset=
pub async fn get_messages(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(session_id): Path<String>,
    Query(query): Query<MessageListQuery>,
) -> Result<ApiResponse<Vec<ChatMessage>>, AppError> {
    let start = Instant::now();
    if query.limit == 0 {
        return Err(AppError::Validation("limit must be positive".to_string()));
    }
    state
        .sessions
        .validate_access(&session_id, &auth.user_id)
        .await?;

    let messages = state
        .orchestrator
        .messages()
        .history(&session_id, query.limit.min(MAX_PAGE), query.offset)
        .await?;
    Ok(ApiResponse::success(messages, start))
}

/// GET /api/v1/users/me/sessions
pub async fn list_my_sessions(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<ApiResponse<Vec<Session>>, AppError> {
    let start = Instant::now();
    let sessions = state.sessions.list_by_user(&auth.user_id).await?;
    Ok(ApiResponse::success(sessions, start))
}
