//! Axum router configuration with middleware.
//!
//! REST routes live under `/api/v1/`. The WebSocket endpoint is `/ws`.
//! Middleware: rate limiting, CORS, tracing.

use axum::Router;
use axum::middleware;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::http::middleware::rate_limit::rate_limit_middleware;
use crate::state::AppState;

/// Build the complete router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/sessions/{id}", get(handlers::session::get_session))
        .route(
            "/sessions/{id}/close",
            post(handlers::session::close_session),
        )
        .route(
            "/sessions/{id}/messages",
            get(handlers::session::get_messages),
        )
        .route(
            "/users/me/sessions",
            get(handlers::session::list_my_sessions),
        );

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ws", get(handlers::ws::ws_handler))
        .nest("/api/v1", api_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    use switchboard_core::llm::{AiGateway, GatewayOptions};
    use switchboard_core::orchestrator::InMemoryMessageStore;
    use switchboard_core::store::MemoryStore;
    use switchboard_infra::auth::hash_token;
    use switchboard_infra::store::{AnyMessageStore, AnyStore};
    use switchboard_types::config::{AppConfig, TokenEntry};
    use switchboard_types::rate_limit::RouteLimit;
    use switchboard_types::session::AgentType;

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        for user in ["alice", "bob"] {
            config.auth.tokens.push(TokenEntry {
                user_id: user.to_string(),
                token_sha256: hash_token(&format!("{user}-token")),
            });
        }
        config
    }

    fn state_with(config: AppConfig) -> AppState {
        AppState::from_parts(
            config,
            AnyStore::Memory(MemoryStore::new()),
            AnyMessageStore::Memory(InMemoryMessageStore::new()),
            AiGateway::new(Vec::new(), GatewayOptions::default()),
        )
    }

    fn get_as(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_reports_store_and_counters() {
        let app = build_router(state_with(config()));

        let response = app.oneshot(get_as("/health", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-ratelimit-limit"));

        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["store"]["backend"], "memory");
        assert_eq!(body["connections"]["total"], 0);
        assert_eq!(body["active_sessions"], 0);
    }

    #[tokio::test]
    async fn session_routes_require_a_token() {
        let app = build_router(state_with(config()));

        let response = app
            .clone()
            .oneshot(get_as("/api/v1/users/me/sessions", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(get_as("/api/v1/users/me/sessions", Some("forged")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["errors"][0]["code"], "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn owner_can_read_and_close_a_session() {
        let state = state_with(config());
        let session = state
            .sessions
            .create("alice", AgentType::Ai, None)
            .await
            .unwrap();
        let app = build_router(state.clone());
        let uri = format!("/api/v1/sessions/{}", session.session_id);

        let response = app
            .clone()
            .oneshot(get_as(&uri, Some("alice-token")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["data"]["user_id"], "alice");

        let close = Request::builder()
            .method("POST")
            .uri(format!("{uri}/close"))
            .header("authorization", "Bearer alice-token")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(close).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["data"]["closed"], true);

        let response = app
            .oneshot(get_as(&uri, Some("alice-token")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn foreign_session_is_forbidden() {
        let state = state_with(config());
        let session = state
            .sessions
            .create("alice", AgentType::Ai, None)
            .await
            .unwrap();
        let app = build_router(state);

        let response = app
            .oneshot(get_as(
                &format!("/api/v1/sessions/{}/messages", session.session_id),
                Some("bob-token"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = body_json(response).await;
        assert_eq!(body["errors"][0]["code"], "ACCESS_DENIED");
    }

    #[tokio::test]
    async fn zero_page_size_is_rejected() {
        let state = state_with(config());
        let session = state
            .sessions
            .create("alice", AgentType::Ai, None)
            .await
            .unwrap();
        let app = build_router(state);

        let response = app
            .oneshot(get_as(
                &format!("/api/v1/sessions/{}/messages?limit=0", session.session_id),
                Some("alice-token"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn lists_only_callers_sessions() {
        let state = state_with(config());
        state.sessions.create("alice", AgentType::Ai, None).await.unwrap();
        state.sessions.create("alice", AgentType::Ai, None).await.unwrap();
        state.sessions.create("bob", AgentType::Ai, None).await.unwrap();
        let app = build_router(state);

        let response = app
            .oneshot(get_as("/api/v1/users/me/sessions", Some("alice-token")))
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn requests_over_the_limit_get_429() {
        let mut config = config();
        config.rate_limit.routes.push(RouteLimit {
            path: "/health".to_string(),
            limit: 2,
            window_secs: 60,
        });
        let app = build_router(state_with(config));

        for expected_remaining in [1, 0] {
            let response = app
                .clone()
                .oneshot(get_as("/health", Some("alice-token")))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(
                response.headers()["x-ratelimit-remaining"],
                expected_remaining.to_string().as_str()
            );
        }

        let response = app
            .clone()
            .oneshot(get_as("/health", Some("alice-token")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["x-ratelimit-limit"], "2");
        assert_eq!(response.headers()["x-ratelimit-window"], "60");
        let body = body_json(response).await;
        assert_eq!(body["errors"][0]["code"], "RATE_LIMIT_EXCEEDED");

        // Another client has its own window.
        let response = app
            .oneshot(get_as("/health", Some("bob-token")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn disabled_limiter_passes_everything() {
        let mut config = config();
        config.rate_limit.enabled = false;
        config.rate_limit.default.limit = 1;
        let app = build_router(state_with(config));

        for _ in 0..3 {
            let response = app.clone().oneshot(get_as("/health", None)).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert!(!response.headers().contains_key("x-ratelimit-limit"));
        }
    }
}
